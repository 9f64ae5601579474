//! COPY and function call backend messages.

use crate::error::{Error, Result};
use crate::protocol::codec::{read_u8, read_u16, read_value};
use crate::protocol::types::FormatCode;

/// Shared layout of CopyInResponse/CopyOutResponse/CopyBothResponse.
fn parse_copy_response(payload: &[u8]) -> Result<(FormatCode, Vec<FormatCode>)> {
    let (format_byte, rest) = read_u8(payload)?;
    let format = FormatCode::from_u16(format_byte as u16);

    let (num_columns, mut rest) = read_u16(rest)?;
    let mut column_formats = Vec::with_capacity(num_columns as usize);
    for _ in 0..num_columns {
        let (fmt, remaining) = read_u16(rest)?;
        column_formats.push(FormatCode::from_u16(fmt));
        rest = remaining;
    }

    Ok((format, column_formats))
}

/// CopyInResponse message - server is ready to receive COPY data.
#[derive(Debug, Clone)]
pub struct CopyInResponse {
    /// Overall format (0=text, 1=binary)
    pub format: FormatCode,
    /// Per-column format codes
    pub column_formats: Vec<FormatCode>,
}

impl CopyInResponse {
    /// Parse a CopyInResponse message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (format, column_formats) = parse_copy_response(payload)?;
        Ok(Self {
            format,
            column_formats,
        })
    }

    /// Check if binary format is used.
    pub fn is_binary(&self) -> bool {
        matches!(self.format, FormatCode::Binary)
    }
}

/// CopyOutResponse message - server is about to send COPY data.
#[derive(Debug, Clone)]
pub struct CopyOutResponse {
    /// Overall format (0=text, 1=binary)
    pub format: FormatCode,
    /// Per-column format codes
    pub column_formats: Vec<FormatCode>,
}

impl CopyOutResponse {
    /// Parse a CopyOutResponse message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (format, column_formats) = parse_copy_response(payload)?;
        Ok(Self {
            format,
            column_formats,
        })
    }

    /// Check if binary format is used.
    pub fn is_binary(&self) -> bool {
        matches!(self.format, FormatCode::Binary)
    }
}

/// CopyBothResponse message - bidirectional COPY (streaming replication).
#[derive(Debug, Clone)]
pub struct CopyBothResponse {
    /// Overall format (0=text, 1=binary)
    pub format: FormatCode,
    /// Per-column format codes
    pub column_formats: Vec<FormatCode>,
}

impl CopyBothResponse {
    /// Parse a CopyBothResponse message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (format, column_formats) = parse_copy_response(payload)?;
        Ok(Self {
            format,
            column_formats,
        })
    }
}

/// CopyData message - COPY payload chunk (both directions).
#[derive(Debug, Clone, Copy)]
pub struct CopyData<'a> {
    /// Raw data bytes
    pub data: &'a [u8],
}

impl<'a> CopyData<'a> {
    /// Parse a CopyData message from payload bytes.
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        Ok(Self { data: payload })
    }
}

/// CopyDone message - COPY stream finished.
#[derive(Debug, Clone, Copy)]
pub struct CopyDone;

impl CopyDone {
    /// Parse a CopyDone message from payload bytes.
    pub fn parse(_payload: &[u8]) -> Result<Self> {
        Ok(Self)
    }
}

/// FunctionCallResponse message - result of a FunctionCall.
#[derive(Debug, Clone, Copy)]
pub struct FunctionCallResponse<'a> {
    /// Result value, `None` for SQL NULL
    pub value: Option<&'a [u8]>,
}

impl<'a> FunctionCallResponse<'a> {
    /// Parse a FunctionCallResponse message from payload bytes.
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (value, rest) = read_value(payload)?;
        if !rest.is_empty() {
            return Err(Error::Protocol(
                "FunctionCallResponse: trailing bytes".into(),
            ));
        }
        Ok(Self { value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_in_response() {
        let mut payload = vec![1u8];
        payload.extend_from_slice(&2_u16.to_be_bytes());
        payload.extend_from_slice(&1_u16.to_be_bytes());
        payload.extend_from_slice(&1_u16.to_be_bytes());

        let resp = CopyInResponse::parse(&payload).unwrap();
        assert!(resp.is_binary());
        assert_eq!(resp.column_formats, vec![FormatCode::Binary; 2]);
    }

    #[test]
    fn function_call_response() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&4_i32.to_be_bytes());
        payload.extend_from_slice(&7_i32.to_be_bytes());
        let resp = FunctionCallResponse::parse(&payload).unwrap();
        assert_eq!(resp.value, Some(&7_i32.to_be_bytes()[..]));

        let null = (-1_i32).to_be_bytes();
        assert!(FunctionCallResponse::parse(&null).unwrap().value.is_none());
    }
}
