//! Error and notice response messages.

use crate::error::{Error, Result, ServerError};
use crate::protocol::codec::read_cstr;

/// Parse the shared ErrorResponse/NoticeResponse field list.
///
/// Fields are `u8 code || NUL string` pairs terminated by a zero byte.
/// Order and unrecognized codes are preserved so the payload can be
/// re-encoded byte-equal.
fn parse_fields(payload: &[u8]) -> Result<ServerError> {
    let mut fields = Vec::new();
    let mut data = payload;

    while let Some((&code, rest)) = data.split_first() {
        if code == 0 {
            break;
        }
        let (value, rest) = read_cstr(rest)?;
        fields.push((code, value.to_string()));
        data = rest;
    }

    Ok(ServerError::new(fields))
}

/// ErrorResponse message - error from the server.
#[derive(Debug, Clone)]
pub struct ErrorResponse(pub ServerError);

impl ErrorResponse {
    /// Parse an ErrorResponse message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        Ok(Self(parse_fields(payload)?))
    }

    /// Convert to an Error.
    pub fn into_error(self) -> Error {
        Error::Server(self.0)
    }
}

/// NoticeResponse message - non-fatal warning/info from the server.
#[derive(Debug, Clone)]
pub struct NoticeResponse(pub ServerError);

impl NoticeResponse {
    /// Parse a NoticeResponse message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        Ok(Self(parse_fields(payload)?))
    }
}
