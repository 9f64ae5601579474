//! PostgreSQL binary COPY format.
//!
//! Layout: the signature `PGCOPY\n\xff\r\n\0`, an `i32` flags field
//! (bit 16 = OIDs present; never written by this client), an `i32`
//! header extension length, then per-row `i16 field_count` with
//! `i32 len || bytes` per field (-1 = NULL), then an `i16 -1` trailer.

use crate::error::{Error, Result};
use crate::protocol::codec::write_value;
use crate::protocol::types::{FormatCode, Oid};
use crate::types::{ConnInfo, Value};

/// Fixed 11-byte signature opening a binary COPY stream.
pub const BINARY_SIGNATURE: &[u8; 11] = b"PGCOPY\n\xff\r\n\0";

/// Encodes typed rows into binary COPY chunks.
///
/// The encoder is transport-agnostic; the driver forwards the produced
/// chunks as CopyData frames.
pub struct BinaryCopyEncoder {
    column_oids: Vec<Oid>,
    header_written: bool,
    trailer_written: bool,
}

impl BinaryCopyEncoder {
    /// Create an encoder for rows with the given column types.
    pub fn new(column_oids: Vec<Oid>) -> Self {
        Self {
            column_oids,
            header_written: false,
            trailer_written: false,
        }
    }

    /// Write the stream header: signature, flags, extension length.
    pub fn write_header(&mut self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(BINARY_SIGNATURE);
        buf.extend_from_slice(&0_i32.to_be_bytes()); // flags
        buf.extend_from_slice(&0_i32.to_be_bytes()); // header extension
        self.header_written = true;
    }

    /// Encode one row.
    ///
    /// Values are encoded in binary format through the registry; NULL
    /// slots become a -1 length.
    pub fn write_row(&mut self, info: &ConnInfo, values: &[Value], buf: &mut Vec<u8>) -> Result<()> {
        if !self.header_written {
            self.write_header(buf);
        }
        if values.len() != self.column_oids.len() {
            return Err(Error::Encode(format!(
                "row has {} values but the copy has {} columns",
                values.len(),
                self.column_oids.len()
            )));
        }

        buf.extend_from_slice(&(values.len() as i16).to_be_bytes());
        for (&oid, value) in self.column_oids.iter().zip(values) {
            match value {
                Value::Null => write_value(buf, None),
                Value::Undefined => {
                    return Err(Error::Encode("cannot copy an undefined value".into()));
                }
                present => info.encode(oid, FormatCode::Binary, present, buf)?,
            }
        }
        Ok(())
    }

    /// Write the `i16 -1` trailer ending the stream.
    pub fn write_trailer(&mut self, buf: &mut Vec<u8>) {
        if !self.header_written {
            self.write_header(buf);
        }
        if !self.trailer_written {
            buf.extend_from_slice(&(-1_i16).to_be_bytes());
            self.trailer_written = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::oid;

    #[test]
    fn header_rows_trailer() {
        let info = ConnInfo::new();
        let mut encoder = BinaryCopyEncoder::new(vec![oid::INT4, oid::TEXT]);
        let mut buf = Vec::new();

        encoder
            .write_row(&info, &[Value::from(7_i32), Value::from("seven")], &mut buf)
            .unwrap();
        encoder
            .write_row(&info, &[Value::from(8_i32), Value::Null], &mut buf)
            .unwrap();
        encoder.write_trailer(&mut buf);

        assert!(buf.starts_with(BINARY_SIGNATURE));
        // flags and extension
        assert_eq!(&buf[11..19], &[0; 8]);

        // First row: 2 fields, i32 4 + int, i32 5 + "seven"
        let row = &buf[19..];
        assert_eq!(&row[0..2], &2_i16.to_be_bytes());
        assert_eq!(&row[2..6], &4_i32.to_be_bytes());
        assert_eq!(&row[6..10], &7_i32.to_be_bytes());
        assert_eq!(&row[10..14], &5_i32.to_be_bytes());
        assert_eq!(&row[14..19], b"seven");

        // Second row: NULL second field
        let row2 = &row[19..];
        assert_eq!(&row2[0..2], &2_i16.to_be_bytes());
        assert_eq!(&row2[10..14], &(-1_i32).to_be_bytes());

        assert!(buf.ends_with(&(-1_i16).to_be_bytes()));
    }

    #[test]
    fn column_count_enforced() {
        let info = ConnInfo::new();
        let mut encoder = BinaryCopyEncoder::new(vec![oid::INT4]);
        let mut buf = Vec::new();
        assert!(encoder
            .write_row(&info, &[Value::from(1_i32), Value::from(2_i32)], &mut buf)
            .is_err());
    }

    #[test]
    fn trailer_written_once() {
        let mut encoder = BinaryCopyEncoder::new(vec![]);
        let mut buf = Vec::new();
        encoder.write_trailer(&mut buf);
        encoder.write_trailer(&mut buf);
        let expected = BINARY_SIGNATURE.len() + 8 + 2;
        assert_eq!(buf.len(), expected);
    }
}
