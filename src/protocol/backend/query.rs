//! Query-related backend messages.

use std::mem::size_of;

use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::error::{Error, Result};
use crate::protocol::codec::read_cstring;
use crate::protocol::types::{FormatCode, I16BE, I32BE, Oid, U16BE, U32BE};

/// RowDescription message header.
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
#[repr(C, packed)]
pub struct RowDescriptionHead {
    /// Number of fields in the row
    pub num_fields: U16BE,
}

/// Fixed-size tail of a field description (18 bytes).
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
#[repr(C, packed)]
pub struct FieldDescriptionTail {
    /// Table OID (0 if not a table column)
    pub table_oid: U32BE,
    /// Column attribute number (0 if not a table column)
    pub column_id: I16BE,
    /// Data type OID
    pub type_oid: U32BE,
    /// Type size (-1 for variable, -2 for null-terminated)
    pub type_size: I16BE,
    /// Type modifier (type-specific, -1 if none)
    pub type_modifier: I32BE,
    /// Format code (0=text, 1=binary)
    pub format: U16BE,
}

/// Field description within a RowDescription.
///
/// The name is kept as raw bytes; column names are not required to be
/// UTF-8 on the wire.
#[derive(Debug, Clone, Copy)]
pub struct FieldDescription<'a> {
    /// Field name, raw bytes
    pub name: &'a [u8],
    /// Fixed-size metadata
    pub tail: &'a FieldDescriptionTail,
}

impl FieldDescription<'_> {
    /// Field name, lossily decoded for display.
    pub fn name_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(self.name)
    }

    /// Table OID (0 if not a table column)
    pub fn table_oid(&self) -> Oid {
        self.tail.table_oid.get()
    }

    /// Column attribute number (0 if not a table column)
    pub fn column_id(&self) -> i16 {
        self.tail.column_id.get()
    }

    /// Data type OID
    pub fn type_oid(&self) -> Oid {
        self.tail.type_oid.get()
    }

    /// Type size (-1 for variable, -2 for null-terminated)
    pub fn type_size(&self) -> i16 {
        self.tail.type_size.get()
    }

    /// Type modifier (type-specific, -1 if none)
    pub fn type_modifier(&self) -> i32 {
        self.tail.type_modifier.get()
    }

    /// Format code (0=text, 1=binary)
    pub fn format(&self) -> FormatCode {
        FormatCode::from_u16(self.tail.format.get())
    }
}

/// RowDescription message - describes the columns in a result set.
#[derive(Debug)]
pub struct RowDescription<'a> {
    fields: Vec<FieldDescription<'a>>,
}

impl<'a> RowDescription<'a> {
    /// Parse a RowDescription message from payload bytes.
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (head, mut data) = payload
            .split_at_checked(2)
            .ok_or_else(|| Error::Protocol("RowDescription: truncated header".into()))?;
        let head = RowDescriptionHead::ref_from_bytes(head)
            .map_err(|e| Error::Protocol(format!("RowDescription header: {e:?}")))?;

        const TAIL_SIZE: usize = size_of::<FieldDescriptionTail>();

        let num_fields = head.num_fields.get() as usize;
        let mut fields = Vec::with_capacity(num_fields);

        for _ in 0..num_fields {
            let (name, rest) = read_cstring(data)?;
            let (tail_bytes, rest) = rest
                .split_at_checked(TAIL_SIZE)
                .ok_or_else(|| Error::Protocol("FieldDescription: truncated tail".into()))?;
            let tail = FieldDescriptionTail::ref_from_bytes(tail_bytes)
                .map_err(|e| Error::Protocol(format!("FieldDescription tail: {e:?}")))?;

            fields.push(FieldDescription { name, tail });
            data = rest;
        }

        Ok(Self { fields })
    }

    /// Get the number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Check if there are no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Get field descriptions.
    pub fn fields(&self) -> &[FieldDescription<'a>] {
        &self.fields
    }

    /// Iterate over field descriptions.
    pub fn iter(&self) -> impl Iterator<Item = &FieldDescription<'a>> {
        self.fields.iter()
    }

    /// Index of the column with the given name, if present.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name.as_bytes())
    }
}

/// DataRow message - a single row of data.
///
/// Column values are slices into the receive buffer; callers must copy
/// before the next message is read.
#[derive(Debug, Clone, Copy)]
pub struct DataRow<'a> {
    num_columns: u16,
    columns_data: &'a [u8],
}

impl<'a> DataRow<'a> {
    /// Parse a DataRow message from payload bytes.
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (head, columns_data) = payload
            .split_at_checked(2)
            .ok_or_else(|| Error::Protocol("DataRow: truncated header".into()))?;

        Ok(Self {
            num_columns: u16::from_be_bytes([head[0], head[1]]),
            columns_data,
        })
    }

    /// Get the number of columns.
    pub fn len(&self) -> usize {
        self.num_columns as usize
    }

    /// Check if there are no columns.
    pub fn is_empty(&self) -> bool {
        self.num_columns == 0
    }

    /// Iterate over column values. `None` represents SQL NULL.
    pub fn iter(&self) -> DataRowIter<'a> {
        DataRowIter {
            remaining: self.columns_data,
        }
    }

    /// Get a column value by index.
    pub fn get(&self, index: usize) -> Option<Option<&'a [u8]>> {
        self.iter().nth(index)
    }
}

/// Iterator over column values in a DataRow.
#[derive(Debug, Clone)]
pub struct DataRowIter<'a> {
    remaining: &'a [u8],
}

impl<'a> Iterator for DataRowIter<'a> {
    type Item = Option<&'a [u8]>;

    fn next(&mut self) -> Option<Self::Item> {
        let len;
        (len, self.remaining) = self.remaining.split_at_checked(4)?;
        let len = i32::from_be_bytes([len[0], len[1], len[2], len[3]]);

        if len == -1 {
            Some(None)
        } else {
            let value;
            (value, self.remaining) = self.remaining.split_at_checked(len as usize)?;
            Some(Some(value))
        }
    }
}

/// Operation kind parsed from a command tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Insert,
    Update,
    Delete,
    Select,
    Copy,
    Move,
    Fetch,
    Merge,
    /// Anything else (DDL, utility commands, ...)
    Other,
}

/// Parsed view of a CommandComplete tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandTag<'a> {
    /// Operation kind
    pub kind: CommandKind,
    /// Rows affected, if the tag carries a count
    pub rows_affected: Option<u64>,
    /// The raw tag text
    pub raw: &'a str,
}

/// CommandComplete message - successful completion of a command.
///
/// The tag is an opaque byte string like "SELECT 5" or "INSERT 0 1";
/// [`CommandComplete::tag`] parses it on demand.
#[derive(Debug, Clone, Copy)]
pub struct CommandComplete<'a> {
    /// Command tag text
    pub tag: &'a str,
}

impl<'a> CommandComplete<'a> {
    /// Parse a CommandComplete message from payload bytes.
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (tag, _) = crate::protocol::codec::read_cstr(payload)?;
        Ok(Self { tag })
    }

    /// Parse the tag into operation kind and rows affected.
    pub fn parse_tag(&self) -> CommandTag<'a> {
        let mut words = self.tag.split_whitespace();
        let kind = match words.next() {
            Some("INSERT") => CommandKind::Insert,
            Some("UPDATE") => CommandKind::Update,
            Some("DELETE") => CommandKind::Delete,
            Some("SELECT") => CommandKind::Select,
            Some("COPY") => CommandKind::Copy,
            Some("MOVE") => CommandKind::Move,
            Some("FETCH") => CommandKind::Fetch,
            Some("MERGE") => CommandKind::Merge,
            _ => CommandKind::Other,
        };
        // INSERT tags are "INSERT <oid> <rows>"; the rest keep the count last
        let rows_affected = match kind {
            CommandKind::Other => None,
            _ => self.tag.rsplit(' ').next().and_then(|w| w.parse().ok()),
        };
        CommandTag {
            kind,
            rows_affected,
            raw: self.tag,
        }
    }

    /// Rows affected, if the tag carries a count.
    pub fn rows_affected(&self) -> Option<u64> {
        self.parse_tag().rows_affected
    }
}

/// EmptyQueryResponse message - response to an empty query string.
#[derive(Debug, Clone, Copy)]
pub struct EmptyQueryResponse;

impl EmptyQueryResponse {
    /// Parse an EmptyQueryResponse message from payload bytes.
    pub fn parse(_payload: &[u8]) -> Result<Self> {
        Ok(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row_description_payload() -> Vec<u8> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&1_u16.to_be_bytes());
        payload.extend_from_slice(b"?column?\0");
        payload.extend_from_slice(&0_u32.to_be_bytes()); // table oid
        payload.extend_from_slice(&0_i16.to_be_bytes()); // column id
        payload.extend_from_slice(&23_u32.to_be_bytes()); // int4
        payload.extend_from_slice(&4_i16.to_be_bytes()); // size
        payload.extend_from_slice(&(-1_i32).to_be_bytes()); // modifier
        payload.extend_from_slice(&0_u16.to_be_bytes()); // text format
        payload
    }

    #[test]
    fn row_description() {
        let payload = row_description_payload();
        let desc = RowDescription::parse(&payload).unwrap();
        assert_eq!(desc.len(), 1);
        let field = &desc.fields()[0];
        assert_eq!(field.name, b"?column?");
        assert_eq!(field.type_oid(), 23);
        assert_eq!(field.type_size(), 4);
        assert_eq!(field.type_modifier(), -1);
        assert_eq!(field.format(), FormatCode::Text);
        assert_eq!(desc.position("?column?"), Some(0));
    }

    #[test]
    fn data_row_nulls_and_values() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&3_u16.to_be_bytes());
        payload.extend_from_slice(&2_i32.to_be_bytes());
        payload.extend_from_slice(b"42");
        payload.extend_from_slice(&(-1_i32).to_be_bytes());
        payload.extend_from_slice(&0_i32.to_be_bytes());

        let row = DataRow::parse(&payload).unwrap();
        assert_eq!(row.len(), 3);
        let values: Vec<_> = row.iter().collect();
        assert_eq!(values[0], Some(&b"42"[..]));
        assert_eq!(values[1], None);
        assert_eq!(values[2], Some(&b""[..]));
    }

    #[test]
    fn command_tags() {
        let select = CommandComplete { tag: "SELECT 5" }.parse_tag();
        assert_eq!(select.kind, CommandKind::Select);
        assert_eq!(select.rows_affected, Some(5));

        let insert = CommandComplete { tag: "INSERT 0 1" }.parse_tag();
        assert_eq!(insert.kind, CommandKind::Insert);
        assert_eq!(insert.rows_affected, Some(1));

        let ddl = CommandComplete { tag: "CREATE TABLE" }.parse_tag();
        assert_eq!(ddl.kind, CommandKind::Other);
        assert_eq!(ddl.rows_affected, None);
    }
}
