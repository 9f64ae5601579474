//! Composite (record) codec.
//!
//! Binary form: `i32 field_count || (u32 field_oid, i32 len, bytes)*`.
//! Text form: `(f1,f2,...)` where an absent field is NULL, an empty
//! string is `""`, and quoting is triggered by `,`, `(`, `)`, `"`, `\`
//! or leading/trailing space.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::protocol::codec::{read_i32, read_u32, read_value, write_value};
use crate::protocol::types::{FormatCode, Oid, oid};

use super::{Codec, CompositeField, PgValue, TypeRegistry, Value};

/// Composite codec.
///
/// When built with [`CompositeCodec::with_fields`] the field codecs are
/// fixed at registration time; the generic `record` codec resolves field
/// codecs from the shared registry using the OIDs on the wire.
pub struct CompositeCodec {
    fields: Option<Vec<(Oid, Arc<dyn Codec>)>>,
}

impl CompositeCodec {
    /// Generic record codec: field types discovered from the payload.
    pub fn new() -> Self {
        Self { fields: None }
    }

    /// Codec for a known composite type with fixed field types.
    pub fn with_fields(fields: Vec<(Oid, Arc<dyn Codec>)>) -> Self {
        Self {
            fields: Some(fields),
        }
    }

    fn field_codec(&self, index: usize, wire_oid: Oid) -> Arc<dyn Codec> {
        match &self.fields {
            Some(fields) => match fields.get(index) {
                Some((_, codec)) => Arc::clone(codec),
                None => super::shared_registry().codec_for(wire_oid),
            },
            None => super::shared_registry().codec_for(wire_oid),
        }
    }
}

impl Default for CompositeCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Codec for CompositeCodec {
    fn name(&self) -> &str {
        "record"
    }

    fn preferred_format(&self) -> FormatCode {
        FormatCode::Binary
    }

    fn decode_text(&self, bytes: &[u8]) -> Result<PgValue> {
        let s = simdutf8::compat::from_utf8(bytes)
            .map_err(|e| Error::Decode(format!("invalid UTF-8 in record: {e}")))?;
        let raw_fields = parse_composite_text(s)?;

        let mut fields = Vec::with_capacity(raw_fields.len());
        for (index, raw) in raw_fields.into_iter().enumerate() {
            let (field_oid, value) = match raw {
                None => {
                    let field_oid = self.declared_oid(index);
                    (field_oid, Value::Null)
                }
                Some(text) => {
                    let field_oid = self.declared_oid(index);
                    let codec = self.field_codec(index, field_oid);
                    (field_oid, Value::Present(codec.decode_text(text.as_bytes())?))
                }
            };
            fields.push(CompositeField {
                oid: field_oid,
                value,
            });
        }
        Ok(PgValue::Composite(fields))
    }

    fn decode_binary(&self, bytes: &[u8]) -> Result<PgValue> {
        let (nfields, mut rest) = read_i32(bytes)?;
        if nfields < 0 {
            return Err(Error::Decode(format!("invalid record field count: {nfields}")));
        }

        let mut fields = Vec::with_capacity(nfields as usize);
        for index in 0..nfields as usize {
            let (field_oid, r) = read_u32(rest)?;
            let (payload, r) = read_value(r)?;
            rest = r;
            let value = match payload {
                None => Value::Null,
                Some(bytes) => {
                    let codec = self.field_codec(index, field_oid);
                    Value::Present(codec.decode_binary(bytes)?)
                }
            };
            fields.push(CompositeField {
                oid: field_oid,
                value,
            });
        }
        if !rest.is_empty() {
            return Err(Error::Decode("trailing bytes after record fields".into()));
        }
        Ok(PgValue::Composite(fields))
    }

    fn encode_text(&self, value: &PgValue, buf: &mut Vec<u8>) -> Result<()> {
        let PgValue::Composite(fields) = value else {
            return Err(Error::type_mismatch(value.kind(), "record"));
        };

        let mut out = String::from("(");
        for (index, field) in fields.iter().enumerate() {
            if index > 0 {
                out.push(',');
            }
            match &field.value {
                Value::Null => {} // NULL is the absent field
                Value::Present(inner) => {
                    let codec = self.field_codec(index, field.oid);
                    let mut payload = Vec::new();
                    codec.encode_text(inner, &mut payload)?;
                    let text = String::from_utf8(payload)
                        .map_err(|e| Error::Encode(format!("non-UTF-8 record field: {e}")))?;
                    write_quoted_field(&text, &mut out);
                }
                Value::Undefined => {
                    return Err(Error::Encode("cannot encode an undefined record field".into()));
                }
            }
        }
        out.push(')');
        buf.extend_from_slice(out.as_bytes());
        Ok(())
    }

    fn encode_binary(&self, value: &PgValue, buf: &mut Vec<u8>) -> Result<()> {
        let PgValue::Composite(fields) = value else {
            return Err(Error::type_mismatch(value.kind(), "record"));
        };

        buf.extend_from_slice(&(fields.len() as i32).to_be_bytes());
        for (index, field) in fields.iter().enumerate() {
            buf.extend_from_slice(&field.oid.to_be_bytes());
            match &field.value {
                Value::Null => write_value(buf, None),
                Value::Present(inner) => {
                    let codec = self.field_codec(index, field.oid);
                    let mut payload = Vec::new();
                    codec.encode_binary(inner, &mut payload)?;
                    write_value(buf, Some(&payload));
                }
                Value::Undefined => {
                    return Err(Error::Encode("cannot encode an undefined record field".into()));
                }
            }
        }
        Ok(())
    }
}

impl CompositeCodec {
    fn declared_oid(&self, index: usize) -> Oid {
        match &self.fields {
            Some(fields) => fields.get(index).map(|(oid, _)| *oid).unwrap_or(oid::UNKNOWN),
            None => oid::UNKNOWN,
        }
    }
}

/// Quote a composite field if its text form needs it.
fn write_quoted_field(text: &str, out: &mut String) {
    let needs_quotes = text.is_empty()
        || text.starts_with(' ')
        || text.ends_with(' ')
        || text
            .chars()
            .any(|c| matches!(c, ',' | '(' | ')' | '"' | '\\'));

    if !needs_quotes {
        out.push_str(text);
        return;
    }

    out.push('"');
    for c in text.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
}

/// Parse `(f1,f2,...)` into raw field strings (`None` for NULL).
pub fn parse_composite_text(s: &str) -> Result<Vec<Option<String>>> {
    let s = s.trim();
    let err = |what: &str| Error::Decode(format!("invalid record literal ({what}): {s:?}"));

    let body = s
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .ok_or_else(|| err("missing parentheses"))?;

    // "()" is a single NULL field in PostgreSQL's output syntax
    let mut fields = Vec::new();
    let bytes = body.as_bytes();
    let mut pos = 0;
    loop {
        let mut quoted = false;
        let mut value = Vec::new();
        if bytes.get(pos) == Some(&b'"') {
            quoted = true;
            pos += 1;
            loop {
                match bytes.get(pos) {
                    Some(b'\\') => {
                        pos += 1;
                        let escaped = bytes.get(pos).ok_or_else(|| err("truncated escape"))?;
                        value.push(*escaped);
                        pos += 1;
                    }
                    // "" inside quotes is an escaped quote
                    Some(b'"') if bytes.get(pos + 1) == Some(&b'"') => {
                        value.push(b'"');
                        pos += 2;
                    }
                    Some(b'"') => {
                        pos += 1;
                        break;
                    }
                    Some(byte) => {
                        value.push(*byte);
                        pos += 1;
                    }
                    None => return Err(err("unterminated quoted field")),
                }
            }
        } else {
            while let Some(byte) = bytes.get(pos) {
                if *byte == b',' {
                    break;
                }
                value.push(*byte);
                pos += 1;
            }
        }

        if !quoted && value.is_empty() {
            fields.push(None);
        } else {
            let text =
                String::from_utf8(value).map_err(|e| err(&format!("bad UTF-8: {e}")))?;
            fields.push(Some(text));
        }

        match bytes.get(pos) {
            None => break,
            Some(b',') => pos += 1,
            _ => return Err(err("expected ',' between fields")),
        }
    }

    Ok(fields)
}

/// Register the generic record codec.
pub fn register(registry: &mut TypeRegistry) {
    registry.register(oid::RECORD, Arc::new(CompositeCodec::new()));
}
