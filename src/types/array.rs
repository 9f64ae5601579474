//! Generic array codec.
//!
//! Arrays are multi-dimensional but always rectangular; the flattened
//! element count equals the product of the dimension lengths. The codec
//! is generic over an element codec and handles both wire forms:
//!
//! - text: `{a,b,"c,d",NULL}` with optional `[lower:upper]=` dimension
//!   prefixes and PostgreSQL quoting rules
//! - binary: `i32 ndims || i32 contains_null || u32 element_oid ||
//!   (i32 len, i32 lower)* || framed elements`

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::protocol::codec::{read_i32, read_u32, read_value, write_value};
use crate::protocol::types::{FormatCode, Oid, array_element, oid};

use super::{ArrayDimension, ArrayValue, Codec, PgValue, TypeRegistry, Value};

/// Hard cap matching PostgreSQL's MAXDIM.
const MAX_DIMENSIONS: usize = 6;

/// Array codec delegating per element.
pub struct ArrayCodec {
    element_oid: Oid,
    element: Arc<dyn Codec>,
}

impl ArrayCodec {
    /// Create an array codec over an element codec.
    pub fn new(element_oid: Oid, element: Arc<dyn Codec>) -> Self {
        Self {
            element_oid,
            element,
        }
    }

    fn extract<'v>(&self, value: &'v PgValue) -> Result<&'v ArrayValue> {
        match value {
            PgValue::Array(arr) => Ok(arr),
            other => Err(Error::type_mismatch(other.kind(), "array")),
        }
    }
}

impl Codec for ArrayCodec {
    fn name(&self) -> &str {
        "array"
    }

    fn preferred_format(&self) -> FormatCode {
        self.element.preferred_format()
    }

    fn decode_text(&self, bytes: &[u8]) -> Result<PgValue> {
        let s = simdutf8::compat::from_utf8(bytes)
            .map_err(|e| Error::Decode(format!("invalid UTF-8 in array: {e}")))?;
        let (dims, raw_elements) = parse_array_text(s)?;

        let mut elements = Vec::with_capacity(raw_elements.len());
        for raw in raw_elements {
            match raw {
                None => elements.push(Value::Null),
                Some(text) => {
                    elements.push(Value::Present(self.element.decode_text(text.as_bytes())?));
                }
            }
        }

        Ok(PgValue::Array(ArrayValue {
            element_oid: self.element_oid,
            dims,
            elements,
        }))
    }

    fn decode_binary(&self, bytes: &[u8]) -> Result<PgValue> {
        let (ndims, rest) = read_i32(bytes)?;
        let (_contains_null, rest) = read_i32(rest)?;
        let (element_oid, mut rest) = read_u32(rest)?;

        if !(0..=MAX_DIMENSIONS as i32).contains(&ndims) {
            return Err(Error::Decode(format!("invalid array dimensions: {ndims}")));
        }

        let mut dims = Vec::with_capacity(ndims as usize);
        let mut expected: usize = 1;
        for _ in 0..ndims {
            let (len, r) = read_i32(rest)?;
            let (lower_bound, r) = read_i32(r)?;
            if len < 0 {
                return Err(Error::Decode(format!("negative array dimension: {len}")));
            }
            expected = expected
                .checked_mul(len as usize)
                .ok_or_else(|| Error::Decode("array too large".into()))?;
            dims.push(ArrayDimension { len, lower_bound });
            rest = r;
        }
        if ndims == 0 {
            expected = 0;
        }

        let mut elements = Vec::with_capacity(expected);
        for _ in 0..expected {
            let (payload, r) = read_value(rest)?;
            rest = r;
            match payload {
                None => elements.push(Value::Null),
                Some(bytes) => {
                    elements.push(Value::Present(self.element.decode_binary(bytes)?));
                }
            }
        }
        if !rest.is_empty() {
            return Err(Error::Decode("trailing bytes after array elements".into()));
        }

        Ok(PgValue::Array(ArrayValue {
            element_oid,
            dims,
            elements,
        }))
    }

    fn encode_text(&self, value: &PgValue, buf: &mut Vec<u8>) -> Result<()> {
        let arr = self.extract(value)?;
        check_shape(arr)?;

        let mut out = String::new();
        if arr.dims.iter().any(|d| d.lower_bound != 1) {
            for dim in &arr.dims {
                out.push_str(&format!(
                    "[{}:{}]",
                    dim.lower_bound,
                    dim.lower_bound + dim.len - 1
                ));
            }
            out.push('=');
        }

        let mut index = 0;
        write_text_level(&self.element, arr, 0, &mut index, &mut out)?;
        buf.extend_from_slice(out.as_bytes());
        Ok(())
    }

    fn encode_binary(&self, value: &PgValue, buf: &mut Vec<u8>) -> Result<()> {
        let arr = self.extract(value)?;
        check_shape(arr)?;

        buf.extend_from_slice(&(arr.dims.len() as i32).to_be_bytes());
        buf.extend_from_slice(&(arr.contains_null() as i32).to_be_bytes());
        buf.extend_from_slice(&arr.element_oid.to_be_bytes());
        for dim in &arr.dims {
            buf.extend_from_slice(&dim.len.to_be_bytes());
            buf.extend_from_slice(&dim.lower_bound.to_be_bytes());
        }

        for element in &arr.elements {
            match element {
                Value::Null => write_value(buf, None),
                Value::Present(inner) => {
                    let mut payload = Vec::new();
                    self.element.encode_binary(inner, &mut payload)?;
                    write_value(buf, Some(&payload));
                }
                Value::Undefined => {
                    return Err(Error::Encode("cannot encode an undefined array element".into()));
                }
            }
        }
        Ok(())
    }
}

fn check_shape(arr: &ArrayValue) -> Result<()> {
    if arr.dims.len() > MAX_DIMENSIONS {
        return Err(Error::Encode(format!(
            "too many array dimensions: {}",
            arr.dims.len()
        )));
    }
    if arr.elements.len() != arr.expected_len() && !(arr.dims.is_empty() && arr.elements.is_empty())
    {
        return Err(Error::Encode(format!(
            "array is not rectangular: {} elements for dimensions {:?}",
            arr.elements.len(),
            arr.dims
        )));
    }
    Ok(())
}

fn write_text_level(
    element: &Arc<dyn Codec>,
    arr: &ArrayValue,
    depth: usize,
    index: &mut usize,
    out: &mut String,
) -> Result<()> {
    out.push('{');
    if arr.dims.is_empty() {
        out.push('}');
        return Ok(());
    }

    let len = arr.dims[depth].len;
    for i in 0..len {
        if i > 0 {
            out.push(',');
        }
        if depth + 1 < arr.dims.len() {
            write_text_level(element, arr, depth + 1, index, out)?;
        } else {
            match &arr.elements[*index] {
                Value::Null => out.push_str("NULL"),
                Value::Present(inner) => {
                    let mut payload = Vec::new();
                    element.encode_text(inner, &mut payload)?;
                    let text = String::from_utf8(payload)
                        .map_err(|e| Error::Encode(format!("non-UTF-8 array element: {e}")))?;
                    write_quoted_element(&text, out);
                }
                Value::Undefined => {
                    return Err(Error::Encode("cannot encode an undefined array element".into()));
                }
            }
            *index += 1;
        }
    }
    out.push('}');
    Ok(())
}

/// Quote an element if its text form needs it.
fn write_quoted_element(text: &str, out: &mut String) {
    let needs_quotes = text.is_empty()
        || text.eq_ignore_ascii_case("null")
        || text.chars().any(|c| {
            matches!(c, ',' | '{' | '}' | '"' | '\\') || c.is_whitespace()
        });

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

/// Parse the text array form into dimensions and raw element strings
/// (`None` for NULL).
pub fn parse_array_text(s: &str) -> Result<(Vec<ArrayDimension>, Vec<Option<String>>)> {
    let s = s.trim();
    let bad = |what: &str| Error::Decode(format!("invalid array literal ({what}): {s:?}"));

    // Optional explicit dimensions: [lower:upper][lower:upper]=
    let (explicit_bounds, body) = if s.starts_with('[') {
        let eq = s.find('=').ok_or_else(|| bad("missing '=' after dimensions"))?;
        let mut bounds = Vec::new();
        let mut spec = &s[..eq];
        while let Some(rest) = spec.strip_prefix('[') {
            let close = rest.find(']').ok_or_else(|| bad("unterminated dimension"))?;
            let (lower, upper) = rest[..close]
                .split_once(':')
                .ok_or_else(|| bad("dimension without ':'"))?;
            let lower: i32 = lower.parse().map_err(|_| bad("dimension lower bound"))?;
            let upper: i32 = upper.parse().map_err(|_| bad("dimension upper bound"))?;
            bounds.push((lower, upper));
            spec = &rest[close + 1..];
        }
        if !spec.is_empty() {
            return Err(bad("garbage in dimension prefix"));
        }
        (Some(bounds), s[eq + 1..].trim_start())
    } else {
        (None, s)
    };

    let mut parser = TextParser {
        data: body.as_bytes(),
        pos: 0,
    };
    let mut shape: Vec<i32> = Vec::new();
    let mut elements = Vec::new();
    parser.parse_level(0, &mut shape, &mut elements)?;
    parser.skip_spaces();
    if parser.pos != parser.data.len() {
        return Err(bad("trailing characters"));
    }

    // An outermost empty set means a zero-dimensional array
    if elements.is_empty() {
        shape.clear();
    }

    let dims = match explicit_bounds {
        None => shape
            .iter()
            .map(|&len| ArrayDimension { len, lower_bound: 1 })
            .collect(),
        Some(bounds) => {
            if bounds.len() != shape.len() {
                return Err(bad("dimension prefix does not match nesting"));
            }
            bounds
                .iter()
                .zip(&shape)
                .map(|(&(lower, upper), &len)| {
                    if upper - lower + 1 != len {
                        Err(bad("dimension prefix does not match element count"))
                    } else {
                        Ok(ArrayDimension {
                            len,
                            lower_bound: lower,
                        })
                    }
                })
                .collect::<Result<Vec<_>>>()?
        }
    };

    let expected: usize = dims.iter().map(|d| d.len as usize).product::<usize>()
        * usize::from(!dims.is_empty());
    if elements.len() != expected {
        return Err(bad("not rectangular"));
    }

    Ok((dims, elements))
}

struct TextParser<'a> {
    data: &'a [u8],
    pos: usize,
}

impl TextParser<'_> {
    fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    fn skip_spaces(&mut self) {
        while matches!(self.peek(), Some(b) if b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn parse_level(
        &mut self,
        depth: usize,
        shape: &mut Vec<i32>,
        elements: &mut Vec<Option<String>>,
    ) -> Result<()> {
        let err = |what: &str| Error::Decode(format!("invalid array literal: {what}"));

        if depth >= MAX_DIMENSIONS {
            return Err(err("too many dimensions"));
        }
        self.skip_spaces();
        if self.peek() != Some(b'{') {
            return Err(err("expected '{'"));
        }
        self.pos += 1;
        self.skip_spaces();

        if self.peek() == Some(b'}') {
            self.pos += 1;
            record_shape(shape, depth, 0)?;
            return Ok(());
        }

        let mut count = 0;
        let mut nested: Option<bool> = None;
        loop {
            self.skip_spaces();
            let is_array = self.peek() == Some(b'{');
            match nested {
                None => nested = Some(is_array),
                Some(expected) if expected != is_array => {
                    return Err(err("mixed scalars and sub-arrays"));
                }
                _ => {}
            }

            if is_array {
                self.parse_level(depth + 1, shape, elements)?;
            } else {
                elements.push(self.parse_element()?);
            }
            count += 1;

            self.skip_spaces();
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b'}') => {
                    self.pos += 1;
                    break;
                }
                _ => return Err(err("expected ',' or '}'")),
            }
        }

        record_shape(shape, depth, count)
    }

    fn parse_element(&mut self) -> Result<Option<String>> {
        let err = |what: &str| Error::Decode(format!("invalid array literal: {what}"));

        if self.peek() == Some(b'"') {
            self.pos += 1;
            let mut out = Vec::new();
            loop {
                match self.peek() {
                    Some(b'\\') => {
                        self.pos += 1;
                        let escaped = self.peek().ok_or_else(|| err("truncated escape"))?;
                        out.push(escaped);
                        self.pos += 1;
                    }
                    Some(b'"') => {
                        self.pos += 1;
                        break;
                    }
                    Some(byte) => {
                        out.push(byte);
                        self.pos += 1;
                    }
                    None => return Err(err("unterminated quoted element")),
                }
            }
            let text = String::from_utf8(out).map_err(|e| err(&format!("bad UTF-8: {e}")))?;
            return Ok(Some(text));
        }

        let start = self.pos;
        while let Some(byte) = self.peek() {
            if matches!(byte, b',' | b'}') {
                break;
            }
            if matches!(byte, b'{' | b'"') {
                return Err(err("unexpected quote or brace in element"));
            }
            self.pos += 1;
        }
        let raw = std::str::from_utf8(&self.data[start..self.pos])
            .map_err(|e| err(&format!("bad UTF-8: {e}")))?
            .trim_end();
        if raw.is_empty() {
            return Err(err("empty unquoted element"));
        }
        if raw.eq_ignore_ascii_case("null") {
            Ok(None)
        } else {
            Ok(Some(raw.to_string()))
        }
    }
}

/// Record the element count seen at a nesting depth.
///
/// Inner levels are visited before their parent finishes, so the vector
/// is grown with a sentinel and filled in by depth index.
fn record_shape(shape: &mut Vec<i32>, depth: usize, count: i32) -> Result<()> {
    if shape.len() <= depth {
        shape.resize(depth + 1, -1);
    }
    if shape[depth] == -1 {
        shape[depth] = count;
        Ok(())
    } else if shape[depth] != count {
        Err(Error::Decode("invalid array literal: not rectangular".into()))
    } else {
        Ok(())
    }
}

/// Register array codecs for every built-in element type.
pub fn register(registry: &mut TypeRegistry) {
    let pairs = [
        oid::BOOL_ARRAY,
        oid::BYTEA_ARRAY,
        oid::INT2_ARRAY,
        oid::INT4_ARRAY,
        oid::TEXT_ARRAY,
        oid::BPCHAR_ARRAY,
        oid::VARCHAR_ARRAY,
        oid::INT8_ARRAY,
        oid::FLOAT4_ARRAY,
        oid::FLOAT8_ARRAY,
        oid::TIMESTAMP_ARRAY,
        oid::DATE_ARRAY,
        oid::TIME_ARRAY,
        oid::TIMESTAMPTZ_ARRAY,
        oid::NUMERIC_ARRAY,
        oid::UUID_ARRAY,
        oid::JSON_ARRAY,
        oid::JSONB_ARRAY,
    ];
    for array_oid in pairs {
        let element_oid = match array_element(array_oid) {
            Some(oid) => oid,
            None => continue,
        };
        let element = registry.codec_for(element_oid);
        registry.register(array_oid, Arc::new(ArrayCodec::new(element_oid, element)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::primitives::{Int4Codec, TextCodec};

    fn text_array() -> ArrayCodec {
        ArrayCodec::new(oid::TEXT, Arc::new(TextCodec::new("text")))
    }

    fn int_array() -> ArrayCodec {
        ArrayCodec::new(oid::INT4, Arc::new(Int4Codec))
    }

    #[test]
    fn text_form_with_quoting() {
        let value = text_array().decode_text(b"{a,b,\"c,d\",NULL}").unwrap();
        let PgValue::Array(arr) = &value else {
            panic!("not an array")
        };
        assert_eq!(arr.elements.len(), 4);
        assert_eq!(arr.elements[2], Value::Present(PgValue::Text("c,d".into())));
        assert_eq!(arr.elements[3], Value::Null);

        let mut out = Vec::new();
        text_array().encode_text(&value, &mut out).unwrap();
        assert_eq!(out, b"{a,b,\"c,d\",NULL}");
    }

    #[test]
    fn quoted_escapes() {
        let value = text_array()
            .decode_text(br#"{"say \"hi\"","back\\slash","{brace}"}"#)
            .unwrap();
        let PgValue::Array(arr) = &value else {
            panic!("not an array")
        };
        assert_eq!(
            arr.elements[0],
            Value::Present(PgValue::Text("say \"hi\"".into()))
        );
        assert_eq!(
            arr.elements[1],
            Value::Present(PgValue::Text("back\\slash".into()))
        );
        assert_eq!(
            arr.elements[2],
            Value::Present(PgValue::Text("{brace}".into()))
        );

        let mut out = Vec::new();
        text_array().encode_text(&value, &mut out).unwrap();
        let round = text_array().decode_text(&out).unwrap();
        assert_eq!(round, value);
    }

    #[test]
    fn literal_null_string_must_be_quoted() {
        let value = text_array().decode_text(b"{\"NULL\",NULL}").unwrap();
        let PgValue::Array(arr) = &value else {
            panic!("not an array")
        };
        assert_eq!(arr.elements[0], Value::Present(PgValue::Text("NULL".into())));
        assert_eq!(arr.elements[1], Value::Null);

        let mut out = Vec::new();
        text_array().encode_text(&value, &mut out).unwrap();
        assert_eq!(out, b"{\"NULL\",NULL}");
    }

    #[test]
    fn multidimensional_rectangular() {
        let value = int_array().decode_text(b"{{1,2,3},{4,5,6}}").unwrap();
        let PgValue::Array(arr) = &value else {
            panic!("not an array")
        };
        assert_eq!(arr.dims.len(), 2);
        assert_eq!(arr.dims[0].len, 2);
        assert_eq!(arr.dims[1].len, 3);
        assert_eq!(arr.elements.len(), 6);
        assert_eq!(arr.expected_len(), 6);
    }

    #[test]
    fn ragged_arrays_rejected() {
        assert!(int_array().decode_text(b"{{1,2},{3}}").is_err());
        assert!(int_array().decode_text(b"{1,{2}}").is_err());
    }

    #[test]
    fn empty_array() {
        let value = int_array().decode_text(b"{}").unwrap();
        let PgValue::Array(arr) = &value else {
            panic!("not an array")
        };
        assert!(arr.dims.is_empty());
        assert!(arr.elements.is_empty());

        let mut out = Vec::new();
        int_array().encode_text(&value, &mut out).unwrap();
        assert_eq!(out, b"{}");
    }

    #[test]
    fn explicit_bounds_prefix() {
        let value = int_array().decode_text(b"[0:2]={10,20,30}").unwrap();
        let PgValue::Array(arr) = &value else {
            panic!("not an array")
        };
        assert_eq!(arr.dims[0].lower_bound, 0);
        assert_eq!(arr.dims[0].len, 3);

        let mut out = Vec::new();
        int_array().encode_text(&value, &mut out).unwrap();
        assert_eq!(out, b"[0:2]={10,20,30}");
    }

    #[test]
    fn binary_round_trip() {
        let codec = int_array();
        let original = codec.decode_text(b"{{1,NULL},{3,4}}").unwrap();

        let mut binary = Vec::new();
        codec.encode_binary(&original, &mut binary).unwrap();
        let decoded = codec.decode_binary(&binary).unwrap();
        assert_eq!(decoded, original);

        // header: ndims=2, contains_null=1, element oid
        assert_eq!(&binary[0..4], &2_i32.to_be_bytes());
        assert_eq!(&binary[4..8], &1_i32.to_be_bytes());
        assert_eq!(&binary[8..12], &oid::INT4.to_be_bytes());
    }

    #[test]
    fn binary_rejects_ragged_encode() {
        let arr = ArrayValue {
            element_oid: oid::INT4,
            dims: vec![ArrayDimension { len: 3, lower_bound: 1 }],
            elements: vec![Value::from(1_i32), Value::from(2_i32)],
        };
        let mut buf = Vec::new();
        assert!(int_array()
            .encode_binary(&PgValue::Array(arr), &mut buf)
            .is_err());
    }
}
