//! Range and multirange codecs.
//!
//! Binary range form: `u8 flags || [i32 len || bytes]? || [i32 len ||
//! bytes]?` with bounds present only when their side is bounded. Text
//! form: `empty`, `[lower,upper)`, `(lower,upper]` and friends, with
//! composite-style escaping of bound values.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::protocol::codec::{read_i32, read_value, write_value};
use crate::protocol::types::{FormatCode, Oid, multirange_range, oid, range_subtype};

use super::{Codec, PgValue, RangeBound, RangeValue, TypeRegistry};

/// Range flag bits.
pub mod flags {
    /// Range is empty
    pub const EMPTY: u8 = 0x01;
    /// Lower bound is inclusive
    pub const LOWER_INCLUSIVE: u8 = 0x02;
    /// Upper bound is inclusive
    pub const UPPER_INCLUSIVE: u8 = 0x04;
    /// Lower bound is absent
    pub const LOWER_UNBOUNDED: u8 = 0x08;
    /// Upper bound is absent
    pub const UPPER_UNBOUNDED: u8 = 0x10;
    /// Lower bound is infinity
    pub const LOWER_INFINITE: u8 = 0x40;
    /// Upper bound is infinity
    pub const UPPER_INFINITE: u8 = 0x80;
}

/// Range codec delegating bound values to an element codec.
pub struct RangeCodec {
    element_oid: Oid,
    element: Arc<dyn Codec>,
}

impl RangeCodec {
    /// Create a range codec over a bound-type codec.
    pub fn new(element_oid: Oid, element: Arc<dyn Codec>) -> Self {
        Self {
            element_oid,
            element,
        }
    }

    fn extract<'v>(&self, value: &'v PgValue) -> Result<&'v RangeValue> {
        match value {
            PgValue::Range(range) => Ok(range),
            other => Err(Error::type_mismatch(other.kind(), "range")),
        }
    }

    fn decode_bound_text(&self, raw: &str) -> Result<PgValue> {
        let unescaped = unescape_bound(raw)?;
        self.element.decode_text(unescaped.as_bytes())
    }

    pub(crate) fn decode_text_range(&self, s: &str) -> Result<RangeValue> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("empty") {
            return Ok(RangeValue::empty(self.element_oid));
        }
        let err = |what: &str| Error::Decode(format!("invalid range literal ({what}): {s:?}"));

        let mut chars = s.chars();
        let open = chars.next().ok_or_else(|| err("empty"))?;
        let close = s.chars().next_back().ok_or_else(|| err("empty"))?;
        let lower_inclusive = match open {
            '[' => true,
            '(' => false,
            _ => return Err(err("bad open bracket")),
        };
        let upper_inclusive = match close {
            ']' => true,
            ')' => false,
            _ => return Err(err("bad close bracket")),
        };

        let body = &s[1..s.len() - 1];
        let comma = find_unquoted_comma(body).ok_or_else(|| err("missing comma"))?;
        let (lower_raw, upper_raw) = (&body[..comma], &body[comma + 1..]);

        let lower = if lower_raw.is_empty() {
            RangeBound::Unbounded
        } else {
            let value = self.decode_bound_text(lower_raw)?;
            if lower_inclusive {
                RangeBound::Inclusive(value)
            } else {
                RangeBound::Exclusive(value)
            }
        };
        let upper = if upper_raw.is_empty() {
            RangeBound::Unbounded
        } else {
            let value = self.decode_bound_text(upper_raw)?;
            if upper_inclusive {
                RangeBound::Inclusive(value)
            } else {
                RangeBound::Exclusive(value)
            }
        };

        Ok(RangeValue {
            element_oid: self.element_oid,
            empty: false,
            lower,
            upper,
        })
    }

    pub(crate) fn encode_text_range(&self, range: &RangeValue, out: &mut String) -> Result<()> {
        if range.empty {
            out.push_str("empty");
            return Ok(());
        }

        out.push(if range.lower.is_inclusive() { '[' } else { '(' });
        if let Some(value) = range.lower.value() {
            let mut payload = Vec::new();
            self.element.encode_text(value, &mut payload)?;
            let text = String::from_utf8(payload)
                .map_err(|e| Error::Encode(format!("non-UTF-8 range bound: {e}")))?;
            escape_bound(&text, out);
        }
        out.push(',');
        if let Some(value) = range.upper.value() {
            let mut payload = Vec::new();
            self.element.encode_text(value, &mut payload)?;
            let text = String::from_utf8(payload)
                .map_err(|e| Error::Encode(format!("non-UTF-8 range bound: {e}")))?;
            escape_bound(&text, out);
        }
        out.push(if range.upper.is_inclusive() { ']' } else { ')' });
        Ok(())
    }

    pub(crate) fn decode_binary_range(&self, bytes: &[u8]) -> Result<RangeValue> {
        let (&flag_byte, mut rest) = bytes
            .split_first()
            .ok_or_else(|| Error::Decode("empty range payload".into()))?;

        if flag_byte & flags::EMPTY != 0 {
            if !rest.is_empty() {
                return Err(Error::Decode("trailing bytes after empty range".into()));
            }
            return Ok(RangeValue::empty(self.element_oid));
        }

        let mut read_bound = |unbounded: bool, inclusive: bool| -> Result<RangeBound> {
            if unbounded {
                return Ok(RangeBound::Unbounded);
            }
            let (payload, r) = read_value(rest)?;
            rest = r;
            let payload = payload
                .ok_or_else(|| Error::Decode("NULL bound in non-empty range".into()))?;
            let value = self.element.decode_binary(payload)?;
            Ok(if inclusive {
                RangeBound::Inclusive(value)
            } else {
                RangeBound::Exclusive(value)
            })
        };

        let lower = read_bound(
            flag_byte & (flags::LOWER_UNBOUNDED | flags::LOWER_INFINITE) != 0,
            flag_byte & flags::LOWER_INCLUSIVE != 0,
        )?;
        let upper = read_bound(
            flag_byte & (flags::UPPER_UNBOUNDED | flags::UPPER_INFINITE) != 0,
            flag_byte & flags::UPPER_INCLUSIVE != 0,
        )?;

        if !rest.is_empty() {
            return Err(Error::Decode("trailing bytes after range bounds".into()));
        }

        Ok(RangeValue {
            element_oid: self.element_oid,
            empty: false,
            lower,
            upper,
        })
    }

    pub(crate) fn encode_binary_range(&self, range: &RangeValue, buf: &mut Vec<u8>) -> Result<()> {
        if range.empty {
            buf.push(flags::EMPTY);
            return Ok(());
        }

        let mut flag_byte = 0u8;
        if range.lower.is_inclusive() {
            flag_byte |= flags::LOWER_INCLUSIVE;
        }
        if range.upper.is_inclusive() {
            flag_byte |= flags::UPPER_INCLUSIVE;
        }
        if range.lower.value().is_none() {
            flag_byte |= flags::LOWER_UNBOUNDED;
        }
        if range.upper.value().is_none() {
            flag_byte |= flags::UPPER_UNBOUNDED;
        }
        buf.push(flag_byte);

        for bound in [&range.lower, &range.upper] {
            if let Some(value) = bound.value() {
                let mut payload = Vec::new();
                self.element.encode_binary(value, &mut payload)?;
                write_value(buf, Some(&payload));
            }
        }
        Ok(())
    }
}

impl Codec for RangeCodec {
    fn name(&self) -> &str {
        "range"
    }

    fn preferred_format(&self) -> FormatCode {
        FormatCode::Binary
    }

    fn decode_text(&self, bytes: &[u8]) -> Result<PgValue> {
        let s = simdutf8::compat::from_utf8(bytes)
            .map_err(|e| Error::Decode(format!("invalid UTF-8 in range: {e}")))?;
        Ok(PgValue::Range(Box::new(self.decode_text_range(s)?)))
    }

    fn decode_binary(&self, bytes: &[u8]) -> Result<PgValue> {
        Ok(PgValue::Range(Box::new(self.decode_binary_range(bytes)?)))
    }

    fn encode_text(&self, value: &PgValue, buf: &mut Vec<u8>) -> Result<()> {
        let range = self.extract(value)?;
        let mut out = String::new();
        self.encode_text_range(range, &mut out)?;
        buf.extend_from_slice(out.as_bytes());
        Ok(())
    }

    fn encode_binary(&self, value: &PgValue, buf: &mut Vec<u8>) -> Result<()> {
        let range = self.extract(value)?;
        self.encode_binary_range(range, buf)
    }
}

/// Multirange codec: an ordered sequence of ranges.
pub struct MultirangeCodec {
    range: RangeCodec,
}

impl MultirangeCodec {
    /// Create a multirange codec over a bound-type codec.
    pub fn new(element_oid: Oid, element: Arc<dyn Codec>) -> Self {
        Self {
            range: RangeCodec::new(element_oid, element),
        }
    }
}

impl Codec for MultirangeCodec {
    fn name(&self) -> &str {
        "multirange"
    }

    fn preferred_format(&self) -> FormatCode {
        FormatCode::Binary
    }

    fn decode_text(&self, bytes: &[u8]) -> Result<PgValue> {
        let s = simdutf8::compat::from_utf8(bytes)
            .map_err(|e| Error::Decode(format!("invalid UTF-8 in multirange: {e}")))?
            .trim();
        let err = |what: &str| Error::Decode(format!("invalid multirange literal ({what}): {s:?}"));

        let body = s
            .strip_prefix('{')
            .and_then(|s| s.strip_suffix('}'))
            .ok_or_else(|| err("missing braces"))?;

        let mut ranges = Vec::new();
        let mut rest = body.trim();
        while !rest.is_empty() {
            let end = rest
                .find([')', ']'])
                .ok_or_else(|| err("unterminated range"))?;
            ranges.push(self.range.decode_text_range(&rest[..=end])?);
            rest = rest[end + 1..].trim_start();
            match rest.strip_prefix(',') {
                Some(tail) => rest = tail.trim_start(),
                None if rest.is_empty() => break,
                None => return Err(err("expected ',' between ranges")),
            }
        }
        Ok(PgValue::Multirange(ranges))
    }

    fn decode_binary(&self, bytes: &[u8]) -> Result<PgValue> {
        let (count, mut rest) = read_i32(bytes)?;
        if count < 0 {
            return Err(Error::Decode(format!("invalid multirange count: {count}")));
        }
        let mut ranges = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let (payload, r) = read_value(rest)?;
            rest = r;
            let payload =
                payload.ok_or_else(|| Error::Decode("NULL range in multirange".into()))?;
            ranges.push(self.range.decode_binary_range(payload)?);
        }
        if !rest.is_empty() {
            return Err(Error::Decode("trailing bytes after multirange".into()));
        }
        Ok(PgValue::Multirange(ranges))
    }

    fn encode_text(&self, value: &PgValue, buf: &mut Vec<u8>) -> Result<()> {
        let PgValue::Multirange(ranges) = value else {
            return Err(Error::type_mismatch(value.kind(), "multirange"));
        };
        let mut out = String::from("{");
        for (i, range) in ranges.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            self.range.encode_text_range(range, &mut out)?;
        }
        out.push('}');
        buf.extend_from_slice(out.as_bytes());
        Ok(())
    }

    fn encode_binary(&self, value: &PgValue, buf: &mut Vec<u8>) -> Result<()> {
        let PgValue::Multirange(ranges) = value else {
            return Err(Error::type_mismatch(value.kind(), "multirange"));
        };
        buf.extend_from_slice(&(ranges.len() as i32).to_be_bytes());
        for range in ranges {
            let mut payload = Vec::new();
            self.range.encode_binary_range(range, &mut payload)?;
            write_value(buf, Some(&payload));
        }
        Ok(())
    }
}

/// Find the comma separating the two bounds, skipping quoted sections.
fn find_unquoted_comma(body: &str) -> Option<usize> {
    let bytes = body.as_bytes();
    let mut in_quotes = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 1,
            b'"' => in_quotes = !in_quotes,
            b',' if !in_quotes => return Some(i),
            _ => {}
        }
        i += 1;
    }
    None
}

fn unescape_bound(raw: &str) -> Result<String> {
    let raw = raw.trim();
    if let Some(inner) = raw.strip_prefix('"').and_then(|r| r.strip_suffix('"')) {
        let mut out = String::with_capacity(inner.len());
        let mut chars = inner.chars();
        while let Some(c) = chars.next() {
            if c == '\\' {
                match chars.next() {
                    Some(escaped) => out.push(escaped),
                    None => return Err(Error::Decode("truncated escape in range bound".into())),
                }
            } else {
                out.push(c);
            }
        }
        Ok(out)
    } else {
        Ok(raw.to_string())
    }
}

fn escape_bound(text: &str, out: &mut String) {
    let needs_quotes = text.is_empty()
        || text
            .chars()
            .any(|c| matches!(c, ',' | '(' | ')' | '[' | ']' | '"' | '\\') || c.is_whitespace());

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

/// Register range and multirange codecs for the built-in range types.
pub fn register(registry: &mut TypeRegistry) {
    for range_oid in [
        oid::INT4RANGE,
        oid::NUMRANGE,
        oid::TSRANGE,
        oid::TSTZRANGE,
        oid::DATERANGE,
        oid::INT8RANGE,
    ] {
        let element_oid = match range_subtype(range_oid) {
            Some(oid) => oid,
            None => continue,
        };
        let element = registry.codec_for(element_oid);
        registry.register(range_oid, Arc::new(RangeCodec::new(element_oid, element)));
    }

    for multirange_oid in [
        oid::INT4MULTIRANGE,
        oid::NUMMULTIRANGE,
        oid::TSMULTIRANGE,
        oid::TSTZMULTIRANGE,
        oid::DATEMULTIRANGE,
        oid::INT8MULTIRANGE,
    ] {
        let element_oid = multirange_range(multirange_oid)
            .and_then(range_subtype)
            .unwrap_or(oid::INT4);
        let element = registry.codec_for(element_oid);
        registry.register(
            multirange_oid,
            Arc::new(MultirangeCodec::new(element_oid, element)),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::primitives::Int4Codec;

    fn int4_range() -> RangeCodec {
        RangeCodec::new(oid::INT4, Arc::new(Int4Codec))
    }

    #[test]
    fn text_forms() {
        let codec = int4_range();
        let value = codec.decode_text(b"[1,10)").unwrap();
        let PgValue::Range(range) = &value else {
            panic!("not a range")
        };
        assert!(!range.empty);
        assert_eq!(range.lower, RangeBound::Inclusive(PgValue::Int4(1)));
        assert_eq!(range.upper, RangeBound::Exclusive(PgValue::Int4(10)));

        let mut out = Vec::new();
        codec.encode_text(&value, &mut out).unwrap();
        assert_eq!(out, b"[1,10)");
    }

    #[test]
    fn empty_and_unbounded() {
        let codec = int4_range();
        let empty = codec.decode_text(b"empty").unwrap();
        let PgValue::Range(range) = &empty else {
            panic!("not a range")
        };
        assert!(range.empty);

        let unbounded = codec.decode_text(b"(,5]").unwrap();
        let PgValue::Range(range) = &unbounded else {
            panic!("not a range")
        };
        assert_eq!(range.lower, RangeBound::Unbounded);
        assert_eq!(range.upper, RangeBound::Inclusive(PgValue::Int4(5)));

        let mut out = Vec::new();
        codec.encode_text(&unbounded, &mut out).unwrap();
        assert_eq!(out, b"(,5]");
    }

    #[test]
    fn binary_round_trip() {
        let codec = int4_range();
        for text in ["empty", "[1,10)", "(,5]", "[0,)"] {
            let value = codec.decode_text(text.as_bytes()).unwrap();
            let mut binary = Vec::new();
            codec.encode_binary(&value, &mut binary).unwrap();
            assert_eq!(codec.decode_binary(&binary).unwrap(), value, "for {text}");
        }
    }

    #[test]
    fn binary_flag_bits() {
        let codec = int4_range();
        let value = codec.decode_text(b"empty").unwrap();
        let mut binary = Vec::new();
        codec.encode_binary(&value, &mut binary).unwrap();
        assert_eq!(binary, [flags::EMPTY]);

        let value = codec.decode_text(b"[,]").unwrap();
        let mut binary = Vec::new();
        codec.encode_binary(&value, &mut binary).unwrap();
        // Unbounded sides carry no inclusivity
        assert_eq!(
            binary,
            [flags::LOWER_UNBOUNDED | flags::UPPER_UNBOUNDED]
        );
    }

    #[test]
    fn multirange_round_trip() {
        let codec = MultirangeCodec::new(oid::INT4, Arc::new(Int4Codec));
        let value = codec.decode_text(b"{[1,3),[5,8)}").unwrap();
        let PgValue::Multirange(ranges) = &value else {
            panic!("not a multirange")
        };
        assert_eq!(ranges.len(), 2);

        let mut text = Vec::new();
        codec.encode_text(&value, &mut text).unwrap();
        assert_eq!(text, b"{[1,3),[5,8)}");

        let mut binary = Vec::new();
        codec.encode_binary(&value, &mut binary).unwrap();
        assert_eq!(codec.decode_binary(&binary).unwrap(), value);

        let empty = codec.decode_text(b"{}").unwrap();
        assert_eq!(empty, PgValue::Multirange(Vec::new()));
    }
}
