//! Codecs for primitive types: bool, integers, floats, text, bytea,
//! numeric, uuid, json and point.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::protocol::types::{FormatCode, oid};

use super::{Codec, PgValue, TypeRegistry};

fn utf8(bytes: &[u8]) -> Result<&str> {
    simdutf8::compat::from_utf8(bytes)
        .map_err(|e| Error::Decode(format!("invalid UTF-8: {e}")))
}

fn fixed<const N: usize>(bytes: &[u8], what: &str) -> Result<[u8; N]> {
    bytes
        .try_into()
        .map_err(|_| Error::Decode(format!("invalid {what} length: {}", bytes.len())))
}

// === bool ===

pub struct BoolCodec;

impl Codec for BoolCodec {
    fn name(&self) -> &str {
        "bool"
    }

    fn preferred_format(&self) -> FormatCode {
        FormatCode::Binary
    }

    fn decode_text(&self, bytes: &[u8]) -> Result<PgValue> {
        match bytes {
            b"t" | b"true" | b"TRUE" | b"T" | b"1" => Ok(PgValue::Bool(true)),
            b"f" | b"false" | b"FALSE" | b"F" | b"0" => Ok(PgValue::Bool(false)),
            _ => Err(Error::Decode(format!(
                "invalid boolean: {:?}",
                String::from_utf8_lossy(bytes)
            ))),
        }
    }

    fn decode_binary(&self, bytes: &[u8]) -> Result<PgValue> {
        let [byte] = fixed::<1>(bytes, "boolean")?;
        Ok(PgValue::Bool(byte != 0))
    }

    fn encode_text(&self, value: &PgValue, buf: &mut Vec<u8>) -> Result<()> {
        match value {
            PgValue::Bool(v) => {
                buf.push(if *v { b't' } else { b'f' });
                Ok(())
            }
            other => Err(Error::type_mismatch(other.kind(), "bool")),
        }
    }

    fn encode_binary(&self, value: &PgValue, buf: &mut Vec<u8>) -> Result<()> {
        match value {
            PgValue::Bool(v) => {
                buf.push(*v as u8);
                Ok(())
            }
            other => Err(Error::type_mismatch(other.kind(), "bool")),
        }
    }
}

// === integers ===

macro_rules! int_codec {
    ($name:ident, $pg_name:literal, $variant:ident, $ty:ty, $width:literal) => {
        pub struct $name;

        impl $name {
            fn narrow(value: &PgValue) -> Result<$ty> {
                // Accept any integer variant that fits the target width
                let wide: i64 = match value {
                    PgValue::Int2(v) => *v as i64,
                    PgValue::Int4(v) => *v as i64,
                    PgValue::Int8(v) => *v,
                    other => return Err(Error::type_mismatch(other.kind(), $pg_name)),
                };
                <$ty>::try_from(wide).map_err(|_| Error::overflow("integer", $pg_name))
            }
        }

        impl Codec for $name {
            fn name(&self) -> &str {
                $pg_name
            }

            fn preferred_format(&self) -> FormatCode {
                FormatCode::Binary
            }

            fn decode_text(&self, bytes: &[u8]) -> Result<PgValue> {
                let v: $ty = utf8(bytes)?
                    .trim()
                    .parse()
                    .map_err(|e| Error::Decode(format!(concat!("invalid ", $pg_name, ": {}"), e)))?;
                Ok(PgValue::$variant(v))
            }

            fn decode_binary(&self, bytes: &[u8]) -> Result<PgValue> {
                let arr = fixed::<$width>(bytes, $pg_name)?;
                Ok(PgValue::$variant(<$ty>::from_be_bytes(arr)))
            }

            fn encode_text(&self, value: &PgValue, buf: &mut Vec<u8>) -> Result<()> {
                let v = Self::narrow(value)?;
                buf.extend_from_slice(v.to_string().as_bytes());
                Ok(())
            }

            fn encode_binary(&self, value: &PgValue, buf: &mut Vec<u8>) -> Result<()> {
                let v = Self::narrow(value)?;
                buf.extend_from_slice(&v.to_be_bytes());
                Ok(())
            }
        }
    };
}

int_codec!(Int2Codec, "int2", Int2, i16, 2);
int_codec!(Int4Codec, "int4", Int4, i32, 4);
int_codec!(Int8Codec, "int8", Int8, i64, 8);

/// The oid type: an unsigned 32-bit integer surfaced as Int8.
pub struct OidCodec;

impl Codec for OidCodec {
    fn name(&self) -> &str {
        "oid"
    }

    fn preferred_format(&self) -> FormatCode {
        FormatCode::Binary
    }

    fn decode_text(&self, bytes: &[u8]) -> Result<PgValue> {
        let v: u32 = utf8(bytes)?
            .trim()
            .parse()
            .map_err(|e| Error::Decode(format!("invalid oid: {e}")))?;
        Ok(PgValue::Int8(v as i64))
    }

    fn decode_binary(&self, bytes: &[u8]) -> Result<PgValue> {
        let arr = fixed::<4>(bytes, "oid")?;
        Ok(PgValue::Int8(u32::from_be_bytes(arr) as i64))
    }

    fn encode_text(&self, value: &PgValue, buf: &mut Vec<u8>) -> Result<()> {
        let v = self.narrow(value)?;
        buf.extend_from_slice(v.to_string().as_bytes());
        Ok(())
    }

    fn encode_binary(&self, value: &PgValue, buf: &mut Vec<u8>) -> Result<()> {
        let v = self.narrow(value)?;
        buf.extend_from_slice(&v.to_be_bytes());
        Ok(())
    }
}

impl OidCodec {
    fn narrow(&self, value: &PgValue) -> Result<u32> {
        let wide: i64 = match value {
            PgValue::Int2(v) => *v as i64,
            PgValue::Int4(v) => *v as i64,
            PgValue::Int8(v) => *v,
            other => return Err(Error::type_mismatch(other.kind(), "oid")),
        };
        u32::try_from(wide).map_err(|_| Error::overflow("integer", "oid"))
    }
}

// === floats ===

macro_rules! float_codec {
    ($name:ident, $pg_name:literal, $variant:ident, $ty:ty, $width:literal,
     $($extra:pat => $widen:expr),*) => {
        pub struct $name;

        impl $name {
            fn extract(value: &PgValue) -> Result<$ty> {
                match value {
                    PgValue::$variant(v) => Ok(*v),
                    $($extra => $widen,)*
                    other => Err(Error::type_mismatch(other.kind(), $pg_name)),
                }
            }
        }

        impl Codec for $name {
            fn name(&self) -> &str {
                $pg_name
            }

            fn preferred_format(&self) -> FormatCode {
                FormatCode::Binary
            }

            fn decode_text(&self, bytes: &[u8]) -> Result<PgValue> {
                let s = utf8(bytes)?.trim();
                let v: $ty = match s {
                    "NaN" => <$ty>::NAN,
                    "Infinity" => <$ty>::INFINITY,
                    "-Infinity" => <$ty>::NEG_INFINITY,
                    _ => s
                        .parse()
                        .map_err(|e| Error::Decode(format!(concat!("invalid ", $pg_name, ": {}"), e)))?,
                };
                Ok(PgValue::$variant(v))
            }

            fn decode_binary(&self, bytes: &[u8]) -> Result<PgValue> {
                let arr = fixed::<$width>(bytes, $pg_name)?;
                Ok(PgValue::$variant(<$ty>::from_be_bytes(arr)))
            }

            fn encode_text(&self, value: &PgValue, buf: &mut Vec<u8>) -> Result<()> {
                let v = Self::extract(value)?;
                if v.is_nan() {
                    buf.extend_from_slice(b"NaN");
                } else if v == <$ty>::INFINITY {
                    buf.extend_from_slice(b"Infinity");
                } else if v == <$ty>::NEG_INFINITY {
                    buf.extend_from_slice(b"-Infinity");
                } else {
                    buf.extend_from_slice(v.to_string().as_bytes());
                }
                Ok(())
            }

            fn encode_binary(&self, value: &PgValue, buf: &mut Vec<u8>) -> Result<()> {
                let v = Self::extract(value)?;
                buf.extend_from_slice(&v.to_be_bytes());
                Ok(())
            }
        }
    };
}

float_codec!(Float4Codec, "float4", Float4, f32, 4,);
float_codec!(Float8Codec, "float8", Float8, f64, 8, PgValue::Float4(v) => Ok(*v as f64));

// === text ===

/// text, varchar, bpchar and name: identical bytes in both formats.
pub struct TextCodec {
    name: &'static str,
}

impl TextCodec {
    pub fn new(name: &'static str) -> Self {
        Self { name }
    }
}

impl Codec for TextCodec {
    fn name(&self) -> &str {
        self.name
    }

    fn decode_text(&self, bytes: &[u8]) -> Result<PgValue> {
        Ok(PgValue::Text(utf8(bytes)?.to_string()))
    }

    fn decode_binary(&self, bytes: &[u8]) -> Result<PgValue> {
        self.decode_text(bytes)
    }

    fn encode_text(&self, value: &PgValue, buf: &mut Vec<u8>) -> Result<()> {
        match value {
            PgValue::Text(s) | PgValue::Json(s) | PgValue::Numeric(s) => {
                buf.extend_from_slice(s.as_bytes());
                Ok(())
            }
            other => Err(Error::type_mismatch(other.kind(), self.name)),
        }
    }

    fn encode_binary(&self, value: &PgValue, buf: &mut Vec<u8>) -> Result<()> {
        self.encode_text(value, buf)
    }
}

// === bytea ===

pub struct ByteaCodec;

impl Codec for ByteaCodec {
    fn name(&self) -> &str {
        "bytea"
    }

    fn preferred_format(&self) -> FormatCode {
        FormatCode::Binary
    }

    fn decode_text(&self, bytes: &[u8]) -> Result<PgValue> {
        if let Some(hex) = bytes.strip_prefix(b"\\x") {
            let mut out = Vec::with_capacity(hex.len() / 2);
            for pair in hex.chunks_exact(2) {
                let s = utf8(pair)?;
                let byte = u8::from_str_radix(s, 16)
                    .map_err(|e| Error::Decode(format!("invalid bytea hex: {e}")))?;
                out.push(byte);
            }
            if hex.len() % 2 != 0 {
                return Err(Error::Decode("odd-length bytea hex string".into()));
            }
            return Ok(PgValue::Bytea(out));
        }

        // Legacy escape format: `\\` and `\ooo` octal escapes
        let mut out = Vec::with_capacity(bytes.len());
        let mut rest = bytes;
        while let Some((&byte, tail)) = rest.split_first() {
            if byte != b'\\' {
                out.push(byte);
                rest = tail;
                continue;
            }
            if let Some(tail2) = tail.strip_prefix(b"\\") {
                out.push(b'\\');
                rest = tail2;
            } else if tail.len() >= 3 {
                let octal = utf8(&tail[..3])?;
                let byte = u8::from_str_radix(octal, 8)
                    .map_err(|e| Error::Decode(format!("invalid bytea escape: {e}")))?;
                out.push(byte);
                rest = &tail[3..];
            } else {
                return Err(Error::Decode("truncated bytea escape".into()));
            }
        }
        Ok(PgValue::Bytea(out))
    }

    fn decode_binary(&self, bytes: &[u8]) -> Result<PgValue> {
        Ok(PgValue::Bytea(bytes.to_vec()))
    }

    fn encode_text(&self, value: &PgValue, buf: &mut Vec<u8>) -> Result<()> {
        match value {
            PgValue::Bytea(data) => {
                buf.extend_from_slice(b"\\x");
                for byte in data {
                    buf.extend_from_slice(format!("{byte:02x}").as_bytes());
                }
                Ok(())
            }
            other => Err(Error::type_mismatch(other.kind(), "bytea")),
        }
    }

    fn encode_binary(&self, value: &PgValue, buf: &mut Vec<u8>) -> Result<()> {
        match value {
            PgValue::Bytea(data) => {
                buf.extend_from_slice(data);
                Ok(())
            }
            other => Err(Error::type_mismatch(other.kind(), "bytea")),
        }
    }
}

// === numeric ===

const NUMERIC_POS: u16 = 0x0000;
const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;

/// Convert the binary numeric representation to its decimal text form.
///
/// Layout: `i16 ndigits || i16 weight || u16 sign || u16 dscale ||
/// i16 digit*` where each digit is a base-10000 group.
pub fn numeric_binary_to_text(bytes: &[u8]) -> Result<String> {
    use crate::protocol::codec::{read_i16, read_u16};

    let (ndigits, rest) = read_i16(bytes)?;
    let (weight, rest) = read_i16(rest)?;
    let (sign, rest) = read_u16(rest)?;
    let (dscale, mut rest) = read_u16(rest)?;

    if sign == NUMERIC_NAN {
        return Ok("NaN".to_string());
    }
    if sign != NUMERIC_POS && sign != NUMERIC_NEG {
        return Err(Error::Decode(format!("invalid numeric sign: {sign:#06x}")));
    }

    let mut digits = Vec::with_capacity(ndigits as usize);
    for _ in 0..ndigits {
        let (digit, remaining) = read_i16(rest)?;
        digits.push(digit);
        rest = remaining;
    }

    let mut out = String::new();
    if sign == NUMERIC_NEG {
        out.push('-');
    }

    // Integer part: digit groups with weights 0..=weight
    if weight < 0 {
        out.push('0');
    } else {
        for i in 0..=weight {
            let digit = digits.get(i as usize).copied().unwrap_or(0);
            if i == 0 {
                out.push_str(&digit.to_string());
            } else {
                out.push_str(&format!("{digit:04}"));
            }
        }
    }

    // Fraction: dscale decimal digits from groups after the weight
    if dscale > 0 {
        out.push('.');
        let mut written = 0usize;
        let mut index = weight as i32 + 1;
        while written < dscale as usize {
            let digit = if index < 0 {
                0
            } else {
                digits.get(index as usize).copied().unwrap_or(0)
            };
            let group = format!("{digit:04}");
            let take = (dscale as usize - written).min(4);
            out.push_str(&group[..take]);
            written += take;
            index += 1;
        }
    }

    Ok(out)
}

/// Convert a decimal text value to the binary numeric representation.
pub fn numeric_text_to_binary(text: &str, buf: &mut Vec<u8>) -> Result<()> {
    let text = text.trim();
    if text.eq_ignore_ascii_case("nan") {
        buf.extend_from_slice(&0_i16.to_be_bytes());
        buf.extend_from_slice(&0_i16.to_be_bytes());
        buf.extend_from_slice(&NUMERIC_NAN.to_be_bytes());
        buf.extend_from_slice(&0_u16.to_be_bytes());
        return Ok(());
    }

    let (negative, text) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };

    let (int_part, frac_part) = match text.split_once('.') {
        Some((i, f)) => (i, f),
        None => (text, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(Error::Encode(format!("invalid numeric: {text:?}")));
    }
    if !int_part.bytes().all(|b| b.is_ascii_digit())
        || !frac_part.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(Error::Encode(format!("invalid numeric: {text:?}")));
    }

    let dscale = frac_part.len() as u16;
    let int_part = int_part.trim_start_matches('0');

    // Left-pad the integer part to whole base-10000 groups
    let mut groups: Vec<i16> = Vec::new();
    let padded_len = int_part.len().div_ceil(4) * 4;
    let padded = format!("{int_part:0>padded_len$}");
    for chunk in padded.as_bytes().chunks(4) {
        let s = std::str::from_utf8(chunk).unwrap_or("0");
        groups.push(s.parse().unwrap_or(0));
    }
    let weight = groups.len() as i16 - 1;

    // Right-pad the fraction to whole groups
    let frac_padded_len = frac_part.len().div_ceil(4) * 4;
    let frac_padded = format!("{frac_part:0<frac_padded_len$}");
    for chunk in frac_padded.as_bytes().chunks(4) {
        let s = std::str::from_utf8(chunk).unwrap_or("0");
        groups.push(s.parse().unwrap_or(0));
    }

    // Trim trailing zero groups; leading zeros were stripped above
    while groups.last() == Some(&0) {
        groups.pop();
    }

    let (ndigits, weight, sign) = if groups.is_empty() {
        (0, 0, NUMERIC_POS)
    } else {
        (
            groups.len() as i16,
            weight,
            if negative { NUMERIC_NEG } else { NUMERIC_POS },
        )
    };

    buf.extend_from_slice(&ndigits.to_be_bytes());
    buf.extend_from_slice(&weight.to_be_bytes());
    buf.extend_from_slice(&sign.to_be_bytes());
    buf.extend_from_slice(&dscale.to_be_bytes());
    for group in &groups {
        buf.extend_from_slice(&group.to_be_bytes());
    }
    Ok(())
}

/// numeric: decimal text is authoritative, binary is base-10000 groups.
pub struct NumericCodec;

impl Codec for NumericCodec {
    fn name(&self) -> &str {
        "numeric"
    }

    // The text form is canonical and as compact as the digit groups
    fn preferred_format(&self) -> FormatCode {
        FormatCode::Text
    }

    fn decode_text(&self, bytes: &[u8]) -> Result<PgValue> {
        Ok(PgValue::Numeric(utf8(bytes)?.to_string()))
    }

    fn decode_binary(&self, bytes: &[u8]) -> Result<PgValue> {
        Ok(PgValue::Numeric(numeric_binary_to_text(bytes)?))
    }

    fn encode_text(&self, value: &PgValue, buf: &mut Vec<u8>) -> Result<()> {
        match value {
            PgValue::Numeric(s) | PgValue::Text(s) => {
                buf.extend_from_slice(s.as_bytes());
                Ok(())
            }
            PgValue::Int2(v) => {
                buf.extend_from_slice(v.to_string().as_bytes());
                Ok(())
            }
            PgValue::Int4(v) => {
                buf.extend_from_slice(v.to_string().as_bytes());
                Ok(())
            }
            PgValue::Int8(v) => {
                buf.extend_from_slice(v.to_string().as_bytes());
                Ok(())
            }
            other => Err(Error::type_mismatch(other.kind(), "numeric")),
        }
    }

    fn encode_binary(&self, value: &PgValue, buf: &mut Vec<u8>) -> Result<()> {
        match value {
            PgValue::Numeric(s) | PgValue::Text(s) => numeric_text_to_binary(s, buf),
            PgValue::Int2(v) => numeric_text_to_binary(&v.to_string(), buf),
            PgValue::Int4(v) => numeric_text_to_binary(&v.to_string(), buf),
            PgValue::Int8(v) => numeric_text_to_binary(&v.to_string(), buf),
            other => Err(Error::type_mismatch(other.kind(), "numeric")),
        }
    }
}

// === uuid ===

pub struct UuidCodec;

impl Codec for UuidCodec {
    fn name(&self) -> &str {
        "uuid"
    }

    fn preferred_format(&self) -> FormatCode {
        FormatCode::Binary
    }

    fn decode_text(&self, bytes: &[u8]) -> Result<PgValue> {
        let s = utf8(bytes)?;
        let mut out = [0u8; 16];
        let mut nibbles = s.bytes().filter(|b| *b != b'-');
        for byte in out.iter_mut() {
            let hi = nibbles
                .next()
                .and_then(|b| (b as char).to_digit(16))
                .ok_or_else(|| Error::Decode(format!("invalid uuid: {s:?}")))?;
            let lo = nibbles
                .next()
                .and_then(|b| (b as char).to_digit(16))
                .ok_or_else(|| Error::Decode(format!("invalid uuid: {s:?}")))?;
            *byte = ((hi << 4) | lo) as u8;
        }
        if nibbles.next().is_some() {
            return Err(Error::Decode(format!("invalid uuid: {s:?}")));
        }
        Ok(PgValue::Uuid(out))
    }

    fn decode_binary(&self, bytes: &[u8]) -> Result<PgValue> {
        Ok(PgValue::Uuid(fixed::<16>(bytes, "uuid")?))
    }

    fn encode_text(&self, value: &PgValue, buf: &mut Vec<u8>) -> Result<()> {
        match value {
            PgValue::Uuid(v) => {
                let hex: String = v.iter().map(|b| format!("{b:02x}")).collect();
                buf.extend_from_slice(hex[0..8].as_bytes());
                buf.push(b'-');
                buf.extend_from_slice(hex[8..12].as_bytes());
                buf.push(b'-');
                buf.extend_from_slice(hex[12..16].as_bytes());
                buf.push(b'-');
                buf.extend_from_slice(hex[16..20].as_bytes());
                buf.push(b'-');
                buf.extend_from_slice(hex[20..32].as_bytes());
                Ok(())
            }
            other => Err(Error::type_mismatch(other.kind(), "uuid")),
        }
    }

    fn encode_binary(&self, value: &PgValue, buf: &mut Vec<u8>) -> Result<()> {
        match value {
            PgValue::Uuid(v) => {
                buf.extend_from_slice(v);
                Ok(())
            }
            other => Err(Error::type_mismatch(other.kind(), "uuid")),
        }
    }
}

// === json / jsonb ===

/// json and jsonb; jsonb's binary form carries a leading version byte.
pub struct JsonCodec {
    jsonb: bool,
}

impl JsonCodec {
    pub fn new(jsonb: bool) -> Self {
        Self { jsonb }
    }

    fn extract<'v>(&self, value: &'v PgValue) -> Result<&'v str> {
        match value {
            PgValue::Json(s) | PgValue::Text(s) => Ok(s),
            other => Err(Error::type_mismatch(other.kind(), self.name())),
        }
    }
}

impl Codec for JsonCodec {
    fn name(&self) -> &str {
        if self.jsonb { "jsonb" } else { "json" }
    }

    fn preferred_format(&self) -> FormatCode {
        if self.jsonb {
            FormatCode::Binary
        } else {
            FormatCode::Text
        }
    }

    fn decode_text(&self, bytes: &[u8]) -> Result<PgValue> {
        Ok(PgValue::Json(utf8(bytes)?.to_string()))
    }

    fn decode_binary(&self, bytes: &[u8]) -> Result<PgValue> {
        if self.jsonb {
            let (version, rest) = bytes
                .split_first()
                .ok_or_else(|| Error::Decode("empty jsonb payload".into()))?;
            if *version != 1 {
                return Err(Error::Decode(format!("unknown jsonb version: {version}")));
            }
            Ok(PgValue::Json(utf8(rest)?.to_string()))
        } else {
            self.decode_text(bytes)
        }
    }

    fn encode_text(&self, value: &PgValue, buf: &mut Vec<u8>) -> Result<()> {
        buf.extend_from_slice(self.extract(value)?.as_bytes());
        Ok(())
    }

    fn encode_binary(&self, value: &PgValue, buf: &mut Vec<u8>) -> Result<()> {
        if self.jsonb {
            buf.push(1);
        }
        buf.extend_from_slice(self.extract(value)?.as_bytes());
        Ok(())
    }
}

// === point ===

pub struct PointCodec;

impl Codec for PointCodec {
    fn name(&self) -> &str {
        "point"
    }

    fn preferred_format(&self) -> FormatCode {
        FormatCode::Binary
    }

    fn decode_text(&self, bytes: &[u8]) -> Result<PgValue> {
        let s = utf8(bytes)?.trim();
        let inner = s
            .strip_prefix('(')
            .and_then(|s| s.strip_suffix(')'))
            .ok_or_else(|| Error::Decode(format!("invalid point: {s:?}")))?;
        let (x, y) = inner
            .split_once(',')
            .ok_or_else(|| Error::Decode(format!("invalid point: {s:?}")))?;
        Ok(PgValue::Point {
            x: x.trim()
                .parse()
                .map_err(|e| Error::Decode(format!("invalid point x: {e}")))?,
            y: y.trim()
                .parse()
                .map_err(|e| Error::Decode(format!("invalid point y: {e}")))?,
        })
    }

    fn decode_binary(&self, bytes: &[u8]) -> Result<PgValue> {
        let arr = fixed::<16>(bytes, "point")?;
        let x = f64::from_be_bytes(arr[0..8].try_into().unwrap_or_default());
        let y = f64::from_be_bytes(arr[8..16].try_into().unwrap_or_default());
        Ok(PgValue::Point { x, y })
    }

    fn encode_text(&self, value: &PgValue, buf: &mut Vec<u8>) -> Result<()> {
        match value {
            PgValue::Point { x, y } => {
                buf.extend_from_slice(format!("({x},{y})").as_bytes());
                Ok(())
            }
            other => Err(Error::type_mismatch(other.kind(), "point")),
        }
    }

    fn encode_binary(&self, value: &PgValue, buf: &mut Vec<u8>) -> Result<()> {
        match value {
            PgValue::Point { x, y } => {
                buf.extend_from_slice(&x.to_be_bytes());
                buf.extend_from_slice(&y.to_be_bytes());
                Ok(())
            }
            other => Err(Error::type_mismatch(other.kind(), "point")),
        }
    }
}

/// Register all primitive codecs.
pub fn register(registry: &mut TypeRegistry) {
    registry.register(oid::BOOL, Arc::new(BoolCodec));
    registry.register(oid::INT2, Arc::new(Int2Codec));
    registry.register(oid::INT4, Arc::new(Int4Codec));
    registry.register(oid::INT8, Arc::new(Int8Codec));
    registry.register(oid::OID, Arc::new(OidCodec));
    registry.register(oid::FLOAT4, Arc::new(Float4Codec));
    registry.register(oid::FLOAT8, Arc::new(Float8Codec));
    registry.register(oid::TEXT, Arc::new(TextCodec::new("text")));
    registry.register(oid::VARCHAR, Arc::new(TextCodec::new("varchar")));
    registry.register(oid::BPCHAR, Arc::new(TextCodec::new("bpchar")));
    registry.register(oid::NAME, Arc::new(TextCodec::new("name")));
    registry.register(oid::UNKNOWN, Arc::new(TextCodec::new("unknown")));
    registry.register(oid::BYTEA, Arc::new(ByteaCodec));
    registry.register(oid::NUMERIC, Arc::new(NumericCodec));
    registry.register(oid::UUID, Arc::new(UuidCodec));
    registry.register(oid::JSON, Arc::new(JsonCodec::new(false)));
    registry.register(oid::JSONB, Arc::new(JsonCodec::new(true)));
    registry.register(oid::POINT, Arc::new(PointCodec));
}
