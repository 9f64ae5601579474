//! Typed value encoding and decoding.
//!
//! Every PostgreSQL type is served by a [`Codec`] registered under its
//! OID. Built-in codecs register once into a shared process-wide
//! registry; custom types (whose OIDs differ per database) are added to a
//! per-connection [`ConnInfo`] after connect.
//!
//! # Structure
//!
//! - `value`: the tri-state [`Value`] and the natural value shapes
//! - `primitives`: bool, integers, floats, text, bytea, numeric, uuid, json
//! - `datetime`: date, time, timestamp, timestamptz, interval
//! - `array`: generic array codec (text and binary forms)
//! - `composite`: record codec
//! - `range`: range and multirange codecs

pub mod array;
pub mod composite;
pub mod datetime;
pub mod primitives;
pub mod range;
pub mod value;

#[cfg(feature = "with-time")]
pub mod time;
#[cfg(feature = "with-uuid")]
pub mod uuid;

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use crate::error::{Error, Result};
use crate::protocol::codec::write_value;
use crate::protocol::types::{FormatCode, Oid, oid};

pub use value::{
    ArrayDimension, ArrayValue, CompositeField, Interval, PgValue, RangeBound, RangeValue, Value,
};

/// Converts between a PostgreSQL value and its two wire formats.
///
/// Codecs operate on unframed payload bytes; the registry handles the
/// `i32` length framing and SQL NULL. Text format is the default
/// preference; codecs with an efficient binary form override
/// [`Codec::preferred_format`].
pub trait Codec: Send + Sync {
    /// Type name, as it appears in `pg_type`.
    fn name(&self) -> &str;

    /// The wire format this codec prefers for results and parameters.
    fn preferred_format(&self) -> FormatCode {
        FormatCode::Text
    }

    /// Decode a text-format payload.
    fn decode_text(&self, bytes: &[u8]) -> Result<PgValue>;

    /// Decode a binary-format payload.
    fn decode_binary(&self, bytes: &[u8]) -> Result<PgValue>;

    /// Encode a value as a text-format payload.
    fn encode_text(&self, value: &PgValue, buf: &mut Vec<u8>) -> Result<()>;

    /// Encode a value as a binary-format payload.
    fn encode_binary(&self, value: &PgValue, buf: &mut Vec<u8>) -> Result<()>;
}

/// Fallback codec for OIDs with no registration: bytes pass through
/// untouched in both directions.
pub struct RawCodec {
    oid: Oid,
}

impl RawCodec {
    /// Create a fallback codec for the given OID.
    pub fn new(oid: Oid) -> Self {
        Self { oid }
    }
}

impl Codec for RawCodec {
    fn name(&self) -> &str {
        "unknown"
    }

    fn decode_text(&self, bytes: &[u8]) -> Result<PgValue> {
        Ok(PgValue::Raw {
            oid: self.oid,
            format: FormatCode::Text,
            bytes: bytes.to_vec(),
        })
    }

    fn decode_binary(&self, bytes: &[u8]) -> Result<PgValue> {
        Ok(PgValue::Raw {
            oid: self.oid,
            format: FormatCode::Binary,
            bytes: bytes.to_vec(),
        })
    }

    fn encode_text(&self, value: &PgValue, buf: &mut Vec<u8>) -> Result<()> {
        self.encode_binary(value, buf)
    }

    fn encode_binary(&self, value: &PgValue, buf: &mut Vec<u8>) -> Result<()> {
        match value {
            PgValue::Raw { bytes, .. } => {
                buf.extend_from_slice(bytes);
                Ok(())
            }
            PgValue::Text(s) => {
                buf.extend_from_slice(s.as_bytes());
                Ok(())
            }
            PgValue::Bytea(b) => {
                buf.extend_from_slice(b);
                Ok(())
            }
            other => Err(Error::type_mismatch(other.kind(), "unregistered type")),
        }
    }
}

/// OID → codec mapping.
///
/// The process-wide instance built by [`shared_registry`] holds every
/// built-in codec and is never mutated after construction; per-connection
/// additions go through [`ConnInfo`].
pub struct TypeRegistry {
    codecs: HashMap<Oid, Arc<dyn Codec>>,
}

impl TypeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            codecs: HashMap::new(),
        }
    }

    /// Create a registry with every built-in codec installed.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        primitives::register(&mut registry);
        datetime::register(&mut registry);
        array::register(&mut registry);
        composite::register(&mut registry);
        range::register(&mut registry);
        registry
    }

    /// Install a codec for an OID.
    pub fn register(&mut self, oid: Oid, codec: Arc<dyn Codec>) {
        self.codecs.insert(oid, codec);
    }

    /// Look up the codec for an OID, falling back to raw passthrough.
    pub fn codec_for(&self, oid: Oid) -> Arc<dyn Codec> {
        match self.codecs.get(&oid) {
            Some(codec) => Arc::clone(codec),
            None => Arc::new(RawCodec::new(oid)),
        }
    }

    /// Registered codec for an OID, if any.
    pub fn lookup(&self, oid: Oid) -> Option<&Arc<dyn Codec>> {
        self.codecs.get(&oid)
    }

    /// The preferred wire format for an OID. Text for unknown types.
    pub fn preferred_format(&self, oid: Oid) -> FormatCode {
        self.codecs
            .get(&oid)
            .map(|c| c.preferred_format())
            .unwrap_or_default()
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

static BUILTINS: LazyLock<Arc<TypeRegistry>> =
    LazyLock::new(|| Arc::new(TypeRegistry::with_builtins()));

/// The shared registry of built-in codecs.
pub fn shared_registry() -> Arc<TypeRegistry> {
    Arc::clone(&BUILTINS)
}

/// Per-connection type information.
///
/// Wraps the shared built-in registry with a mutable map for custom types
/// discovered or registered after connect. The shared map is never
/// mutated through this type.
pub struct ConnInfo {
    shared: Arc<TypeRegistry>,
    custom: HashMap<Oid, Arc<dyn Codec>>,
    names: HashMap<String, Oid>,
}

impl ConnInfo {
    /// Create connection type info backed by the shared registry.
    pub fn new() -> Self {
        Self {
            shared: shared_registry(),
            custom: HashMap::new(),
            names: HashMap::new(),
        }
    }

    /// Register a codec for a connection-local type.
    pub fn register(&mut self, oid: Oid, name: &str, codec: Arc<dyn Codec>) {
        self.custom.insert(oid, codec);
        self.names.insert(name.to_string(), oid);
    }

    /// Register an array type whose elements use an existing codec.
    pub fn register_array(&mut self, array_oid: Oid, name: &str, element_oid: Oid) {
        let element = self.codec_for(element_oid);
        self.register(
            array_oid,
            name,
            Arc::new(array::ArrayCodec::new(element_oid, element)),
        );
    }

    /// OID previously registered under a type name.
    pub fn oid_of(&self, name: &str) -> Option<Oid> {
        self.names.get(name).copied()
    }

    /// Look up the codec for an OID, falling back to raw passthrough.
    pub fn codec_for(&self, oid: Oid) -> Arc<dyn Codec> {
        match self.custom.get(&oid) {
            Some(codec) => Arc::clone(codec),
            None => self.shared.codec_for(oid),
        }
    }

    /// The preferred wire format for an OID.
    pub fn preferred_format(&self, oid: Oid) -> FormatCode {
        match self.custom.get(&oid) {
            Some(codec) => codec.preferred_format(),
            None => self.shared.preferred_format(oid),
        }
    }

    /// Decode a wire value into a [`Value`]. `None` bytes decode to NULL.
    pub fn decode(&self, oid: Oid, format: FormatCode, bytes: Option<&[u8]>) -> Result<Value> {
        let Some(bytes) = bytes else {
            return Ok(Value::Null);
        };
        let codec = self.codec_for(oid);
        let value = match format {
            FormatCode::Text => codec.decode_text(bytes)?,
            FormatCode::Binary => codec.decode_binary(bytes)?,
        };
        Ok(Value::Present(value))
    }

    /// Encode a [`Value`] as a length-framed wire value.
    ///
    /// NULL encodes as length -1; `Undefined` is rejected.
    pub fn encode(
        &self,
        oid: Oid,
        format: FormatCode,
        value: &Value,
        buf: &mut Vec<u8>,
    ) -> Result<()> {
        match value {
            Value::Undefined => Err(Error::Encode(
                "cannot encode an undefined value; assign or set NULL first".into(),
            )),
            Value::Null => {
                write_value(buf, None);
                Ok(())
            }
            Value::Present(inner) => {
                let codec = self.codec_for(oid);
                let mut payload = Vec::new();
                match format {
                    FormatCode::Text => codec.encode_text(inner, &mut payload)?,
                    FormatCode::Binary => codec.encode_binary(inner, &mut payload)?,
                }
                write_value(buf, Some(&payload));
                Ok(())
            }
        }
    }
}

impl Default for ConnInfo {
    fn default() -> Self {
        Self::new()
    }
}

/// The OID a value naturally encodes to, used as a Parse type hint.
pub fn natural_oid(value: &Value) -> Oid {
    match value {
        Value::Present(v) => match v {
            PgValue::Bool(_) => oid::BOOL,
            PgValue::Int2(_) => oid::INT2,
            PgValue::Int4(_) => oid::INT4,
            PgValue::Int8(_) => oid::INT8,
            PgValue::Float4(_) => oid::FLOAT4,
            PgValue::Float8(_) => oid::FLOAT8,
            PgValue::Text(_) => oid::TEXT,
            PgValue::Bytea(_) => oid::BYTEA,
            PgValue::Numeric(_) => oid::NUMERIC,
            PgValue::Date(_) => oid::DATE,
            PgValue::Time(_) => oid::TIME,
            PgValue::Timestamp(_) => oid::TIMESTAMP,
            PgValue::TimestampTz(_) => oid::TIMESTAMPTZ,
            PgValue::Interval(_) => oid::INTERVAL,
            PgValue::Uuid(_) => oid::UUID,
            PgValue::Json(_) => oid::JSONB,
            PgValue::Point { .. } => oid::POINT,
            PgValue::Array(arr) => {
                crate::protocol::types::array_of(arr.element_oid).unwrap_or(0)
            }
            PgValue::Composite(_) => oid::RECORD,
            PgValue::Range(range) => match range.element_oid {
                oid::INT4 => oid::INT4RANGE,
                oid::INT8 => oid::INT8RANGE,
                oid::NUMERIC => oid::NUMRANGE,
                oid::TIMESTAMP => oid::TSRANGE,
                oid::TIMESTAMPTZ => oid::TSTZRANGE,
                oid::DATE => oid::DATERANGE,
                _ => 0,
            },
            PgValue::Multirange(_) => 0,
            PgValue::Raw { oid, .. } => *oid,
        },
        // Let the server infer NULL and undefined parameter types
        _ => 0,
    }
}

/// Assignment of a decoded [`Value`] into a caller-supplied destination.
///
/// Scalar destinations reject NULL; wrap in `Option` to accept it. One
/// step of numeric widening is applied on mismatch (int2 → int4 → int8,
/// float4 → float8).
pub trait FromValue: Sized {
    /// Convert a decoded value into this destination type.
    fn from_value(value: Value) -> Result<Self>;
}

fn reject_null<T>(value: Value, target: &str) -> Result<T>
where
    T: FromPresent,
{
    match value {
        Value::Present(v) => T::from_present(v),
        Value::Null => Err(Error::Decode(format!(
            "cannot assign NULL to {target}; use Option"
        ))),
        Value::Undefined => Err(Error::Decode("cannot assign an undefined value".into())),
    }
}

/// Conversion from a concrete (non-NULL) value.
trait FromPresent: Sized {
    fn from_present(value: PgValue) -> Result<Self>;
}

macro_rules! impl_from_value {
    ($ty:ty, $target:literal, $($pattern:pat => $expr:expr),+ $(,)?) => {
        impl FromPresent for $ty {
            fn from_present(value: PgValue) -> Result<Self> {
                match value {
                    $($pattern => $expr,)+
                    other => Err(Error::Decode(format!(
                        concat!("cannot assign {} to ", $target),
                        other.kind()
                    ))),
                }
            }
        }

        impl FromValue for $ty {
            fn from_value(value: Value) -> Result<Self> {
                reject_null(value, $target)
            }
        }
    };
}

impl_from_value!(bool, "bool", PgValue::Bool(v) => Ok(v));
impl_from_value!(i16, "i16", PgValue::Int2(v) => Ok(v));
impl_from_value!(
    i32, "i32",
    PgValue::Int4(v) => Ok(v),
    PgValue::Int2(v) => Ok(v as i32),
);
impl_from_value!(
    i64, "i64",
    PgValue::Int8(v) => Ok(v),
    PgValue::Int4(v) => Ok(v as i64),
    PgValue::Int2(v) => Ok(v as i64),
);
impl_from_value!(f32, "f32", PgValue::Float4(v) => Ok(v));
impl_from_value!(
    f64, "f64",
    PgValue::Float8(v) => Ok(v),
    PgValue::Float4(v) => Ok(v as f64),
);
impl_from_value!(
    String, "String",
    PgValue::Text(v) => Ok(v),
    PgValue::Json(v) => Ok(v),
    PgValue::Numeric(v) => Ok(v),
    PgValue::Raw { format: FormatCode::Text, bytes, .. } => {
        String::from_utf8(bytes).map_err(|e| Error::Decode(format!("invalid UTF-8: {e}")))
    },
);
impl_from_value!(
    Vec<u8>, "Vec<u8>",
    PgValue::Bytea(v) => Ok(v),
    PgValue::Raw { bytes, .. } => Ok(bytes),
);
impl_from_value!([u8; 16], "[u8; 16]", PgValue::Uuid(v) => Ok(v));
impl_from_value!(Interval, "Interval", PgValue::Interval(v) => Ok(v));
impl_from_value!(ArrayValue, "ArrayValue", PgValue::Array(v) => Ok(v));
impl_from_value!(RangeValue, "RangeValue", PgValue::Range(v) => Ok(*v));

impl<T: FromPresent> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            Value::Present(v) => T::from_present(v).map(Some),
            Value::Undefined => Err(Error::Decode("cannot assign an undefined value".into())),
        }
    }
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self> {
        Ok(value)
    }
}

impl FromValue for PgValue {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Present(v) => Ok(v),
            Value::Null => Err(Error::Decode("cannot assign NULL to PgValue".into())),
            Value::Undefined => Err(Error::Decode("cannot assign an undefined value".into())),
        }
    }
}

/// Materializes a typed row from a DataRow.
pub trait FromRow: Sized {
    /// Decode one row using the connection's type info.
    fn from_row(
        info: &ConnInfo,
        cols: &crate::protocol::backend::RowDescription<'_>,
        row: crate::protocol::backend::DataRow<'_>,
    ) -> Result<Self>;
}

macro_rules! impl_from_row_tuple {
    ($($idx:tt : $name:ident),+) => {
        impl<$($name: FromValue),+> FromRow for ($($name,)+) {
            fn from_row(
                info: &ConnInfo,
                cols: &crate::protocol::backend::RowDescription<'_>,
                row: crate::protocol::backend::DataRow<'_>,
            ) -> Result<Self> {
                let mut values = row.iter();
                let fields = cols.fields();
                Ok(($(
                    {
                        let field = fields.get($idx).ok_or_else(|| {
                            Error::Decode(format!("row has no column {}", $idx))
                        })?;
                        let bytes = values.next().ok_or_else(|| {
                            Error::Decode(format!("row data ends before column {}", $idx))
                        })?;
                        let value = info.decode(field.type_oid(), field.format(), bytes)?;
                        $name::from_value(value)?
                    },
                )+))
            }
        }
    };
}

impl_from_row_tuple!(0: A);
impl_from_row_tuple!(0: A, 1: B);
impl_from_row_tuple!(0: A, 1: B, 2: C);
impl_from_row_tuple!(0: A, 1: B, 2: C, 3: D);
impl_from_row_tuple!(0: A, 1: B, 2: C, 3: D, 4: E);
impl_from_row_tuple!(0: A, 1: B, 2: C, 3: D, 4: E, 5: F);
impl_from_row_tuple!(0: A, 1: B, 2: C, 3: D, 4: E, 5: F, 6: G);
impl_from_row_tuple!(0: A, 1: B, 2: C, 3: D, 4: E, 5: F, 6: G, 7: H);

impl FromRow for Vec<Value> {
    fn from_row(
        info: &ConnInfo,
        cols: &crate::protocol::backend::RowDescription<'_>,
        row: crate::protocol::backend::DataRow<'_>,
    ) -> Result<Self> {
        let mut out = Vec::with_capacity(cols.len());
        for (field, bytes) in cols.fields().iter().zip(row.iter()) {
            out.push(info.decode(field.type_oid(), field.format(), bytes)?);
        }
        Ok(out)
    }
}
