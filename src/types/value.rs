//! Value shapes produced and consumed by codecs.

use crate::protocol::types::{FormatCode, Oid};

/// A typed PostgreSQL value with a three-state status.
///
/// `Undefined` marks an uninitialized slot; encoders reject it so that
/// encode-before-initialization bugs surface at the wire boundary rather
/// than as a silently-bound NULL.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// A concrete value
    Present(PgValue),
    /// SQL NULL
    Null,
    /// Uninitialized; rejected by encoders
    #[default]
    Undefined,
}

impl Value {
    /// Wrap an optional value, mapping `None` to SQL NULL.
    pub fn from_option<T: Into<PgValue>>(value: Option<T>) -> Self {
        match value {
            Some(v) => Value::Present(v.into()),
            None => Value::Null,
        }
    }

    /// Returns true for SQL NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns true for the uninitialized state.
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// The concrete value, if present.
    pub fn get(&self) -> Option<&PgValue> {
        match self {
            Value::Present(v) => Some(v),
            _ => None,
        }
    }

    /// Take the concrete value, if present.
    pub fn into_inner(self) -> Option<PgValue> {
        match self {
            Value::Present(v) => Some(v),
            _ => None,
        }
    }
}

impl<T: Into<PgValue>> From<T> for Value {
    fn from(value: T) -> Self {
        Value::Present(value.into())
    }
}

/// The natural value of each built-in codec.
#[derive(Debug, Clone, PartialEq)]
pub enum PgValue {
    /// boolean
    Bool(bool),
    /// int2
    Int2(i16),
    /// int4
    Int4(i32),
    /// int8
    Int8(i64),
    /// float4
    Float4(f32),
    /// float8
    Float8(f64),
    /// text, varchar, bpchar, name
    Text(String),
    /// bytea
    Bytea(Vec<u8>),
    /// numeric, kept as its decimal text form
    Numeric(String),
    /// date: days since 2000-01-01
    Date(i32),
    /// time: microseconds since midnight
    Time(i64),
    /// timestamp: microseconds since 2000-01-01 00:00:00
    Timestamp(i64),
    /// timestamptz: microseconds since 2000-01-01 00:00:00 UTC
    TimestampTz(i64),
    /// interval
    Interval(Interval),
    /// uuid, raw big-endian bytes
    Uuid([u8; 16]),
    /// json / jsonb document text
    Json(String),
    /// geometric point
    Point { x: f64, y: f64 },
    /// array of any element type
    Array(ArrayValue),
    /// composite (record) value
    Composite(Vec<CompositeField>),
    /// range value
    Range(Box<RangeValue>),
    /// ordered sequence of ranges
    Multirange(Vec<RangeValue>),
    /// unrecognized type, raw wire bytes
    Raw {
        /// Type OID the bytes were read as
        oid: Oid,
        /// Wire format of the bytes
        format: FormatCode,
        /// Payload bytes
        bytes: Vec<u8>,
    },
}

/// An interval: months/days/microseconds kept separately, as on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Interval {
    /// Whole months
    pub months: i32,
    /// Whole days
    pub days: i32,
    /// Microseconds
    pub micros: i64,
}

/// One dimension of an array: length and lower bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrayDimension {
    /// Number of elements along this dimension
    pub len: i32,
    /// Index of the first element (PostgreSQL defaults to 1)
    pub lower_bound: i32,
}

/// A multi-dimensional, rectangular array.
///
/// Elements are stored flattened in row-major order; the element count
/// always equals the product of the dimension lengths.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayValue {
    /// Element type OID
    pub element_oid: Oid,
    /// Dimensions, outermost first; empty for an empty array
    pub dims: Vec<ArrayDimension>,
    /// Flattened elements; `Value::Null` for NULL slots
    pub elements: Vec<Value>,
}

impl ArrayValue {
    /// A one-dimensional array with the default lower bound.
    pub fn new(element_oid: Oid, elements: Vec<Value>) -> Self {
        let dims = if elements.is_empty() {
            Vec::new()
        } else {
            vec![ArrayDimension {
                len: elements.len() as i32,
                lower_bound: 1,
            }]
        };
        Self {
            element_oid,
            dims,
            elements,
        }
    }

    /// Whether any element is NULL.
    pub fn contains_null(&self) -> bool {
        self.elements.iter().any(Value::is_null)
    }

    /// Product of the dimension lengths.
    pub fn expected_len(&self) -> usize {
        self.dims.iter().map(|d| d.len as usize).product()
    }
}

/// One field of a composite value.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeField {
    /// Field type OID
    pub oid: Oid,
    /// Field value
    pub value: Value,
}

/// A range bound.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum RangeBound {
    /// Bound present and included
    Inclusive(PgValue),
    /// Bound present and excluded
    Exclusive(PgValue),
    /// No bound on this side
    #[default]
    Unbounded,
}

impl RangeBound {
    /// The bound value, if the side is bounded.
    pub fn value(&self) -> Option<&PgValue> {
        match self {
            RangeBound::Inclusive(v) | RangeBound::Exclusive(v) => Some(v),
            RangeBound::Unbounded => None,
        }
    }

    /// Whether the side is bounded and inclusive.
    pub fn is_inclusive(&self) -> bool {
        matches!(self, RangeBound::Inclusive(_))
    }
}

/// A range value over some element type.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeValue {
    /// Bound type OID
    pub element_oid: Oid,
    /// The empty range has no bounds at all
    pub empty: bool,
    /// Lower bound
    pub lower: RangeBound,
    /// Upper bound
    pub upper: RangeBound,
}

impl RangeValue {
    /// The canonical empty range.
    pub fn empty(element_oid: Oid) -> Self {
        Self {
            element_oid,
            empty: true,
            lower: RangeBound::Unbounded,
            upper: RangeBound::Unbounded,
        }
    }
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for PgValue {
                fn from(value: $ty) -> Self {
                    PgValue::$variant(value)
                }
            }
        )*
    };
}

impl_from! {
    bool => Bool,
    i16 => Int2,
    i32 => Int4,
    i64 => Int8,
    f32 => Float4,
    f64 => Float8,
    String => Text,
    Vec<u8> => Bytea,
    Interval => Interval,
    [u8; 16] => Uuid,
    ArrayValue => Array,
}

impl From<&str> for PgValue {
    fn from(value: &str) -> Self {
        PgValue::Text(value.to_string())
    }
}

impl From<&[u8]> for PgValue {
    fn from(value: &[u8]) -> Self {
        PgValue::Bytea(value.to_vec())
    }
}

impl From<RangeValue> for PgValue {
    fn from(value: RangeValue) -> Self {
        PgValue::Range(Box::new(value))
    }
}

impl PgValue {
    /// Short name of the variant, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            PgValue::Bool(_) => "bool",
            PgValue::Int2(_) => "int2",
            PgValue::Int4(_) => "int4",
            PgValue::Int8(_) => "int8",
            PgValue::Float4(_) => "float4",
            PgValue::Float8(_) => "float8",
            PgValue::Text(_) => "text",
            PgValue::Bytea(_) => "bytea",
            PgValue::Numeric(_) => "numeric",
            PgValue::Date(_) => "date",
            PgValue::Time(_) => "time",
            PgValue::Timestamp(_) => "timestamp",
            PgValue::TimestampTz(_) => "timestamptz",
            PgValue::Interval(_) => "interval",
            PgValue::Uuid(_) => "uuid",
            PgValue::Json(_) => "json",
            PgValue::Point { .. } => "point",
            PgValue::Array(_) => "array",
            PgValue::Composite(_) => "composite",
            PgValue::Range(_) => "range",
            PgValue::Multirange(_) => "multirange",
            PgValue::Raw { .. } => "raw",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::oid;

    #[test]
    fn tri_state() {
        let present = Value::from(42_i32);
        assert!(!present.is_null());
        assert_eq!(present.get(), Some(&PgValue::Int4(42)));

        let null = Value::Null;
        assert!(null.is_null());
        assert_eq!(null.get(), None);

        assert!(Value::default().is_undefined());
    }

    #[test]
    fn option_conversion() {
        assert_eq!(
            Value::from_option(Some(1_i64)),
            Value::Present(PgValue::Int8(1))
        );
        assert_eq!(Value::from_option(None::<i64>), Value::Null);
    }

    #[test]
    fn array_shape() {
        let arr = ArrayValue::new(
            oid::INT4,
            vec![Value::from(1_i32), Value::Null, Value::from(3_i32)],
        );
        assert_eq!(arr.dims.len(), 1);
        assert_eq!(arr.expected_len(), 3);
        assert!(arr.contains_null());
    }
}
