//! Common PostgreSQL wire protocol types.

pub use zerocopy::byteorder::big_endian::{
    I16 as I16BE, I32 as I32BE, U16 as U16BE, U32 as U32BE,
};

/// PostgreSQL Object Identifier (OID)
pub type Oid = u32;

/// Data format code in PostgreSQL protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u16)]
pub enum FormatCode {
    /// Text format (human-readable)
    #[default]
    Text = 0,
    /// Binary format (type-specific packed representation)
    Binary = 1,
}

impl FormatCode {
    /// Create a FormatCode from a raw u16 value.
    pub fn from_u16(value: u16) -> Self {
        match value {
            1 => FormatCode::Binary,
            _ => FormatCode::Text,
        }
    }
}

impl From<u16> for FormatCode {
    fn from(value: u16) -> Self {
        Self::from_u16(value)
    }
}

/// Transaction status indicator from ReadyForQuery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum TransactionStatus {
    /// Idle (not in transaction block)
    #[default]
    Idle = b'I',
    /// In transaction block
    InTransaction = b'T',
    /// In failed transaction block (queries rejected until rollback)
    Failed = b'E',
}

impl TransactionStatus {
    /// Create a TransactionStatus from a raw byte value.
    pub fn from_byte(value: u8) -> Option<Self> {
        match value {
            b'I' => Some(TransactionStatus::Idle),
            b'T' => Some(TransactionStatus::InTransaction),
            b'E' => Some(TransactionStatus::Failed),
            _ => None,
        }
    }

    /// Returns true if currently in a transaction (active or failed).
    pub fn in_transaction(self) -> bool {
        matches!(
            self,
            TransactionStatus::InTransaction | TransactionStatus::Failed
        )
    }

    /// Returns true if the transaction has failed.
    pub fn is_failed(self) -> bool {
        matches!(self, TransactionStatus::Failed)
    }
}

/// Well-known PostgreSQL type OIDs.
///
/// These are stable system OIDs from `pg_type.dat`; anything not listed
/// here is discovered from `pg_type` at connection time.
pub mod oid {
    use super::Oid;

    /// boolean, format 't'/'f'
    pub const BOOL: Oid = 16;
    /// variable-length binary string
    pub const BYTEA: Oid = 17;
    /// single character
    pub const CHAR: Oid = 18;
    /// 63-byte type for storing system identifiers
    pub const NAME: Oid = 19;
    /// 8-byte integer
    pub const INT8: Oid = 20;
    /// 2-byte integer
    pub const INT2: Oid = 21;
    /// 4-byte integer
    pub const INT4: Oid = 23;
    /// variable-length string, no limit
    pub const TEXT: Oid = 25;
    /// object identifier
    pub const OID: Oid = 26;
    /// tuple physical location
    pub const TID: Oid = 27;
    /// transaction id
    pub const XID: Oid = 28;
    /// command identifier
    pub const CID: Oid = 29;
    /// JSON stored as text
    pub const JSON: Oid = 114;
    /// XML content
    pub const XML: Oid = 142;
    /// geometric point '(x,y)'
    pub const POINT: Oid = 600;
    /// single-precision float
    pub const FLOAT4: Oid = 700;
    /// double-precision float
    pub const FLOAT8: Oid = 701;
    /// undetermined type
    pub const UNKNOWN: Oid = 705;
    /// IPv4/IPv6 host address
    pub const INET: Oid = 869;
    /// blank-padded string
    pub const BPCHAR: Oid = 1042;
    /// non-blank-padded string
    pub const VARCHAR: Oid = 1043;
    /// date
    pub const DATE: Oid = 1082;
    /// time of day
    pub const TIME: Oid = 1083;
    /// date and time
    pub const TIMESTAMP: Oid = 1114;
    /// date and time with time zone
    pub const TIMESTAMPTZ: Oid = 1184;
    /// time interval
    pub const INTERVAL: Oid = 1186;
    /// time of day with time zone
    pub const TIMETZ: Oid = 1266;
    /// arbitrary precision number
    pub const NUMERIC: Oid = 1700;
    /// UUID
    pub const UUID: Oid = 2950;
    /// no result
    pub const VOID: Oid = 2278;
    /// anonymous composite type
    pub const RECORD: Oid = 2249;
    /// binary JSON
    pub const JSONB: Oid = 3802;

    /// array of bool
    pub const BOOL_ARRAY: Oid = 1000;
    /// array of bytea
    pub const BYTEA_ARRAY: Oid = 1001;
    /// array of int2
    pub const INT2_ARRAY: Oid = 1005;
    /// array of int4
    pub const INT4_ARRAY: Oid = 1007;
    /// array of text
    pub const TEXT_ARRAY: Oid = 1009;
    /// array of bpchar
    pub const BPCHAR_ARRAY: Oid = 1014;
    /// array of varchar
    pub const VARCHAR_ARRAY: Oid = 1015;
    /// array of int8
    pub const INT8_ARRAY: Oid = 1016;
    /// array of float4
    pub const FLOAT4_ARRAY: Oid = 1021;
    /// array of float8
    pub const FLOAT8_ARRAY: Oid = 1022;
    /// array of timestamp
    pub const TIMESTAMP_ARRAY: Oid = 1115;
    /// array of date
    pub const DATE_ARRAY: Oid = 1182;
    /// array of time
    pub const TIME_ARRAY: Oid = 1183;
    /// array of timestamptz
    pub const TIMESTAMPTZ_ARRAY: Oid = 1185;
    /// array of numeric
    pub const NUMERIC_ARRAY: Oid = 1231;
    /// array of uuid
    pub const UUID_ARRAY: Oid = 2951;
    /// array of json
    pub const JSON_ARRAY: Oid = 199;
    /// array of jsonb
    pub const JSONB_ARRAY: Oid = 3807;
    /// array of record
    pub const RECORD_ARRAY: Oid = 2287;

    /// range of int4
    pub const INT4RANGE: Oid = 3904;
    /// range of numeric
    pub const NUMRANGE: Oid = 3906;
    /// range of timestamp
    pub const TSRANGE: Oid = 3908;
    /// range of timestamptz
    pub const TSTZRANGE: Oid = 3910;
    /// range of date
    pub const DATERANGE: Oid = 3912;
    /// range of int8
    pub const INT8RANGE: Oid = 3926;

    /// multirange of int4
    pub const INT4MULTIRANGE: Oid = 4451;
    /// multirange of numeric
    pub const NUMMULTIRANGE: Oid = 4532;
    /// multirange of timestamp
    pub const TSMULTIRANGE: Oid = 4533;
    /// multirange of timestamptz
    pub const TSTZMULTIRANGE: Oid = 4534;
    /// multirange of date
    pub const DATEMULTIRANGE: Oid = 4535;
    /// multirange of int8
    pub const INT8MULTIRANGE: Oid = 4536;
}

/// Element type of a built-in array OID.
pub fn array_element(array_oid: Oid) -> Option<Oid> {
    use oid::*;
    Some(match array_oid {
        BOOL_ARRAY => BOOL,
        BYTEA_ARRAY => BYTEA,
        INT2_ARRAY => INT2,
        INT4_ARRAY => INT4,
        TEXT_ARRAY => TEXT,
        BPCHAR_ARRAY => BPCHAR,
        VARCHAR_ARRAY => VARCHAR,
        INT8_ARRAY => INT8,
        FLOAT4_ARRAY => FLOAT4,
        FLOAT8_ARRAY => FLOAT8,
        TIMESTAMP_ARRAY => TIMESTAMP,
        DATE_ARRAY => DATE,
        TIME_ARRAY => TIME,
        TIMESTAMPTZ_ARRAY => TIMESTAMPTZ,
        NUMERIC_ARRAY => NUMERIC,
        UUID_ARRAY => UUID,
        JSON_ARRAY => JSON,
        JSONB_ARRAY => JSONB,
        RECORD_ARRAY => RECORD,
        _ => return None,
    })
}

/// Array type whose elements are the given built-in OID.
pub fn array_of(element_oid: Oid) -> Option<Oid> {
    use oid::*;
    Some(match element_oid {
        BOOL => BOOL_ARRAY,
        BYTEA => BYTEA_ARRAY,
        INT2 => INT2_ARRAY,
        INT4 => INT4_ARRAY,
        TEXT => TEXT_ARRAY,
        BPCHAR => BPCHAR_ARRAY,
        VARCHAR => VARCHAR_ARRAY,
        INT8 => INT8_ARRAY,
        FLOAT4 => FLOAT4_ARRAY,
        FLOAT8 => FLOAT8_ARRAY,
        TIMESTAMP => TIMESTAMP_ARRAY,
        DATE => DATE_ARRAY,
        TIME => TIME_ARRAY,
        TIMESTAMPTZ => TIMESTAMPTZ_ARRAY,
        NUMERIC => NUMERIC_ARRAY,
        UUID => UUID_ARRAY,
        JSON => JSON_ARRAY,
        JSONB => JSONB_ARRAY,
        RECORD => RECORD_ARRAY,
        _ => return None,
    })
}

/// Bound subtype of a built-in range OID.
pub fn range_subtype(range_oid: Oid) -> Option<Oid> {
    use oid::*;
    Some(match range_oid {
        INT4RANGE => INT4,
        NUMRANGE => NUMERIC,
        TSRANGE => TIMESTAMP,
        TSTZRANGE => TIMESTAMPTZ,
        DATERANGE => DATE,
        INT8RANGE => INT8,
        _ => return None,
    })
}

/// Range type carried by a built-in multirange OID.
pub fn multirange_range(multirange_oid: Oid) -> Option<Oid> {
    use oid::*;
    Some(match multirange_oid {
        INT4MULTIRANGE => INT4RANGE,
        NUMMULTIRANGE => NUMRANGE,
        TSMULTIRANGE => TSRANGE,
        TSTZMULTIRANGE => TSTZRANGE,
        DATEMULTIRANGE => DATERANGE,
        INT8MULTIRANGE => INT8RANGE,
        _ => return None,
    })
}
