//! Error types for pglink.

use thiserror::Error;

/// Result type for pglink operations.
pub type Result<T> = core::result::Result<T, Error>;

/// PostgreSQL error/notice field type codes.
pub mod field_type {
    /// Severity (localized)
    pub const SEVERITY: u8 = b'S';
    /// Severity (non-localized, PostgreSQL 9.6+)
    pub const SEVERITY_NON_LOCALIZED: u8 = b'V';
    /// SQLSTATE code
    pub const CODE: u8 = b'C';
    /// Primary message
    pub const MESSAGE: u8 = b'M';
    /// Detail
    pub const DETAIL: u8 = b'D';
    /// Hint
    pub const HINT: u8 = b'H';
    /// Cursor position in query
    pub const POSITION: u8 = b'P';
    /// Internal position
    pub const INTERNAL_POSITION: u8 = b'p';
    /// Internal query
    pub const INTERNAL_QUERY: u8 = b'q';
    /// Context
    pub const WHERE: u8 = b'W';
    /// Schema name
    pub const SCHEMA: u8 = b's';
    /// Table name
    pub const TABLE: u8 = b't';
    /// Column name
    pub const COLUMN: u8 = b'c';
    /// Data type name
    pub const DATA_TYPE: u8 = b'd';
    /// Constraint name
    pub const CONSTRAINT: u8 = b'n';
    /// Source file name
    pub const FILE: u8 = b'F';
    /// Source line number
    pub const LINE: u8 = b'L';
    /// Source routine name
    pub const ROUTINE: u8 = b'R';
}

/// PostgreSQL server error or notice.
///
/// Fields are kept in wire order so the message can be re-encoded
/// byte-equal to what the server sent. Codes the protocol does not
/// document are retained and exposed through [`ServerError::unknown_fields`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerError {
    fields: Vec<(u8, String)>,
}

impl ServerError {
    /// Create from a list of (field code, value) pairs in wire order.
    pub fn new(fields: Vec<(u8, String)>) -> Self {
        Self { fields }
    }

    /// Get a field by its one-byte type code.
    pub fn get(&self, code: u8) -> Option<&str> {
        self.fields
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, v)| v.as_str())
    }

    /// All fields in wire order, including unrecognized codes.
    pub fn fields(&self) -> &[(u8, String)] {
        &self.fields
    }

    /// Fields whose codes are not part of the documented set.
    pub fn unknown_fields(&self) -> impl Iterator<Item = (u8, &str)> {
        self.fields
            .iter()
            .filter(|(c, _)| !Self::is_known_code(*c))
            .map(|(c, v)| (*c, v.as_str()))
    }

    fn is_known_code(code: u8) -> bool {
        use field_type::*;
        matches!(
            code,
            SEVERITY
                | SEVERITY_NON_LOCALIZED
                | CODE
                | MESSAGE
                | DETAIL
                | HINT
                | POSITION
                | INTERNAL_POSITION
                | INTERNAL_QUERY
                | WHERE
                | SCHEMA
                | TABLE
                | COLUMN
                | DATA_TYPE
                | CONSTRAINT
                | FILE
                | LINE
                | ROUTINE
        )
    }

    /// Severity (localized): ERROR, FATAL, PANIC, WARNING, NOTICE, DEBUG, INFO, LOG.
    pub fn severity(&self) -> &str {
        self.get(field_type::SEVERITY).unwrap_or_default()
    }

    /// Severity (never translated). Falls back to the localized field for
    /// servers older than 9.6.
    pub fn severity_non_localized(&self) -> &str {
        match self.get(field_type::SEVERITY_NON_LOCALIZED) {
            Some(v) => v,
            None => self.severity(),
        }
    }

    /// SQLSTATE error code (5 characters).
    pub fn code(&self) -> &str {
        self.get(field_type::CODE).unwrap_or_default()
    }

    /// Primary error message.
    pub fn message(&self) -> &str {
        self.get(field_type::MESSAGE).unwrap_or_default()
    }

    /// Detailed error explanation.
    pub fn detail(&self) -> Option<&str> {
        self.get(field_type::DETAIL)
    }

    /// Suggestion for fixing the error.
    pub fn hint(&self) -> Option<&str> {
        self.get(field_type::HINT)
    }

    /// Cursor position in the query string (1-based).
    pub fn position(&self) -> Option<u32> {
        self.get(field_type::POSITION).and_then(|s| s.parse().ok())
    }

    /// Position in the internally-generated query.
    pub fn internal_position(&self) -> Option<u32> {
        self.get(field_type::INTERNAL_POSITION)
            .and_then(|s| s.parse().ok())
    }

    /// Failed internal command text.
    pub fn internal_query(&self) -> Option<&str> {
        self.get(field_type::INTERNAL_QUERY)
    }

    /// Context / stack trace.
    pub fn where_(&self) -> Option<&str> {
        self.get(field_type::WHERE)
    }

    /// Schema name.
    pub fn schema(&self) -> Option<&str> {
        self.get(field_type::SCHEMA)
    }

    /// Table name.
    pub fn table(&self) -> Option<&str> {
        self.get(field_type::TABLE)
    }

    /// Column name.
    pub fn column(&self) -> Option<&str> {
        self.get(field_type::COLUMN)
    }

    /// Data type name.
    pub fn data_type(&self) -> Option<&str> {
        self.get(field_type::DATA_TYPE)
    }

    /// Constraint name.
    pub fn constraint(&self) -> Option<&str> {
        self.get(field_type::CONSTRAINT)
    }

    /// Source file name.
    pub fn file(&self) -> Option<&str> {
        self.get(field_type::FILE)
    }

    /// Source line number.
    pub fn line(&self) -> Option<u32> {
        self.get(field_type::LINE).and_then(|s| s.parse().ok())
    }

    /// Source routine name.
    pub fn routine(&self) -> Option<&str> {
        self.get(field_type::ROUTINE)
    }

    /// Re-encode the field list as an ErrorResponse/NoticeResponse payload.
    ///
    /// The output is byte-equal to the payload this was parsed from.
    pub fn write(&self, buf: &mut Vec<u8>) {
        for (code, value) in &self.fields {
            buf.push(*code);
            buf.extend_from_slice(value.as_bytes());
            buf.push(0);
        }
        buf.push(0);
    }

    /// Whether this error ends the session: FATAL/PANIC severity or a
    /// SQLSTATE in class 08 (connection exception).
    pub fn is_fatal(&self) -> bool {
        matches!(self.severity_non_localized(), "FATAL" | "PANIC")
            || self.code().starts_with("08")
    }
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} (SQLSTATE {})",
            self.severity(),
            self.message(),
            self.code()
        )?;
        if let Some(detail) = self.detail() {
            write!(f, "\nDETAIL: {}", detail)?;
        }
        if let Some(hint) = self.hint() {
            write!(f, "\nHINT: {}", hint)?;
        }
        Ok(())
    }
}

/// Pool-level failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PoolError {
    /// The pool has been closed.
    #[error("pool is closed")]
    Closed,
    /// Acquire blocked past its deadline.
    #[error("timed out waiting for a pooled connection")]
    AcquireTimeout,
}

/// Error type for pglink.
#[derive(Debug, Error)]
pub enum Error {
    /// Server error response
    #[error("PostgreSQL error: {0}")]
    Server(ServerError),

    /// Protocol error (malformed message, wrong length, unexpected tag)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Read or write deadline expired
    #[error("Operation timed out")]
    Timeout,

    /// Authentication failed or unsupported mechanism
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// TLS error
    #[cfg(any(feature = "sync-tls", feature = "tokio-tls"))]
    #[error("TLS error: {0}")]
    Tls(#[from] native_tls::Error),

    /// The caller cancelled the in-flight operation
    #[error("Query cancelled")]
    Cancelled,

    /// Connection is broken and cannot be reused
    #[error("Connection is broken")]
    Broken,

    /// Pool error
    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    /// Parameter value failed to encode
    #[error("Encode error: {0}")]
    Encode(String),

    /// Result value failed to decode or assign
    #[error("Decode error: {0}")]
    Decode(String),

    /// Invalid usage (e.g., pool max size below the minimum)
    #[error("Invalid usage: {0}")]
    InvalidUsage(String),

    /// Unsupported feature
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl Error {
    /// Returns true if the error leaves the connection unusable.
    ///
    /// Transport and protocol failures always break the connection. A
    /// server error breaks it only for FATAL/PANIC severity or a SQLSTATE
    /// in class 08; every other server error leaves the session usable
    /// once the state machine has drained to ReadyForQuery.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Io(_) | Error::Protocol(_) | Error::Broken | Error::Timeout => true,
            #[cfg(any(feature = "sync-tls", feature = "tokio-tls"))]
            Error::Tls(_) => true,
            Error::Server(err) => err.is_fatal(),
            _ => false,
        }
    }

    /// Get the SQLSTATE code if this is a server error.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Server(err) => Some(err.code()),
            _ => None,
        }
    }

    /// Whether this server error invalidates a cached statement
    /// description (feature-not-supported class or duplicate prepared
    /// statement). Callers evict the entry and retry once.
    pub fn invalidates_cached_statement(&self) -> bool {
        match self.sqlstate() {
            Some(code) => code.starts_with("0A") || code == "42P05",
            None => false,
        }
    }

    pub(crate) fn type_mismatch(value: &str, target: &str) -> Self {
        Error::Encode(format!("cannot encode {value} as {target}"))
    }

    pub(crate) fn overflow(value: &str, target: &str) -> Self {
        Error::Encode(format!("{value} out of range for {target}"))
    }
}

impl From<std::convert::Infallible> for Error {
    fn from(err: std::convert::Infallible) -> Self {
        match err {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_error(fields: &[(u8, &str)]) -> ServerError {
        ServerError::new(fields.iter().map(|(c, v)| (*c, (*v).to_string())).collect())
    }

    #[test]
    fn accessors() {
        let err = server_error(&[
            (b'S', "ERROR"),
            (b'V', "ERROR"),
            (b'C', "23505"),
            (b'M', "duplicate key value"),
            (b'n', "users_pkey"),
        ]);
        assert_eq!(err.severity(), "ERROR");
        assert_eq!(err.code(), "23505");
        assert_eq!(err.constraint(), Some("users_pkey"));
        assert!(!err.is_fatal());
    }

    #[test]
    fn unknown_fields_retained() {
        let err = server_error(&[(b'S', "ERROR"), (b'C', "42601"), (b'Z', "future")]);
        let unknown: Vec<_> = err.unknown_fields().collect();
        assert_eq!(unknown, vec![(b'Z', "future")]);
    }

    #[test]
    fn fatal_classification() {
        assert!(server_error(&[(b'V', "FATAL"), (b'C', "57P01")]).is_fatal());
        assert!(server_error(&[(b'V', "ERROR"), (b'C', "08006")]).is_fatal());
        assert!(!server_error(&[(b'V', "ERROR"), (b'C', "42601")]).is_fatal());
    }

    #[test]
    fn cache_invalidation_codes() {
        let feature = Error::Server(server_error(&[(b'V', "ERROR"), (b'C', "0A000")]));
        let dup = Error::Server(server_error(&[(b'V', "ERROR"), (b'C', "42P05")]));
        let syntax = Error::Server(server_error(&[(b'V', "ERROR"), (b'C', "42601")]));
        assert!(feature.invalidates_cached_statement());
        assert!(dup.invalidates_cached_statement());
        assert!(!syntax.invalidates_cached_statement());
    }
}
