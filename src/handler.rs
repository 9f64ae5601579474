//! Result handlers.
//!
//! Handlers receive result data as the state machines walk the server's
//! response stream. Values are decoded through the connection's
//! [`ConnInfo`], dispatching on each column's declared format code, so
//! the same handler serves both the simple (text) and extended (binary)
//! protocols.

use crate::error::Result;
use crate::protocol::backend::{CommandComplete, DataRow, RowDescription};
use crate::types::{ConnInfo, FromRow};

/// Handler for query results.
///
/// Callback patterns by statement type:
/// - SELECT with rows: `result_start` → `row*` → `result_end`
/// - SELECT with 0 rows: `result_start` → `result_end`
/// - INSERT/UPDATE/DELETE: `result_end` only (with affected row count)
///
/// A multi-statement simple query produces one callback sequence per
/// statement.
pub trait RowHandler {
    /// Called when a result set begins.
    fn result_start(&mut self, cols: &RowDescription<'_>) -> Result<()> {
        let _ = cols;
        Ok(())
    }

    /// Called for each data row.
    fn row(
        &mut self,
        info: &ConnInfo,
        cols: &RowDescription<'_>,
        row: DataRow<'_>,
    ) -> Result<()>;

    /// Called when a result set ends.
    fn result_end(&mut self, complete: CommandComplete<'_>) -> Result<()> {
        let _ = complete;
        Ok(())
    }
}

/// Sink for COPY TO STDOUT data chunks.
pub trait CopySink {
    /// Called for each CopyData frame.
    fn chunk(&mut self, data: &[u8]) -> Result<()>;
}

impl<W: std::io::Write> CopySink for W {
    fn chunk(&mut self, data: &[u8]) -> Result<()> {
        self.write_all(data)?;
        Ok(())
    }
}

/// A handler that discards all rows, keeping only the affected count.
#[derive(Debug, Default)]
pub struct DropHandler {
    rows_affected: Option<u64>,
}

impl DropHandler {
    /// Create a new drop handler.
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of rows affected, if the command reported one.
    pub fn rows_affected(&self) -> Option<u64> {
        self.rows_affected
    }
}

impl RowHandler for DropHandler {
    fn row(&mut self, _: &ConnInfo, _: &RowDescription<'_>, _: DataRow<'_>) -> Result<()> {
        Ok(())
    }

    fn result_end(&mut self, complete: CommandComplete<'_>) -> Result<()> {
        self.rows_affected = complete.rows_affected();
        Ok(())
    }
}

/// Handler that collects typed rows.
///
/// ```ignore
/// let mut handler: CollectHandler<(i32, String)> = CollectHandler::new();
/// conn.query("SELECT id, name FROM users", &mut handler)?;
/// for (id, name) in handler.into_rows() { /* ... */ }
/// ```
#[derive(Default)]
pub struct CollectHandler<T> {
    rows: Vec<T>,
}

impl<T> CollectHandler<T> {
    /// Create a new collect handler.
    pub fn new() -> Self {
        Self { rows: Vec::new() }
    }

    /// Collected rows.
    pub fn rows(&self) -> &[T] {
        &self.rows
    }

    /// Take collected rows.
    pub fn into_rows(self) -> Vec<T> {
        self.rows
    }

    /// Number of collected rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether no rows were collected.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl<T: FromRow> RowHandler for CollectHandler<T> {
    fn row(
        &mut self,
        info: &ConnInfo,
        cols: &RowDescription<'_>,
        row: DataRow<'_>,
    ) -> Result<()> {
        self.rows.push(T::from_row(info, cols, row)?);
        Ok(())
    }
}

/// Handler that keeps only the first row.
#[derive(Default)]
pub struct FirstRowHandler<T> {
    row: Option<T>,
}

impl<T> FirstRowHandler<T> {
    /// Create a new first-row handler.
    pub fn new() -> Self {
        Self { row: None }
    }

    /// The first row, if one arrived.
    pub fn into_row(self) -> Option<T> {
        self.row
    }
}

impl<T: FromRow> RowHandler for FirstRowHandler<T> {
    fn row(
        &mut self,
        info: &ConnInfo,
        cols: &RowDescription<'_>,
        row: DataRow<'_>,
    ) -> Result<()> {
        if self.row.is_none() {
            self.row = Some(T::from_row(info, cols, row)?);
        }
        Ok(())
    }
}
