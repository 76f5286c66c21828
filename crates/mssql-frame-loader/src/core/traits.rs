//! Core traits shared by the drivers and loaders.
//!
//! - [`Cursor`]: runs parameterized statements on one borrowed connection
//! - [`ChunkWriter`]: writes one chunk of normalized rows (insert or merge)

use async_trait::async_trait;

use crate::error::Result;

use super::dataset::Dataset;
use super::value::SqlValue;

/// A statement runner borrowed from a session or pooled connection.
///
/// Statements use `?` placeholders, bound positionally. A cursor lives for
/// one statement or one batch and is released when the borrow ends.
#[async_trait]
pub trait Cursor: Send {
    /// Execute one statement, returning the number of affected rows.
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64>;

    /// Execute one statement whose parameters are rows of `width` values laid
    /// end to end, as in a multi-row `VALUES` list.
    ///
    /// Knowing the row shape lets a cursor give a NULL the type of the other
    /// values in its column.
    async fn execute_rows(&mut self, sql: &str, params: &[SqlValue], _width: usize) -> Result<u64> {
        self.execute(sql, params).await
    }

    /// Execute one statement once per parameter row, atomically.
    ///
    /// Either every row is applied or the whole batch is rolled back.
    async fn execute_many(&mut self, sql: &str, rows: &[Vec<SqlValue>]) -> Result<u64>;

    /// Run a query and collect at most `limit` rows of the first result set.
    async fn fetch(&mut self, sql: &str, params: &[SqlValue], limit: Option<usize>)
        -> Result<Dataset>;
}

/// Strategy for writing one chunk of rows to the destination table.
///
/// # Design Pattern
///
/// This is a **Strategy** pattern: the bulk loader picks an implementation
/// from the write policy and drives it chunk by chunk.
#[async_trait]
pub trait ChunkWriter: Send + Sync {
    /// Short name for logging ("insert", "merge").
    fn name(&self) -> &'static str;

    /// Largest number of rows one chunk may carry.
    fn max_rows_per_chunk(&self) -> usize;

    /// Write `rows` through `cursor`, returning the number of rows affected.
    async fn write_chunk(&self, cursor: &mut dyn Cursor, rows: &[Vec<SqlValue>]) -> Result<u64>;
}
