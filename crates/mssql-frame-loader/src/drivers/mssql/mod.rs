//! Microsoft SQL Server driver.
//!
//! - [`MssqlDialect`]: statement builders
//! - [`MssqlSession`]: the primary TDS session and its [`TdsCursor`]
//! - [`BulkWriter`]: pooled bulk loading and MERGE upserts
//! - [`decode_datetimeoffset`]: decoder for the ODBC `datetimeoffset` struct

mod datetimeoffset;
mod dialect;
#[cfg(feature = "odbc")]
mod odbc;
mod session;
mod writer;

#[cfg(feature = "odbc")]
pub use odbc::{OdbcCursor, OdbcSession};
pub use datetimeoffset::{decode_datetimeoffset, DATETIMEOFFSET_STRUCT_LEN, SQL_SS_TIMESTAMPOFFSET};
pub use dialect::MssqlDialect;
pub use session::{
    split_placeholders, translate_placeholders, MssqlSession, TdsClient, TdsCursor,
    MAX_BIND_PARAMS, MAX_ROWS_PER_STATEMENT,
};
pub use writer::{
    BulkWriter, FastLoadOptions, InsertChunkWriter, LoadStrategy, MergeChunkWriter,
};

use tracing::debug;

use crate::core::{Cursor, SqlValue};
use crate::error::{LoaderError, Result};

/// Check the catalog for `schema.table`.
pub async fn table_exists(cursor: &mut dyn Cursor, schema: &str, table: &str) -> Result<bool> {
    let params = [SqlValue::from(schema), SqlValue::from(table)];
    let found = cursor
        .fetch(MssqlDialect.build_table_exists_query(), &params, Some(1))
        .await?;
    Ok(found.num_rows() > 0)
}

/// Create `schema` unless it already exists. An empty name is a no-op.
pub async fn create_schema_if_missing(cursor: &mut dyn Cursor, schema: &str) -> Result<()> {
    if schema.is_empty() {
        return Ok(());
    }
    let sql = MssqlDialect.build_create_schema_command(schema)?;
    run_ddl(cursor, &sql, &[SqlValue::from(schema)]).await
}

/// Execute a DDL statement, reporting failures with the statement text.
pub async fn run_ddl(cursor: &mut dyn Cursor, sql: &str, params: &[SqlValue]) -> Result<()> {
    debug!("DDL: {}", sql);
    cursor
        .execute(sql, params)
        .await
        .map(|_| ())
        .map_err(|e| LoaderError::ddl(sql, e))
}
