//! # mssql-frame-loader
//!
//! Load dynamically-typed tabular datasets into Microsoft SQL Server.
//!
//! This library provides:
//!
//! - **Type inference** from per-column dtype classification to SQL Server types
//! - **Value normalization** (nested values as JSON, NaN as NULL, fixed boolean spelling)
//! - **Batch insert** of a whole dataset in one atomic `execute_many`
//! - **Bulk loading** over a dedicated pool, with `MERGE` upserts on unique keys
//! - **Wire decoding** of the ODBC `datetimeoffset` struct (SQL type -155)
//!
//! ## Example
//!
//! ```rust,no_run
//! use mssql_frame_loader::{Dataset, EnvConfigLoader, ExportOptions, MssqlConnector};
//!
//! #[tokio::main]
//! async fn main() -> mssql_frame_loader::Result<()> {
//!     let mut connector = MssqlConnector::with_config(&EnvConfigLoader)?;
//!     connector.open().await?;
//!     let records = serde_json::json!([{"id": 1, "name": "a"}]);
//!     let dataset = Dataset::from_records(&records)?;
//!     let rows = connector
//!         .export(&dataset, None, "users", &ExportOptions::default())
//!         .await?;
//!     println!("Exported {} rows", rows);
//!     connector.close().await
//! }
//! ```

pub mod config;
pub mod connector;
pub mod core;
pub mod drivers;
pub mod error;
pub mod normalize;
pub mod transfer;
pub mod typemap;

// Re-exports for convenient access
pub use config::{
    ConfigKey, ConfigLoader, ConnectionSettings, EnvConfigLoader, ExportWritePolicy, PoolOptions,
    UniqueConflictMethod, YamlConfigLoader,
};
pub use connector::{ExportOptions, MssqlConnector, QueryOptions, QUERY_ROW_LIMIT};
pub use core::{Column, Dataset, Dtype, QualifiedName, SqlValue, Value};
pub use drivers::mssql::{decode_datetimeoffset, FastLoadOptions, LoadStrategy};
pub use error::{LoaderError, Result};
pub use typemap::infer_type;
