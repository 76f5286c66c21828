//! Core data model and abstractions.
//!
//! - [`dataset`]: columns and datasets handed over by the caller
//! - [`dtype`]: per-column semantic classification
//! - [`value`]: dynamic cell values and bindable SQL scalars
//! - [`identifier`]: SQL Server identifier validation and quoting
//! - [`traits`]: cursor and chunk writer abstractions

pub mod dataset;
pub mod dtype;
pub mod identifier;
pub mod traits;
pub mod value;

pub use dataset::{Column, Dataset};
pub use dtype::Dtype;
pub use identifier::QualifiedName;
pub use traits::{ChunkWriter, Cursor};
pub use value::{SqlValue, Value};
