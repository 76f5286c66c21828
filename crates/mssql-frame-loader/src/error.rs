//! Error types for the loader library.

use thiserror::Error;

/// Main error type for loader operations.
#[derive(Error, Debug)]
pub enum LoaderError {
    /// Configuration error (missing keys, invalid values, bad dataset shape, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Failure to open or authenticate a connection
    #[error("Connection error: {message}\n  Context: {context}")]
    Connection { message: String, context: String },

    /// Error reported by SQL Server over TDS
    #[error("SQL Server error: {0}")]
    Tds(#[from] tiberius::error::Error),

    /// Error reported by the ODBC driver manager or driver
    #[cfg(feature = "odbc")]
    #[error("ODBC error: {0}")]
    Odbc(#[from] odbc_api::Error),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// DDL statement rejected by the server
    #[error("DDL failed: {message}\n  Statement: {statement}")]
    Ddl { statement: String, message: String },

    /// Batch or chunk transmission failed for a specific table
    #[error("Transfer failed for table {table}: {message}")]
    Transfer { table: String, message: String },

    /// Destination table exists and the write policy forbids writing to it
    #[error("Table {0} already exists in database")]
    TableExists(String),

    /// A wire value could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// No session has been opened yet
    #[error("Connection is not open - call open() first")]
    NotConnected,

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LoaderError {
    /// Create a Connection error with context about where it occurred
    pub fn connection(message: impl std::fmt::Display, context: impl Into<String>) -> Self {
        LoaderError::Connection {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl std::fmt::Display, context: impl Into<String>) -> Self {
        LoaderError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a DDL error carrying the rejected statement
    pub fn ddl(statement: impl Into<String>, message: impl std::fmt::Display) -> Self {
        LoaderError::Ddl {
            statement: statement.into(),
            message: message.to_string(),
        }
    }

    /// Create a Transfer error
    pub fn transfer(table: impl Into<String>, message: impl Into<String>) -> Self {
        LoaderError::Transfer {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Process exit code for this error category.
    pub fn exit_code(&self) -> u8 {
        match self {
            LoaderError::Config(_)
            | LoaderError::Yaml(_)
            | LoaderError::Json(_)
            | LoaderError::TableExists(_) => 1,
            LoaderError::Connection { .. } | LoaderError::Pool { .. } | LoaderError::NotConnected => {
                2
            }
            LoaderError::Ddl { .. } => 3,
            LoaderError::Transfer { .. } | LoaderError::Tds(_) | LoaderError::Decode(_) => 4,
            #[cfg(feature = "odbc")]
            LoaderError::Odbc(_) => 4,
            LoaderError::Io(_) => 7,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for loader operations.
pub type Result<T> = std::result::Result<T, LoaderError>;
