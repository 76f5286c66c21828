//! Configuration type definitions.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Default SQL Server port.
pub const DEFAULT_PORT: u16 = 1433;

/// Default ODBC driver name.
pub const DEFAULT_DRIVER: &str = "ODBC Driver 18 for SQL Server";

/// Schema used when none is configured.
pub const DEFAULT_SCHEMA: &str = "dbo";

/// Authentication mode that the TDS driver handles natively.
pub const SQL_PASSWORD_AUTH: &str = "SqlPassword";

/// Connection settings for a SQL Server destination.
///
/// Constructed once when the connector is created and never mutated after
/// the physical connection opens.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Database host.
    pub host: String,

    /// Database port (default: 1433).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    pub password: String,

    /// ODBC driver name (default: "ODBC Driver 18 for SQL Server").
    #[serde(default = "default_driver")]
    pub driver: String,

    /// Driver-level authentication mode, e.g. `ActiveDirectoryPassword`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication: Option<String>,

    /// Default schema for unqualified tables (falls back to "dbo").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
}

impl fmt::Debug for ConnectionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("driver", &self.driver)
            .field("authentication", &self.authentication)
            .field("schema", &self.schema)
            .finish()
    }
}

impl ConnectionSettings {
    /// Create settings with default port and driver.
    pub fn new(
        host: impl Into<String>,
        database: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            database: database.into(),
            user: user.into(),
            password: password.into(),
            driver: default_driver(),
            authentication: None,
            schema: None,
        }
    }

    /// Schema used for unqualified tables.
    pub fn default_schema(&self) -> &str {
        self.schema
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_SCHEMA)
    }

    /// Whether the configured authentication mode needs the ODBC driver.
    ///
    /// SQL password authentication is spoken natively over TDS; every other
    /// mode (Azure AD variants, integrated security) is delegated to the driver.
    pub fn requires_odbc(&self) -> bool {
        match self.authentication.as_deref() {
            None => false,
            Some(mode) => !mode.is_empty() && !mode.eq_ignore_ascii_case(SQL_PASSWORD_AUTH),
        }
    }
}

/// What to do when the destination table already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportWritePolicy {
    /// Add rows to the existing table.
    Append,
    /// Refuse to write.
    Fail,
    /// Empty (or drop and recreate) the table before writing.
    Replace,
}

impl std::str::FromStr for ExportWritePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "append" => Ok(Self::Append),
            "fail" => Ok(Self::Fail),
            "replace" => Ok(Self::Replace),
            other => Err(format!(
                "unknown write policy '{}': expected append, fail or replace",
                other
            )),
        }
    }
}

/// How rows that collide on the unique constraints are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UniqueConflictMethod {
    /// Leave the existing row untouched.
    Ignore,
    /// Overwrite the existing row (MERGE upsert).
    Update,
}

impl std::str::FromStr for UniqueConflictMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "IGNORE" => Ok(Self::Ignore),
            "UPDATE" => Ok(Self::Update),
            other => Err(format!(
                "unknown conflict method '{}': expected IGNORE or UPDATE",
                other
            )),
        }
    }
}

/// Sizing for the bulk loader's connection pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolOptions {
    /// Connections kept by the pool (default: 5).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool_size: Option<u32>,

    /// Extra connections allowed above `pool_size` (default: 10).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_overflow: Option<u32>,
}

impl PoolOptions {
    pub fn get_pool_size(&self) -> u32 {
        self.pool_size.unwrap_or(5).max(1)
    }

    pub fn get_max_overflow(&self) -> u32 {
        self.max_overflow.unwrap_or(10)
    }

    /// Upper bound on open connections.
    pub fn max_connections(&self) -> u32 {
        self.get_pool_size() + self.get_max_overflow()
    }
}

// Default value functions for serde
fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_driver() -> String {
    DEFAULT_DRIVER.to_string()
}
