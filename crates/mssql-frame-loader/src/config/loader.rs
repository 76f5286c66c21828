//! Key-value configuration sources.
//!
//! A [`ConfigLoader`] exposes the named `MSSQL_*` keys from wherever the
//! caller keeps credentials: the process environment, a profile in an
//! `io_config.yaml` file, or an in-memory map.

use std::collections::HashMap;
use std::path::Path;

use crate::error::{LoaderError, Result};

/// Named configuration keys understood by the connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKey {
    MssqlAuthentication,
    MssqlDatabase,
    MssqlDriver,
    MssqlHost,
    MssqlPassword,
    MssqlPort,
    MssqlSchema,
    MssqlUser,
}

impl ConfigKey {
    /// All keys, in a stable order.
    pub const ALL: [ConfigKey; 8] = [
        ConfigKey::MssqlAuthentication,
        ConfigKey::MssqlDatabase,
        ConfigKey::MssqlDriver,
        ConfigKey::MssqlHost,
        ConfigKey::MssqlPassword,
        ConfigKey::MssqlPort,
        ConfigKey::MssqlSchema,
        ConfigKey::MssqlUser,
    ];

    /// The key's name as it appears in config files and the environment.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigKey::MssqlAuthentication => "MSSQL_AUTHENTICATION",
            ConfigKey::MssqlDatabase => "MSSQL_DATABASE",
            ConfigKey::MssqlDriver => "MSSQL_DRIVER",
            ConfigKey::MssqlHost => "MSSQL_HOST",
            ConfigKey::MssqlPassword => "MSSQL_PASSWORD",
            ConfigKey::MssqlPort => "MSSQL_PORT",
            ConfigKey::MssqlSchema => "MSSQL_SCHEMA",
            ConfigKey::MssqlUser => "MSSQL_USER",
        }
    }
}

impl std::fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A source of configuration values addressed by [`ConfigKey`].
pub trait ConfigLoader {
    /// Look up a key. Missing and empty values both return `None`.
    fn get(&self, key: ConfigKey) -> Option<String>;
}

impl ConfigLoader for HashMap<String, String> {
    fn get(&self, key: ConfigKey) -> Option<String> {
        HashMap::get(self, key.as_str())
            .filter(|v| !v.is_empty())
            .cloned()
    }
}

/// Reads `MSSQL_*` variables from the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvConfigLoader;

impl ConfigLoader for EnvConfigLoader {
    fn get(&self, key: ConfigKey) -> Option<String> {
        std::env::var(key.as_str()).ok().filter(|v| !v.is_empty())
    }
}

/// Reads one profile of a YAML `io_config` file.
///
/// ```yaml
/// default:
///   MSSQL_HOST: db.internal
///   MSSQL_PORT: 1433
///   MSSQL_DATABASE: analytics
/// ```
#[derive(Debug, Clone, Default)]
pub struct YamlConfigLoader {
    values: HashMap<String, String>,
}

impl YamlConfigLoader {
    /// Profile read when none is named.
    pub const DEFAULT_PROFILE: &'static str = "default";

    /// Load a profile from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P, profile: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content, profile)
    }

    /// Parse a profile from a YAML string.
    pub fn from_yaml(yaml: &str, profile: &str) -> Result<Self> {
        let doc: serde_yaml::Value = serde_yaml::from_str(yaml)?;
        let section = doc.get(profile).ok_or_else(|| {
            LoaderError::Config(format!("profile '{}' not found in config file", profile))
        })?;
        let mapping = section.as_mapping().ok_or_else(|| {
            LoaderError::Config(format!("profile '{}' must be a mapping", profile))
        })?;

        let mut values = HashMap::new();
        for (key, value) in mapping {
            let Some(key) = key.as_str() else {
                continue;
            };
            let value = match value {
                serde_yaml::Value::Null => continue,
                serde_yaml::Value::String(s) => s.clone(),
                serde_yaml::Value::Bool(b) => b.to_string(),
                serde_yaml::Value::Number(n) => n.to_string(),
                _ => {
                    return Err(LoaderError::Config(format!(
                        "{}.{} must be a scalar value",
                        profile, key
                    )))
                }
            };
            values.insert(key.to_string(), value);
        }

        Ok(Self { values })
    }
}

impl ConfigLoader for YamlConfigLoader {
    fn get(&self, key: ConfigKey) -> Option<String> {
        self.values.get(key.as_str()).filter(|v| !v.is_empty()).cloned()
    }
}
