//! Connection settings, key-value loaders and validation.

mod loader;
mod types;
mod validation;

pub use loader::{ConfigKey, ConfigLoader, EnvConfigLoader, YamlConfigLoader};
pub use types::*;

use tiberius::{AuthMethod, Config, EncryptionLevel};

use crate::error::{LoaderError, Result};

/// Application name reported to the server.
const APPLICATION_NAME: &str = "mssql-frame-loader";

impl ConnectionSettings {
    /// Build settings from a key-value source.
    ///
    /// Host, database and password are required; user is required unless a
    /// driver authentication mode is configured.
    pub fn from_loader(loader: &impl ConfigLoader) -> Result<Self> {
        let require = |key: ConfigKey| {
            loader
                .get(key)
                .ok_or_else(|| LoaderError::Config(format!("{} is required", key)))
        };

        let port = match loader.get(ConfigKey::MssqlPort) {
            Some(raw) => raw.trim().parse::<u16>().map_err(|_| {
                LoaderError::Config(format!("{} must be a port number, got '{}'", ConfigKey::MssqlPort, raw))
            })?,
            None => DEFAULT_PORT,
        };

        let settings = ConnectionSettings {
            host: require(ConfigKey::MssqlHost)?,
            port,
            database: require(ConfigKey::MssqlDatabase)?,
            user: loader.get(ConfigKey::MssqlUser).unwrap_or_default(),
            password: require(ConfigKey::MssqlPassword)?,
            driver: loader
                .get(ConfigKey::MssqlDriver)
                .unwrap_or_else(|| DEFAULT_DRIVER.to_string()),
            authentication: loader.get(ConfigKey::MssqlAuthentication),
            schema: loader.get(ConfigKey::MssqlSchema),
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Validate the settings.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Build an ODBC connection string.
    ///
    /// Transport encryption is always on and the server certificate is
    /// trusted so self-signed deployments connect. The authentication mode,
    /// when present, is appended last.
    pub fn connection_string(&self) -> String {
        let mut opts = vec![
            format!("DRIVER={{{}}}", self.driver),
            format!("SERVER={},{}", self.host, self.port),
            format!("DATABASE={}", self.database),
            format!("UID={}", odbc_value(&self.user)),
            format!("PWD={}", odbc_value(&self.password)),
            "ENCRYPT=yes".to_string(),
            "TrustServerCertificate=yes".to_string(),
        ];
        if let Some(auth) = self.authentication.as_deref().filter(|a| !a.is_empty()) {
            opts.push(format!("Authentication={}", auth));
        }
        opts.join(";")
    }

    /// Build a tiberius client configuration.
    ///
    /// Only SQL password authentication is available over TDS; other modes
    /// need the ODBC session.
    pub fn tds_config(&self) -> Result<Config> {
        if self.requires_odbc() {
            return Err(LoaderError::Config(format!(
                "authentication mode '{}' is only supported through the ODBC driver (enable the `odbc` feature)",
                self.authentication.as_deref().unwrap_or_default()
            )));
        }

        let mut config = Config::new();
        config.host(&self.host);
        config.port(self.port);
        config.database(&self.database);
        config.application_name(APPLICATION_NAME);
        config.authentication(AuthMethod::sql_server(&self.user, &self.password));
        config.trust_cert();
        config.encryption(EncryptionLevel::Required);
        Ok(config)
    }
}

/// Brace-quote an ODBC attribute value when it contains delimiters.
fn odbc_value(value: &str) -> String {
    if value.contains(';') || value.contains('}') || value.starts_with('{') {
        format!("{{{}}}", value.replace('}', "}}"))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn loader(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_connection_string() {
        let settings = ConnectionSettings::new("db.internal", "analytics", "loader", "secret");
        assert_eq!(
            settings.connection_string(),
            "DRIVER={ODBC Driver 18 for SQL Server};SERVER=db.internal,1433;DATABASE=analytics;\
             UID=loader;PWD=secret;ENCRYPT=yes;TrustServerCertificate=yes"
        );
    }

    #[test]
    fn test_connection_string_appends_authentication() {
        let mut settings = ConnectionSettings::new("db", "analytics", "loader", "secret");
        settings.authentication = Some("ActiveDirectoryPassword".to_string());
        assert!(settings
            .connection_string()
            .ends_with(";TrustServerCertificate=yes;Authentication=ActiveDirectoryPassword"));
    }

    #[test]
    fn test_connection_string_quotes_password() {
        let settings = ConnectionSettings::new("db", "analytics", "loader", "a;b}c");
        assert!(settings.connection_string().contains("PWD={a;b}}c};"));
    }

    #[test]
    fn test_tds_config_rejects_driver_auth() {
        let mut settings = ConnectionSettings::new("db", "analytics", "loader", "secret");
        assert!(settings.tds_config().is_ok());

        settings.authentication = Some("SqlPassword".to_string());
        assert!(settings.tds_config().is_ok());

        settings.authentication = Some("ActiveDirectoryIntegrated".to_string());
        assert!(settings.tds_config().is_err());
    }

    #[test]
    fn test_from_loader() {
        let source = loader(&[
            ("MSSQL_HOST", "db"),
            ("MSSQL_DATABASE", "analytics"),
            ("MSSQL_USER", "loader"),
            ("MSSQL_PASSWORD", "secret"),
            ("MSSQL_PORT", "14330"),
            ("MSSQL_SCHEMA", "staging"),
        ]);
        let settings = ConnectionSettings::from_loader(&source).unwrap();
        assert_eq!(settings.port, 14330);
        assert_eq!(settings.driver, DEFAULT_DRIVER);
        assert_eq!(settings.default_schema(), "staging");
        assert_eq!(settings.authentication, None);
    }

    #[test]
    fn test_from_loader_defaults_and_errors() {
        let source = loader(&[
            ("MSSQL_HOST", "db"),
            ("MSSQL_DATABASE", "analytics"),
            ("MSSQL_USER", "loader"),
            ("MSSQL_PASSWORD", "secret"),
        ]);
        let settings = ConnectionSettings::from_loader(&source).unwrap();
        assert_eq!(settings.port, 1433);
        assert_eq!(settings.default_schema(), "dbo");

        let missing_host = loader(&[("MSSQL_DATABASE", "analytics"), ("MSSQL_PASSWORD", "x")]);
        assert!(ConnectionSettings::from_loader(&missing_host).is_err());

        let bad_port = loader(&[
            ("MSSQL_HOST", "db"),
            ("MSSQL_DATABASE", "analytics"),
            ("MSSQL_USER", "loader"),
            ("MSSQL_PASSWORD", "secret"),
            ("MSSQL_PORT", "not-a-port"),
        ]);
        assert!(ConnectionSettings::from_loader(&bad_port).is_err());
    }
}
