//! Connection settings validation.

use super::ConnectionSettings;
use crate::error::{LoaderError, Result};

/// Validate connection settings.
pub fn validate(settings: &ConnectionSettings) -> Result<()> {
    if settings.host.is_empty() {
        return Err(LoaderError::Config("host is required".into()));
    }
    if settings.database.is_empty() {
        return Err(LoaderError::Config("database is required".into()));
    }
    if settings.user.is_empty() && !settings.requires_odbc() {
        return Err(LoaderError::Config("user is required".into()));
    }
    if settings.port == 0 {
        return Err(LoaderError::Config("port must be greater than 0".into()));
    }
    if settings.driver.is_empty() {
        return Err(LoaderError::Config("driver is required".into()));
    }
    // Values are spliced into a semicolon-delimited descriptor.
    for (name, value) in [
        ("host", settings.host.as_str()),
        ("database", settings.database.as_str()),
        ("driver", settings.driver.as_str()),
    ] {
        if value.contains(';') || value.contains('{') || value.contains('}') {
            return Err(LoaderError::Config(format!(
                "{} contains characters not allowed in a connection string: {:?}",
                name, value
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_settings() -> ConnectionSettings {
        ConnectionSettings::new("localhost", "analytics", "sa", "password")
    }

    #[test]
    fn test_valid_settings() {
        assert!(validate(&valid_settings()).is_ok());
    }

    #[test]
    fn test_missing_host() {
        let mut settings = valid_settings();
        settings.host = String::new();
        assert!(validate(&settings).is_err());
    }

    #[test]
    fn test_missing_user_allowed_for_driver_auth() {
        let mut settings = valid_settings();
        settings.user = String::new();
        assert!(validate(&settings).is_err());

        settings.authentication = Some("ActiveDirectoryMsi".to_string());
        assert!(validate(&settings).is_ok());
    }

    #[test]
    fn test_rejects_descriptor_metacharacters() {
        let mut settings = valid_settings();
        settings.database = "db;Trusted_Connection=yes".to_string();
        assert!(validate(&settings).is_err());
    }

    #[test]
    fn test_settings_debug_redacts_password() {
        let mut settings = valid_settings();
        settings.password = "super_secret_password_123".to_string();
        let debug_output = format!("{:?}", settings);
        assert!(
            debug_output.contains("[REDACTED]"),
            "Debug output should contain [REDACTED]"
        );
        assert!(
            !debug_output.contains("super_secret_password_123"),
            "Debug output should not contain actual password value"
        );
    }
}
