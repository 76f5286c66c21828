//! Database sessions.
//!
//! The connector talks to SQL Server through one of two transports:
//!
//! - TDS via tiberius, for SQL password authentication (always available)
//! - ODBC via the Microsoft driver, for driver-only authentication modes
//!   (`odbc` feature)
//!
//! [`Session`] picks the transport from the connection settings and hands
//! out a [`Cursor`] for either.

pub mod mssql;

use tracing::debug;

use crate::config::ConnectionSettings;
use crate::core::Cursor;
use crate::error::Result;

/// An open session on one physical connection.
pub enum Session {
    Tds(mssql::MssqlSession),
    #[cfg(feature = "odbc")]
    Odbc(mssql::OdbcSession),
}

impl Session {
    /// Open a session with the transport the settings require.
    pub async fn open(settings: &ConnectionSettings) -> Result<Self> {
        if settings.requires_odbc() {
            return Self::open_odbc(settings).await;
        }
        debug!("Using TDS transport");
        Ok(Session::Tds(mssql::MssqlSession::open(settings).await?))
    }

    #[cfg(feature = "odbc")]
    async fn open_odbc(settings: &ConnectionSettings) -> Result<Self> {
        debug!("Using ODBC transport");
        Ok(Session::Odbc(mssql::OdbcSession::open(settings).await?))
    }

    #[cfg(not(feature = "odbc"))]
    async fn open_odbc(settings: &ConnectionSettings) -> Result<Self> {
        Err(crate::error::LoaderError::Config(format!(
            "authentication mode '{}' needs the ODBC driver; rebuild with the `odbc` feature",
            settings.authentication.as_deref().unwrap_or_default()
        )))
    }

    /// Borrow a cursor on this session.
    pub fn cursor(&mut self) -> Box<dyn Cursor + '_> {
        match self {
            Session::Tds(s) => Box::new(s.cursor()),
            #[cfg(feature = "odbc")]
            Session::Odbc(s) => Box::new(s.cursor()),
        }
    }

    pub async fn close(self) -> Result<()> {
        match self {
            Session::Tds(s) => s.close().await,
            #[cfg(feature = "odbc")]
            Session::Odbc(s) => s.close().await,
        }
    }
}
