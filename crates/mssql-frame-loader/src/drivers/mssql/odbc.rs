//! ODBC session for authentication modes only the driver implements.
//!
//! **Requirements:**
//! - The `odbc` feature must be enabled
//! - Microsoft ODBC Driver for SQL Server must be installed:
//!   - Linux: `apt install msodbcsql18` or `yum install msodbcsql18`
//!   - macOS: `brew install msodbcsql18`
//!
//! Parameters are bound as character data (binary values as `varbinary`) and
//! the server converts them to the column types. `datetimeoffset` columns
//! (SQL type -155) are fetched as their raw struct and decoded with
//! [`decode_datetimeoffset`].

use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, OnceLock};

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use odbc_api::parameter::{InputParameter, VarBinaryBox, VarCharBox};
use odbc_api::{Connection, ConnectionOptions, Cursor as _, DataType, Environment, ResultSetMetadata};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use super::datetimeoffset::{decode_datetimeoffset, SQL_SS_TIMESTAMPOFFSET};
use crate::config::ConnectionSettings;
use crate::core::dataset::unique_column_names;
use crate::core::{Column, Cursor, Dataset, SqlValue, Value};
use crate::error::{LoaderError, Result};

static ODBC_ENV: OnceLock<Environment> = OnceLock::new();

fn environment() -> Result<&'static Environment> {
    if let Some(env) = ODBC_ENV.get() {
        return Ok(env);
    }
    let env = Environment::new().map_err(|e| {
        LoaderError::connection(
            format!(
                "Failed to create ODBC environment: {}. \
                 Make sure the Microsoft ODBC Driver for SQL Server is installed.",
                e
            ),
            "ODBC environment",
        )
    })?;
    Ok(ODBC_ENV.get_or_init(|| env))
}

/// A session on one ODBC connection.
///
/// ODBC connection handles must not be used from two threads at once, so the
/// connection sits behind a mutex and every call runs to completion while
/// holding it.
pub struct OdbcSession {
    conn: Mutex<Connection<'static>>,
}

impl OdbcSession {
    pub async fn open(settings: &ConnectionSettings) -> Result<Self> {
        let env = environment()?;
        let conn = env
            .connect_with_connection_string(&settings.connection_string(), ConnectionOptions::default())
            .map_err(|e| {
                LoaderError::connection(
                    format!("Failed to connect to MSSQL via ODBC: {}", e),
                    format!("opening ODBC session to {}:{}", settings.host, settings.port),
                )
            })?;
        info!(
            "Connected to MSSQL via ODBC ({}): {}:{}/{}",
            settings.authentication.as_deref().unwrap_or("SqlPassword"),
            settings.host,
            settings.port,
            settings.database
        );
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn cursor(&mut self) -> OdbcCursor<'_> {
        OdbcCursor { conn: &self.conn }
    }

    pub async fn close(self) -> Result<()> {
        drop(self.conn);
        debug!("Closed ODBC session");
        Ok(())
    }
}

/// Cursor over a borrowed ODBC connection.
pub struct OdbcCursor<'a> {
    conn: &'a Mutex<Connection<'static>>,
}

impl OdbcCursor<'_> {
    fn lock(&self) -> Result<MutexGuard<'_, Connection<'static>>> {
        self.conn
            .lock()
            .map_err(|_| LoaderError::connection("ODBC connection lock poisoned", "locking ODBC session"))
    }

    fn execute_sync(&self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        let conn = self.lock()?;
        run(&conn, sql, params)
    }

    fn execute_many_sync(&self, sql: &str, rows: &[Vec<SqlValue>]) -> Result<u64> {
        let conn = self.lock()?;
        conn.set_autocommit(false)?;
        let outcome = rows
            .iter()
            .try_fold(0u64, |acc, row| -> Result<u64> { Ok(acc + run(&conn, sql, row)?) });
        let finish = match &outcome {
            Ok(_) => conn.commit(),
            Err(_) => conn.rollback(),
        };
        if let Err(e) = conn.set_autocommit(true) {
            warn!("Failed to restore autocommit on ODBC connection: {}", e);
        }
        match (outcome, finish) {
            (Ok(affected), Ok(())) => Ok(affected),
            (Ok(_), Err(e)) => Err(e.into()),
            (Err(e), rollback) => {
                if let Err(r) = rollback {
                    warn!("Rollback after failed batch also failed: {}", r);
                }
                Err(e)
            }
        }
    }

    fn fetch_sync(&self, sql: &str, params: &[SqlValue], limit: Option<usize>) -> Result<Dataset> {
        let conn = self.lock()?;
        let bound: Vec<Box<dyn InputParameter>> = params.iter().map(to_odbc_param).collect();

        let Some(mut cursor) = conn.execute(sql, bound.as_slice())? else {
            return Ok(Dataset::default());
        };

        let num_cols = u16::try_from(cursor.num_result_cols()?).unwrap_or(0);
        let mut names = Vec::with_capacity(usize::from(num_cols));
        let mut kinds = Vec::with_capacity(usize::from(num_cols));
        for col in 1..=num_cols {
            names.push(cursor.col_name(col)?);
            kinds.push(OdbcKind::from(cursor.col_data_type(col)?));
        }

        let mut values: Vec<Vec<Value>> = vec![Vec::new(); kinds.len()];
        let mut buf = Vec::new();
        let mut fetched = 0usize;
        while let Some(mut row) = cursor.next_row()? {
            if limit.is_some_and(|max| fetched >= max) {
                break;
            }
            for (idx, kind) in kinds.iter().enumerate() {
                let col = (idx + 1) as u16;
                buf.clear();
                let present = if kind.is_binary() {
                    row.get_binary(col, &mut buf)?
                } else {
                    row.get_text(col, &mut buf)?
                };
                let value = if present {
                    kind.decode(&buf)?
                } else {
                    Value::Null
                };
                values[idx].push(value);
            }
            fetched += 1;
        }

        let columns = unique_column_names(names)
            .into_iter()
            .zip(values)
            .map(|(name, column)| Column::new(name, column))
            .collect();
        Dataset::new(columns)
    }
}

fn run(conn: &Connection<'static>, sql: &str, params: &[SqlValue]) -> Result<u64> {
    let bound: Vec<Box<dyn InputParameter>> = params.iter().map(to_odbc_param).collect();
    let mut stmt = conn.preallocate()?;
    stmt.execute(sql, bound.as_slice())?;
    Ok(stmt.row_count()?.unwrap_or(0) as u64)
}

// The blocking ODBC calls run inside the sync helpers so no lock guard or
// statement handle is held across an await point.
#[async_trait]
impl Cursor for OdbcCursor<'_> {
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        debug!("Executing via ODBC: {}", sql);
        self.execute_sync(sql, params)
    }

    async fn execute_many(&mut self, sql: &str, rows: &[Vec<SqlValue>]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        debug!("Executing {} rows via ODBC: {}", rows.len(), sql);
        self.execute_many_sync(sql, rows)
    }

    async fn fetch(
        &mut self,
        sql: &str,
        params: &[SqlValue],
        limit: Option<usize>,
    ) -> Result<Dataset> {
        debug!("Querying via ODBC: {}", sql);
        self.fetch_sync(sql, params, limit)
    }
}

fn to_odbc_param(value: &SqlValue) -> Box<dyn InputParameter> {
    match value {
        SqlValue::Bytes(b) => Box::new(VarBinaryBox::from_vec(b.clone())),
        other => match other.to_text() {
            Some(text) => Box::new(VarCharBox::from_string(text)),
            None => Box::new(VarCharBox::null()),
        },
    }
}

/// How a result column is fetched and converted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OdbcKind {
    Integer,
    Float,
    Bit,
    Decimal,
    Date,
    Timestamp,
    Binary,
    DateTimeOffset,
    Text,
}

impl From<DataType> for OdbcKind {
    fn from(data_type: DataType) -> Self {
        match data_type {
            DataType::TinyInt | DataType::SmallInt | DataType::Integer | DataType::BigInt => {
                OdbcKind::Integer
            }
            DataType::Float { .. } | DataType::Real | DataType::Double => OdbcKind::Float,
            DataType::Bit => OdbcKind::Bit,
            DataType::Decimal { .. } | DataType::Numeric { .. } => OdbcKind::Decimal,
            DataType::Date => OdbcKind::Date,
            DataType::Timestamp { .. } => OdbcKind::Timestamp,
            DataType::Binary { .. } | DataType::Varbinary { .. } | DataType::LongVarbinary { .. } => {
                OdbcKind::Binary
            }
            DataType::Other { data_type, .. } if data_type.0 == SQL_SS_TIMESTAMPOFFSET => {
                OdbcKind::DateTimeOffset
            }
            _ => OdbcKind::Text,
        }
    }
}

impl OdbcKind {
    fn is_binary(self) -> bool {
        matches!(self, OdbcKind::Binary | OdbcKind::DateTimeOffset)
    }

    /// Convert fetched bytes. Text that does not parse as the column type is
    /// kept as text.
    fn decode(self, raw: &[u8]) -> Result<Value> {
        match self {
            OdbcKind::Binary => return Ok(Value::Bytes(raw.to_vec())),
            OdbcKind::DateTimeOffset => return decode_datetimeoffset(raw).map(Value::DateTimeTz),
            _ => {}
        }
        let text = String::from_utf8_lossy(raw);
        let text = text.trim();
        let parsed = match self {
            OdbcKind::Integer => text.parse::<i64>().ok().map(Value::Int),
            OdbcKind::Float => text.parse::<f64>().ok().map(Value::Float),
            OdbcKind::Bit => match text {
                "1" => Some(Value::Bool(true)),
                "0" => Some(Value::Bool(false)),
                _ => None,
            },
            OdbcKind::Decimal => Decimal::from_str(text).ok().map(Value::Decimal),
            OdbcKind::Date => NaiveDate::parse_from_str(text, "%Y-%m-%d").ok().map(Value::Date),
            OdbcKind::Timestamp => NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
                .ok()
                .map(Value::DateTime),
            _ => None,
        };
        Ok(parsed.unwrap_or_else(|| Value::Str(text.to_string())))
    }
}
