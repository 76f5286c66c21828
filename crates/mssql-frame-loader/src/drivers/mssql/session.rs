//! Primary SQL Server session over TDS.
//!
//! [`MssqlSession`] owns one tiberius client. Statements run through a
//! [`TdsCursor`] borrowed from the session; the cursor translates `?`
//! placeholders into tiberius' `@Pn` parameters and binds [`SqlValue`]s.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use futures::TryStreamExt;
use rust_decimal::Decimal;
use tiberius::{Client, ColumnData, Config, FromSql, QueryItem, ToSql};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info, warn};

use crate::config::ConnectionSettings;
use crate::core::dataset::unique_column_names;
use crate::core::{Column, Cursor, Dataset, SqlValue, Value};
use crate::error::{LoaderError, Result};

/// A tiberius client over a tokio TCP stream.
pub type TdsClient = Client<Compat<TcpStream>>;

/// Parameters SQL Server accepts in one request, less the statement and
/// declaration arguments of `sp_executesql`.
pub const MAX_BIND_PARAMS: usize = 2098;

/// Upper bound on rows packed into one request.
pub const MAX_ROWS_PER_STATEMENT: usize = 1000;

const TCP_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Open a TCP connection and run the TDS handshake.
///
/// With `keepalive` set the socket also gets TCP keepalives, for pooled
/// connections that may sit idle between chunks.
pub(crate) async fn connect_client(
    config: Config,
    keepalive: bool,
) -> std::result::Result<TdsClient, tiberius::error::Error> {
    let tcp = TcpStream::connect(config.get_addr())
        .await
        .map_err(|e| tiberius::error::Error::Io {
            kind: e.kind(),
            message: e.to_string(),
        })?;
    tcp.set_nodelay(true).ok();

    if !keepalive {
        return Client::connect(config, tcp.compat_write()).await;
    }

    let std_tcp = tcp.into_std().map_err(|e| tiberius::error::Error::Io {
        kind: e.kind(),
        message: format!("Failed to detach socket: {}", e),
    })?;
    let socket = socket2::Socket::from(std_tcp);
    let params = socket2::TcpKeepalive::new()
        .with_time(TCP_KEEPALIVE_INTERVAL)
        .with_interval(TCP_KEEPALIVE_INTERVAL);
    if let Err(e) = socket.set_tcp_keepalive(&params) {
        warn!("Failed to set TCP keepalive on MSSQL connection: {}", e);
    }

    let std_tcp: std::net::TcpStream = socket.into();
    std_tcp.set_nonblocking(true).ok();
    let tcp = TcpStream::from_std(std_tcp).map_err(|e| tiberius::error::Error::Io {
        kind: e.kind(),
        message: format!("Failed to convert socket: {}", e),
    })?;
    Client::connect(config, tcp.compat_write()).await
}

/// The connector's primary session.
pub struct MssqlSession {
    client: TdsClient,
}

impl MssqlSession {
    /// Connect and authenticate.
    pub async fn open(settings: &ConnectionSettings) -> Result<Self> {
        let config = settings.tds_config()?;
        info!(
            "Opening connection to MSSQL database {} on {}:{}",
            settings.database, settings.host, settings.port
        );
        let client = connect_client(config, false).await.map_err(|e| {
            LoaderError::connection(
                e,
                format!("opening TDS session to {}:{}", settings.host, settings.port),
            )
        })?;
        Ok(Self { client })
    }

    /// Borrow a cursor for one statement or batch.
    pub fn cursor(&mut self) -> TdsCursor<'_> {
        TdsCursor::new(&mut self.client)
    }

    pub async fn close(self) -> Result<()> {
        self.client.close().await?;
        debug!("Closed MSSQL session");
        Ok(())
    }
}

/// Cursor over a borrowed tiberius client.
pub struct TdsCursor<'a> {
    client: &'a mut TdsClient,
}

impl<'a> TdsCursor<'a> {
    pub fn new(client: &'a mut TdsClient) -> Self {
        Self { client }
    }

    /// Run transaction control as a plain SQL batch. Sent through
    /// `sp_executesql` it would trip the transaction count check (error 266).
    async fn control(&mut self, sql: &str) -> Result<()> {
        self.client.simple_query(sql).await?.into_results().await?;
        Ok(())
    }

    async fn run_batches(
        &mut self,
        segments: &[&str],
        rows: &[Vec<SqlValue>],
        rows_per_batch: usize,
    ) -> Result<u64> {
        let hints = null_hints(rows, segments.len() - 1);
        let mut affected = 0u64;

        for batch in rows.chunks(rows_per_batch) {
            let mut next_param = 1;
            let statements: Vec<String> = batch
                .iter()
                .map(|_| {
                    let stmt = render_statement(segments, next_param);
                    next_param += segments.len() - 1;
                    stmt.trim_end().trim_end_matches(';').to_string()
                })
                .collect();
            let sql = format!("{};", statements.join(";\n"));

            let params: Vec<Box<dyn ToSql>> = batch
                .iter()
                .flat_map(|row| {
                    row.iter()
                        .zip(hints.iter())
                        .map(|(value, hint)| to_sql_param(value, *hint))
                })
                .collect();
            let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();

            let result = self.client.execute(sql.as_str(), &param_refs).await?;
            affected += result.total();
        }

        Ok(affected)
    }
}

#[async_trait]
impl Cursor for TdsCursor<'_> {
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        let (stmt, expected) = translate_placeholders(sql);
        check_param_count(expected, params.len())?;

        let boxed: Vec<Box<dyn ToSql>> = params.iter().map(|p| to_sql_param(p, None)).collect();
        let refs: Vec<&dyn ToSql> = boxed.iter().map(|p| p.as_ref()).collect();
        debug!("Executing: {}", stmt);
        let result = self.client.execute(stmt.as_str(), &refs).await?;
        Ok(result.total())
    }

    async fn execute_rows(&mut self, sql: &str, params: &[SqlValue], width: usize) -> Result<u64> {
        let (stmt, expected) = translate_placeholders(sql);
        check_param_count(expected, params.len())?;

        let boxed = bind_rows(params, width);
        let refs: Vec<&dyn ToSql> = boxed.iter().map(|p| p.as_ref()).collect();
        debug!("Executing {} rows: {}", params.len() / width.max(1), stmt);
        let result = self.client.execute(stmt.as_str(), &refs).await?;
        Ok(result.total())
    }

    async fn execute_many(&mut self, sql: &str, rows: &[Vec<SqlValue>]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let segments = split_placeholders(sql);
        let per_row = segments.len() - 1;
        for row in rows {
            check_param_count(per_row, row.len())?;
        }
        if per_row > MAX_BIND_PARAMS {
            return Err(LoaderError::Config(format!(
                "statement takes {} parameters, SQL Server accepts at most {}",
                per_row, MAX_BIND_PARAMS
            )));
        }
        let rows_per_batch = if per_row == 0 {
            MAX_ROWS_PER_STATEMENT
        } else {
            (MAX_BIND_PARAMS / per_row).clamp(1, MAX_ROWS_PER_STATEMENT)
        };

        debug!(
            "Executing {} rows in batches of {}: {}",
            rows.len(),
            rows_per_batch,
            sql
        );
        self.control("BEGIN TRANSACTION").await?;
        match self.run_batches(&segments, rows, rows_per_batch).await {
            Ok(affected) => {
                self.control("COMMIT TRANSACTION").await?;
                Ok(affected)
            }
            Err(e) => {
                if let Err(rollback) = self.control("IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION").await {
                    warn!("Rollback after failed batch also failed: {}", rollback);
                }
                Err(e)
            }
        }
    }

    async fn fetch(
        &mut self,
        sql: &str,
        params: &[SqlValue],
        limit: Option<usize>,
    ) -> Result<Dataset> {
        let (stmt, expected) = translate_placeholders(sql);
        check_param_count(expected, params.len())?;

        let boxed: Vec<Box<dyn ToSql>> = params.iter().map(|p| to_sql_param(p, None)).collect();
        let refs: Vec<&dyn ToSql> = boxed.iter().map(|p| p.as_ref()).collect();
        debug!("Querying: {}", stmt);

        let mut stream = self.client.query(stmt.as_str(), &refs).await?;
        let mut names = Vec::new();
        let mut values: Vec<Vec<Value>> = Vec::new();
        let mut fetched = 0usize;
        let mut skipped = 0usize;

        // The stream is always drained so the connection stays usable.
        while let Some(item) = stream.try_next().await? {
            match item {
                QueryItem::Metadata(meta) if meta.result_index() == 0 => {
                    names = meta.columns().iter().map(|c| c.name().to_string()).collect();
                    values = vec![Vec::new(); names.len()];
                }
                QueryItem::Row(row) if row.result_index() == 0 => {
                    if limit.is_some_and(|max| fetched >= max) {
                        skipped += 1;
                        continue;
                    }
                    for (idx, data) in row.into_iter().enumerate() {
                        if let Some(column) = values.get_mut(idx) {
                            column.push(column_data_to_value(data)?);
                        }
                    }
                    fetched += 1;
                }
                _ => {}
            }
        }

        if skipped > 0 {
            debug!("Row limit reached: kept {} rows, skipped {}", fetched, skipped);
        }

        let columns = unique_column_names(names)
            .into_iter()
            .zip(values)
            .map(|(name, column)| Column::new(name, column))
            .collect();
        Dataset::new(columns)
    }
}

fn check_param_count(expected: usize, got: usize) -> Result<()> {
    if expected != got {
        return Err(LoaderError::Config(format!(
            "statement has {} placeholders but {} parameters were given",
            expected, got
        )));
    }
    Ok(())
}

/// Split a statement at its `?` placeholders.
///
/// Question marks inside bracketed identifiers, quoted strings and comments
/// are not placeholders. A statement with `n` placeholders yields `n + 1`
/// segments.
pub fn split_placeholders(sql: &str) -> Vec<&str> {
    #[derive(Clone, Copy, PartialEq)]
    enum State {
        Normal,
        Bracket,
        Single,
        Double,
        LineComment,
        BlockComment,
    }

    let bytes = sql.as_bytes();
    let mut segments = Vec::new();
    let mut start = 0;
    let mut state = State::Normal;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        let next = bytes.get(i + 1).copied();
        match state {
            State::Normal => match b {
                b'?' => {
                    segments.push(&sql[start..i]);
                    start = i + 1;
                }
                b'[' => state = State::Bracket,
                b'\'' => state = State::Single,
                b'"' => state = State::Double,
                b'-' if next == Some(b'-') => {
                    state = State::LineComment;
                    i += 1;
                }
                b'/' if next == Some(b'*') => {
                    state = State::BlockComment;
                    i += 1;
                }
                _ => {}
            },
            State::Bracket if b == b']' => {
                if next == Some(b']') {
                    i += 1;
                } else {
                    state = State::Normal;
                }
            }
            State::Single if b == b'\'' => {
                if next == Some(b'\'') {
                    i += 1;
                } else {
                    state = State::Normal;
                }
            }
            State::Double if b == b'"' => state = State::Normal,
            State::LineComment if b == b'\n' => state = State::Normal,
            State::BlockComment if b == b'*' && next == Some(b'/') => {
                state = State::Normal;
                i += 1;
            }
            _ => {}
        }
        i += 1;
    }

    segments.push(&sql[start..]);
    segments
}

/// Rewrite `?` placeholders as `@P1`, `@P2`, ...; returns the statement and
/// the number of placeholders.
pub fn translate_placeholders(sql: &str) -> (String, usize) {
    let segments = split_placeholders(sql);
    (render_statement(&segments, 1), segments.len() - 1)
}

fn render_statement(segments: &[&str], first_param: usize) -> String {
    let mut out = String::with_capacity(segments.iter().map(|s| s.len() + 5).sum());
    for (idx, segment) in segments.iter().enumerate() {
        if idx > 0 {
            out.push_str(&format!("@P{}", first_param + idx - 1));
        }
        out.push_str(segment);
    }
    out
}

/// First non-null value of each column, used to type NULL parameters.
fn null_hints<R: AsRef<[SqlValue]>>(rows: &[R], width: usize) -> Vec<Option<&SqlValue>> {
    (0..width)
        .map(|col| {
            rows.iter()
                .filter_map(|row| row.as_ref().get(col))
                .find(|v| !v.is_null())
        })
        .collect()
}

/// Box row-major parameters, typing each NULL from its column.
fn bind_rows(params: &[SqlValue], width: usize) -> Vec<Box<dyn ToSql>> {
    if width == 0 {
        return params.iter().map(|p| to_sql_param(p, None)).collect();
    }
    let rows: Vec<&[SqlValue]> = params.chunks(width).collect();
    let hints = null_hints(&rows, width);
    params
        .iter()
        .enumerate()
        .map(|(idx, value)| to_sql_param(value, hints[idx % width]))
        .collect()
}

/// Box a value as a tiberius parameter.
///
/// NULLs take the type of `hint` when one is known; SQL Server refuses
/// implicit conversion from an `nvarchar` NULL to binary columns.
pub(crate) fn to_sql_param(value: &SqlValue, hint: Option<&SqlValue>) -> Box<dyn ToSql> {
    match value {
        SqlValue::Null => match hint {
            Some(SqlValue::I64(_)) => Box::new(Option::<i64>::None),
            Some(SqlValue::F64(_)) => Box::new(Option::<f64>::None),
            Some(SqlValue::Decimal(_)) => Box::new(Option::<Decimal>::None),
            Some(SqlValue::Bytes(_)) => Box::new(Option::<Vec<u8>>::None),
            _ => Box::new(Option::<String>::None),
        },
        SqlValue::I64(i) => Box::new(*i),
        SqlValue::F64(f) => Box::new(*f),
        SqlValue::Decimal(d) => Box::new(*d),
        SqlValue::Text(s) => Box::new(s.clone()),
        SqlValue::Bytes(b) => Box::new(b.clone()),
        SqlValue::Date(d) => Box::new(*d),
        SqlValue::Time(t) => Box::new(*t),
        SqlValue::DateTime(dt) => Box::new(*dt),
        SqlValue::DateTimeOffset(dto) => Box::new(*dto),
    }
}

/// Convert a TDS column value into a dataset cell.
pub(crate) fn column_data_to_value(data: ColumnData<'static>) -> Result<Value> {
    let value = match data {
        ColumnData::U8(v) => Value::from(v.map(i64::from)),
        ColumnData::I16(v) => Value::from(v.map(i64::from)),
        ColumnData::I32(v) => Value::from(v.map(i64::from)),
        ColumnData::I64(v) => Value::from(v),
        ColumnData::F32(v) => Value::from(v.map(f64::from)),
        ColumnData::F64(v) => Value::from(v),
        ColumnData::Bit(v) => Value::from(v),
        ColumnData::String(v) => Value::from(v.map(|s| s.into_owned())),
        ColumnData::Guid(v) => Value::from(v.map(|g| g.to_string())),
        ColumnData::Binary(v) => Value::from(v.map(|b| b.into_owned())),
        ColumnData::Numeric(v) => match v {
            Some(n) => Decimal::try_from_i128_with_scale(n.value(), u32::from(n.scale()))
                .map(Value::Decimal)
                .map_err(|e| LoaderError::Decode(format!("numeric out of range: {}", e)))?,
            None => Value::Null,
        },
        ColumnData::Xml(v) => Value::from(v.map(|x| x.into_owned().into_string())),
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
            Value::from(NaiveDateTime::from_sql(&data)?)
        }
        ColumnData::Date(_) => Value::from(NaiveDate::from_sql(&data)?),
        ColumnData::Time(_) => Value::from(NaiveTime::from_sql(&data)?),
        ColumnData::DateTimeOffset(_) => Value::from(DateTime::<FixedOffset>::from_sql(&data)?),
        #[allow(unreachable_patterns)]
        other => {
            return Err(LoaderError::Decode(format!(
                "unsupported column value: {:?}",
                other
            )))
        }
    };
    Ok(value)
}
