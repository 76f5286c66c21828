//! Bulk and merge loading over a dedicated connection pool.
//!
//! [`BulkWriter`] owns a bb8 pool of tiberius clients, tuned separately from
//! the connector's primary session (TCP keepalive, no Nagle delay). A load
//! prepares the destination table, normalizes the dataset and streams it in
//! chunks through a [`ChunkWriter`]: multi-row `INSERT` for plain appends,
//! one `MERGE` per chunk for upserts.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bb8::{Pool, PooledConnection};
use tiberius::Config;
use tracing::{debug, info};

use super::dialect::MssqlDialect;
use super::session::{connect_client, TdsClient, TdsCursor, MAX_BIND_PARAMS, MAX_ROWS_PER_STATEMENT};
use super::{create_schema_if_missing, run_ddl, table_exists};
use crate::config::{ConnectionSettings, ExportWritePolicy, PoolOptions, UniqueConflictMethod};
use crate::core::{ChunkWriter, Cursor, Dataset, QualifiedName, SqlValue};
use crate::error::{LoaderError, Result};
use crate::normalize::normalize_dataset;
use crate::typemap::infer_type;

/// Connection pool timeouts.
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(300);
const POOL_MAX_LIFETIME: Duration = Duration::from_secs(1800);

/// Connection manager for bb8 pool with Tiberius.
#[derive(Clone)]
struct TiberiusConnectionManager {
    config: Config,
}

#[async_trait]
impl bb8::ManageConnection for TiberiusConnectionManager {
    type Connection = TdsClient;
    type Error = tiberius::error::Error;

    async fn connect(&self) -> std::result::Result<Self::Connection, Self::Error> {
        connect_client(self.config.clone(), true).await
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> std::result::Result<(), Self::Error> {
        conn.simple_query("SELECT 1").await?.into_row().await?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

/// Options for [`BulkWriter::load_fast`].
#[derive(Debug, Clone, Default)]
pub struct FastLoadOptions {
    /// What to do when the table exists. Defaults depend on the strategy.
    pub if_exists: Option<ExportWritePolicy>,
    pub unique_conflict_method: Option<UniqueConflictMethod>,
    /// Conflict key columns, in order.
    pub unique_constraints: Vec<String>,
    /// Rows per chunk; capped by the server's parameter limit.
    pub chunk_size: Option<usize>,
    pub pool: PoolOptions,
}

/// How rows reach the destination table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadStrategy {
    /// Multi-row INSERT.
    Insert { policy: ExportWritePolicy },
    /// Chunked MERGE on `keys`.
    Merge {
        policy: ExportWritePolicy,
        keys: Vec<String>,
    },
}

impl LoadStrategy {
    /// Pick the strategy for a load.
    ///
    /// Upsert needs both the `Update` conflict method and at least one key
    /// column; anything else is a plain load. Merges default to appending,
    /// plain loads to replacing the table.
    pub fn resolve(opts: &FastLoadOptions) -> Self {
        match opts.unique_conflict_method {
            Some(UniqueConflictMethod::Update) if !opts.unique_constraints.is_empty() => {
                LoadStrategy::Merge {
                    policy: opts.if_exists.unwrap_or(ExportWritePolicy::Append),
                    keys: opts.unique_constraints.clone(),
                }
            }
            _ => LoadStrategy::Insert {
                policy: opts.if_exists.unwrap_or(ExportWritePolicy::Replace),
            },
        }
    }

    pub fn policy(&self) -> ExportWritePolicy {
        match self {
            LoadStrategy::Insert { policy } | LoadStrategy::Merge { policy, .. } => *policy,
        }
    }
}

/// Writes chunks as multi-row parameterized INSERT statements.
pub struct InsertChunkWriter {
    table: QualifiedName,
    columns: Vec<String>,
    dialect: MssqlDialect,
}

impl InsertChunkWriter {
    pub fn new(table: QualifiedName, columns: Vec<String>) -> Self {
        Self {
            table,
            columns,
            dialect: MssqlDialect,
        }
    }
}

#[async_trait]
impl ChunkWriter for InsertChunkWriter {
    fn name(&self) -> &'static str {
        "insert"
    }

    fn max_rows_per_chunk(&self) -> usize {
        rows_per_statement(self.columns.len())
    }

    async fn write_chunk(&self, cursor: &mut dyn Cursor, rows: &[Vec<SqlValue>]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let sql = self
            .dialect
            .build_multi_row_insert(&self.table, &self.columns, rows.len())?;
        let params: Vec<SqlValue> = rows.iter().flatten().cloned().collect();
        cursor.execute_rows(&sql, &params, self.columns.len()).await?;
        Ok(rows.len() as u64)
    }
}

/// Writes each chunk as a single MERGE keyed on the unique constraint columns.
pub struct MergeChunkWriter {
    table: QualifiedName,
    columns: Vec<String>,
    keys: Vec<String>,
    key_idx: Vec<usize>,
    dialect: MssqlDialect,
}

impl MergeChunkWriter {
    /// Fails if a key column is not one of `columns`.
    pub fn new(table: QualifiedName, columns: Vec<String>, keys: Vec<String>) -> Result<Self> {
        let key_idx = keys
            .iter()
            .map(|k| {
                columns.iter().position(|c| c == k).ok_or_else(|| {
                    LoaderError::Config(format!(
                        "unique constraint column '{}' is not in the dataset",
                        k
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            table,
            columns,
            keys,
            key_idx,
            dialect: MssqlDialect,
        })
    }

    /// Collapse rows sharing a key, keeping the last occurrence's values at
    /// the first occurrence's position. MERGE rejects a source that matches
    /// one target row more than once.
    ///
    /// Rows with a NULL key column never match in the ON clause, so they are
    /// all kept.
    fn dedupe<'a>(&self, rows: &'a [Vec<SqlValue>]) -> Vec<&'a Vec<SqlValue>> {
        let mut positions: HashMap<Vec<String>, usize> = HashMap::with_capacity(rows.len());
        let mut out: Vec<&Vec<SqlValue>> = Vec::with_capacity(rows.len());
        for row in rows {
            if self.key_idx.iter().any(|&i| row[i].is_null()) {
                out.push(row);
                continue;
            }
            let key: Vec<String> = self
                .key_idx
                .iter()
                .map(|&i| format!("{:?}", row[i]))
                .collect();
            match positions.get(&key) {
                Some(&pos) => out[pos] = row,
                None => {
                    positions.insert(key, out.len());
                    out.push(row);
                }
            }
        }
        out
    }
}

#[async_trait]
impl ChunkWriter for MergeChunkWriter {
    fn name(&self) -> &'static str {
        "merge"
    }

    fn max_rows_per_chunk(&self) -> usize {
        rows_per_statement(self.columns.len())
    }

    async fn write_chunk(&self, cursor: &mut dyn Cursor, rows: &[Vec<SqlValue>]) -> Result<u64> {
        let unique = self.dedupe(rows);
        if unique.is_empty() {
            return Ok(0);
        }
        if unique.len() < rows.len() {
            debug!(
                "Collapsed {} rows with duplicate keys before MERGE into {}",
                rows.len() - unique.len(),
                self.table
            );
        }
        let sql = self
            .dialect
            .build_merge_command(&self.table, &self.columns, &self.keys, unique.len())?;
        let params: Vec<SqlValue> = unique.iter().flat_map(|row| row.iter().cloned()).collect();
        cursor
            .execute_rows(&sql, &params, self.columns.len())
            .await
    }
}

fn rows_per_statement(num_columns: usize) -> usize {
    (MAX_BIND_PARAMS / num_columns.max(1)).clamp(1, MAX_ROWS_PER_STATEMENT)
}

/// Throughput-oriented loader with its own connection pool.
pub struct BulkWriter {
    pool: Pool<TiberiusConnectionManager>,
    dialect: MssqlDialect,
}

impl BulkWriter {
    /// Open the pool and check one connection.
    pub async fn connect(settings: &ConnectionSettings, options: &PoolOptions) -> Result<Self> {
        let manager = TiberiusConnectionManager {
            config: settings.tds_config()?,
        };
        let max_size = options.max_connections();
        let pool = Pool::builder()
            .max_size(max_size)
            .min_idle(Some(1))
            .connection_timeout(POOL_CONNECTION_TIMEOUT)
            .idle_timeout(Some(POOL_IDLE_TIMEOUT))
            .max_lifetime(Some(POOL_MAX_LIFETIME))
            .test_on_check_out(true)
            .build(manager)
            .await
            .map_err(|e| LoaderError::pool(e, "creating MSSQL bulk pool"))?;

        {
            let mut conn = pool
                .get()
                .await
                .map_err(|e| LoaderError::pool(e, "testing MSSQL bulk connection"))?;
            conn.simple_query("SELECT 1").await?.into_row().await?;
        }

        info!(
            "Connected bulk pool to MSSQL: {}:{}/{} (max_size={})",
            settings.host, settings.port, settings.database, max_size
        );
        Ok(Self {
            pool,
            dialect: MssqlDialect,
        })
    }

    async fn get_conn(&self) -> Result<PooledConnection<'_, TiberiusConnectionManager>> {
        self.pool
            .get()
            .await
            .map_err(|e| LoaderError::pool(e, "getting MSSQL bulk connection"))
    }

    /// Load a dataset into `schema.table`, returning the rows written.
    ///
    /// The table is prepared per the resolved [`LoadStrategy`]: `Fail`
    /// rejects an existing table, `Replace` drops it, and a missing table is
    /// created with inferred column types. Each chunk is one atomic
    /// statement; a failed chunk stops the load.
    pub async fn load_fast(
        &self,
        dataset: &Dataset,
        schema: &str,
        table: &str,
        opts: &FastLoadOptions,
    ) -> Result<u64> {
        let strategy = LoadStrategy::resolve(opts);
        let target = QualifiedName::new(schema, table);
        let columns: Vec<String> = dataset.column_names().iter().map(|c| c.to_string()).collect();
        if columns.is_empty() {
            return Err(LoaderError::Config(format!("dataset for {} has no columns", target)));
        }

        let writer: Box<dyn ChunkWriter> = match &strategy {
            LoadStrategy::Insert { .. } => Box::new(InsertChunkWriter::new(target.clone(), columns)),
            LoadStrategy::Merge { keys, .. } => Box::new(MergeChunkWriter::new(
                target.clone(),
                columns,
                keys.clone(),
            )?),
        };

        let mut conn = self.get_conn().await?;
        let mut cursor = TdsCursor::new(&mut conn);
        self.prepare_table(&mut cursor, dataset, &target, strategy.policy())
            .await?;

        let rows = normalize_dataset(dataset);
        let chunk_size = opts
            .chunk_size
            .filter(|&n| n > 0)
            .map_or(writer.max_rows_per_chunk(), |n| n.min(writer.max_rows_per_chunk()));

        let mut written = 0u64;
        for (idx, chunk) in rows.chunks(chunk_size).enumerate() {
            written += writer
                .write_chunk(&mut cursor, chunk)
                .await
                .map_err(|e| {
                    LoaderError::transfer(
                        target.to_string(),
                        format!("{} chunk {} failed: {}", writer.name(), idx, e),
                    )
                })?;
        }

        info!(
            "Loaded {} rows into {} ({}, {} chunks of up to {})",
            rows.len(),
            target,
            writer.name(),
            rows.len().div_ceil(chunk_size),
            chunk_size
        );
        Ok(written)
    }

    async fn prepare_table(
        &self,
        cursor: &mut dyn Cursor,
        dataset: &Dataset,
        target: &QualifiedName,
        policy: ExportWritePolicy,
    ) -> Result<()> {
        let schema = target.schema.as_deref().unwrap_or_default();
        let mut exists = table_exists(cursor, schema, &target.table).await?;

        if exists {
            match policy {
                ExportWritePolicy::Fail => {
                    return Err(LoaderError::TableExists(target.to_string()));
                }
                ExportWritePolicy::Replace => {
                    let drop = self.dialect.build_drop_table_command(target)?;
                    run_ddl(cursor, &drop, &[]).await?;
                    exists = false;
                }
                ExportWritePolicy::Append => {}
            }
        }

        if !exists {
            create_schema_if_missing(cursor, schema).await?;
            let columns: Vec<(String, String)> = dataset
                .columns()
                .iter()
                .map(|c| (c.name.clone(), infer_type(&c.dtype, &c.values)))
                .collect();
            let ddl = self.dialect.build_create_table_command(target, &columns, &[])?;
            run_ddl(cursor, &ddl, &[]).await?;
        }
        Ok(())
    }
}
