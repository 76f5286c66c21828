//! The SQL Server connector.
//!
//! [`MssqlConnector`] is the entry point: it owns the connection settings and
//! the primary session, and exposes the loading paths:
//!
//! - [`MssqlConnector::load`]: row-wise batch insert on the primary session
//! - [`MssqlConnector::load_fast`]: chunked insert or MERGE over a private pool
//! - [`MssqlConnector::export`]: table preparation followed by either of the above

use std::collections::HashMap;

use tracing::{debug, info};

use crate::config::{ConfigLoader, ConnectionSettings, ExportWritePolicy, PoolOptions, UniqueConflictMethod};
use crate::core::identifier::validate_column_type;
use crate::core::{Column, Dataset, QualifiedName, SqlValue};
use crate::drivers::mssql::{
    create_schema_if_missing, run_ddl, table_exists, BulkWriter, FastLoadOptions, LoadStrategy,
    MssqlDialect,
};
use crate::drivers::Session;
use crate::error::{LoaderError, Result};
use crate::transfer;
use crate::typemap;

/// Default cap on rows returned by [`MssqlConnector::query`].
pub const QUERY_ROW_LIMIT: usize = 10_000_000;

/// Options for [`MssqlConnector::export`].
#[derive(Debug, Clone)]
pub struct ExportOptions {
    /// What to do when the table exists (default: replace).
    pub if_exists: ExportWritePolicy,
    /// Drop and recreate on replace instead of deleting the rows.
    pub drop_table_on_replace: bool,
    /// Materialize this query's result instead of loading the dataset.
    pub query_string: Option<String>,
    /// Column types that replace the inferred ones, by column name.
    pub overwrite_types: HashMap<String, String>,
    pub unique_constraints: Vec<String>,
    pub unique_conflict_method: Option<UniqueConflictMethod>,
    /// Use the pooled bulk loader even without an upsert.
    pub fast: bool,
    pub chunk_size: Option<usize>,
    pub pool: PoolOptions,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            if_exists: ExportWritePolicy::Replace,
            drop_table_on_replace: false,
            query_string: None,
            overwrite_types: HashMap::new(),
            unique_constraints: Vec::new(),
            unique_conflict_method: None,
            fast: false,
            chunk_size: None,
            pool: PoolOptions::default(),
        }
    }
}

impl ExportOptions {
    fn fast_load_options(&self) -> FastLoadOptions {
        FastLoadOptions {
            // The table is prepared before the bulk loader runs.
            if_exists: Some(ExportWritePolicy::Append),
            unique_conflict_method: self.unique_conflict_method,
            unique_constraints: self.unique_constraints.clone(),
            chunk_size: self.chunk_size,
            pool: self.pool,
        }
    }

    fn wants_bulk(&self) -> bool {
        self.fast || matches!(LoadStrategy::resolve(&self.fast_load_options()), LoadStrategy::Merge { .. })
    }
}

/// Options for [`MssqlConnector::query`].
#[derive(Debug, Clone)]
pub struct QueryOptions {
    /// Positional values for `?` placeholders.
    pub params: Vec<SqlValue>,
    /// Rows kept from the first result set.
    pub limit: usize,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            params: Vec::new(),
            limit: QUERY_ROW_LIMIT,
        }
    }
}

/// Connector for loading datasets into SQL Server.
pub struct MssqlConnector {
    settings: ConnectionSettings,
    session: Option<Session>,
    dialect: MssqlDialect,
}

impl MssqlConnector {
    /// Create a connector. No connection is made until [`open`](Self::open).
    pub fn new(settings: ConnectionSettings) -> Self {
        Self {
            settings,
            session: None,
            dialect: MssqlDialect,
        }
    }

    /// Create a connector from a key-value configuration source.
    pub fn with_config(loader: &impl ConfigLoader) -> Result<Self> {
        Ok(Self::new(ConnectionSettings::from_loader(loader)?))
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    /// Schema used when a caller gives none.
    pub fn default_schema(&self) -> &str {
        self.settings.default_schema()
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    /// Open the primary session. Opening an open connector is a no-op.
    pub async fn open(&mut self) -> Result<()> {
        if self.session.is_none() {
            self.session = Some(Session::open(&self.settings).await?);
        }
        Ok(())
    }

    pub async fn close(&mut self) -> Result<()> {
        match self.session.take() {
            Some(session) => session.close().await,
            None => Ok(()),
        }
    }

    fn session(&mut self) -> Result<&mut Session> {
        self.session.as_mut().ok_or(LoaderError::NotConnected)
    }

    /// Check whether `schema.table` exists. Names are matched as stored.
    pub async fn table_exists(&mut self, schema: &str, table: &str) -> Result<bool> {
        let mut cursor = self.session()?.cursor();
        table_exists(cursor.as_mut(), schema, table).await
    }

    /// Create `schema` if it does not exist. Concurrent creation is not an error.
    pub async fn create_schema_if_missing(&mut self, schema: &str) -> Result<()> {
        let mut cursor = self.session()?.cursor();
        create_schema_if_missing(cursor.as_mut(), schema).await
    }

    /// Materialize `query` into the new table `table`.
    pub async fn create_table_as(&mut self, table: &QualifiedName, query: &str) -> Result<u64> {
        let sql = self.dialect.build_create_table_as_command(table, query)?;
        let mut cursor = self.session()?.cursor();
        cursor
            .execute(&sql, &[])
            .await
            .map_err(|e| LoaderError::ddl(sql.as_str(), e))
    }

    /// Run a statement on the primary session.
    pub async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        let mut cursor = self.session()?.cursor();
        cursor.execute(sql, params).await
    }

    /// Read the first result set of `sql`.
    ///
    /// The statement is sent as written; the row limit is applied while
    /// fetching.
    pub async fn query(&mut self, sql: &str, opts: &QueryOptions) -> Result<Dataset> {
        let mut cursor = self.session()?.cursor();
        cursor.fetch(sql, &opts.params, Some(opts.limit)).await
    }

    /// Destination type for a column.
    pub fn infer_type(&self, column: &Column) -> String {
        typemap::infer_type(&column.dtype, &column.values)
    }

    /// Insert a dataset row by row in one atomic batch on the primary session.
    pub async fn load(
        &mut self,
        dataset: &Dataset,
        db_dtypes: &[String],
        table: &QualifiedName,
    ) -> Result<u64> {
        let mut cursor = self.session()?.cursor();
        transfer::load(cursor.as_mut(), dataset, db_dtypes, table).await
    }

    /// Load a dataset through a dedicated connection pool, merging on the
    /// unique constraints when an upsert is requested.
    pub async fn load_fast(
        &self,
        dataset: &Dataset,
        schema: &str,
        table: &str,
        opts: &FastLoadOptions,
    ) -> Result<u64> {
        let writer = BulkWriter::connect(&self.settings, &opts.pool).await?;
        writer.load_fast(dataset, schema, table, opts).await
    }

    /// Export a dataset (or a query's result) into `schema.table`.
    ///
    /// The schema is created when missing. An existing table is rejected,
    /// replaced or appended to per `if_exists`; a missing one is created with
    /// inferred types (overridden by `overwrite_types`) and the optional
    /// UNIQUE constraint. Rows go through the bulk loader when `fast` is set
    /// or an upsert is requested, otherwise through [`load`](Self::load).
    pub async fn export(
        &mut self,
        dataset: &Dataset,
        schema: Option<&str>,
        table: &str,
        opts: &ExportOptions,
    ) -> Result<u64> {
        let schema = schema
            .filter(|s| !s.is_empty())
            .unwrap_or(self.default_schema())
            .to_string();
        let target = QualifiedName::new(&schema, table);
        for ty in opts.overwrite_types.values() {
            validate_column_type(ty)?;
        }

        let db_dtypes: Vec<String> = dataset
            .columns()
            .iter()
            .map(|c| {
                opts.overwrite_types
                    .get(&c.name)
                    .cloned()
                    .unwrap_or_else(|| self.infer_type(c))
            })
            .collect();

        let dialect = self.dialect;
        {
            let mut cursor = self.session()?.cursor();
            create_schema_if_missing(cursor.as_mut(), &schema).await?;
            let mut table_ready = table_exists(cursor.as_mut(), &schema, table).await?;

            if table_ready {
                match opts.if_exists {
                    ExportWritePolicy::Fail => {
                        return Err(LoaderError::TableExists(target.to_string()));
                    }
                    ExportWritePolicy::Replace if opts.drop_table_on_replace => {
                        run_ddl(cursor.as_mut(), &dialect.build_drop_table_command(&target)?, &[]).await?;
                        table_ready = false;
                    }
                    ExportWritePolicy::Replace => {
                        let sql = dialect.build_delete_command(&target)?;
                        let deleted = cursor.execute(&sql, &[]).await?;
                        debug!("Deleted {} rows from {}", deleted, target);
                    }
                    ExportWritePolicy::Append => {}
                }
            }

            if let Some(query) = opts.query_string.as_deref() {
                let sql = if table_ready {
                    dialect.build_insert_select_command(&target, query)?
                } else {
                    dialect.build_create_table_as_command(&target, query)?
                };
                let rows = cursor
                    .execute(&sql, &[])
                    .await
                    .map_err(|e| LoaderError::transfer(target.to_string(), e.to_string()))?;
                info!("Exported query result into {} ({} rows)", target, rows);
                return Ok(rows);
            }

            if !table_ready {
                let columns: Vec<(String, String)> = dataset
                    .column_names()
                    .into_iter()
                    .map(str::to_string)
                    .zip(db_dtypes.iter().cloned())
                    .collect();
                let ddl = dialect.build_create_table_command(&target, &columns, &opts.unique_constraints)?;
                run_ddl(cursor.as_mut(), &ddl, &[]).await?;
            }
        }

        let rows = if opts.wants_bulk() {
            self.load_fast(dataset, &schema, table, &opts.fast_load_options())
                .await?
        } else {
            self.load(dataset, &db_dtypes, &target).await?
        };
        info!("Exported {} rows into {}", rows, target);
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings() -> ConnectionSettings {
        ConnectionSettings::new("localhost", "master", "sa", "secret")
    }

    #[test]
    fn test_default_schema() {
        let mut connector = MssqlConnector::new(settings());
        assert_eq!(connector.default_schema(), "dbo");

        let mut s = settings();
        s.schema = Some("sales".into());
        connector = MssqlConnector::new(s);
        assert_eq!(connector.default_schema(), "sales");
    }

    #[test]
    fn test_with_config() {
        let loader: HashMap<String, String> = [
            ("MSSQL_HOST", "db.example.com"),
            ("MSSQL_DATABASE", "analytics"),
            ("MSSQL_USER", "loader"),
            ("MSSQL_PASSWORD", "pw"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let connector = MssqlConnector::with_config(&loader).unwrap();
        assert_eq!(connector.settings().host, "db.example.com");
        assert!(!connector.is_open());
    }

    #[tokio::test]
    async fn test_operations_require_open() {
        let mut connector = MssqlConnector::new(settings());
        let result = connector.table_exists("dbo", "t").await;
        assert!(matches!(result, Err(LoaderError::NotConnected)));
        assert!(connector.close().await.is_ok());
    }

    #[test]
    fn test_infer_type_uses_column_dtype() {
        let connector = MssqlConnector::new(settings());
        let column = Column::new("n", vec![1.into(), 2.into()]);
        assert_eq!(connector.infer_type(&column), "bigint");
    }

    #[test]
    fn test_export_routing() {
        let mut opts = ExportOptions::default();
        assert!(!opts.wants_bulk());

        opts.unique_conflict_method = Some(UniqueConflictMethod::Update);
        assert!(!opts.wants_bulk(), "upsert without keys is a plain load");

        opts.unique_constraints = vec!["id".into()];
        assert!(opts.wants_bulk());

        let plain = ExportOptions {
            fast: true,
            ..Default::default()
        };
        assert!(plain.wants_bulk());
        assert_eq!(plain.fast_load_options().if_exists, Some(ExportWritePolicy::Append));
    }

    #[tokio::test]
    async fn test_export_rejects_unsafe_type_override() {
        let mut connector = MssqlConnector::new(settings());
        let dataset = Dataset::new(vec![Column::new("id", vec![1.into()])]).unwrap();
        let opts = ExportOptions {
            overwrite_types: [("id".to_string(), "int; DROP TABLE t".to_string())].into(),
            ..Default::default()
        };
        let err = connector.export(&dataset, None, "t", &opts).await.unwrap_err();
        assert!(matches!(err, LoaderError::Config(_)), "got {:?}", err);
    }

    #[test]
    fn test_query_options_default_limit() {
        assert_eq!(QueryOptions::default().limit, QUERY_ROW_LIMIT);
    }
}
