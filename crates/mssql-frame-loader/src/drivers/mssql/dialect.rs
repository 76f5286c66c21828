//! SQL Server statement builders.
//!
//! Builds the DDL and DML the connector sends: idempotent schema creation,
//! `SELECT * INTO` materialization, catalog lookups, multi-row inserts and
//! chunked `MERGE` upserts. Identifiers are always bracket-quoted; values are
//! always `?` placeholders bound by the session.

use crate::core::identifier::{quote_column_list, quote_mssql, validate_column_type};
use crate::core::QualifiedName;
use crate::error::{LoaderError, Result};

/// Error numbers raised when a schema already exists (2714) or a concurrent
/// creator won the race (2759).
const SCHEMA_EXISTS_ERRORS: &str = "2714, 2759";

/// Alias of the derived table in `CREATE TABLE AS` statements.
const CREATE_TABLE_AS_ALIAS: &str = "prev";

/// Microsoft SQL Server dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct MssqlDialect;

impl MssqlDialect {
    pub fn new() -> Self {
        Self
    }

    /// Conditionally create a schema.
    ///
    /// Binds one parameter: the schema name. A concurrent creator that wins
    /// the race between the check and the `CREATE SCHEMA` is not an error.
    pub fn build_create_schema_command(&self, schema: &str) -> Result<String> {
        let quoted = quote_mssql(schema)?;
        Ok(format!(
            "IF NOT EXISTS (SELECT * FROM information_schema.schemata WHERE schema_name = ?)\n\
             BEGIN\n\
             \x20   BEGIN TRY\n\
             \x20       EXEC('CREATE SCHEMA {}')\n\
             \x20   END TRY\n\
             \x20   BEGIN CATCH\n\
             \x20       IF ERROR_NUMBER() NOT IN ({}) THROW;\n\
             \x20   END CATCH\n\
             END",
            quoted.replace('\'', "''"),
            SCHEMA_EXISTS_ERRORS
        ))
    }

    /// Materialize a query's result set into a new table.
    ///
    /// The query is passed through verbatim. Queries the server does not
    /// accept as a derived table (a leading `WITH` clause, for example) fail
    /// at the server.
    pub fn build_create_table_as_command(&self, table: &QualifiedName, query: &str) -> Result<String> {
        Ok(format!(
            "SELECT * INTO {}\nFROM ({}) AS {}",
            table.render()?,
            query,
            CREATE_TABLE_AS_ALIAS
        ))
    }

    /// Create a table from `(column, type)` pairs, with an optional
    /// UNIQUE constraint over `unique_constraints`.
    pub fn build_create_table_command(
        &self,
        table: &QualifiedName,
        columns: &[(String, String)],
        unique_constraints: &[String],
    ) -> Result<String> {
        if columns.is_empty() {
            return Err(LoaderError::Config(format!(
                "cannot create table {} without columns",
                table
            )));
        }

        let mut defs = columns
            .iter()
            .map(|(name, ty)| {
                validate_column_type(ty)?;
                Ok(format!("{} {}", quote_mssql(name)?, ty.trim()))
            })
            .collect::<Result<Vec<_>>>()?;

        if !unique_constraints.is_empty() {
            for key in unique_constraints {
                if !columns.iter().any(|(name, _)| name == key) {
                    return Err(LoaderError::Config(format!(
                        "unique constraint column '{}' is not a column of {}",
                        key, table
                    )));
                }
            }
            defs.push(format!("UNIQUE ({})", quote_column_list(unique_constraints)?));
        }

        Ok(format!(
            "CREATE TABLE {} (\n    {}\n)",
            table.render()?,
            defs.join(",\n    ")
        ))
    }

    /// Append a query's result set to an existing table.
    pub fn build_insert_select_command(&self, table: &QualifiedName, query: &str) -> Result<String> {
        Ok(format!("INSERT INTO {}\n{}", table.render()?, query))
    }

    pub fn build_drop_table_command(&self, table: &QualifiedName) -> Result<String> {
        Ok(format!("DROP TABLE {}", table.render()?))
    }

    pub fn build_delete_command(&self, table: &QualifiedName) -> Result<String> {
        Ok(format!("DELETE FROM {}", table.render()?))
    }

    /// Catalog lookup for a table. Binds schema then table name.
    ///
    /// Names are compared exactly as the server collation dictates.
    pub fn build_table_exists_query(&self) -> &'static str {
        "SELECT TOP 1 * FROM information_schema.tables WHERE table_schema = ? AND table_name = ?"
    }

    /// Single-row insert without a column list, one `?` per column.
    pub fn build_insert_command(&self, table: &QualifiedName, num_columns: usize) -> Result<String> {
        if num_columns == 0 {
            return Err(LoaderError::transfer(table.to_string(), "cannot insert with zero columns"));
        }
        Ok(format!(
            "INSERT INTO {} VALUES ({})",
            table.render()?,
            placeholders(num_columns)
        ))
    }

    /// Multi-row insert with an explicit column list.
    pub fn build_multi_row_insert(
        &self,
        table: &QualifiedName,
        columns: &[String],
        num_rows: usize,
    ) -> Result<String> {
        if columns.is_empty() {
            return Err(LoaderError::transfer(table.to_string(), "cannot insert with zero columns"));
        }
        Ok(format!(
            "INSERT INTO {} ({}) VALUES {}",
            table.render()?,
            quote_column_list(columns)?,
            value_groups(columns.len(), num_rows, ", ")
        ))
    }

    /// Upsert `num_rows` rows with one `MERGE` statement.
    ///
    /// Source rows are an inline `VALUES` list aliased `s`; rows match the
    /// target `t` on equality of every key column. Unmatched rows are
    /// inserted, matched rows have every column (keys included) set to the
    /// source value.
    pub fn build_merge_command(
        &self,
        table: &QualifiedName,
        columns: &[String],
        key_columns: &[String],
        num_rows: usize,
    ) -> Result<String> {
        if columns.is_empty() || key_columns.is_empty() {
            return Err(LoaderError::transfer(
                table.to_string(),
                "MERGE needs at least one column and one key column",
            ));
        }

        let quoted: Vec<String> = columns
            .iter()
            .map(|c| quote_mssql(c))
            .collect::<Result<_>>()?;
        let on_clause = key_columns
            .iter()
            .map(|k| {
                let k = quote_mssql(k)?;
                Ok(format!("s.{} = t.{}", k, k))
            })
            .collect::<Result<Vec<_>>>()?
            .join(" AND ");
        let source_values = quoted
            .iter()
            .map(|c| format!("s.{}", c))
            .collect::<Vec<_>>()
            .join(", ");
        let update = quoted
            .iter()
            .map(|c| format!("{} = s.{}", c, c))
            .collect::<Vec<_>>()
            .join(", ");

        Ok(format!(
            "MERGE {table} AS t\n\
             USING (VALUES\n\
             \x20   {values}\n\
             ) s({columns})\n\
             ON {on_clause}\n\
             WHEN NOT MATCHED THEN\n\
             \x20   INSERT ({columns})\n\
             \x20   VALUES ({source_values})\n\
             WHEN MATCHED THEN UPDATE SET\n\
             \x20   {update}\n\
             ;",
            table = table.render()?,
            values = value_groups(columns.len(), num_rows, ",\n    "),
            columns = quoted.join(", "),
            on_clause = on_clause,
            source_values = source_values,
            update = update,
        ))
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn value_groups(num_columns: usize, num_rows: usize, sep: &str) -> String {
    let group = format!("({})", placeholders(num_columns));
    vec![group; num_rows].join(sep)
}
