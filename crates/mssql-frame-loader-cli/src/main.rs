//! mssql-frame-loader CLI - load JSON record sets into SQL Server.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::{Parser, Subcommand};
use mssql_frame_loader::core::identifier::validate_column_type;
use mssql_frame_loader::normalize::to_json_string;
use mssql_frame_loader::{
    ConnectionSettings, Dataset, EnvConfigLoader, ExportOptions, ExportWritePolicy, LoaderError,
    MssqlConnector, PoolOptions, QueryOptions, UniqueConflictMethod, Value, YamlConfigLoader,
    QUERY_ROW_LIMIT,
};
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Parser)]
#[command(name = "mssql-frame-loader")]
#[command(about = "Load dynamically-typed datasets into SQL Server")]
#[command(version)]
struct Cli {
    /// Path to the YAML io_config file
    #[arg(short, long, default_value = "io_config.yaml")]
    config: PathBuf,

    /// Profile to read from the config file
    #[arg(long, default_value = YamlConfigLoader::DEFAULT_PROFILE)]
    profile: String,

    /// Read MSSQL_* settings from the environment instead of the config file
    #[arg(long)]
    env: bool,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Test the database connection
    HealthCheck,

    /// Export a JSON array of records (or a query result) into a table
    Export {
        /// JSON file holding an array of objects
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Destination table
        #[arg(short, long)]
        table: String,

        /// Destination schema [default: configured schema or dbo]
        #[arg(short, long)]
        schema: Option<String>,

        /// What to do when the table exists: append, fail or replace
        #[arg(long, default_value = "replace")]
        if_exists: ExportWritePolicy,

        /// Drop and recreate the table on replace instead of deleting its rows
        #[arg(long)]
        drop_table_on_replace: bool,

        /// Materialize this query into the table instead of loading records
        #[arg(long, conflicts_with = "input")]
        query: Option<String>,

        /// Column type override, as COLUMN=TYPE (repeatable)
        #[arg(long = "column-type", value_name = "COLUMN=TYPE")]
        column_types: Vec<String>,

        /// Unique constraint column (repeatable, in key order)
        #[arg(long = "unique-constraint", value_name = "COLUMN")]
        unique_constraints: Vec<String>,

        /// How to resolve unique key conflicts: IGNORE or UPDATE
        #[arg(long)]
        unique_conflict_method: Option<UniqueConflictMethod>,

        /// Use the pooled bulk loader
        #[arg(long)]
        fast: bool,

        /// Rows per bulk chunk
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Bulk loader pool size [default: 5]
        #[arg(long)]
        pool_size: Option<u32>,

        /// Extra bulk loader connections above the pool size [default: 10]
        #[arg(long)]
        max_overflow: Option<u32>,
    },

    /// Run a query and print the rows as JSON lines
    Query {
        /// SQL to run
        sql: String,

        /// Maximum number of rows to print
        #[arg(long, default_value_t = QUERY_ROW_LIMIT)]
        limit: usize,
    },

    /// Create a schema unless it exists
    CreateSchema {
        /// Schema name
        name: String,
    },

    /// Check whether a table exists
    TableExists {
        /// Table name
        table: String,

        /// Schema [default: configured schema or dbo]
        #[arg(short, long)]
        schema: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), LoaderError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format).map_err(LoaderError::Config)?;

    let settings = load_settings(&cli)?;
    let mut connector = MssqlConnector::new(settings);

    match cli.command {
        Commands::HealthCheck => {
            let start = Instant::now();
            connector.open().await?;
            connector.query("SELECT 1", &QueryOptions::default()).await?;
            let latency_ms = start.elapsed().as_millis();

            if cli.output_json {
                let result = serde_json::json!({
                    "connected": true,
                    "latency_ms": latency_ms,
                    "host": connector.settings().host,
                    "database": connector.settings().database,
                });
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  SQL Server {}:{}/{}: OK ({}ms)",
                    connector.settings().host,
                    connector.settings().port,
                    connector.settings().database,
                    latency_ms
                );
            }
        }

        Commands::Export {
            input,
            table,
            schema,
            if_exists,
            drop_table_on_replace,
            query,
            column_types,
            unique_constraints,
            unique_conflict_method,
            fast,
            chunk_size,
            pool_size,
            max_overflow,
        } => {
            let dataset = match (&input, &query) {
                (Some(path), _) => read_records(path)?,
                (None, Some(_)) => Dataset::default(),
                (None, None) => {
                    return Err(LoaderError::Config(
                        "export needs --input or --query".to_string(),
                    ))
                }
            };
            let opts = ExportOptions {
                if_exists,
                drop_table_on_replace,
                query_string: query,
                overwrite_types: parse_column_types(&column_types)?,
                unique_constraints,
                unique_conflict_method,
                fast,
                chunk_size,
                pool: PoolOptions {
                    pool_size,
                    max_overflow,
                },
            };

            connector.open().await?;
            let start = Instant::now();
            let rows = connector
                .export(&dataset, schema.as_deref(), &table, &opts)
                .await?;
            let schema = schema.unwrap_or_else(|| connector.default_schema().to_string());

            if cli.output_json {
                let result = serde_json::json!({
                    "schema": schema,
                    "table": table,
                    "rows": rows,
                    "duration_seconds": start.elapsed().as_secs_f64(),
                });
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Export completed!");
                println!("  Table: {}.{}", schema, table);
                println!("  Rows: {}", rows);
                println!("  Duration: {:.2}s", start.elapsed().as_secs_f64());
            }
        }

        Commands::Query { sql, limit } => {
            connector.open().await?;
            let opts = QueryOptions {
                limit,
                ..Default::default()
            };
            let dataset = connector.query(&sql, &opts).await?;
            for idx in 0..dataset.num_rows() {
                let row = dataset
                    .columns()
                    .iter()
                    .map(|c| (c.name.clone(), c.values[idx].clone()))
                    .collect();
                println!("{}", to_json_string(&Value::Map(row))?);
            }
            info!("{} rows", dataset.num_rows());
        }

        Commands::CreateSchema { name } => {
            connector.open().await?;
            connector.create_schema_if_missing(&name).await?;
            println!("Schema {} is present", name);
        }

        Commands::TableExists { table, schema } => {
            connector.open().await?;
            let schema = schema.unwrap_or_else(|| connector.default_schema().to_string());
            let exists = connector.table_exists(&schema, &table).await?;
            if cli.output_json {
                println!("{}", serde_json::json!({ "exists": exists }));
            } else {
                println!("{}", exists);
            }
        }
    }

    connector.close().await
}

fn load_settings(cli: &Cli) -> Result<ConnectionSettings, LoaderError> {
    if cli.env {
        return ConnectionSettings::from_loader(&EnvConfigLoader);
    }
    let loader = YamlConfigLoader::load(&cli.config, &cli.profile)?;
    info!("Loaded profile '{}' from {:?}", cli.profile, cli.config);
    ConnectionSettings::from_loader(&loader)
}

fn read_records(path: &Path) -> Result<Dataset, LoaderError> {
    let content = std::fs::read_to_string(path)?;
    let records: serde_json::Value = serde_json::from_str(&content)?;
    Dataset::from_records(&records)
}

fn parse_column_types(pairs: &[String]) -> Result<HashMap<String, String>, LoaderError> {
    pairs
        .iter()
        .map(|pair| match pair.split_once('=') {
            Some((column, ty)) if !column.is_empty() && !ty.is_empty() => {
                validate_column_type(ty)?;
                Ok((column.to_string(), ty.to_string()))
            }
            _ => Err(LoaderError::Config(format!(
                "invalid --column-type '{}': expected COLUMN=TYPE",
                pair
            ))),
        })
        .collect()
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Logs go to stderr so query output stays machine-readable.
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    Ok(())
}
