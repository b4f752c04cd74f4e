//! `mssql-storage`: administrative CLI for the SQL Server storage backend.
//!
//! # Usage
//!
//! ```bash
//! # Connectivity probe
//! mssql-storage --config storage.toml check
//!
//! # Schema lifecycle
//! mssql-storage --config storage.toml create-schema
//! mssql-storage --config storage.toml drop-schema --yes
//!
//! # Preview the MERGE for a change-set document without connecting
//! mssql-storage render-merge --target sat_customer changes.json
//!
//! # Merge a change-set document into a table
//! mssql-storage --config storage.toml merge --target sat_customer --rows changes.json
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use mssql_storage::merge::staging_table_name;
use mssql_storage::sql::quote_ident;
use mssql_storage::{
    BackendContext, ChangeSet, LocalCatalog, MergeStatement, RelationalStore, Result,
    StorageConfig, StorageError, StorageService,
};

#[derive(Parser, Debug)]
#[command(
    name = "mssql-storage",
    version,
    about = "Administer and exercise the SQL Server storage backend"
)]
struct Cli {
    /// Storage configuration file (TOML)
    #[arg(short, long, value_name = "FILE", env = "MSSQL_STORAGE_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, env = "MSSQL_STORAGE_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Open a connection and run `SELECT 1`
    Check,

    /// Create a schema (defaults to the configured one)
    CreateSchema { schema: Option<String> },

    /// Drop every view and table in a schema, then the schema
    DropSchema {
        schema: Option<String>,
        /// Confirm the drop
        #[arg(long)]
        yes: bool,
    },

    /// Exit 0 if the schema exists, 1 otherwise
    SchemaExists { schema: Option<String> },

    /// Exit 0 if the table (or one of its columns) exists, 1 otherwise
    TableExists {
        table: String,
        #[arg(long)]
        column: Option<String>,
        #[arg(long)]
        schema: Option<String>,
    },

    /// Run a statement and print its first result set as JSON
    Query { sql: String },

    /// Print the MERGE statement for a change-set document
    RenderMerge {
        #[arg(long)]
        target: String,
        /// Change-set document (JSON); rows are ignored
        document: PathBuf,
    },

    /// Merge a change-set document into a table
    Merge {
        #[arg(long)]
        target: String,
        /// Change-set document (JSON)
        #[arg(long, value_name = "FILE")]
        rows: PathBuf,
    },

    /// Drop staging relations orphaned by interrupted merges
    PurgeStaging { target: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error [{}]: {e}", e.kind());
            ExitCode::from(2)
        }
    }
}

fn init_logging(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mssql_storage=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&Path>) -> Result<StorageConfig> {
    let path = path.ok_or_else(|| {
        StorageError::InvalidConfig(
            "no configuration file; pass --config or set MSSQL_STORAGE_CONFIG".into(),
        )
    })?;
    StorageConfig::from_file(path)
}

fn load_change_set(path: &Path) -> Result<ChangeSet> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        StorageError::InvalidArgument(format!("cannot read {}: {e}", path.display()))
    })?;
    let json = serde_json::from_str(&text)
        .map_err(|e| StorageError::InvalidArgument(format!("{}: {e}", path.display())))?;
    ChangeSet::from_json(json)
}

fn open_backend(config: &StorageConfig) -> Result<Box<dyn StorageService>> {
    let context = BackendContext::with_compute(Arc::new(LocalCatalog::new()));
    mssql_storage::open(config, &context)
}

fn exists_code(found: bool) -> ExitCode {
    if found {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Command::RenderMerge { target, document } => {
            render_merge(cli.config.as_deref(), &target, &document)
        }
        command => {
            let config = load_config(cli.config.as_deref())?;
            run_connected(&config, command).await
        }
    }
}

async fn run_connected(config: &StorageConfig, command: Command) -> Result<ExitCode> {
    let backend = open_backend(config)?;
    let default_schema = config.schema.clone();

    match command {
        Command::Check => {
            backend.test().await?;
            let ns = backend.namespace();
            println!("ok: {}.{}", ns.database, ns.schema);
        }
        Command::CreateSchema { schema } => {
            let schema = schema.unwrap_or(default_schema);
            backend.create_schema(&schema).await?;
            info!(%schema, "created schema");
        }
        Command::DropSchema { schema, yes } => {
            let schema = schema.unwrap_or(default_schema);
            if !yes {
                return Err(StorageError::InvalidArgument(format!(
                    "refusing to drop schema {schema} without --yes"
                )));
            }
            backend.drop_schema(&schema).await?;
            info!(%schema, "dropped schema");
        }
        Command::SchemaExists { schema } => {
            let schema = schema.unwrap_or(default_schema);
            return Ok(exists_code(backend.schema_exists(&schema).await?));
        }
        Command::TableExists {
            table,
            column,
            schema,
        } => {
            let schema = schema.unwrap_or(default_schema);
            let found = match column {
                Some(column) => backend.column_exists(&schema, &table, &column).await?,
                None => backend.table_exists(&schema, &table).await?,
            };
            return Ok(exists_code(found));
        }
        Command::Query { sql } => {
            let table = backend.execute(&sql).await?;
            let out = serde_json::to_string_pretty(&table.to_json_rows())
                .map_err(|e| StorageError::InternalError(e.to_string()))?;
            println!("{out}");
        }
        Command::Merge { target, rows } => {
            let change_set = load_change_set(&rows)?;
            let merged = backend.merge_staged_changes(&target, change_set).await?;
            println!("merged {} rows into {target}", merged.num_rows());
        }
        Command::PurgeStaging { target } => {
            for name in backend.purge_staging_relations(&target).await? {
                println!("{name}");
            }
        }
        Command::RenderMerge { target, document } => {
            return render_merge(None, &target, &document);
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn render_merge(config: Option<&Path>, target: &str, document: &Path) -> Result<ExitCode> {
    let change_set = load_change_set(document)?;
    change_set.columns.validate()?;
    let staging_table = staging_table_name(target);
    let (target, staging) = match config {
        Some(path) => {
            let ns = StorageConfig::from_file(path)?.namespace();
            (ns.qualify(target), ns.qualify(&staging_table))
        }
        None => (quote_ident(target), quote_ident(&staging_table)),
    };
    println!(
        "{}",
        MergeStatement::new(&target, &staging, &change_set.columns).render()
    );
    Ok(ExitCode::SUCCESS)
}
