use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use sidra_loader::config::LoaderConfig;
use sidra_loader::execution::{
    CompositeObserver, FileObserver, LoadCoordinator, LoadObserver, LoadSeverity, TracingObserver,
};
use sidra_loader::ingestion::{FetchSpec, HttpSource, ResilientFetcher};
use sidra_loader::storage::{SqliteConnection, SqliteConnector, StorageConnector};

/// PNAD Contínua tables loaded when none are given.
const DEFAULT_TABLES: [&str; 10] = [
    "4093", "4094", "4095", "5440", "5918", "5919", "1616", "1617", "3416", "3516",
];

/// Load IBGE SIDRA tables into a relational database, one wide table per source table.
#[derive(Debug, Parser)]
#[command(name = "sidra-loader", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fetch, pivot and load tables
    Run(RunArgs),
    /// Open the database and print the engine version
    Check(DbArgs),
    /// List tables in the database with their row counts
    Tables(DbArgs),
}

#[derive(Debug, Args)]
struct DbArgs {
    /// TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// SQLite database file (overrides config and SIDRA_DB_PATH)
    #[arg(long, value_name = "FILE")]
    db: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Table ids to load (default: the PNAD Contínua batch)
    #[arg(value_name = "TABLE_ID")]
    tables: Vec<String>,

    /// Period selector
    #[arg(long, default_value = "last 3")]
    period: String,

    /// Primary geographic level; fallbacks come from the configuration
    #[arg(long, default_value = "n3")]
    geo: String,

    /// Variable selector
    #[arg(long, default_value = "all")]
    variables: String,

    /// Append load events to this file
    #[arg(long, value_name = "FILE")]
    event_log: Option<PathBuf>,

    #[command(flatten)]
    db: DbArgs,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    match cli.command {
        Command::Run(args) => run(args),
        Command::Check(args) => check(&args),
        Command::Tables(args) => tables(&args),
    }
}

fn setup_logging(verbose: bool) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("sidra_loader={level}")));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_level(true)
                .with_writer(std::io::stderr),
        )
        .try_init()
        .context("failed to initialize logging")?;
    Ok(())
}

fn load_config(args: &DbArgs) -> Result<LoaderConfig> {
    let mut config = match &args.config {
        Some(path) => LoaderConfig::from_path(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => LoaderConfig::default(),
    }
    .apply_env();
    if let Some(db) = &args.db {
        config.database_path = db.clone();
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn run(args: RunArgs) -> Result<()> {
    let config = load_config(&args.db)?;
    let spec = FetchSpec {
        variables: args.variables,
        period: args.period,
        partition_key: args.geo,
    };
    let table_ids: Vec<String> = if args.tables.is_empty() {
        DEFAULT_TABLES.iter().map(|t| (*t).to_string()).collect()
    } else {
        args.tables
    };

    let mut observer = CompositeObserver::new(vec![Arc::new(TracingObserver) as Arc<dyn LoadObserver>]);
    if let Some(path) = &args.event_log {
        observer.push(Arc::new(FileObserver::new(path)));
    }

    let source = HttpSource::new(config.request_timeout()).context("failed to build http client")?;
    let fetcher = ResilientFetcher::from_config(source, &config);
    let connector = SqliteConnector::new(&config.database_path);
    info!(
        database = %config.database_path.display(),
        tables = table_ids.len(),
        "starting load"
    );

    let coordinator = LoadCoordinator::new(fetcher, connector, config)
        .with_observer(Arc::new(observer), LoadSeverity::Critical);
    let outcomes = coordinator.run_all(table_ids.as_slice(), &spec);

    println!("{:<8} {:<18} {:>8} {:<9} MESSAGE", "TABLE", "STATUS", "ROWS", "PARTITION");
    for o in &outcomes {
        println!(
            "{:<8} {:<18} {:>8} {:<9} {}",
            o.table_id,
            o.status.as_str(),
            o.record_count,
            o.partition_key.as_deref().unwrap_or("-"),
            o.message
        );
    }
    Ok(())
}

fn open(args: &DbArgs) -> Result<(LoaderConfig, SqliteConnection)> {
    let config = load_config(args)?;
    let conn = SqliteConnector::new(&config.database_path)
        .connect()
        .with_context(|| format!("failed to open {}", config.database_path.display()))?;
    Ok((config, conn))
}

fn check(args: &DbArgs) -> Result<()> {
    let (config, conn) = open(args)?;
    let version = conn.version()?;
    println!("connected to {} (SQLite {version})", config.database_path.display());
    Ok(())
}

fn tables(args: &DbArgs) -> Result<()> {
    let (_, conn) = open(args)?;
    let tables = conn.list_tables()?;
    if tables.is_empty() {
        println!("no tables");
        return Ok(());
    }
    for (name, rows) in tables {
        println!("{name:<40} {rows:>10}");
    }
    Ok(())
}
