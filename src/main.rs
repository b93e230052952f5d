use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::time::Duration;

use catalog_sync::{
    logging, run_sync, RetryPolicy, SqliteStore, SyncConfig, DEFAULT_BATCH_SIZE, DEFAULT_DB_PATH,
    DEFAULT_SNAPSHOT_PATH,
};

#[derive(Debug, Parser)]
#[command(name = "catalog-sync", version)]
#[command(about = "Reconcile a product catalog snapshot against the store", long_about = None)]
struct Cli {
    /// Debug-level logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,

    /// Used when no subcommand is given; ignored otherwise
    #[command(flatten)]
    sync: SyncArgs,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one full reconciliation (default)
    Sync(SyncArgs),
    /// Write the store's contents in snapshot format
    Export(ExportArgs),
    /// Show recent sync runs
    History(HistoryArgs),
}

#[derive(Debug, Args)]
struct SyncArgs {
    /// SQLite database holding the catalog
    #[arg(long, env = "CATALOG_SYNC_DB", default_value = DEFAULT_DB_PATH)]
    db: PathBuf,

    /// Snapshot CSV (header line first)
    #[arg(long, env = "CATALOG_SYNC_SNAPSHOT", default_value = DEFAULT_SNAPSHOT_PATH)]
    snapshot: PathBuf,

    /// Operations per store round trip
    #[arg(long, env = "CATALOG_SYNC_BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Retries per failed batch call (0 = abort on first failure)
    #[arg(long, env = "CATALOG_SYNC_MAX_RETRIES", default_value_t = 2)]
    max_retries: u32,

    /// First retry delay; doubles per retry
    #[arg(long, default_value_t = 100)]
    retry_base_ms: u64,

    /// Upper bound on a single retry delay
    #[arg(long, default_value_t = 5000)]
    retry_max_ms: u64,
}

impl SyncArgs {
    fn into_config(self) -> SyncConfig {
        let retry = RetryPolicy::new(
            self.max_retries.saturating_add(1),
            Duration::from_millis(self.retry_base_ms),
            Duration::from_millis(self.retry_max_ms),
        );

        SyncConfig::new(self.db, self.snapshot)
            .with_batch_size(self.batch_size)
            .with_retry(retry)
    }
}

#[derive(Debug, Args)]
struct ExportArgs {
    #[arg(long, env = "CATALOG_SYNC_DB", default_value = DEFAULT_DB_PATH)]
    db: PathBuf,

    /// Output file (stdout when omitted)
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct HistoryArgs {
    #[arg(long, env = "CATALOG_SYNC_DB", default_value = DEFAULT_DB_PATH)]
    db: PathBuf,

    #[arg(long, default_value_t = 10)]
    limit: usize,
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let result = match cli.command {
        Some(Commands::Sync(args)) => run_sync_command(args),
        Some(Commands::Export(args)) => run_export(args),
        Some(Commands::History(args)) => run_history(args),
        None => run_sync_command(cli.sync),
    };

    if let Err(e) = result {
        eprintln!("❌ Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run_sync_command(args: SyncArgs) -> Result<()> {
    let config = args.into_config();

    println!("🔄 Catalog Sync - Snapshot → Store");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("📂 Snapshot: {}", config.snapshot_path.display());
    println!("🗄️  Store:    {}", config.db_path.display());
    println!("📦 Batch:    {}", config.batch_size);

    let report = run_sync(&config).context("Sync failed")?;
    let m = &report.metrics;

    println!("\n✓ Rows processed: {}", m.rows_processed);
    println!("✓ Added:          {}", m.added);
    println!("✓ Updated:        {}", m.updated);
    println!("✓ Deleted:        {}", m.deleted);
    println!("✓ Store now holds {} records", report.store_count);

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    if m.is_noop() {
        println!("✅ Sync complete - store already matched snapshot");
    } else {
        println!("✅ Sync complete");
    }

    Ok(())
}

fn run_export(args: ExportArgs) -> Result<()> {
    let store = SqliteStore::open(&args.db)
        .with_context(|| format!("Failed to open store {}", args.db.display()))?;

    let written = match &args.out {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            store.export(&mut BufWriter::new(file), path)?
        }
        None => store.export(&mut io::stdout().lock(), Path::new("<stdout>"))?,
    };

    if let Some(path) = &args.out {
        println!("✓ Exported {} records to {}", written, path.display());
    }

    Ok(())
}

fn run_history(args: HistoryArgs) -> Result<()> {
    let store = SqliteStore::open(&args.db)
        .with_context(|| format!("Failed to open store {}", args.db.display()))?;
    let runs = store.recent_runs(args.limit)?;

    if runs.is_empty() {
        println!("No sync runs recorded yet");
        return Ok(());
    }

    println!("📜 Recent sync runs");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for run in runs {
        println!(
            "{}  {}  +{} ~{} -{}  ({} rows, {} ms)  {}",
            run.started_at.format("%Y-%m-%d %H:%M:%S"),
            run.run_id,
            run.metrics.added,
            run.metrics.updated,
            run.metrics.deleted,
            run.metrics.rows_processed,
            run.duration_ms(),
            run.snapshot_path,
        );
    }

    Ok(())
}
