//! TandemDB Daemon
//!
//! The `tandemd` binary runs a TandemDB engine with its background
//! synchronizer:
//! - Loads the TOML configuration and applies command-line overrides
//! - Recovers the engine from its data directory
//! - Optionally drives a synthetic mixed workload
//! - Logs a stats report at a fixed interval
//! - Shuts down cleanly on SIGTERM/SIGINT
//!
//! # Usage
//!
//! ```bash
//! # In-memory engine with the synthetic workload
//! tandemd --memory --workload
//!
//! # Durable engine
//! tandemd --data-dir /var/lib/tandemdb
//!
//! # Use configuration file
//! tandemd --config /etc/tandemdb/tandemd.toml
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tandem_engine::Engine;
use tandem_server::{ServerConfig, Workload};

/// TandemDB Daemon
#[derive(Parser, Debug)]
#[command(
    name = "tandemd",
    author = "TandemDB Team",
    version,
    about = "TandemDB dual row/column storage engine",
    long_about = "TandemDB keeps a row store for transactional reads and a columnar store for \
                  analytical scans in step through a shared change log.\n\n\
                  This daemon runs the engine, its synchronizer and an optional synthetic workload."
)]
struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Data directory for the change log and catalog
    #[arg(short = 'd', long, value_name = "DIR", env = "TANDEM_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Run in memory-only mode (no persistence)
    #[arg(long)]
    memory: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", env = "TANDEM_LOG_LEVEL")]
    log_level: String,

    /// Run the synthetic mixed workload
    #[arg(short = 'w', long)]
    workload: bool,

    /// Seconds between stats reports (0 disables them)
    #[arg(long, value_name = "SECS", env = "TANDEM_REPORT_INTERVAL")]
    report_interval_secs: Option<u64>,

    /// Print configuration and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let config = load_config(&args)?;
    if args.print_config {
        println!("{}", config.to_toml()?);
        return Ok(());
    }
    config.validate()?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting tandemd");
    run(config).await
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| {
            EnvFilter::try_new(format!(
                "tandemd={level},tandem_server={level},tandem_engine={level},tandem_sync={level},\
                 tandem_column={level},tandem_row={level},tandem_log={level}"
            ))
        })
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

fn load_config(args: &Args) -> Result<ServerConfig> {
    let mut config = match &args.config {
        Some(path) => ServerConfig::from_file(path).context("Failed to load config file")?,
        None => ServerConfig::default(),
    };

    if let Some(dir) = &args.data_dir {
        config.engine.data_dir = Some(dir.clone());
    }
    if args.memory {
        config.memory_mode = true;
    }
    if args.workload {
        config.workload.enabled = true;
    }
    if let Some(secs) = args.report_interval_secs {
        config.report_interval_secs = secs;
    }
    Ok(config)
}

async fn run(config: ServerConfig) -> Result<()> {
    let engine_config = config.effective_engine();
    match &engine_config.data_dir {
        Some(dir) => info!(data_dir = %dir.display(), "Opening durable engine"),
        None => info!("Starting in memory-only mode (data will not be persisted)"),
    }
    let engine = tokio::task::spawn_blocking(move || Engine::open(engine_config))
        .await
        .context("Engine open task failed")?
        .context("Failed to open engine")?;
    let engine = Arc::new(engine);

    let workload = if config.workload.enabled {
        Some(Workload::start(Arc::clone(&engine), config.workload.clone())?)
    } else {
        None
    };

    info!("Press Ctrl+C to shutdown");
    tokio::select! {
        _ = report_loop(&engine, workload.as_ref(), config.report_interval_secs) => {}
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
        }
    }

    info!("Shutting down gracefully...");
    if let Some(workload) = workload {
        workload.stop().await;
    }
    let result = tokio::task::spawn_blocking(move || {
        let outcome = engine.shutdown();
        report(&engine, None);
        outcome
    })
    .await
    .context("Engine shutdown task failed")?;
    if let Err(err) = &result {
        error!(error = %err, "Engine shutdown failed");
    }
    result?;
    info!("Stopped. Goodbye!");
    Ok(())
}

async fn report_loop(engine: &Engine, workload: Option<&Workload>, interval_secs: u64) {
    if interval_secs == 0 {
        return std::future::pending().await;
    }
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
    ticker.tick().await;
    loop {
        ticker.tick().await;
        report(engine, workload);
    }
}

fn report(engine: &Engine, workload: Option<&Workload>) {
    let stats = engine.stats();
    info!(
        watermark = %stats.watermark,
        last_committed = %stats.last_committed,
        lag = stats.lag,
        chunk_groups = stats.columns.chunk_groups,
        live_rows = stats.columns.live_rows,
        retained_entries = stats.retained_entries,
        "Engine stats"
    );
    for column in &stats.columns.columns {
        info!(
            table = %column.table,
            column = %column.column,
            ratio = column.ratio(),
            "Column compression"
        );
    }
    info!(
        rounds = stats.sync.rounds,
        published = stats.sync.published,
        failures = stats.sync.consecutive_failures,
        alarm = stats.sync.alarm,
        halted = stats.sync.halted,
        "Synchronizer"
    );
    info!(
        transactional_running = stats.governor.transactional_running,
        analytical_running = stats.governor.analytical_running,
        queued = stats.governor.queued,
        borrowed = stats.governor.borrowed,
        yields = stats.governor.yields,
        rejected = stats.governor.rejected,
        "Governor"
    );
    if stats.sync.alarm {
        warn!(failures = stats.sync.consecutive_failures, "Synchronizer retry budget exhausted");
    }
    if stats.sync.halted {
        error!("Synchronizer halted; columnar data is frozen until restart");
    }
    if let Some(workload) = workload {
        let w = workload.stats();
        info!(
            puts = w.puts,
            deletes = w.deletes,
            lookups = w.lookups,
            aggregates = w.aggregates,
            rejected = w.rejected,
            errors = w.errors,
            "Workload"
        );
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
