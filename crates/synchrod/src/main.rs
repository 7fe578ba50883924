//! Synchro daemon.
//!
//! Reconciles an artifact registry directory against a JSON state file.
//!
//! ## Commands
//!
//! - `run`: reconcile on a fixed interval until interrupted
//! - `once`: run a single pass and print the report and health payload
//! - `config`: print the effective configuration

mod applier;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use synchro_core::{
    telemetry, ArtifactKind, FsContentSource, HealthReport, PassReport, ReadinessAggregator,
    Reconciler, ReconcilerConfig,
};
use synchro_state::FileDefinitionStore;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn, Level};

use crate::applier::LoggingApplier;

#[derive(Parser)]
#[command(name = "synchrod")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Declarative artifact reconciliation daemon", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// JSON config file; flags below override its values
    #[arg(short, long, global = true, env = "SYNCHRO_CONFIG")]
    config: Option<PathBuf>,

    /// Registry directory to reconcile
    #[arg(long, global = true, env = "SYNCHRO_REGISTRY")]
    registry: Option<PathBuf>,

    /// State file recording applied checksums
    #[arg(long, global = true, env = "SYNCHRO_STATE_FILE")]
    state_file: Option<PathBuf>,

    /// Seconds after startup at which readiness is forced to ready
    #[arg(long, global = true, env = "SYNCHRO_GRACE_SECS")]
    grace_secs: Option<u64>,

    /// Kinds to synchronize, comma separated, in routing order
    #[arg(long, global = true, env = "SYNCHRO_KINDS", value_delimiter = ',')]
    kinds: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile on a fixed interval until interrupted
    Run {
        /// Seconds between passes
        #[arg(long, env = "SYNCHRO_INTERVAL_SECS")]
        interval_secs: Option<u64>,
    },

    /// Run one pass and print the report
    Once,

    /// Print the effective configuration
    Config,
}

#[derive(Serialize)]
struct OnceOutput<'a> {
    report: &'a PassReport,
    health: HealthReport,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    telemetry::init_tracing(cli.json, level);

    let config = load_config(&cli)?;
    match cli.command {
        Commands::Run { .. } => cmd_run(&config).await,
        Commands::Once => cmd_once(&config).await,
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

/// Config file (or defaults), then flag and environment overrides.
fn load_config(cli: &Cli) -> Result<ReconcilerConfig> {
    let mut config = match &cli.config {
        Some(path) => ReconcilerConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => ReconcilerConfig::default(),
    };

    if let Some(registry) = &cli.registry {
        config.registry_root = registry.clone();
    }
    if let Some(state_file) = &cli.state_file {
        config.state_file = state_file.clone();
    }
    if let Some(grace) = cli.grace_secs {
        config.grace_secs = grace;
    }
    if !cli.kinds.is_empty() {
        config.kinds = cli.kinds.clone();
    }
    if let Commands::Run {
        interval_secs: Some(interval),
    } = cli.command
    {
        config.interval_secs = interval;
    }

    config.validate().context("invalid configuration")?;
    Ok(config)
}

async fn build_reconciler(config: &ReconcilerConfig) -> Result<Reconciler> {
    let store = FileDefinitionStore::open(&config.state_file)
        .await
        .with_context(|| format!("failed to open state file {}", config.state_file.display()))?;
    let readiness = Arc::new(ReadinessAggregator::new(config.grace()));

    let mut reconciler = Reconciler::new(
        Arc::new(FsContentSource::new(&config.registry_root)),
        Arc::new(store),
    )
    .with_readiness(readiness)
    .with_job_prefix(config.job_prefix.clone());
    for kind in &config.kinds {
        reconciler = reconciler.register(Arc::new(LoggingApplier::new(ArtifactKind::new(
            kind.clone(),
        ))));
    }
    Ok(reconciler)
}

async fn cmd_once(config: &ReconcilerConfig) -> Result<()> {
    let reconciler = build_reconciler(config).await?;
    let report = reconciler
        .reconcile()
        .await
        .context("reconciliation pass failed")?;

    let output = OnceOutput {
        report: &report,
        health: reconciler.readiness().report(),
    };
    println!("{}", serde_json::to_string_pretty(&output)?);

    if !report.is_clean() {
        bail!("pass finished with {} error(s)", report.errors.len());
    }
    Ok(())
}

async fn cmd_run(config: &ReconcilerConfig) -> Result<()> {
    let reconciler = build_reconciler(config).await?;
    info!(
        event = "daemon.started",
        version = synchro_core::VERSION,
        registry = %config.registry_root.display(),
        interval_secs = config.interval_secs,
        grace_secs = config.grace_secs,
    );

    let mut ticker = tokio::time::interval(config.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match reconciler.reconcile().await {
                    Ok(report) => info!(
                        event = "daemon.pass",
                        applied = report.applied(),
                        failed = report.failed(),
                        pending = report.pending(),
                    ),
                    Err(e) => warn!(event = "daemon.pass_failed", error = %e),
                }
                let health = reconciler.readiness().report();
                info!(event = "daemon.readiness", status = %health.status, forced = health.forced);
            }
            _ = &mut shutdown => {
                info!(event = "daemon.stopping");
                break;
            }
        }
    }
    Ok(())
}
