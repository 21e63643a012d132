//! nodescaled: the nodescale daemon.
//!
//! Loads a `nodescale.toml`, builds the configured cloud provider, and
//! keeps its view of node groups fresh:
//! - background refresh on an interval
//! - periodic cluster report with resource limit checks
//! - clean provider shutdown on Ctrl-C
//!
//! # Usage
//!
//! ```text
//! nodescaled run --config /etc/nodescale/nodescale.toml --interval-secs 10
//! nodescaled groups --config nodescale.toml --json
//! nodescaled validate --config nodescale.toml
//! ```

mod providers;
mod report;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use nodescale_core::{CloudProvider, NodescaleConfig};

use crate::report::{ClusterReport, format_report};

const DEFAULT_FILTER: &str = "info,nodescaled=debug,nodescale_provider=debug,nodescale_static=debug";

#[derive(Parser)]
#[command(name = "nodescaled", about = "nodescale daemon", version)]
struct Cli {
    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the refresh loop until interrupted.
    Run {
        /// Path to nodescale.toml.
        #[arg(long, default_value = "nodescale.toml")]
        config: PathBuf,

        /// Refresh interval in seconds.
        #[arg(long, default_value = "10")]
        interval_secs: u64,

        /// Report interval in seconds.
        #[arg(long, default_value = "60")]
        report_secs: u64,
    },
    /// Print node groups once and exit.
    Groups {
        #[arg(long, default_value = "nodescale.toml")]
        config: PathBuf,

        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Check a config file without building a provider.
    Validate {
        #[arg(long, default_value = "nodescale.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Run {
            config,
            interval_secs,
            report_secs,
        } => run(&config, interval_secs, report_secs).await,
        Command::Groups { config, json } => groups(&config, json).await,
        Command::Validate { config } => validate(&config),
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn load_config(path: &Path) -> anyhow::Result<NodescaleConfig> {
    let config = NodescaleConfig::from_file(path)
        .with_context(|| format!("invalid config {}", path.display()))?;
    debug!(path = %path.display(), groups = config.node_groups.len(), "config loaded");
    Ok(config)
}

async fn run(config_path: &Path, interval_secs: u64, report_secs: u64) -> anyhow::Result<()> {
    if interval_secs == 0 || report_secs == 0 {
        anyhow::bail!("intervals must be greater than zero");
    }

    info!("nodescale daemon starting");
    let config = load_config(config_path)?;
    let provider = providers::build(&config).await?;
    info!(limits = %provider.resource_limiter(), "resource limits loaded");

    provider.spawn_refresher(Duration::from_secs(interval_secs));

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown signal received"),
            Err(e) => warn!(error = %e, "failed to listen for Ctrl-C, shutting down"),
        }
        let _ = shutdown_tx.send(true);
    });

    // ── Report loop ────────────────────────────────────────────

    let mut ticker = tokio::time::interval(Duration::from_secs(report_secs));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match ClusterReport::collect(&provider) {
                    Ok(report) => {
                        info!(groups = report.groups.len(), totals = ?report.totals, "cluster report");
                        report.warn_violations();
                    }
                    Err(e) => warn!(error = %e, "failed to build cluster report"),
                }
            }
            _ = shutdown_rx.changed() => break,
        }
    }

    provider.cleanup().await.context("provider cleanup failed")?;
    info!("nodescale daemon stopped");
    Ok(())
}

async fn groups(config_path: &Path, json: bool) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let provider = providers::build(&config).await?;

    let report = ClusterReport::collect(&provider)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", format_report(&report));
    }

    provider.cleanup().await?;
    Ok(())
}

fn validate(config_path: &Path) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    if !providers::KNOWN_PROVIDERS.contains(&config.provider.name.as_str()) {
        anyhow::bail!(
            "unknown provider {:?} (known: {})",
            config.provider.name,
            providers::KNOWN_PROVIDERS.join(", ")
        );
    }
    println!(
        "✓ {} valid: provider {}, {} node groups, {} machine types",
        config_path.display(),
        config.provider.name,
        config.node_groups.len(),
        config.machine_types.len()
    );
    Ok(())
}
