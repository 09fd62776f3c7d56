//! Hearth: the agent process spawned by the desktop host.
//!
//! Speaks NDJSON envelopes on stdin/stdout. Every log line goes to stderr or
//! the rolling log file; stdout carries nothing but protocol traffic.

use anyhow::Context;
use clap::Parser;
use hearth_agent::AgentProcess;
use hearth_agent::transport;
use hearth_core::config::{HearthConfig, load_config};
use hearth_core::preferences::PreferenceStore;
use hearth_core::store::MemoryStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Hearth: local agent runtime
#[derive(Parser, Debug)]
#[command(name = "hearth", version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Data directory for the memory database, preferences, and logs
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Default working directory for shell commands
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long)]
    quiet: bool,

    /// Disable the JSON log file
    #[arg(long)]
    no_file_log: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Inspect the effective configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Print the merged configuration as TOML
    Show,
}

fn log_filter(verbose: u8, quiet: bool) -> &'static str {
    match verbose {
        0 if quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

/// Stderr for humans, plus a daily JSON file when enabled.
fn init_tracing(cli: &Cli, config: &HearthConfig) -> Option<WorkerGuard> {
    let filter = log_filter(cli.verbose, cli.quiet);
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(EnvFilter::try_from_env("HEARTH_LOG").unwrap_or_else(|_| EnvFilter::new(filter)));

    let mut guard = None;
    let json_layer = if config.logging.file_logging && !cli.no_file_log {
        let log_dir = config.log_dir();
        match std::fs::create_dir_all(&log_dir) {
            Ok(()) => {
                let file_appender = tracing_appender::rolling::daily(&log_dir, "hearth.log");
                let (non_blocking, file_guard) = tracing_appender::non_blocking(file_appender);
                guard = Some(file_guard);
                Some(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking)
                        .with_filter(EnvFilter::new("debug")),
                )
            }
            Err(e) => {
                eprintln!("hearth: file logging disabled, cannot create {}: {e}", log_dir.display());
                None
            }
        }
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();
    guard
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref(), None)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    if let Some(dir) = &cli.data_dir {
        config.storage.data_dir = Some(dir.clone());
    }

    if let Some(Commands::Config {
        action: ConfigAction::Show,
    }) = &cli.command
    {
        print!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    let guard = init_tracing(&cli, &config);

    let working_directory = match &cli.cwd {
        Some(dir) => Some(
            dir.canonicalize()
                .with_context(|| format!("working directory {} is not usable", dir.display()))?,
        ),
        None => None,
    };

    let store = MemoryStore::open_or_fallback(
        &config.memory_db_path(),
        Duration::from_millis(config.storage.busy_timeout_ms),
    )
    .context("could not open any memory store")?;
    let preferences = Arc::new(PreferenceStore::load(config.preferences_path()));
    info!(
        memory = %store
            .location()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| ":memory:".into()),
        preferences = %config.preferences_path().display(),
        "Storage ready"
    );

    let agent = AgentProcess::new(&config, store, preferences, working_directory);
    let (source, sink) = transport::stdio();

    tokio::select! {
        result = agent.run(source, sink) => {
            info!("Host closed the connection, exiting");
            drop(guard);
            result.context("agent transport failed")
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received, exiting");
            drop(guard);
            std::process::exit(0);
        }
    }
}
