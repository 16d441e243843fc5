use crate::backend::{BackendError, SlackClient};
use crate::config::parse::load_config;
use crate::config::Config;
use crate::storage::StorageError;
use crate::sync::{SourceOutcome, SyncError, SyncOrchestrator};
use crate::whitelist::read_whitelist;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] crate::config::parse::ConfigError),

    #[error("failed to read whitelist {path}: {source}")]
    Whitelist {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("backend client error: {0}")]
    Client(#[from] BackendError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("sync error: {0}")]
    Sync(#[from] SyncError),
}

fn require_config(config_path: Option<PathBuf>) -> PathBuf {
    match config_path {
        Some(path) => path,
        None => {
            eprintln!("Error: config not found");
            eprintln!("Searched locations:");
            eprintln!("  ~/.config/chansync/config.yml");
            eprintln!("  /etc/chansync/config.yml");
            eprintln!("\nUse --config <path> to specify a config file, or run 'chansync config init' to generate one.");
            std::process::exit(1);
        }
    }
}

fn build(config_path: &Path) -> Result<(Config, SyncOrchestrator), RunError> {
    info!(config_path = %config_path.display(), "Loading configuration");
    let config = load_config(config_path)?;

    let whitelist = read_whitelist(&config.whitelist).map_err(|source| RunError::Whitelist {
        path: config.whitelist.display().to_string(),
        source,
    })?;
    if whitelist.is_empty() {
        warn!(path = %config.whitelist.display(), "Whitelist is empty, nothing will be synced");
    }

    let client = Arc::new(SlackClient::new(&config.slack)?);
    info!(
        api_base = %client.base_url(),
        output = %config.output.display(),
        state_dir = %config.state_dir.display(),
        "Initializing sync"
    );

    let orchestrator = SyncOrchestrator::from_config(&config, client, whitelist)?;
    Ok((config, orchestrator))
}

/// Resolve once and poll until Ctrl+C.
pub async fn run(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = require_config(config_path);
    run_loop(&config_path).await.map_err(|e| e.into())
}

async fn run_loop(config_path: &Path) -> Result<(), RunError> {
    let (config, mut orchestrator) = build(config_path)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => warn!(error = %e, "Unable to listen for Ctrl+C, running without a shutdown signal"),
        }
    });

    info!(
        poll_interval = ?config.sync.poll_interval,
        on_fetch_error = ?config.sync.on_fetch_error,
        "Sync loop started, press Ctrl+C to shutdown"
    );
    orchestrator.run(shutdown_rx).await?;
    Ok(())
}

/// Resolve and run a single cycle, including publish.
pub async fn once(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = require_config(config_path);
    let (_, mut orchestrator) = build(&config_path)?;

    let report = orchestrator.run_cycle().await.map_err(RunError::from)?;
    for source in &report.sources {
        if let SourceOutcome::Failed { error } = &source.outcome {
            error!(entry = %source.entry, error = %error, "Source failed");
        }
    }
    info!(
        new_messages = report.new_records(),
        aborted = report.aborted,
        "Single cycle complete"
    );

    if report.aborted {
        return Err("poll cycle aborted; see log for the failing source".into());
    }
    Ok(())
}

/// Print how each whitelist entry resolves.
pub async fn resolve(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = require_config(config_path);
    let (_, mut orchestrator) = build(&config_path)?;

    let resolved = orchestrator.resolve().await.map_err(RunError::from)?;
    for entry in resolved.iter() {
        match &entry.source_id {
            Some(id) => println!("{}\t{}", entry.entry, id),
            None => println!("{}\t-  (not found or not a member)", entry.entry),
        }
    }
    Ok(())
}
