//! FIXER sync daemon
//!
//! Keeps the offline queue draining in the background: polls the backend's
//! health endpoint, feeds the result to the connectivity monitor, and logs
//! every sync event until interrupted.

use anyhow::Result;
use clap::Parser;
use fixer_core::audit::AuditEventType;
use fixer_core::connectivity::spawn_health_check;
use fixer_core::platform::get_default_config_path;
use fixer_core::sync::HttpRemoteApi;
use fixer_core::{FixerConfig, OfflineSync, SyncEvent};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "fixer-daemon", about = "FIXER offline sync daemon")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Remote API base URL override
    #[arg(long)]
    api_url: Option<String>,

    /// Offline store path override
    #[arg(short, long)]
    database: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(get_default_config_path);
    let mut cfg = FixerConfig::load_or_default(&config_path)?;
    if let Some(api_url) = cli.api_url {
        cfg.api_base_url = api_url;
    }
    if let Some(database) = cli.database {
        cfg.database_path = database;
    }

    info!("Starting FIXER sync daemon v{}", VERSION);
    info!("Offline store: {:?}", cfg.database_path);
    info!("Remote API: {}", cfg.api_base_url);

    let check_api = Arc::new(HttpRemoteApi::new(&cfg.api_base_url, cfg.request_timeout())?);
    let check_interval = cfg.health_check_interval();
    let sync = OfflineSync::open_default(cfg)?;
    audit(&sync, AuditEventType::DaemonStarted);

    let event_logger = tokio::spawn(log_events(sync.subscribe()));

    let (links_tx, links_rx) = mpsc::channel(16);
    let checker = spawn_health_check(check_api, check_interval, links_tx);
    let monitor = sync.start(links_rx);

    info!(
        device_id = sync.device_id(),
        pending_reports = sync.pending_reports_count()?,
        pending_verifications = sync.pending_verifications_count()?,
        "Daemon ready. Press Ctrl+C to exit."
    );

    signal::ctrl_c().await?;
    info!("Received shutdown signal");

    checker.abort();
    monitor.shutdown();
    event_logger.abort();
    audit(&sync, AuditEventType::DaemonStopped);

    Ok(())
}

fn audit(sync: &OfflineSync, event: AuditEventType) {
    if let Some(log) = sync.audit() {
        if let Err(e) = log.log(event, sync.device_id()) {
            warn!("Failed to write audit entry: {}", e);
        }
    }
}

async fn log_events(mut events: broadcast::Receiver<SyncEvent>) {
    loop {
        match events.recv().await {
            Ok(SyncEvent::TerminalDrop {
                id,
                kind,
                attempts,
                reason,
            }) => {
                error!(%id, %kind, attempts, reason = %reason, "Submission dropped after final attempt");
            }
            Ok(SyncEvent::PersistenceDegraded { reason }) => {
                error!(reason = %reason, "Offline store unavailable, running from memory");
            }
            Ok(event) => debug!(?event, "Sync event"),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Event logger fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
