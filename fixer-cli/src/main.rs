use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use fixer_core::platform::get_default_config_path;
use fixer_core::sync::PassOutcome;
use fixer_core::{
    FixerConfig, HttpRemoteApi, LatLng, OfflineSync, RemoteApi, SubmissionKind,
    SubmissionPayload, SubmitOutcome,
};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// FIXER CLI - Offline-first safety reporting client
#[derive(Parser)]
#[command(name = "fixer")]
#[command(about = "Queue safety reports offline and browse cached resources", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Remote API base URL override
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Offline store path override
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Queue a new safety report
    Report {
        /// Report type (danger, incident, checkpoint, safe, resource)
        #[arg(long = "type")]
        report_type: String,

        /// Latitude
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        /// Longitude
        #[arg(long, allow_hyphen_values = true)]
        lng: f64,

        /// Free-text description
        #[arg(long)]
        description: Option<String>,

        /// Submit without attributing the report to this device
        #[arg(long)]
        anonymous: bool,

        /// Try to deliver immediately if the backend is reachable
        #[arg(long)]
        sync: bool,
    },

    /// Queue a verification of an existing report
    Verify {
        /// Report being verified
        #[arg(long)]
        report_id: String,

        /// Report type
        #[arg(long = "type")]
        report_type: String,

        /// Latitude
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        /// Longitude
        #[arg(long, allow_hyphen_values = true)]
        lng: f64,

        /// Mark the report as inaccurate
        #[arg(long)]
        inaccurate: bool,

        /// Try to deliver immediately if the backend is reachable
        #[arg(long)]
        sync: bool,
    },

    /// Show queue, cache and device status
    Status,

    /// List queued submissions in delivery order
    Pending,

    /// Browse cached resources
    Resources {
        /// Latitude of the search center
        #[arg(long, requires = "lng", allow_hyphen_values = true)]
        lat: Option<f64>,

        /// Longitude of the search center
        #[arg(long, requires = "lat", allow_hyphen_values = true)]
        lng: Option<f64>,

        /// Search radius in meters
        #[arg(long)]
        radius: Option<f64>,

        /// Only show resources of this type
        #[arg(long = "type")]
        resource_type: Option<String>,

        /// Show the N closest resources instead of a radius search
        #[arg(long, requires = "lat")]
        nearest: Option<usize>,
    },

    /// Deliver queued submissions and refresh the resource cache
    Sync,

    /// Show this device's identity
    Device,

    /// Show recent audit log entries
    Audit {
        /// Maximum number of entries to show
        #[arg(long, default_value_t = 20)]
        limit: usize,

        /// Only show entries at or above this severity (0-5)
        #[arg(long)]
        min_severity: Option<u8>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse()?))
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

    let sync = OfflineSync::open_default(cfg)?;

    match cli.command {
        Commands::Report {
            report_type,
            lat,
            lng,
            description,
            anonymous,
            sync: deliver,
        } => {
            let mut payload = SubmissionPayload::report(&report_type, LatLng::new(lat, lng));
            if let Some(description) = description {
                payload = payload.with_description(&description);
            }
            if anonymous {
                payload = payload.anonymous();
            }
            print_outcome(sync.submit_report(payload)?)?;
            if deliver {
                run_sync(&sync).await?;
            }
        }
        Commands::Verify {
            report_id,
            report_type,
            lat,
            lng,
            inaccurate,
            sync: deliver,
        } => {
            let payload = SubmissionPayload::verification(
                &report_id,
                &report_type,
                LatLng::new(lat, lng),
                !inaccurate,
            );
            print_outcome(sync.submit_verification(payload)?)?;
            if deliver {
                run_sync(&sync).await?;
            }
        }
        Commands::Status => {
            println!("Device:                {}", sync.device_id());
            println!("Sync status:           {}", sync.sync_status().as_str());
            println!("Pending reports:       {}", sync.pending_reports_count()?);
            println!("Pending verifications: {}", sync.pending_verifications_count()?);
            println!("Cached resources:      {}", sync.cached_resource_count()?);
            println!(
                "Reports left:          {}",
                sync.remaining_submissions(SubmissionKind::Report)?
            );
            println!(
                "Verifications left:    {}",
                sync.remaining_submissions(SubmissionKind::Verification)?
            );
            if sync.is_persistence_degraded() {
                println!("Warning: offline store unavailable, changes will not survive a restart");
            }
        }
        Commands::Pending => {
            let items = sync.pending_items()?;
            println!("{}", serde_json::to_string_pretty(&items)?);
        }
        Commands::Resources {
            lat,
            lng,
            radius,
            resource_type,
            nearest,
        } => {
            let center = match (lat, lng) {
                (Some(lat), Some(lng)) => Some(LatLng::new(lat, lng)),
                _ => None,
            };

            if let Some(limit) = nearest {
                let Some(center) = center else {
                    bail!("--nearest needs --lat and --lng");
                };
                for (entry, distance) in
                    sync.nearest_resources(center, resource_type.as_deref(), limit)?
                {
                    println!(
                        "{:>8.0} m  {}  {} ({}, {})",
                        distance, entry.id, entry.name, entry.resource_type, entry.status
                    );
                }
                return Ok(());
            }

            let entries: Vec<_> = sync
                .query_cached_resources(center, radius)?
                .into_iter()
                .filter(|e| {
                    resource_type
                        .as_deref()
                        .map_or(true, |t| e.resource_type == t)
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        Commands::Sync => {
            run_sync(&sync).await?;
        }
        Commands::Device => {
            let device = sync.device();
            println!("{}", serde_json::to_string_pretty(device)?);
        }
        Commands::Audit {
            limit,
            min_severity,
        } => {
            let Some(audit) = sync.audit() else {
                println!("Audit log disabled");
                return Ok(());
            };
            let entries = audit.recent(limit, min_severity)?;
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
    }

    Ok(())
}

fn print_outcome(outcome: SubmitOutcome) -> Result<()> {
    match outcome {
        SubmitOutcome::Queued(item) => {
            info!(id = %item.id, kind = %item.kind, "Submission queued");
            println!(
                "Queued {} {} (priority {})",
                item.kind,
                item.id,
                item.priority.as_str()
            );
            Ok(())
        }
        SubmitOutcome::Rejected(rejection) => bail!("Submission rejected: {}", rejection),
    }
}

async fn run_sync(sync: &OfflineSync) -> Result<()> {
    let checker = HttpRemoteApi::new(&sync.config().api_base_url, sync.config().request_timeout())?;
    let healthy = match checker.health().await {
        Ok(healthy) => healthy,
        Err(e) => {
            warn!(error = %e, "Health check failed");
            false
        }
    };
    if !healthy {
        println!("Backend unreachable, submissions stay queued");
        return Ok(());
    }

    sync.set_online(true);
    match sync.sync_now().await? {
        PassOutcome::Completed(report) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        PassOutcome::Coalesced => println!("A sync pass is already running"),
    }
    Ok(())
}
