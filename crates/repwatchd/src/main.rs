//! repwatchd - alert threshold daemon
//!
//! Runs the threshold check and maintenance jobs, and exposes one-shot
//! commands for managing thresholds and alerts.

use std::path::{Path, PathBuf};

use chrono::Utc;
use clap::{Parser, Subcommand};
use rep_alerts::{
    AlertError, AlertingJobs, AlertingService, HistoryQuery, ThresholdDirection, ThresholdDraft,
};
use repwatchd::config::{self, DaemonConfig, LoggingConfig};
use repwatchd::{build_service, init_logging, metric_source};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "repwatchd")]
#[command(about = "Alert threshold daemon")]
#[command(version)]
struct Cli {
    /// Path to config file
    #[arg(
        short,
        long,
        global = true,
        env = "REPWATCHD_CONFIG",
        default_value = "/etc/repwatchd/config.toml"
    )]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the check and maintenance jobs until interrupted
    Run,

    /// Evaluate a single metric value
    Evaluate {
        /// Metric name, e.g. "CPU Usage"
        #[arg(long)]
        metric: String,

        /// Metric category, e.g. "System"
        #[arg(long)]
        category: String,

        /// Observed value
        #[arg(long, allow_hyphen_values = true)]
        value: f64,
    },

    /// Sample system metrics once and evaluate every threshold
    Check,

    /// Purge expired alerts, notifications and history
    Maintenance,

    /// Manage alert thresholds
    Thresholds {
        #[command(subcommand)]
        action: ThresholdAction,
    },

    /// List active alerts, or resolved history with --history
    Alerts {
        /// Show history instead of active alerts
        #[arg(long)]
        history: bool,

        /// Maximum number of history rows
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Acknowledge an alert
    Ack {
        /// Alert id
        id: i64,

        /// Who is acknowledging
        #[arg(long, default_value = "admin")]
        by: String,

        /// Optional note
        #[arg(long)]
        note: Option<String>,
    },

    /// Resolve an alert manually
    Resolve {
        /// Alert id
        id: i64,
    },

    /// Generate a sample config file
    InitConfig {
        /// Path to write config
        #[arg(short, long, default_value = "/etc/repwatchd/config.toml")]
        output: PathBuf,
    },
}

#[derive(Subcommand)]
enum ThresholdAction {
    /// List thresholds
    List,

    /// Create a threshold
    Add {
        /// Metric name
        #[arg(long)]
        metric: String,

        /// Metric category
        #[arg(long)]
        category: String,

        /// Warning boundary
        #[arg(long, allow_hyphen_values = true)]
        warning: f64,

        /// Critical boundary
        #[arg(long, allow_hyphen_values = true)]
        critical: f64,

        /// above, below, equal or not_equal
        #[arg(long, default_value = "above", value_parser = parse_direction)]
        direction: ThresholdDirection,

        /// Send email as well as in-app notifications
        #[arg(long)]
        email: bool,

        /// Escalate after this many minutes unacknowledged
        #[arg(long)]
        escalate_after: Option<u32>,

        /// Free-form description
        #[arg(long)]
        description: Option<String>,

        /// Creating user
        #[arg(long, default_value = "admin")]
        by: String,
    },

    /// Delete a threshold that no alert references
    Remove {
        /// Threshold id
        id: i64,
    },
}

fn parse_direction(s: &str) -> Result<ThresholdDirection, String> {
    s.parse().map_err(|e: AlertError| e.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::InitConfig { output } = &cli.command {
        init_logging(&LoggingConfig::default())?;
        return init_config(output);
    }

    let config = DaemonConfig::from_file(&cli.config)?;
    init_logging(&config.logging)?;
    info!(config = %cli.config.display(), "loaded config");

    let service = build_service(&config)?;

    match cli.command {
        Commands::Run => run_daemon(&config, service).await?,
        Commands::Evaluate {
            metric,
            category,
            value,
        } => {
            let result = service.evaluate_metric_at(&metric, &category, value, Utc::now())?;
            print_json(&result)?;
        }
        Commands::Check => {
            let source = metric_source(&config);
            let result = service.check_all_thresholds_at(source.as_ref(), Utc::now())?;
            print_json(&result)?;
        }
        Commands::Maintenance => print_json(&service.run_maintenance()?)?,
        Commands::Thresholds { action } => thresholds(&service, action)?,
        Commands::Alerts { history, limit } => {
            if history {
                let mut query = HistoryQuery::all();
                if let Some(limit) = limit {
                    query = query.limit(limit);
                }
                print_json(&service.alert_history(&query)?)?;
            } else {
                print_json(&service.active_alerts()?)?;
            }
        }
        Commands::Ack { id, by, note } => {
            if service.acknowledge_alert(id, &by, note.as_deref())? {
                println!("alert {id} acknowledged");
            } else {
                anyhow::bail!("alert {id} not found");
            }
        }
        Commands::Resolve { id } => {
            if service.resolve_alert(id)? {
                println!("alert {id} resolved");
            } else {
                anyhow::bail!("alert {id} not found or already resolved");
            }
        }
        Commands::InitConfig { .. } => {}
    }

    Ok(())
}

async fn run_daemon(config: &DaemonConfig, service: AlertingService) -> anyhow::Result<()> {
    let jobs = AlertingJobs::new(service, metric_source(config), config.jobs);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(jobs.run(shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    shutdown_tx.send(true)?;

    if let Err(e) = handle.await {
        error!(error = %e, "job loop terminated abnormally");
    }
    Ok(())
}

fn thresholds(service: &AlertingService, action: ThresholdAction) -> anyhow::Result<()> {
    match action {
        ThresholdAction::List => print_json(&service.alert_thresholds()?)?,
        ThresholdAction::Add {
            metric,
            category,
            warning,
            critical,
            direction,
            email,
            escalate_after,
            description,
            by,
        } => {
            let mut builder = ThresholdDraft::builder(metric, category)
                .warning(warning)
                .critical(critical)
                .direction(direction)
                .email(email);
            if let Some(minutes) = escalate_after {
                builder = builder.escalate_after_minutes(minutes);
            }
            if let Some(description) = description {
                builder = builder.description(description);
            }
            let threshold = service.create_alert_threshold(builder.build()?, &by)?;
            print_json(&threshold)?;
        }
        ThresholdAction::Remove { id } => {
            if service.delete_alert_threshold(id)? {
                println!("threshold {id} deleted");
            } else {
                anyhow::bail!("threshold {id} not found");
            }
        }
    }
    Ok(())
}

fn init_config(output: &Path) -> anyhow::Result<()> {
    config::write_sample(output)?;

    println!("Config written to {}", output.display());
    println!();
    println!("Edit the recipients and storage path, then run:");
    println!("  repwatchd --config {} run", output.display());

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
