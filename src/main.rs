// ABOUTME: CLI entry point for station-replicator
// ABOUTME: Loads the config, sets up logging and routes to the scheduler or one-off commands

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::prelude::*;

use station_replicator::config::DEFAULT_CONFIG_PATH;
use station_replicator::store::{FullSyncStateStore, VersionStore};
use station_replicator::sync::ConsistencyChecker;
use station_replicator::{
    Connector, PgConnector, ReplicatorConfig, ScheduleIntervals, Scheduler, SourceDatabase,
    StaticRegistry, StationConfig, SweepStats,
};

#[derive(Parser)]
#[command(name = "station-replicator")]
#[command(about = "Replicate station databases into one shared PostgreSQL target", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the replicator configuration file
    #[arg(
        long,
        global = true,
        env = "STATION_REPLICATOR_CONFIG",
        default_value = DEFAULT_CONFIG_PATH
    )]
    config: PathBuf,
    /// Allow self-signed TLS certificates (insecure - use only for testing)
    #[arg(
        long = "allow-self-signed-certs",
        global = true,
        default_value_t = false
    )]
    allow_self_signed_certs: bool,
    /// Set the log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full-sync, incremental and revalidation jobs until Ctrl-C
    Run,
    /// Run one full sweep and one incremental sweep, or a single table, then exit
    SyncOnce {
        #[arg(long, requires = "table")]
        station: Option<String>,
        #[arg(long, requires = "station")]
        table: Option<String>,
    },
    /// Compare the second-latest key of a table on the station and the target
    Check {
        #[arg(long)]
        station: String,
        #[arg(long)]
        table: String,
    },
    /// Force every table back to a full re-scan on its next sweep
    Reset,
    /// Install the change log and triggers on a station's tables
    EnableTracking {
        #[arg(long)]
        station: String,
        /// Only this table (default: every table configured for the station)
        #[arg(long)]
        table: Option<String>,
    },
    /// Print full-sync state and cursor of every configured table
    Status,
}

fn init_logging(level: &str, log_file: Option<&PathBuf>) -> Result<()> {
    // RUST_LOG takes precedence over --log
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let file_layer = match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(std::sync::Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();
    Ok(())
}

fn find_station<'a>(config: &'a ReplicatorConfig, station_id: &str) -> Result<&'a StationConfig> {
    config
        .station(station_id)
        .ok_or_else(|| anyhow!("Station '{}' is not configured", station_id))
}

fn print_sweep(name: &str, stats: &SweepStats) {
    println!(
        "{} sweep: {} tables synced, {} rows applied, {} deleted, {} failed rows, {} errors ({}ms)",
        name,
        stats.tables_synced,
        stats.rows_applied,
        stats.rows_deleted,
        stats.rows_failed,
        stats.errors.len(),
        stats.duration_ms
    );
    for error in &stats.errors {
        println!("  error: {}", error);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ReplicatorConfig::load(&cli.config)?;
    init_logging(&cli.log, config.log_file.as_ref())?;

    station_replicator::postgres::init_tls_policy(cli.allow_self_signed_certs);

    let connector = Arc::new(PgConnector::new(
        config.target_url.clone(),
        config.version_retention_days,
    ));
    let registry = Arc::new(StaticRegistry::new(config.stations.clone()));
    let scheduler = Scheduler::new(registry, connector.clone(), config.sync_settings())
        .with_max_stations(config.max_stations);

    match cli.command {
        Commands::Run => {
            let intervals = ScheduleIntervals {
                full_sync: Duration::from_secs(config.full_sync_interval_secs),
                incremental: Duration::from_secs(config.incremental_interval_secs),
                revalidate: (config.revalidate_interval_secs > 0)
                    .then(|| Duration::from_secs(config.revalidate_interval_secs)),
            };

            let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
            let signal_tx = shutdown_tx.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Received Ctrl-C, shutting down");
                    let _ = signal_tx.send(());
                }
            });

            Arc::new(scheduler).run(intervals, shutdown_tx).await
        }
        Commands::SyncOnce { station, table } => {
            if let (Some(station), Some(table)) = (station, table) {
                let outcome = scheduler.sync_one(&station, &table).await?;
                println!(
                    "{}/{}: {} sync, cursor {}, {} applied, {} deleted, {} failed, consistency {}",
                    station,
                    table,
                    outcome.mode,
                    outcome.cursor,
                    outcome.applied,
                    outcome.deleted,
                    outcome.failed,
                    outcome
                        .consistency
                        .map(|c| c.to_string())
                        .unwrap_or_else(|| "not checked".to_string())
                );
                return Ok(());
            }

            let full = scheduler.run_full_sync_sweep().await;
            print_sweep("Full sync", &full);
            let incremental = scheduler.run_incremental_sweep().await;
            print_sweep("Incremental", &incremental);
            if full.is_success() && incremental.is_success() {
                Ok(())
            } else {
                anyhow::bail!("Sweep finished with errors")
            }
        }
        Commands::Check { station, table } => {
            let station_config = find_station(&config, &station)?;
            let handles = connector.connect_target().await?;
            let source = connector.connect_source(station_config).await?;
            let schema = source.table_schema(&table).await?;
            let result = ConsistencyChecker::new(source.as_ref(), handles.target.as_ref())
                .check(&station, &schema)
                .await;
            println!("{}/{}: {}", station, table, result);
            Ok(())
        }
        Commands::Reset => {
            let reset = scheduler.revalidate().await?;
            println!("Reset {} tables to full sync", reset);
            Ok(())
        }
        Commands::EnableTracking { station, table } => {
            let station_config = find_station(&config, &station)?;
            let tables = match table {
                Some(table) => vec![table],
                None => station_config.tables.clone(),
            };
            let source = connector.connect_source(station_config).await?;
            for table in &tables {
                let schema = source.table_schema(table).await?;
                source.enable_tracking(&schema).await?;
                println!("Change tracking enabled on {}/{}", station, table);
            }
            Ok(())
        }
        Commands::Status => {
            let handles = connector.connect_target().await?;
            println!(
                "{:<20} {:<30} {:>12} {:>12} {:>12}",
                "STATION", "TABLE", "MODE", "LAST KEY", "CURSOR"
            );
            for station in &config.stations {
                for table in &station.tables {
                    let state = handles.states.get_state(&station.station_id, table).await?;
                    let cursor = handles
                        .versions
                        .get_cursor(&station.station_id, table)
                        .await?
                        .map_or_else(|| "-".to_string(), |c| c.to_string());
                    println!(
                        "{:<20} {:<30} {:>12} {:>12} {:>12}",
                        station.station_id,
                        table,
                        if state.need_full {
                            "full"
                        } else {
                            "incremental"
                        },
                        state.resume_key,
                        cursor
                    );
                }
            }
            Ok(())
        }
    }
}
