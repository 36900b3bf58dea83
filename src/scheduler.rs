// ABOUTME: Periodic sweeps driving the orchestrator over every (station, table) pair
// ABOUTME: Full and incremental sweeps plus the revalidation reset run on independent intervals

use anyhow::{anyhow, Context, Result};
use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::time::{interval, interval_at, MissedTickBehavior};

use crate::connector::{Connector, TargetHandles};
use crate::registry::{apply_entitlement, StationConfig, StationRegistry};
use crate::store::FullSyncStateStore;
use crate::sync::{SyncOrchestrator, SyncOutcome, SyncSettings};

/// Which tables a sweep picks up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepKind {
    /// Tables with no full-sync record or an unfinished one.
    FullSync,
    /// Tables whose full sync has completed.
    Incremental,
}

impl SweepKind {
    fn name(&self) -> &'static str {
        match self {
            SweepKind::FullSync => "full sync",
            SweepKind::Incremental => "incremental",
        }
    }
}

/// Statistics from a single sweep.
#[derive(Debug, Clone, Default)]
pub struct SweepStats {
    pub tables_synced: usize,
    /// Tables skipped because another sweep was already syncing them.
    pub tables_skipped: usize,
    pub rows_applied: usize,
    pub rows_deleted: usize,
    pub rows_failed: usize,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

impl SweepStats {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    fn record(&mut self, outcome: &SyncOutcome) {
        self.tables_synced += 1;
        self.rows_applied += outcome.applied;
        self.rows_deleted += outcome.deleted;
        self.rows_failed += outcome.failed;
    }
}

/// Intervals for [`Scheduler::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleIntervals {
    pub full_sync: Duration,
    pub incremental: Duration,
    /// `None` disables the periodic reset.
    pub revalidate: Option<Duration>,
}

type ActiveUnits = Arc<Mutex<HashSet<(String, String)>>>;

/// Lock the unit set, recovering it if a holder panicked.
///
/// Critical sections are single set operations, so a poisoned set is still valid.
fn lock_units(active: &ActiveUnits) -> MutexGuard<'_, HashSet<(String, String)>> {
    active.lock().unwrap_or_else(|poisoned| {
        tracing::error!("In-flight set lock was poisoned, recovering");
        poisoned.into_inner()
    })
}

/// Set of (station, table) units currently being synced.
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    active: ActiveUnits,
}

impl InFlight {
    /// Claim a unit, or `None` if it is already running.
    pub fn try_acquire(&self, station_id: &str, table: &str) -> Option<InFlightGuard> {
        let key = (station_id.to_string(), table.to_string());
        let mut active = lock_units(&self.active);
        if !active.insert(key.clone()) {
            return None;
        }
        Some(InFlightGuard {
            active: self.active.clone(),
            key,
        })
    }

    pub fn is_active(&self, station_id: &str, table: &str) -> bool {
        lock_units(&self.active).contains(&(station_id.to_string(), table.to_string()))
    }
}

/// Releases its unit when dropped.
pub struct InFlightGuard {
    active: ActiveUnits,
    key: (String, String),
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        lock_units(&self.active).remove(&self.key);
    }
}

pub struct Scheduler {
    registry: Arc<dyn StationRegistry>,
    connector: Arc<dyn Connector>,
    settings: SyncSettings,
    max_stations: Option<usize>,
    in_flight: InFlight,
}

impl Scheduler {
    pub fn new(
        registry: Arc<dyn StationRegistry>,
        connector: Arc<dyn Connector>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            registry,
            connector,
            settings,
            max_stations: None,
            in_flight: InFlight::default(),
        }
    }

    /// Limit processing to the first `max_stations` stations.
    pub fn with_max_stations(mut self, max_stations: Option<usize>) -> Self {
        self.max_stations = max_stations;
        self
    }

    pub fn in_flight(&self) -> &InFlight {
        &self.in_flight
    }

    pub async fn run_full_sync_sweep(&self) -> SweepStats {
        self.sweep(SweepKind::FullSync).await
    }

    pub async fn run_incremental_sweep(&self) -> SweepStats {
        self.sweep(SweepKind::Incremental).await
    }

    /// Force every table back to a full re-scan.
    pub async fn revalidate(&self) -> Result<u64> {
        let handles = self.connector.connect_target().await?;
        let reset = handles.states.reset_all().await?;
        tracing::info!("Reset full-sync state of {} tables for revalidation", reset);
        Ok(reset)
    }

    /// Sync a single (station, table) unit regardless of its state.
    pub async fn sync_one(&self, station_id: &str, table: &str) -> Result<SyncOutcome> {
        let station = self
            .registry
            .station(station_id)
            .ok_or_else(|| anyhow!("Unknown station '{}'", station_id))?;
        let _guard = self
            .in_flight
            .try_acquire(station_id, table)
            .ok_or_else(|| anyhow!("{}/{} is already being synced", station_id, table))?;

        let handles = self.connector.connect_target().await?;
        let source = self.connector.connect_source(&station).await?;
        SyncOrchestrator::new(
            source.as_ref(),
            handles.target.as_ref(),
            handles.versions.as_ref(),
            handles.states.as_ref(),
            self.settings,
        )
        .sync_table(station_id, table)
        .await
    }

    async fn sweep(&self, kind: SweepKind) -> SweepStats {
        let start = Instant::now();
        let mut stats = SweepStats::default();

        let handles = match self.connector.connect_target().await {
            Ok(handles) => handles,
            Err(e) => {
                tracing::error!("{} sweep could not reach the target: {:?}", kind.name(), e);
                stats.errors.push(format!("target: {}", e));
                stats.duration_ms = start.elapsed().as_millis() as u64;
                return stats;
            }
        };

        let stations = apply_entitlement(self.registry.stations(), self.max_stations);
        for station in &stations {
            self.sweep_station(kind, &handles, station, &mut stats).await;
        }

        stats.duration_ms = start.elapsed().as_millis() as u64;
        stats
    }

    async fn sweep_station(
        &self,
        kind: SweepKind,
        handles: &TargetHandles,
        station: &StationConfig,
        stats: &mut SweepStats,
    ) {
        let station_id = station.station_id.as_str();
        let mut selected = Vec::new();
        for table in self.registry.tables(station_id) {
            match handles.states.get_state(station_id, &table.table_name).await {
                Ok(status) if status.need_full == (kind == SweepKind::FullSync) => {
                    selected.push(table.table_name)
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(
                        station = %station_id,
                        table = %table.table_name,
                        "Failed to read full-sync state: {:?}",
                        e
                    );
                    stats
                        .errors
                        .push(format!("{}/{}: {}", station_id, table.table_name, e));
                }
            }
        }
        if selected.is_empty() {
            return;
        }

        let source = match self.connector.connect_source(station).await {
            Ok(source) => source,
            Err(e) => {
                tracing::error!(station = %station_id, "Failed to connect to station: {:?}", e);
                stats.errors.push(format!("{}: {}", station_id, e));
                return;
            }
        };
        let orchestrator = SyncOrchestrator::new(
            source.as_ref(),
            handles.target.as_ref(),
            handles.versions.as_ref(),
            handles.states.as_ref(),
            self.settings,
        );

        for table in selected {
            let Some(_guard) = self.in_flight.try_acquire(station_id, &table) else {
                tracing::debug!(
                    station = %station_id,
                    table = %table,
                    "Already syncing, skipping"
                );
                stats.tables_skipped += 1;
                continue;
            };

            match orchestrator.sync_table(station_id, &table).await {
                Ok(outcome) => {
                    tracing::info!(
                        station = %station_id,
                        table = %table,
                        mode = %outcome.mode,
                        cursor = outcome.cursor,
                        applied = outcome.applied,
                        deleted = outcome.deleted,
                        failed = outcome.failed,
                        "Table synced"
                    );
                    stats.record(&outcome);
                }
                Err(e) => {
                    // {:?} keeps the full error chain
                    tracing::error!(
                        station = %station_id,
                        table = %table,
                        "Failed to sync table: {:?}",
                        e
                    );
                    stats.errors.push(format!("{}/{}: {}", station_id, table, e));
                }
            }
        }
    }

    async fn sweep_job(&self, kind: SweepKind) {
        let stats = self.sweep(kind).await;
        tracing::info!(
            "{} sweep completed: {} tables, {} rows applied, {} deleted, {} skipped in {}ms",
            kind.name(),
            stats.tables_synced,
            stats.rows_applied,
            stats.rows_deleted,
            stats.tables_skipped,
            stats.duration_ms
        );
        if !stats.is_success() {
            tracing::warn!("{} sweep had {} errors", kind.name(), stats.errors.len());
        }
    }

    async fn revalidate_job(&self) {
        if let Err(e) = self.revalidate().await {
            tracing::error!("Revalidation reset failed: {:?}", e);
        }
    }

    /// Run both sweeps and the revalidation reset until shutdown is signalled.
    ///
    /// Each job runs in its own task on its own interval and awaits its work
    /// before the next tick, so a job never overlaps itself.
    pub async fn run(
        self: Arc<Self>,
        intervals: ScheduleIntervals,
        shutdown: broadcast::Sender<()>,
    ) -> Result<()> {
        tracing::info!(
            "Starting scheduler with full_sync={:?}, incremental={:?}, revalidate={:?}",
            intervals.full_sync,
            intervals.incremental,
            intervals.revalidate
        );

        let mut tasks = tokio::task::JoinSet::new();

        let scheduler = self.clone();
        tasks.spawn(run_periodic(
            "full sync sweep",
            intervals.full_sync,
            false,
            shutdown.subscribe(),
            move || {
                let scheduler = scheduler.clone();
                async move { scheduler.sweep_job(SweepKind::FullSync).await }
            },
        ));

        let scheduler = self.clone();
        tasks.spawn(run_periodic(
            "incremental sweep",
            intervals.incremental,
            false,
            shutdown.subscribe(),
            move || {
                let scheduler = scheduler.clone();
                async move { scheduler.sweep_job(SweepKind::Incremental).await }
            },
        ));

        if let Some(period) = intervals.revalidate {
            let scheduler = self.clone();
            tasks.spawn(run_periodic(
                "revalidation reset",
                period,
                true,
                shutdown.subscribe(),
                move || {
                    let scheduler = scheduler.clone();
                    async move { scheduler.revalidate_job().await }
                },
            ));
        }

        while let Some(joined) = tasks.join_next().await {
            joined.context("Scheduler task panicked")?;
        }
        tracing::info!("Scheduler stopped");
        Ok(())
    }
}

/// Tick `job` every `period` until shutdown. With `delay_first` the first run
/// waits one full period instead of starting immediately.
async fn run_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    delay_first: bool,
    mut shutdown: broadcast::Receiver<()>,
    mut job: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut ticker = if delay_first {
        interval_at(tokio::time::Instant::now() + period, period)
    } else {
        interval(period)
    };
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;

            _ = shutdown.recv() => {
                tracing::info!("Shutdown signal received, stopping {}", name);
                break;
            }
            _ = ticker.tick() => {
                tokio::select! {
                    biased;
                    _ = shutdown.recv() => {
                        tracing::info!("Shutdown signal received during {}, aborting", name);
                        break;
                    }
                    _ = job() => {}
                }
            }
        }
    }
}
