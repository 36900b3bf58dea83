// ABOUTME: Per-table entry point deciding between full copy and incremental sync
// ABOUTME: Records the source version before copying so no change falls between cycles

use anyhow::{Context, Result};
use std::fmt;
use std::time::Duration;

use crate::schema::{SchemaSynchronizer, TableSchema};
use crate::source::SourceDatabase;
use crate::store::{FullSyncStateStore, VersionStore};
use crate::target::TargetDatabase;

use super::applier::{ApplyStats, RowApplier};
use super::change::ChangeBatch;
use super::consistency::{Consistency, ConsistencyChecker};
use super::fetcher::{ChangeFetcher, ChangeSet};
use super::pager::FullSyncPager;

/// Default rows per full-sync page.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Default pause between full-sync pages.
pub const DEFAULT_PAGE_DELAY: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    pub page_size: usize,
    pub page_delay: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            page_delay: DEFAULT_PAGE_DELAY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Full,
    Incremental,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMode::Full => write!(f, "full"),
            SyncMode::Incremental => write!(f, "incremental"),
        }
    }
}

/// What one `sync_table` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOutcome {
    pub mode: SyncMode,
    /// Cursor in effect after the call.
    pub cursor: i64,
    pub applied: usize,
    pub deleted: usize,
    pub failed: usize,
    /// `None` when nothing was applied and no check ran.
    pub consistency: Option<Consistency>,
}

pub struct SyncOrchestrator<'a> {
    source: &'a dyn SourceDatabase,
    target: &'a dyn TargetDatabase,
    versions: &'a dyn VersionStore,
    states: &'a dyn FullSyncStateStore,
    settings: SyncSettings,
}

impl<'a> SyncOrchestrator<'a> {
    pub fn new(
        source: &'a dyn SourceDatabase,
        target: &'a dyn TargetDatabase,
        versions: &'a dyn VersionStore,
        states: &'a dyn FullSyncStateStore,
        settings: SyncSettings,
    ) -> Self {
        Self {
            source,
            target,
            versions,
            states,
            settings,
        }
    }

    /// Replicate one table of one station.
    ///
    /// 1. Bring the target schema up to date.
    /// 2. Unfinished full sync: resume it, then save its baseline version as cursor.
    /// 3. Finished, but the target holds no rows for this station: full sync from 0.
    /// 4. Otherwise apply the changes since the cursor, deletes before upserts.
    pub async fn sync_table(&self, station_id: &str, table: &str) -> Result<SyncOutcome> {
        let schema = self
            .source
            .table_schema(table)
            .await
            .with_context(|| format!("Failed to read schema of '{}' on {}", table, station_id))?;
        SchemaSynchronizer::new(self.target)
            .ensure_target(station_id, &schema)
            .await
            .with_context(|| format!("Failed to prepare target table '{}'", table))?;

        let status = self.states.get_state(station_id, table).await?;
        if status.need_full {
            return self.full_sync(station_id, &schema, status.resume_key).await;
        }

        if !self.target_has_rows(station_id, table).await? {
            tracing::info!(
                station = %station_id,
                table = %table,
                "Target has no rows for this station, running full sync"
            );
            return self.full_sync(station_id, &schema, 0).await;
        }

        self.incremental_sync(station_id, &schema).await
    }

    async fn target_has_rows(&self, station_id: &str, table: &str) -> Result<bool> {
        Ok(self.target.table_exists(table).await?
            && self.target.has_station_rows(table, station_id).await?)
    }

    async fn current_version(&self, station_id: &str) -> Result<i64> {
        self.source
            .current_version()
            .await
            .with_context(|| format!("Failed to read change version on {}", station_id))
    }

    /// Version the full copy is consistent from.
    ///
    /// A fresh copy stores the current version before the first page. A resumed
    /// copy keeps that stored value, so changes to rows copied before the
    /// interruption are replayed by the next incremental cycle.
    async fn baseline_version(
        &self,
        station_id: &str,
        table: &str,
        resume_key: i64,
    ) -> Result<i64> {
        let current = self.current_version(station_id).await?;
        if resume_key == 0 {
            self.versions.save_cursor(station_id, table, current).await?;
            return Ok(current);
        }

        match self.versions.get_cursor(station_id, table).await? {
            Some(stored) => Ok(stored.min(current)),
            None => {
                tracing::warn!(
                    station = %station_id,
                    table = %table,
                    resume_key,
                    version = current,
                    "No baseline recorded for resumed full sync, using current version"
                );
                Ok(current)
            }
        }
    }

    async fn full_sync(
        &self,
        station_id: &str,
        schema: &TableSchema,
        resume_key: i64,
    ) -> Result<SyncOutcome> {
        let version = self
            .baseline_version(station_id, &schema.table, resume_key)
            .await?;

        let pager = FullSyncPager::new(
            self.source,
            self.target,
            self.states,
            self.settings.page_size,
            self.settings.page_delay,
        );
        let outcome = pager.run(station_id, &schema.table, resume_key).await?;

        self.versions
            .save_cursor(station_id, &schema.table, version)
            .await?;

        let consistency = ConsistencyChecker::new(self.source, self.target)
            .check(station_id, schema)
            .await;

        Ok(SyncOutcome {
            mode: SyncMode::Full,
            cursor: version,
            applied: outcome.stats.applied(),
            deleted: outcome.stats.deleted,
            failed: outcome.stats.failed,
            consistency: Some(consistency),
        })
    }

    async fn incremental_sync(&self, station_id: &str, schema: &TableSchema) -> Result<SyncOutcome> {
        let cursor = self.versions.get_cursor(station_id, &schema.table).await?;
        let version = self.current_version(station_id).await?;

        let operations = match ChangeFetcher::new(self.source)
            .fetch(station_id, schema, cursor, version)
            .await
        {
            ChangeSet::FullCopyRequired => {
                tracing::info!(
                    station = %station_id,
                    table = %schema.table,
                    "No change baseline, running full sync"
                );
                return self.full_sync(station_id, schema, 0).await;
            }
            ChangeSet::Changes(operations) => operations,
        };
        let cursor = cursor.unwrap_or_default();

        let batch = ChangeBatch::partition(operations);
        if batch.is_empty() {
            return Ok(SyncOutcome {
                mode: SyncMode::Incremental,
                cursor,
                applied: 0,
                deleted: 0,
                failed: 0,
                consistency: None,
            });
        }

        let applier = RowApplier::new(self.target);
        let mut stats = ApplyStats::default();
        stats.merge(applier.delete(station_id, schema, &batch.deletes).await?);
        stats.merge(applier.apply(station_id, schema, &batch.upserts).await?);

        self.versions
            .save_cursor(station_id, &schema.table, version)
            .await?;

        tracing::info!(
            station = %station_id,
            table = %schema.table,
            cursor = version,
            applied = stats.applied(),
            deleted = stats.deleted,
            failed = stats.failed,
            "Applied incremental changes"
        );

        let consistency = ConsistencyChecker::new(self.source, self.target)
            .check(station_id, schema)
            .await;

        Ok(SyncOutcome {
            mode: SyncMode::Incremental,
            cursor: version,
            applied: stats.applied(),
            deleted: stats.deleted,
            failed: stats.failed,
            consistency: Some(consistency),
        })
    }
}
