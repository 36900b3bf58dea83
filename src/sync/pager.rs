// ABOUTME: Resumable full copy of a source table in primary-key order
// ABOUTME: Persists progress after every page and throttles between pages

use anyhow::{bail, Context, Result};
use std::time::Duration;

use crate::source::SourceDatabase;
use crate::store::FullSyncStateStore;
use crate::target::TargetDatabase;

use super::applier::{ApplyStats, RowApplier};

/// Totals for one pager run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PagerOutcome {
    pub pages: usize,
    pub rows: usize,
    /// Highest key copied, persisted as the completed resume point.
    pub last_key: i64,
    pub stats: ApplyStats,
}

pub struct FullSyncPager<'a> {
    source: &'a dyn SourceDatabase,
    target: &'a dyn TargetDatabase,
    states: &'a dyn FullSyncStateStore,
    page_size: usize,
    page_delay: Duration,
}

impl<'a> FullSyncPager<'a> {
    pub fn new(
        source: &'a dyn SourceDatabase,
        target: &'a dyn TargetDatabase,
        states: &'a dyn FullSyncStateStore,
        page_size: usize,
        page_delay: Duration,
    ) -> Self {
        Self {
            source,
            target,
            states,
            page_size,
            page_delay,
        }
    }

    /// Copy every row with key greater than `resume_key`, then mark the table complete.
    ///
    /// The schema is re-read before each page so columns added mid-copy reach
    /// the target. An error leaves the last persisted page as the resume point.
    pub async fn run(&self, station_id: &str, table: &str, resume_key: i64) -> Result<PagerOutcome> {
        let applier = RowApplier::new(self.target);
        let mut outcome = PagerOutcome {
            last_key: resume_key,
            ..Default::default()
        };

        tracing::info!(
            station = %station_id,
            table = %table,
            resume_key,
            "Starting full sync"
        );

        loop {
            let schema = self.source.table_schema(table).await?;
            let rows = self
                .source
                .fetch_page(&schema, outcome.last_key, self.page_size)
                .await?;

            if rows.is_empty() {
                self.states
                    .save_state(station_id, table, outcome.last_key, true)
                    .await
                    .context("Failed to mark full sync complete")?;
                break;
            }

            let stats = applier.apply(station_id, &schema, &rows).await?;
            outcome.stats.merge(stats);

            let Some(max_key) = rows
                .iter()
                .filter_map(|r| r.get_i64(&schema.primary_key))
                .max()
            else {
                bail!(
                    "Page of '{}' after key {} has no readable primary keys",
                    table,
                    outcome.last_key
                );
            };
            if max_key <= outcome.last_key {
                bail!(
                    "Page of '{}' did not advance past key {}",
                    table,
                    outcome.last_key
                );
            }

            outcome.last_key = max_key;
            outcome.pages += 1;
            outcome.rows += rows.len();
            self.states
                .save_state(station_id, table, max_key, false)
                .await
                .context("Failed to save full sync progress")?;

            tracing::info!(
                station = %station_id,
                table = %table,
                page = outcome.pages,
                rows = rows.len(),
                last_key = max_key,
                failed = stats.failed,
                "Copied page"
            );

            if !self.page_delay.is_zero() {
                tokio::time::sleep(self.page_delay).await;
            }
        }

        tracing::info!(
            station = %station_id,
            table = %table,
            pages = outcome.pages,
            rows = outcome.rows,
            last_key = outcome.last_key,
            "Full sync complete"
        );
        Ok(outcome)
    }
}
