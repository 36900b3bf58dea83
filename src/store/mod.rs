// ABOUTME: Persistent replication progress: change-tracking cursors and full-sync state
// ABOUTME: Traits with PostgreSQL (target database) and in-memory implementations

pub mod memory;
pub mod postgres;

pub use memory::{MemoryFullSyncStateStore, MemoryVersionStore};
pub use postgres::{PgFullSyncStateStore, PgVersionStore};

use anyhow::Result;
use async_trait::async_trait;

/// Default number of days version records are kept.
pub const DEFAULT_VERSION_RETENTION_DAYS: u32 = 3;

/// Last applied change-tracking version per (station, table).
#[async_trait]
pub trait VersionStore: Send + Sync {
    /// Latest saved version, or `None` when no baseline was ever recorded.
    ///
    /// `Some(0)` is a real baseline: the change log was empty when it was taken.
    async fn get_cursor(&self, station_id: &str, table: &str) -> Result<Option<i64>>;

    /// Purge records past retention for this key, then append `version`.
    ///
    /// Monotonicity is not enforced; callers only save versions read from the
    /// source after the previous one.
    async fn save_cursor(&self, station_id: &str, table: &str, version: i64) -> Result<()>;
}

/// Where a table stands with its full copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FullSyncStatus {
    pub need_full: bool,
    pub resume_key: i64,
}

impl FullSyncStatus {
    /// No record yet: copy everything from the start.
    pub fn never_started() -> Self {
        Self {
            need_full: true,
            resume_key: 0,
        }
    }

    pub(crate) fn from_record(last_sync_key: i64, is_completed: bool) -> Self {
        Self {
            need_full: !is_completed,
            resume_key: last_sync_key,
        }
    }
}

/// Resumable full-copy progress per (station, table).
#[async_trait]
pub trait FullSyncStateStore: Send + Sync {
    async fn get_state(&self, station_id: &str, table: &str) -> Result<FullSyncStatus>;

    /// Upsert the progress row for (station, table).
    async fn save_state(
        &self,
        station_id: &str,
        table: &str,
        last_sync_key: i64,
        completed: bool,
    ) -> Result<()>;

    /// Force every table back to a full re-scan from key 0. Returns rows reset.
    async fn reset_all(&self) -> Result<u64>;
}
