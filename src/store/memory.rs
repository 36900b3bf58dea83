// ABOUTME: In-process stores for tests and dry runs
// ABOUTME: Same semantics as the PostgreSQL stores, including version retention

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

use super::{FullSyncStateStore, FullSyncStatus, VersionStore, DEFAULT_VERSION_RETENTION_DAYS};

type Key = (String, String);

fn key(station_id: &str, table: &str) -> Key {
    (station_id.to_string(), table.to_string())
}

pub struct MemoryVersionStore {
    retention: Duration,
    records: Mutex<HashMap<Key, Vec<(i64, DateTime<Utc>)>>>,
}

impl Default for MemoryVersionStore {
    fn default() -> Self {
        Self::new(DEFAULT_VERSION_RETENTION_DAYS)
    }
}

impl MemoryVersionStore {
    pub fn new(retention_days: u32) -> Self {
        Self {
            retention: Duration::days(retention_days.into()),
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Number of version records held for (station, table).
    pub fn record_count(&self, station_id: &str, table: &str) -> usize {
        self.records
            .lock()
            .map(|r| r.get(&key(station_id, table)).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    /// Append a record with an explicit timestamp.
    pub fn insert_at(&self, station_id: &str, table: &str, version: i64, at: DateTime<Utc>) {
        if let Ok(mut records) = self.records.lock() {
            records
                .entry(key(station_id, table))
                .or_default()
                .push((version, at));
        }
    }
}

#[async_trait]
impl VersionStore for MemoryVersionStore {
    async fn get_cursor(&self, station_id: &str, table: &str) -> Result<Option<i64>> {
        let records = self
            .records
            .lock()
            .map_err(|_| anyhow::anyhow!("version store lock poisoned"))?;
        Ok(records
            .get(&key(station_id, table))
            .and_then(|r| r.iter().max_by_key(|(_, at)| *at))
            .map(|(version, _)| *version))
    }

    async fn save_cursor(&self, station_id: &str, table: &str, version: i64) -> Result<()> {
        let now = Utc::now();
        let cutoff = now - self.retention;
        let mut records = self
            .records
            .lock()
            .map_err(|_| anyhow::anyhow!("version store lock poisoned"))?;
        let entry = records.entry(key(station_id, table)).or_default();
        entry.retain(|(_, at)| *at >= cutoff);
        entry.push((version, now));
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryFullSyncStateStore {
    states: Mutex<HashMap<Key, (i64, bool)>>,
}

impl MemoryFullSyncStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FullSyncStateStore for MemoryFullSyncStateStore {
    async fn get_state(&self, station_id: &str, table: &str) -> Result<FullSyncStatus> {
        let states = self
            .states
            .lock()
            .map_err(|_| anyhow::anyhow!("state store lock poisoned"))?;
        Ok(states
            .get(&key(station_id, table))
            .map_or_else(FullSyncStatus::never_started, |(k, done)| {
                FullSyncStatus::from_record(*k, *done)
            }))
    }

    async fn save_state(
        &self,
        station_id: &str,
        table: &str,
        last_sync_key: i64,
        completed: bool,
    ) -> Result<()> {
        self.states
            .lock()
            .map_err(|_| anyhow::anyhow!("state store lock poisoned"))?
            .insert(key(station_id, table), (last_sync_key, completed));
        Ok(())
    }

    async fn reset_all(&self) -> Result<u64> {
        let mut states = self
            .states
            .lock()
            .map_err(|_| anyhow::anyhow!("state store lock poisoned"))?;
        for state in states.values_mut() {
            *state = (0, false);
        }
        Ok(states.len() as u64)
    }
}
