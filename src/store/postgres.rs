// ABOUTME: Version log and full-sync state tables kept on the shared target database
// ABOUTME: Tables are created with IF NOT EXISTS on startup and upserted per page

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::{FullSyncStateStore, FullSyncStatus, VersionStore};
use crate::postgres::{i64_column, Database};
use crate::value::SqlValue;

const CREATE_VERSION_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS sync_versions (
    id BIGSERIAL PRIMARY KEY,
    station_id VARCHAR(50) NOT NULL,
    table_name VARCHAR(100) NOT NULL,
    version BIGINT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE INDEX IF NOT EXISTS sync_versions_station_table
    ON sync_versions (station_id, table_name, created_at);
"#;

const CREATE_STATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS full_sync_state (
    station_id VARCHAR(50) NOT NULL,
    table_name VARCHAR(100) NOT NULL,
    last_sync_key BIGINT NOT NULL DEFAULT 0,
    is_completed BOOLEAN NOT NULL DEFAULT FALSE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    PRIMARY KEY (station_id, table_name)
);
"#;

/// [`VersionStore`] backed by the `sync_versions` table.
pub struct PgVersionStore<D> {
    db: D,
    retention_days: u32,
}

impl<D: Database> PgVersionStore<D> {
    pub fn new(db: D, retention_days: u32) -> Self {
        Self { db, retention_days }
    }

    pub async fn ensure_table(&self) -> Result<()> {
        self.db
            .batch_execute(CREATE_VERSION_TABLE)
            .await
            .context("Failed to create sync_versions table")
    }
}

#[async_trait]
impl<D: Database> VersionStore for PgVersionStore<D> {
    async fn get_cursor(&self, station_id: &str, table: &str) -> Result<Option<i64>> {
        let rows = self
            .db
            .query(
                "SELECT version FROM sync_versions \
                 WHERE station_id = $1 AND table_name = $2 \
                 ORDER BY created_at DESC, id DESC LIMIT 1",
                &[station_id.into(), table.into()],
            )
            .await
            .with_context(|| format!("Failed to read cursor for {}/{}", station_id, table))?;
        rows.first()
            .map(|row| i64_column(row, "version"))
            .transpose()
    }

    async fn save_cursor(&self, station_id: &str, table: &str, version: i64) -> Result<()> {
        let purged = self
            .db
            .execute(
                "DELETE FROM sync_versions \
                 WHERE station_id = $1 AND table_name = $2 \
                 AND created_at < NOW() - make_interval(days => $3)",
                &[
                    station_id.into(),
                    table.into(),
                    SqlValue::Integer(self.retention_days.into()),
                ],
            )
            .await
            .with_context(|| format!("Failed to purge cursors for {}/{}", station_id, table))?;
        if purged > 0 {
            tracing::debug!(
                station = %station_id,
                table = %table,
                purged,
                "Purged expired version records"
            );
        }

        self.db
            .execute(
                "INSERT INTO sync_versions (station_id, table_name, version) VALUES ($1, $2, $3)",
                &[station_id.into(), table.into(), SqlValue::Integer(version)],
            )
            .await
            .with_context(|| format!("Failed to save cursor for {}/{}", station_id, table))?;
        Ok(())
    }
}

/// [`FullSyncStateStore`] backed by the `full_sync_state` table.
pub struct PgFullSyncStateStore<D> {
    db: D,
}

impl<D: Database> PgFullSyncStateStore<D> {
    pub fn new(db: D) -> Self {
        Self { db }
    }

    pub async fn ensure_table(&self) -> Result<()> {
        self.db
            .batch_execute(CREATE_STATE_TABLE)
            .await
            .context("Failed to create full_sync_state table")
    }
}

#[async_trait]
impl<D: Database> FullSyncStateStore for PgFullSyncStateStore<D> {
    async fn get_state(&self, station_id: &str, table: &str) -> Result<FullSyncStatus> {
        let rows = self
            .db
            .query(
                "SELECT last_sync_key, is_completed FROM full_sync_state \
                 WHERE station_id = $1 AND table_name = $2",
                &[station_id.into(), table.into()],
            )
            .await
            .with_context(|| {
                format!("Failed to read full-sync state for {}/{}", station_id, table)
            })?;

        let Some(row) = rows.first() else {
            return Ok(FullSyncStatus::never_started());
        };
        let completed = matches!(row.get("is_completed"), Some(SqlValue::Boolean(true)));
        Ok(FullSyncStatus::from_record(
            i64_column(row, "last_sync_key")?,
            completed,
        ))
    }

    async fn save_state(
        &self,
        station_id: &str,
        table: &str,
        last_sync_key: i64,
        completed: bool,
    ) -> Result<()> {
        self.db
            .execute(
                "INSERT INTO full_sync_state (station_id, table_name, last_sync_key, is_completed) \
                 VALUES ($1, $2, $3, $4) \
                 ON CONFLICT (station_id, table_name) DO UPDATE SET \
                     last_sync_key = EXCLUDED.last_sync_key, \
                     is_completed = EXCLUDED.is_completed, \
                     updated_at = NOW()",
                &[
                    station_id.into(),
                    table.into(),
                    SqlValue::Integer(last_sync_key),
                    SqlValue::Boolean(completed),
                ],
            )
            .await
            .with_context(|| {
                format!("Failed to save full-sync state for {}/{}", station_id, table)
            })?;
        Ok(())
    }

    async fn reset_all(&self) -> Result<u64> {
        self.db
            .execute(
                "UPDATE full_sync_state SET is_completed = FALSE, last_sync_key = 0, updated_at = NOW()",
                &[],
            )
            .await
            .context("Failed to reset full-sync state")
    }
}
