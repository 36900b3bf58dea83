// ABOUTME: Writes source rows into the shared target, scoped by station tag
// ABOUTME: Update-or-insert per row; one failing row never aborts the batch

use anyhow::{anyhow, Result};

use crate::schema::{SchemaSynchronizer, TableSchema};
use crate::target::TargetDatabase;
use crate::value::{Row, SqlValue};

/// Per-batch counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyStats {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    pub failed: usize,
}

impl ApplyStats {
    /// Rows inserted or updated.
    pub fn applied(&self) -> usize {
        self.inserted + self.updated
    }

    pub fn merge(&mut self, other: ApplyStats) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.deleted += other.deleted;
        self.failed += other.failed;
    }
}

enum Written {
    Inserted,
    Updated,
}

pub struct RowApplier<'a> {
    target: &'a dyn TargetDatabase,
}

impl<'a> RowApplier<'a> {
    pub fn new(target: &'a dyn TargetDatabase) -> Self {
        Self { target }
    }

    /// Upsert rows for one station, bringing the target schema up to date first.
    pub async fn apply(
        &self,
        station_id: &str,
        schema: &TableSchema,
        rows: &[Row],
    ) -> Result<ApplyStats> {
        let mut stats = ApplyStats::default();
        if rows.is_empty() {
            return Ok(stats);
        }

        SchemaSynchronizer::new(self.target)
            .ensure_target(station_id, schema)
            .await?;

        for row in rows {
            match self.apply_row(station_id, schema, row).await {
                Ok(Written::Inserted) => stats.inserted += 1,
                Ok(Written::Updated) => stats.updated += 1,
                Err(e) => {
                    stats.failed += 1;
                    tracing::warn!(
                        station = %station_id,
                        table = %schema.table,
                        key = %row.get(&schema.primary_key).cloned().unwrap_or_default(),
                        "Failed to apply row: {:#}",
                        e
                    );
                }
            }
        }

        tracing::debug!(
            station = %station_id,
            table = %schema.table,
            inserted = stats.inserted,
            updated = stats.updated,
            failed = stats.failed,
            "Applied rows"
        );
        Ok(stats)
    }

    /// Delete rows for one station by primary key.
    pub async fn delete(
        &self,
        station_id: &str,
        schema: &TableSchema,
        keys: &[i64],
    ) -> Result<ApplyStats> {
        let mut stats = ApplyStats::default();
        for &key in keys {
            match self.target.delete_row(schema, station_id, key).await {
                Ok(affected) => stats.deleted += affected as usize,
                Err(e) => {
                    stats.failed += 1;
                    tracing::warn!(
                        station = %station_id,
                        table = %schema.table,
                        key,
                        "Failed to delete row: {:#}",
                        e
                    );
                }
            }
        }
        Ok(stats)
    }

    async fn apply_row(&self, station_id: &str, schema: &TableSchema, row: &Row) -> Result<Written> {
        let key = row
            .get_i64(&schema.primary_key)
            .ok_or_else(|| anyhow!("row has no usable primary key '{}'", schema.primary_key))?;
        let key = SqlValue::Integer(key);
        let values = normalize_row(schema, row);

        if self.target.row_exists(schema, station_id, &key).await? {
            self.target
                .update_row(schema, station_id, &key, &values)
                .await?;
            Ok(Written::Updated)
        } else {
            self.target.insert_row(schema, station_id, &values).await?;
            Ok(Written::Inserted)
        }
    }
}

/// Keep only schema columns, with blank text stored as NULL.
fn normalize_row(schema: &TableSchema, row: &Row) -> Row {
    row.iter()
        .filter_map(|(name, value)| {
            schema
                .column(name)
                .map(|c| (c.name.clone(), value.normalized()))
        })
        .collect()
}
