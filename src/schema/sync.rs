// ABOUTME: Makes a target table match a station's source schema before rows are written
// ABOUTME: Creates missing tables and adds missing columns; never drops or retypes

use anyhow::Result;
use std::collections::HashSet;

use super::{TableSchema, STATION_TAG_COLUMN};
use crate::target::TargetDatabase;

/// What [`SchemaSynchronizer::ensure_target`] had to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaSyncOutcome {
    Created,
    ColumnsAdded {
        added: Vec<String>,
        failed: Vec<String>,
    },
    UpToDate,
}

pub struct SchemaSynchronizer<'a> {
    target: &'a dyn TargetDatabase,
}

impl<'a> SchemaSynchronizer<'a> {
    pub fn new(target: &'a dyn TargetDatabase) -> Self {
        Self { target }
    }

    /// Create the target table or add the columns it is missing.
    ///
    /// Column names are compared case-insensitively. A column that cannot be
    /// added is logged and reported in `failed`; the rest are still attempted.
    pub async fn ensure_target(
        &self,
        station_id: &str,
        schema: &TableSchema,
    ) -> Result<SchemaSyncOutcome> {
        if !self.target.table_exists(&schema.table).await? {
            self.target.create_table(schema).await?;
            tracing::info!(
                station = %station_id,
                table = %schema.table,
                columns = schema.columns.len(),
                "Created target table"
            );
            return Ok(SchemaSyncOutcome::Created);
        }

        let existing: HashSet<String> = self
            .target
            .column_names(&schema.table)
            .await?
            .into_iter()
            .map(|c| c.to_ascii_lowercase())
            .collect();

        let mut added = Vec::new();
        let mut failed = Vec::new();

        if !existing.contains(STATION_TAG_COLUMN) {
            match self.target.add_station_tag(schema).await {
                Ok(()) => added.push(STATION_TAG_COLUMN.to_string()),
                Err(e) => {
                    tracing::warn!(
                        station = %station_id,
                        table = %schema.table,
                        "Failed to add station tag column: {:#}",
                        e
                    );
                    failed.push(STATION_TAG_COLUMN.to_string());
                }
            }
        }

        for column in &schema.columns {
            if existing.contains(&column.name.to_ascii_lowercase()) {
                continue;
            }
            match self.target.add_column(&schema.table, column).await {
                Ok(()) => {
                    tracing::info!(
                        station = %station_id,
                        table = %schema.table,
                        column = %column.name,
                        target_type = %column.target_type,
                        "Added target column"
                    );
                    added.push(column.name.clone());
                }
                Err(e) => {
                    tracing::warn!(
                        station = %station_id,
                        table = %schema.table,
                        column = %column.name,
                        "Failed to add target column: {:#}",
                        e
                    );
                    failed.push(column.name.clone());
                }
            }
        }

        if added.is_empty() && failed.is_empty() {
            Ok(SchemaSyncOutcome::UpToDate)
        } else {
            Ok(SchemaSyncOutcome::ColumnsAdded { added, failed })
        }
    }
}
