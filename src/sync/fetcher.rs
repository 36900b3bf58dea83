// ABOUTME: Reads the net change set for a table since its stored cursor
// ABOUTME: A missing cursor means no baseline exists and a full copy is required

use crate::schema::TableSchema;
use crate::source::SourceDatabase;

use super::change::{ChangeKind, ChangeOperation};

/// Result of a change fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeSet {
    /// No baseline to diff against; copy the whole table instead.
    FullCopyRequired,
    Changes(Vec<ChangeOperation>),
}

pub struct ChangeFetcher<'a> {
    source: &'a dyn SourceDatabase,
}

impl<'a> ChangeFetcher<'a> {
    pub fn new(source: &'a dyn SourceDatabase) -> Self {
        Self { source }
    }

    /// Changes with version in `(cursor, upto]`, one operation per key.
    ///
    /// `None` means no baseline was ever recorded. `Some(0)` is a baseline taken
    /// while the change log was empty, so every logged change is newer.
    ///
    /// Insert/update entries whose row is gone are skipped; the matching
    /// delete arrives in a later entry. A failed query is logged and yields
    /// an empty set so the caller makes no progress this cycle.
    pub async fn fetch(
        &self,
        station_id: &str,
        schema: &TableSchema,
        cursor: Option<i64>,
        upto: i64,
    ) -> ChangeSet {
        let Some(cursor) = cursor else {
            return ChangeSet::FullCopyRequired;
        };

        let records = match self.source.changes_since(schema, cursor, upto).await {
            Ok(records) => records,
            Err(e) => {
                tracing::error!(
                    station = %station_id,
                    table = %schema.table,
                    cursor,
                    "Failed to fetch changes: {:#}",
                    e
                );
                return ChangeSet::Changes(Vec::new());
            }
        };

        let mut operations = Vec::with_capacity(records.len());
        for record in records {
            let op = match (record.kind, record.row) {
                (ChangeKind::Delete, _) => ChangeOperation::Delete { key: record.key },
                (ChangeKind::Insert, Some(row)) => ChangeOperation::Insert {
                    key: record.key,
                    row,
                },
                (ChangeKind::Update, Some(row)) => ChangeOperation::Update {
                    key: record.key,
                    row,
                },
                (kind, None) => {
                    tracing::debug!(
                        station = %station_id,
                        table = %schema.table,
                        key = record.key,
                        "Skipping {:?} for a row that no longer exists",
                        kind
                    );
                    continue;
                }
            };
            operations.push(op);
        }

        ChangeSet::Changes(operations)
    }
}
