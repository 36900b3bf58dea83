// ABOUTME: Cheap drift check comparing the second-highest key on source and target
// ABOUTME: Observational only; results are logged and reported, never acted on

use std::fmt;

use crate::schema::TableSchema;
use crate::source::SourceDatabase;
use crate::target::TargetDatabase;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consistency {
    Consistent,
    /// One side has fewer than two rows.
    InsufficientData,
    Inconsistent {
        source_key: i64,
        target_key: i64,
    },
    /// The check itself could not run.
    Unavailable,
}

impl Consistency {
    /// Insufficient data counts as consistent; it is not a fault.
    pub fn is_consistent(&self) -> bool {
        matches!(self, Consistency::Consistent | Consistency::InsufficientData)
    }
}

impl fmt::Display for Consistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Consistency::Consistent => write!(f, "consistent"),
            Consistency::InsufficientData => write!(f, "consistent (insufficient data)"),
            Consistency::Inconsistent {
                source_key,
                target_key,
            } => write!(
                f,
                "inconsistent (source key {}, target key {})",
                source_key, target_key
            ),
            Consistency::Unavailable => write!(f, "unavailable"),
        }
    }
}

pub struct ConsistencyChecker<'a> {
    source: &'a dyn SourceDatabase,
    target: &'a dyn TargetDatabase,
}

impl<'a> ConsistencyChecker<'a> {
    pub fn new(source: &'a dyn SourceDatabase, target: &'a dyn TargetDatabase) -> Self {
        Self { source, target }
    }

    /// Compare the second-most-recent key on each side. The most recent row
    /// is skipped because it may still be in flight.
    pub async fn check(&self, station_id: &str, schema: &TableSchema) -> Consistency {
        let keys = tokio::try_join!(
            self.source.latest_keys(schema, 2),
            self.target.latest_keys(schema, station_id, 2)
        );
        let (source_keys, target_keys) = match keys {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!(
                    station = %station_id,
                    table = %schema.table,
                    "Consistency check failed: {:#}",
                    e
                );
                return Consistency::Unavailable;
            }
        };

        let result = compare_latest_keys(&source_keys, &target_keys);
        match result {
            Consistency::Inconsistent {
                source_key,
                target_key,
            } => tracing::warn!(
                station = %station_id,
                table = %schema.table,
                source_key,
                target_key,
                "Source and target disagree on second-latest key"
            ),
            _ => tracing::debug!(
                station = %station_id,
                table = %schema.table,
                "Consistency check: {}",
                result
            ),
        }
        result
    }
}

/// Both slices are descending by key.
pub fn compare_latest_keys(source_keys: &[i64], target_keys: &[i64]) -> Consistency {
    match (source_keys.get(1), target_keys.get(1)) {
        (Some(&source_key), Some(&target_key)) if source_key == target_key => {
            Consistency::Consistent
        }
        (Some(&source_key), Some(&target_key)) => Consistency::Inconsistent {
            source_key,
            target_key,
        },
        _ => Consistency::InsufficientData,
    }
}
