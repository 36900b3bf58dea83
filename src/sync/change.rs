// ABOUTME: Change operations read from a station's change log
// ABOUTME: Partitions a batch into delete and upsert sets, one operation per key

use anyhow::{bail, Result};
use std::collections::{BTreeMap, BTreeSet};

use crate::value::Row;

/// Operation recorded by the source's change tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    /// Parse the one-letter code stored in the change log (`I`, `U`, `D`).
    pub fn from_code(code: &str) -> Result<Self> {
        match code.trim() {
            "I" | "i" => Ok(ChangeKind::Insert),
            "U" | "u" => Ok(ChangeKind::Update),
            "D" | "d" => Ok(ChangeKind::Delete),
            other => bail!("Unknown change operation code '{}'", other),
        }
    }
}

/// One replicated change, keyed by primary key.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeOperation {
    Insert { key: i64, row: Row },
    Update { key: i64, row: Row },
    Delete { key: i64 },
}

impl ChangeOperation {
    pub fn key(&self) -> i64 {
        match self {
            ChangeOperation::Insert { key, .. }
            | ChangeOperation::Update { key, .. }
            | ChangeOperation::Delete { key } => *key,
        }
    }

    pub fn kind(&self) -> ChangeKind {
        match self {
            ChangeOperation::Insert { .. } => ChangeKind::Insert,
            ChangeOperation::Update { .. } => ChangeKind::Update,
            ChangeOperation::Delete { .. } => ChangeKind::Delete,
        }
    }
}

/// A change batch split the way it is applied: deletes first, then upserts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeBatch {
    pub deletes: Vec<i64>,
    pub upserts: Vec<Row>,
}

impl ChangeBatch {
    /// Split operations by kind, keeping one operation per key.
    ///
    /// A key with both a delete and an insert/update is only deleted. Among
    /// several upserts for one key the last one wins. Output is ordered by key.
    pub fn partition(operations: Vec<ChangeOperation>) -> Self {
        let mut deletes = BTreeSet::new();
        let mut upserts = BTreeMap::new();

        for op in operations {
            match op {
                ChangeOperation::Delete { key } => {
                    deletes.insert(key);
                }
                ChangeOperation::Insert { key, row } | ChangeOperation::Update { key, row } => {
                    upserts.insert(key, row);
                }
            }
        }
        upserts.retain(|key, _| !deletes.contains(key));

        Self {
            deletes: deletes.into_iter().collect(),
            upserts: upserts.into_values().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.deletes.is_empty() && self.upserts.is_empty()
    }
}
