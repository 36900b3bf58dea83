// ABOUTME: In-memory station source, shared target and connector for integration tests
// ABOUTME: The source keeps a change log like the trigger-based one on real stations
#![allow(dead_code)]

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use station_replicator::connector::{Connector, TargetHandles};
use station_replicator::schema::{ColumnDef, TableSchema, STATION_TAG_COLUMN};
use station_replicator::source::{ChangeRecord, SourceDatabase};
use station_replicator::store::{MemoryFullSyncStateStore, MemoryVersionStore};
use station_replicator::sync::ChangeKind;
use station_replicator::target::TargetDatabase;
use station_replicator::{Row, SqlValue, StationConfig};

struct SourceTable {
    schema: TableSchema,
    rows: BTreeMap<i64, Row>,
}

#[derive(Default)]
struct SourceState {
    tables: HashMap<String, SourceTable>,
    version: i64,
    log: Vec<(i64, String, ChangeKind, i64)>,
    fail_changes: bool,
    fetch_budget: Option<usize>,
    fetches: usize,
}

/// A station database with change tracking.
#[derive(Default)]
pub struct MemorySource {
    state: Mutex<SourceState>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_table(&self, schema: TableSchema) {
        let mut state = self.state.lock().unwrap();
        state.tables.insert(
            schema.table.clone(),
            SourceTable {
                schema,
                rows: BTreeMap::new(),
            },
        );
    }

    fn log(state: &mut SourceState, table: &str, kind: ChangeKind, key: i64) {
        state.version += 1;
        let seq = state.version;
        state.log.push((seq, table.to_string(), kind, key));
    }

    pub fn insert(&self, table: &str, row: Row) {
        let mut state = self.state.lock().unwrap();
        let t = state.tables.get_mut(table).unwrap();
        let key = row.get_i64(&t.schema.primary_key).unwrap();
        t.rows.insert(key, row);
        Self::log(&mut state, table, ChangeKind::Insert, key);
    }

    /// Row that existed before tracking was installed; leaves no change log entry.
    pub fn preload(&self, table: &str, row: Row) {
        let mut state = self.state.lock().unwrap();
        let t = state.tables.get_mut(table).unwrap();
        let key = row.get_i64(&t.schema.primary_key).unwrap();
        t.rows.insert(key, row);
    }

    pub fn update(&self, table: &str, key: i64, column: &str, value: impl Into<SqlValue>) {
        let mut state = self.state.lock().unwrap();
        let t = state.tables.get_mut(table).unwrap();
        t.rows.get_mut(&key).unwrap().set(column, value.into());
        Self::log(&mut state, table, ChangeKind::Update, key);
    }

    pub fn delete(&self, table: &str, key: i64) {
        let mut state = self.state.lock().unwrap();
        state.tables.get_mut(table).unwrap().rows.remove(&key);
        Self::log(&mut state, table, ChangeKind::Delete, key);
    }

    /// Add a column to the source table, filling existing rows with `value`.
    pub fn add_column(&self, table: &str, column: ColumnDef, value: SqlValue) {
        let mut state = self.state.lock().unwrap();
        let t = state.tables.get_mut(table).unwrap();
        for row in t.rows.values_mut() {
            row.set(column.name.clone(), value.clone());
        }
        t.schema.columns.push(column);
    }

    pub fn version(&self) -> i64 {
        self.state.lock().unwrap().version
    }

    /// Make every change-log query fail.
    pub fn set_fail_changes(&self, fail: bool) {
        self.state.lock().unwrap().fail_changes = fail;
    }

    /// Allow only `n` more page fetches before failing.
    pub fn set_fetch_budget(&self, budget: Option<usize>) {
        let mut state = self.state.lock().unwrap();
        state.fetch_budget = budget;
        state.fetches = 0;
    }

    pub fn fetches(&self) -> usize {
        self.state.lock().unwrap().fetches
    }
}

#[async_trait]
impl SourceDatabase for MemorySource {
    async fn table_schema(&self, table: &str) -> Result<TableSchema> {
        let state = self.state.lock().unwrap();
        state
            .tables
            .get(table)
            .map(|t| t.schema.clone())
            .ok_or_else(|| anyhow!("Table '{}' does not exist on the source", table))
    }

    async fn fetch_page(
        &self,
        schema: &TableSchema,
        after_key: i64,
        limit: usize,
    ) -> Result<Vec<Row>> {
        let mut state = self.state.lock().unwrap();
        if let Some(budget) = state.fetch_budget {
            if state.fetches >= budget {
                bail!("connection reset by peer");
            }
        }
        state.fetches += 1;
        let t = state
            .tables
            .get(&schema.table)
            .ok_or_else(|| anyhow!("no table {}", schema.table))?;
        Ok(t.rows
            .range(after_key + 1..)
            .take(limit)
            .map(|(_, row)| row.clone())
            .collect())
    }

    async fn current_version(&self) -> Result<i64> {
        Ok(self.state.lock().unwrap().version)
    }

    async fn changes_since(
        &self,
        schema: &TableSchema,
        since: i64,
        upto: i64,
    ) -> Result<Vec<ChangeRecord>> {
        let state = self.state.lock().unwrap();
        if state.fail_changes {
            bail!("change query timed out");
        }
        let t = state
            .tables
            .get(&schema.table)
            .ok_or_else(|| anyhow!("no table {}", schema.table))?;

        let mut latest: BTreeMap<i64, ChangeKind> = BTreeMap::new();
        for (seq, table, kind, key) in &state.log {
            if table == &schema.table && *seq > since && *seq <= upto {
                latest.insert(*key, *kind);
            }
        }
        Ok(latest
            .into_iter()
            .map(|(key, kind)| ChangeRecord {
                kind,
                key,
                row: t.rows.get(&key).cloned(),
            })
            .collect())
    }

    async fn latest_keys(&self, schema: &TableSchema, limit: usize) -> Result<Vec<i64>> {
        let state = self.state.lock().unwrap();
        let t = state
            .tables
            .get(&schema.table)
            .ok_or_else(|| anyhow!("no table {}", schema.table))?;
        Ok(t.rows.keys().rev().take(limit).copied().collect())
    }

    async fn enable_tracking(&self, _schema: &TableSchema) -> Result<()> {
        Ok(())
    }
}

struct TargetTable {
    columns: Vec<String>,
    primary_key: String,
    rows: BTreeMap<(String, i64), Row>,
}

impl TargetTable {
    fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.eq_ignore_ascii_case(name))
    }

    fn check_columns(&self, row: &Row) -> Result<()> {
        for (name, _) in row.iter() {
            if !self.has_column(name) {
                bail!("column \"{}\" does not exist", name);
            }
        }
        Ok(())
    }
}

#[derive(Default)]
struct TargetState {
    tables: HashMap<String, TargetTable>,
    failing_keys: HashSet<i64>,
    failing_columns: HashSet<String>,
    writes: usize,
}

/// The shared target database.
#[derive(Default)]
pub struct MemoryTarget {
    state: Mutex<TargetState>,
}

impl MemoryTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self, table: &str, station_id: &str) -> Vec<Row> {
        let state = self.state.lock().unwrap();
        state
            .tables
            .get(&table.to_ascii_lowercase())
            .map(|t| {
                t.rows
                    .iter()
                    .filter(|((s, _), _)| s == station_id)
                    .map(|(_, r)| r.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn row(&self, table: &str, station_id: &str, key: i64) -> Option<Row> {
        let state = self.state.lock().unwrap();
        state
            .tables
            .get(&table.to_ascii_lowercase())
            .and_then(|t| t.rows.get(&(station_id.to_string(), key)).cloned())
    }

    pub fn count(&self, table: &str, station_id: &str) -> usize {
        self.rows(table, station_id).len()
    }

    pub fn columns(&self, table: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .tables
            .get(&table.to_ascii_lowercase())
            .map(|t| t.columns.clone())
            .unwrap_or_default()
    }

    /// Remove a row behind the replicator's back.
    pub fn remove_row(&self, table: &str, station_id: &str, key: i64) {
        let mut state = self.state.lock().unwrap();
        if let Some(t) = state.tables.get_mut(&table.to_ascii_lowercase()) {
            t.rows.remove(&(station_id.to_string(), key));
        }
    }

    pub fn drop_table(&self, table: &str) {
        self.state
            .lock()
            .unwrap()
            .tables
            .remove(&table.to_ascii_lowercase());
    }

    /// Make writes of this key fail.
    pub fn fail_key(&self, key: i64) {
        self.state.lock().unwrap().failing_keys.insert(key);
    }

    /// Make adding this column fail.
    pub fn fail_column(&self, column: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_columns
            .insert(column.to_ascii_lowercase());
    }

    pub fn writes(&self) -> usize {
        self.state.lock().unwrap().writes
    }
}

fn key_of(value: &SqlValue) -> Result<i64> {
    value
        .as_i64()
        .ok_or_else(|| anyhow!("invalid key {}", value))
}

#[async_trait]
impl TargetDatabase for MemoryTarget {
    async fn table_exists(&self, table: &str) -> Result<bool> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .tables
            .contains_key(&table.to_ascii_lowercase()))
    }

    async fn column_names(&self, table: &str) -> Result<Vec<String>> {
        Ok(self.columns(table))
    }

    async fn create_table(&self, schema: &TableSchema) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let name = schema.table.to_ascii_lowercase();
        if state.tables.contains_key(&name) {
            bail!("relation \"{}\" already exists", schema.table);
        }
        let mut columns: Vec<String> = schema.columns.iter().map(|c| c.name.clone()).collect();
        columns.push(STATION_TAG_COLUMN.to_string());
        state.tables.insert(
            name,
            TargetTable {
                columns,
                primary_key: schema.primary_key.clone(),
                rows: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn add_column(&self, table: &str, column: &ColumnDef) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state
            .failing_columns
            .contains(&column.name.to_ascii_lowercase())
        {
            bail!("cannot add column \"{}\"", column.name);
        }
        let t = state
            .tables
            .get_mut(&table.to_ascii_lowercase())
            .ok_or_else(|| anyhow!("relation \"{}\" does not exist", table))?;
        if t.has_column(&column.name) {
            bail!("column \"{}\" already exists", column.name);
        }
        t.columns.push(column.name.clone());
        Ok(())
    }

    async fn add_station_tag(&self, schema: &TableSchema) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let t = state
            .tables
            .get_mut(&schema.table.to_ascii_lowercase())
            .ok_or_else(|| anyhow!("relation \"{}\" does not exist", schema.table))?;
        t.columns.push(STATION_TAG_COLUMN.to_string());
        Ok(())
    }

    async fn row_exists(
        &self,
        schema: &TableSchema,
        station_id: &str,
        key: &SqlValue,
    ) -> Result<bool> {
        let state = self.state.lock().unwrap();
        let t = state
            .tables
            .get(&schema.table.to_ascii_lowercase())
            .ok_or_else(|| anyhow!("relation \"{}\" does not exist", schema.table))?;
        Ok(t.rows.contains_key(&(station_id.to_string(), key_of(key)?)))
    }

    async fn update_row(
        &self,
        schema: &TableSchema,
        station_id: &str,
        key: &SqlValue,
        row: &Row,
    ) -> Result<u64> {
        let key = key_of(key)?;
        let mut state = self.state.lock().unwrap();
        if state.failing_keys.contains(&key) {
            bail!("value too long for type");
        }
        state.writes += 1;
        let t = state
            .tables
            .get_mut(&schema.table.to_ascii_lowercase())
            .ok_or_else(|| anyhow!("relation \"{}\" does not exist", schema.table))?;
        t.check_columns(row)?;
        let pk = t.primary_key.clone();
        let Some(existing) = t.rows.get_mut(&(station_id.to_string(), key)) else {
            return Ok(0);
        };
        for (name, value) in row.iter() {
            if !name.eq_ignore_ascii_case(&pk) {
                existing.set(name, value.clone());
            }
        }
        Ok(1)
    }

    async fn insert_row(&self, schema: &TableSchema, station_id: &str, row: &Row) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        let t = state
            .tables
            .get(&schema.table.to_ascii_lowercase())
            .ok_or_else(|| anyhow!("relation \"{}\" does not exist", schema.table))?;
        let key = row
            .get_i64(&t.primary_key)
            .ok_or_else(|| anyhow!("null value in primary key"))?;
        if state.failing_keys.contains(&key) {
            bail!("value too long for type");
        }
        state.writes += 1;
        let t = state
            .tables
            .get_mut(&schema.table.to_ascii_lowercase())
            .ok_or_else(|| anyhow!("relation \"{}\" does not exist", schema.table))?;
        t.check_columns(row)?;
        let id = (station_id.to_string(), key);
        if t.rows.contains_key(&id) {
            bail!("duplicate key value violates unique constraint");
        }
        let mut stored = row.clone();
        stored.set(STATION_TAG_COLUMN, station_id.into());
        t.rows.insert(id, stored);
        Ok(1)
    }

    async fn delete_row(&self, schema: &TableSchema, station_id: &str, key: i64) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        state.writes += 1;
        let t = state
            .tables
            .get_mut(&schema.table.to_ascii_lowercase())
            .ok_or_else(|| anyhow!("relation \"{}\" does not exist", schema.table))?;
        Ok(t.rows
            .remove(&(station_id.to_string(), key))
            .map_or(0, |_| 1))
    }

    async fn has_station_rows(&self, table: &str, station_id: &str) -> Result<bool> {
        Ok(self.count(table, station_id) > 0)
    }

    async fn latest_keys(
        &self,
        schema: &TableSchema,
        station_id: &str,
        limit: usize,
    ) -> Result<Vec<i64>> {
        let state = self.state.lock().unwrap();
        let Some(t) = state.tables.get(&schema.table.to_ascii_lowercase()) else {
            return Ok(Vec::new());
        };
        Ok(t.rows
            .keys()
            .filter(|(s, _)| s == station_id)
            .map(|(_, k)| *k)
            .rev()
            .take(limit)
            .collect())
    }
}

/// Hands out in-memory sources and one shared in-memory target.
pub struct MemoryConnector {
    pub target: Arc<MemoryTarget>,
    pub versions: Arc<MemoryVersionStore>,
    pub states: Arc<MemoryFullSyncStateStore>,
    sources: Mutex<HashMap<String, Arc<MemorySource>>>,
    unreachable: Mutex<HashSet<String>>,
    source_connects: Mutex<usize>,
}

impl MemoryConnector {
    pub fn new(target: Arc<MemoryTarget>) -> Self {
        Self {
            target,
            versions: Arc::new(MemoryVersionStore::default()),
            states: Arc::new(MemoryFullSyncStateStore::new()),
            sources: Mutex::new(HashMap::new()),
            unreachable: Mutex::new(HashSet::new()),
            source_connects: Mutex::new(0),
        }
    }

    pub fn add_source(&self, station_id: &str, source: Arc<MemorySource>) {
        self.sources
            .lock()
            .unwrap()
            .insert(station_id.to_string(), source);
    }

    pub fn set_unreachable(&self, station_id: &str) {
        self.unreachable
            .lock()
            .unwrap()
            .insert(station_id.to_string());
    }

    pub fn source_connects(&self) -> usize {
        *self.source_connects.lock().unwrap()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect_target(&self) -> Result<TargetHandles> {
        Ok(TargetHandles {
            target: self.target.clone(),
            versions: self.versions.clone(),
            states: self.states.clone(),
        })
    }

    async fn connect_source(&self, station: &StationConfig) -> Result<Arc<dyn SourceDatabase>> {
        *self.source_connects.lock().unwrap() += 1;
        if self.unreachable.lock().unwrap().contains(&station.station_id) {
            bail!("could not connect to server: Connection refused");
        }
        let source: Arc<dyn SourceDatabase> = self
            .sources
            .lock()
            .unwrap()
            .get(&station.station_id)
            .cloned()
            .ok_or_else(|| anyhow!("no source for {}", station.station_id))?;
        Ok(source)
    }
}

/// `Readings(id int, val float, note nvarchar)`.
pub fn readings_schema() -> TableSchema {
    TableSchema::new(
        "Readings",
        "id",
        vec![
            ColumnDef::new("id", "int"),
            ColumnDef::new("val", "float"),
            ColumnDef::new("note", "nvarchar"),
        ],
    )
    .unwrap()
}

pub fn reading(id: i64, val: i64) -> Row {
    Row::new()
        .with("id", id)
        .with("val", val)
        .with("note", format!("reading {}", id))
}

/// A source with `Readings` holding keys `1..=n`.
pub fn source_with_readings(n: i64) -> Arc<MemorySource> {
    let source = Arc::new(MemorySource::new());
    source.create_table(readings_schema());
    for id in 1..=n {
        source.insert("Readings", reading(id, id * 10));
    }
    source
}

pub fn station(station_id: &str, tables: &[&str]) -> StationConfig {
    StationConfig {
        station_id: station_id.to_string(),
        name: format!("Station {}", station_id),
        source_url: format!("memory://{}", station_id),
        tables: tables.iter().map(|t| t.to_string()).collect(),
    }
}
