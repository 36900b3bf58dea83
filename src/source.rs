// ABOUTME: Read side of a station database: catalog, keyset pages and tracked changes
// ABOUTME: PgSource implements it over any Database; tests swap in an in-memory fake

use anyhow::{bail, Context, Result};
use async_trait::async_trait;

use crate::postgres::{i64_column, text_column, Database};
use crate::schema::{ColumnDef, TableSchema};
use crate::sql;
use crate::sync::change::ChangeKind;
use crate::value::{Row, SqlValue};

/// One net change read from a station's change log.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRecord {
    pub kind: ChangeKind,
    pub key: i64,
    /// Current source values, absent when the row no longer exists.
    pub row: Option<Row>,
}

#[async_trait]
pub trait SourceDatabase: Send + Sync {
    /// Describe a table: ordered columns and its single integer primary key.
    async fn table_schema(&self, table: &str) -> Result<TableSchema>;

    /// Up to `limit` rows with key greater than `after_key`, ascending by key.
    async fn fetch_page(&self, schema: &TableSchema, after_key: i64, limit: usize)
        -> Result<Vec<Row>>;

    /// Current change-tracking version of the station database.
    async fn current_version(&self) -> Result<i64>;

    /// Net changes for a table with version in `(since, upto]`, one per key.
    async fn changes_since(
        &self,
        schema: &TableSchema,
        since: i64,
        upto: i64,
    ) -> Result<Vec<ChangeRecord>>;

    /// Highest `limit` primary keys, descending.
    async fn latest_keys(&self, schema: &TableSchema, limit: usize) -> Result<Vec<i64>>;

    /// Install change tracking for a table. Safe to repeat.
    async fn enable_tracking(&self, schema: &TableSchema) -> Result<()>;
}

/// [`SourceDatabase`] over a PostgreSQL station database with trigger-based tracking.
pub struct PgSource<D> {
    db: D,
}

impl<D: Database> PgSource<D> {
    pub fn new(db: D) -> Self {
        Self { db }
    }
}

#[async_trait]
impl<D: Database> SourceDatabase for PgSource<D> {
    async fn table_schema(&self, table: &str) -> Result<TableSchema> {
        crate::utils::validate_identifier(table)
            .with_context(|| format!("Invalid table name '{}'", table))?;

        let rows = self
            .db
            .query(sql::SOURCE_COLUMNS, &[table.into()])
            .await
            .with_context(|| format!("Failed to read columns of '{}'", table))?;
        if rows.is_empty() {
            bail!("Table '{}' does not exist on the source", table);
        }
        let columns = rows
            .iter()
            .map(|r| {
                Ok(ColumnDef::new(
                    text_column(r, "column_name")?,
                    text_column(r, "data_type")?,
                ))
            })
            .collect::<Result<Vec<_>>>()?;

        let key_rows = self
            .db
            .query(sql::SOURCE_PRIMARY_KEY, &[table.into()])
            .await
            .with_context(|| format!("Failed to read primary key of '{}'", table))?;
        let primary_key = match key_rows.as_slice() {
            [] => bail!("Table '{}' has no primary key", table),
            [single] => text_column(single, "column_name")?,
            _ => bail!(
                "Table '{}' has a composite primary key; only single-column keys are supported",
                table
            ),
        };

        TableSchema::new(table, primary_key, columns)
    }

    async fn fetch_page(
        &self,
        schema: &TableSchema,
        after_key: i64,
        limit: usize,
    ) -> Result<Vec<Row>> {
        self.db
            .query(
                &sql::select_page(schema),
                &[SqlValue::Integer(after_key), SqlValue::Integer(limit as i64)],
            )
            .await
            .with_context(|| {
                format!(
                    "Failed to read page of '{}' after key {}",
                    schema.table, after_key
                )
            })
    }

    async fn current_version(&self) -> Result<i64> {
        let present = self.db.query(sql::CHANGE_LOG_EXISTS, &[]).await?;
        let enabled = present
            .first()
            .and_then(|r| r.get("present"))
            .map(|v| matches!(v, SqlValue::Boolean(true)))
            .unwrap_or(false);
        if !enabled {
            bail!(
                "Change tracking is not enabled on this station (no {} table); run `enable-tracking` first",
                sql::CHANGE_LOG_TABLE
            );
        }

        let rows = self.db.query(sql::CURRENT_VERSION, &[]).await?;
        match rows.first() {
            Some(row) => i64_column(row, "version"),
            None => Ok(0),
        }
    }

    async fn changes_since(
        &self,
        schema: &TableSchema,
        since: i64,
        upto: i64,
    ) -> Result<Vec<ChangeRecord>> {
        let rows = self
            .db
            .query(
                &sql::select_changes(schema),
                &[
                    schema.table.as_str().into(),
                    SqlValue::Integer(since),
                    SqlValue::Integer(upto),
                ],
            )
            .await
            .with_context(|| format!("Failed to read changes of '{}'", schema.table))?;

        rows.into_iter()
            .map(|mut row| {
                let op = text_column(&row, "_change_op")?;
                let kind = ChangeKind::from_code(&op)?;
                let key = i64_column(&row, "_change_key")?;
                row.remove("_change_op");
                row.remove("_change_key");
                let present = row
                    .get(&schema.primary_key)
                    .map(|v| !v.is_null())
                    .unwrap_or(false);
                Ok(ChangeRecord {
                    kind,
                    key,
                    row: present.then_some(row),
                })
            })
            .collect()
    }

    async fn latest_keys(&self, schema: &TableSchema, limit: usize) -> Result<Vec<i64>> {
        let rows = self
            .db
            .query(
                &sql::select_latest_source_keys(schema),
                &[SqlValue::Integer(limit as i64)],
            )
            .await?;
        rows.iter()
            .map(|r| i64_column(r, &schema.primary_key))
            .collect()
    }

    async fn enable_tracking(&self, schema: &TableSchema) -> Result<()> {
        self.db
            .batch_execute(&sql::enable_tracking(schema))
            .await
            .with_context(|| format!("Failed to enable change tracking on '{}'", schema.table))?;
        tracing::info!(table = %schema.table, "Change tracking enabled");
        Ok(())
    }
}
