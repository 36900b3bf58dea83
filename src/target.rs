// ABOUTME: Write side of the shared target database, scoped by station tag
// ABOUTME: PgTarget implements it over any Database; tests swap in an in-memory fake

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::postgres::{i64_column, text_column, Database};
use crate::schema::{ColumnDef, TableSchema};
use crate::sql;
use crate::value::{Row, SqlValue};

#[async_trait]
pub trait TargetDatabase: Send + Sync {
    async fn table_exists(&self, table: &str) -> Result<bool>;

    /// Existing column names of a target table, in ordinal order.
    async fn column_names(&self, table: &str) -> Result<Vec<String>>;

    /// Create a table with every schema column, the station tag and the
    /// (key, station) unique index.
    async fn create_table(&self, schema: &TableSchema) -> Result<()>;

    async fn add_column(&self, table: &str, column: &ColumnDef) -> Result<()>;

    /// Add the station tag column and unique index to a table that lacks them.
    async fn add_station_tag(&self, schema: &TableSchema) -> Result<()>;

    async fn row_exists(&self, schema: &TableSchema, station_id: &str, key: &SqlValue)
        -> Result<bool>;

    /// Overwrite the non-key columns present in `row`. Returns rows affected.
    async fn update_row(
        &self,
        schema: &TableSchema,
        station_id: &str,
        key: &SqlValue,
        row: &Row,
    ) -> Result<u64>;

    /// Insert the columns present in `row` plus the station tag.
    async fn insert_row(&self, schema: &TableSchema, station_id: &str, row: &Row) -> Result<u64>;

    async fn delete_row(&self, schema: &TableSchema, station_id: &str, key: i64) -> Result<u64>;

    async fn has_station_rows(&self, table: &str, station_id: &str) -> Result<bool>;

    /// Highest `limit` keys stored for one station, descending.
    async fn latest_keys(
        &self,
        schema: &TableSchema,
        station_id: &str,
        limit: usize,
    ) -> Result<Vec<i64>>;
}

/// [`TargetDatabase`] over the shared PostgreSQL target.
pub struct PgTarget<D> {
    db: D,
}

impl<D: Database> PgTarget<D> {
    pub fn new(db: D) -> Self {
        Self { db }
    }
}

/// Schema columns present in `row`, using the schema's spelling of each name.
fn schema_columns<'a>(
    schema: &'a TableSchema,
    row: &'a Row,
    skip_key: bool,
) -> (Vec<&'a str>, Vec<SqlValue>) {
    let mut names = Vec::new();
    let mut values = Vec::new();
    for (name, value) in row.iter() {
        let Some(column) = schema.column(name) else {
            continue;
        };
        if skip_key && schema.is_primary_key(&column.name) {
            continue;
        }
        names.push(column.name.as_str());
        values.push(value.clone());
    }
    (names, values)
}

#[async_trait]
impl<D: Database> TargetDatabase for PgTarget<D> {
    async fn table_exists(&self, table: &str) -> Result<bool> {
        let rows = self.db.query(sql::TABLE_EXISTS, &[table.into()]).await?;
        Ok(rows
            .first()
            .and_then(|r| r.get("present"))
            .map(|v| matches!(v, SqlValue::Boolean(true)))
            .unwrap_or(false))
    }

    async fn column_names(&self, table: &str) -> Result<Vec<String>> {
        let rows = self.db.query(sql::TARGET_COLUMNS, &[table.into()]).await?;
        rows.iter().map(|r| text_column(r, "column_name")).collect()
    }

    async fn create_table(&self, schema: &TableSchema) -> Result<()> {
        self.db
            .execute(&sql::create_target_table(schema), &[])
            .await
            .with_context(|| format!("Failed to create target table '{}'", schema.table))?;
        self.db
            .execute(&sql::create_station_index(schema), &[])
            .await
            .with_context(|| format!("Failed to index target table '{}'", schema.table))?;
        Ok(())
    }

    async fn add_column(&self, table: &str, column: &ColumnDef) -> Result<()> {
        self.db
            .execute(&sql::add_column(table, column), &[])
            .await
            .with_context(|| format!("Failed to add column '{}' to '{}'", column.name, table))?;
        Ok(())
    }

    async fn add_station_tag(&self, schema: &TableSchema) -> Result<()> {
        self.db
            .execute(&sql::add_station_tag(&schema.table), &[])
            .await?;
        self.db
            .execute(&sql::create_station_index(schema), &[])
            .await?;
        Ok(())
    }

    async fn row_exists(
        &self,
        schema: &TableSchema,
        station_id: &str,
        key: &SqlValue,
    ) -> Result<bool> {
        let rows = self
            .db
            .query(&sql::row_exists(schema), &[key.clone(), station_id.into()])
            .await?;
        Ok(!rows.is_empty())
    }

    async fn update_row(
        &self,
        schema: &TableSchema,
        station_id: &str,
        key: &SqlValue,
        row: &Row,
    ) -> Result<u64> {
        let (names, mut values) = schema_columns(schema, row, true);
        if names.is_empty() {
            return Ok(0);
        }
        values.push(key.clone());
        values.push(station_id.into());
        self.db
            .execute(&sql::update_row(schema, &names), &values)
            .await
    }

    async fn insert_row(&self, schema: &TableSchema, station_id: &str, row: &Row) -> Result<u64> {
        let (names, mut values) = schema_columns(schema, row, false);
        values.push(station_id.into());
        self.db
            .execute(&sql::insert_row(schema, &names), &values)
            .await
    }

    async fn delete_row(&self, schema: &TableSchema, station_id: &str, key: i64) -> Result<u64> {
        self.db
            .execute(
                &sql::delete_row(schema),
                &[SqlValue::Integer(key), station_id.into()],
            )
            .await
    }

    async fn has_station_rows(&self, table: &str, station_id: &str) -> Result<bool> {
        let rows = self
            .db
            .query(&sql::has_station_rows(table), &[station_id.into()])
            .await?;
        Ok(!rows.is_empty())
    }

    async fn latest_keys(
        &self,
        schema: &TableSchema,
        station_id: &str,
        limit: usize,
    ) -> Result<Vec<i64>> {
        let rows = self
            .db
            .query(
                &sql::select_latest_target_keys(schema),
                &[station_id.into(), SqlValue::Integer(limit as i64)],
            )
            .await?;
        rows.iter()
            .map(|r| i64_column(r, &schema.primary_key))
            .collect()
    }
}
