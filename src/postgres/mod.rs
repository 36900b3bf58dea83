// ABOUTME: Minimal database seam over tokio-postgres used by sources, target and stores
// ABOUTME: Lets the sync engine run against a live client or an in-memory fake

pub mod connection;

pub use connection::{connect, connect_with_retry, init_tls_policy};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_postgres::types::ToSql;

use crate::value::{decode_row, Row, SqlValue};

/// Statement execution with positional [`SqlValue`] parameters.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run a query and decode every returned row.
    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>>;

    /// Run a statement and return the number of affected rows.
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64>;

    /// Run one or more statements without parameters.
    async fn batch_execute(&self, sql: &str) -> Result<()>;
}

fn as_params(params: &[SqlValue]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|p| p as &(dyn ToSql + Sync)).collect()
}

#[async_trait]
impl Database for tokio_postgres::Client {
    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        let rows = tokio_postgres::Client::query(self, sql, &as_params(params))
            .await
            .with_context(|| format!("Query failed: {}", first_line(sql)))?;
        rows.iter().map(decode_row).collect()
    }

    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        tokio_postgres::Client::execute(self, sql, &as_params(params))
            .await
            .with_context(|| format!("Statement failed: {}", first_line(sql)))
    }

    async fn batch_execute(&self, sql: &str) -> Result<()> {
        tokio_postgres::Client::batch_execute(self, sql)
            .await
            .with_context(|| format!("Batch failed: {}", first_line(sql)))
    }
}

#[async_trait]
impl<T: Database + ?Sized> Database for Arc<T> {
    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        (**self).query(sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        (**self).execute(sql, params).await
    }

    async fn batch_execute(&self, sql: &str) -> Result<()> {
        (**self).batch_execute(sql).await
    }
}

fn first_line(sql: &str) -> &str {
    sql.trim().lines().next().unwrap_or_default()
}

/// Read a required text column from a decoded row.
pub(crate) fn text_column(row: &Row, column: &str) -> Result<String> {
    match row.get(column) {
        Some(SqlValue::Text(s)) => Ok(s.clone()),
        Some(SqlValue::Null) | None => Err(anyhow!("Column '{}' is missing or NULL", column)),
        Some(other) => Ok(other.to_string()),
    }
}

/// Read a required integer column from a decoded row.
pub(crate) fn i64_column(row: &Row, column: &str) -> Result<i64> {
    row.get_i64(column)
        .ok_or_else(|| anyhow!("Column '{}' is missing or not an integer", column))
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Records every statement and answers queries from a queue of canned results.
    #[derive(Clone, Default)]
    pub(crate) struct RecordingDb {
        calls: Arc<Mutex<Vec<(String, Vec<SqlValue>)>>>,
        results: Arc<Mutex<VecDeque<Vec<Row>>>>,
    }

    impl RecordingDb {
        pub(crate) fn push_result(&self, rows: Vec<Row>) {
            self.results.lock().unwrap().push_back(rows);
        }

        pub(crate) fn calls(&self) -> Vec<(String, Vec<SqlValue>)> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, sql: &str, params: &[SqlValue]) {
            self.calls
                .lock()
                .unwrap()
                .push((sql.to_string(), params.to_vec()));
        }
    }

    #[async_trait]
    impl Database for RecordingDb {
        async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
            self.record(sql, params);
            Ok(self.results.lock().unwrap().pop_front().unwrap_or_default())
        }

        async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64> {
            self.record(sql, params);
            Ok(1)
        }

        async fn batch_execute(&self, sql: &str) -> Result<()> {
            self.record(sql, &[]);
            Ok(())
        }
    }
}
