// ABOUTME: Table schema model shared by the synchronizer, pager and applier
// ABOUTME: Built once from the source catalog and passed explicitly through a sync

pub mod mapper;
pub mod sync;

pub use mapper::TargetType;
pub use sync::{SchemaSyncOutcome, SchemaSynchronizer};

use anyhow::{bail, Result};

use crate::utils::{quote_ident, validate_identifier};

/// Column added to every target table to record which station produced a row.
pub const STATION_TAG_COLUMN: &str = "_station_id";

/// DDL type of the station tag column.
pub const STATION_TAG_TYPE: &str = "VARCHAR(50)";

/// A source column and the target type it maps to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub source_type: String,
    pub target_type: TargetType,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, source_type: impl Into<String>) -> Self {
        let source_type = source_type.into();
        Self {
            name: name.into(),
            target_type: TargetType::from_source_type(&source_type),
            source_type,
        }
    }

    /// Expression used to read this column from the source.
    ///
    /// Columns that land in a large-text target but are not text on the source
    /// (uuid, json, arrays, ...) are cast to text so any type can be read.
    /// `money` is cast to numeric.
    pub fn select_expr(&self, qualifier: Option<&str>) -> String {
        let column = match qualifier {
            Some(q) => format!("{}.{}", q, quote_ident(&self.name)),
            None => quote_ident(&self.name),
        };
        let source = self.source_type.to_ascii_lowercase();
        if source == "money" || source == "smallmoney" {
            format!("{}::numeric AS {}", column, quote_ident(&self.name))
        } else if self.target_type == TargetType::LargeText && !mapper::is_text_family(&source) {
            format!("{}::text AS {}", column, quote_ident(&self.name))
        } else {
            column
        }
    }
}

/// Ordered, typed description of a replicated table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub table: String,
    pub primary_key: String,
    pub columns: Vec<ColumnDef>,
}

impl TableSchema {
    /// Build a schema, checking the table name and that the key is one of the columns.
    pub fn new(
        table: impl Into<String>,
        primary_key: impl Into<String>,
        columns: Vec<ColumnDef>,
    ) -> Result<Self> {
        let table = table.into();
        let primary_key = primary_key.into();
        validate_identifier(&table)?;

        if columns.is_empty() {
            bail!("Table '{}' has no columns", table);
        }
        let Some(key_column) = columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(&primary_key))
        else {
            bail!(
                "Primary key '{}' is not a column of table '{}'",
                primary_key,
                table
            );
        };
        if !matches!(
            key_column.target_type,
            TargetType::Integer | TargetType::BigInt | TargetType::Decimal
        ) {
            bail!(
                "Primary key '{}' of table '{}' has type '{}'; only integer keys can be paged",
                primary_key,
                table,
                key_column.source_type
            );
        }
        if columns
            .iter()
            .any(|c| c.name.eq_ignore_ascii_case(STATION_TAG_COLUMN))
        {
            bail!(
                "Table '{}' already has a column named '{}'",
                table,
                STATION_TAG_COLUMN
            );
        }
        let primary_key = key_column.name.clone();

        Ok(Self {
            table,
            primary_key,
            columns,
        })
    }

    /// Look up a column by name, ignoring case.
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn is_primary_key(&self, name: &str) -> bool {
        self.primary_key.eq_ignore_ascii_case(name)
    }
}
