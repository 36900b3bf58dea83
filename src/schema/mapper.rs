// ABOUTME: Maps source column type names onto the normalized target column types
// ABOUTME: Total over all inputs: unknown types become large text

use std::fmt;

/// Normalized column type used for every replicated target column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetType {
    Integer,
    Decimal,
    LargeText,
    DateTime,
    Boolean,
    BigInt,
}

impl TargetType {
    /// Map a source type name to its target type, ignoring case.
    ///
    /// Both the classic names (`int`, `nvarchar`, `datetime2`, `bit`, ...) and
    /// the spellings PostgreSQL reports in `information_schema.columns`
    /// (`integer`, `character varying`, `timestamp without time zone`, ...)
    /// are recognised.
    pub fn from_source_type(source_type: &str) -> Self {
        match source_type.trim().to_ascii_lowercase().as_str() {
            "int" | "integer" | "int4" => TargetType::Integer,
            "smallint" | "tinyint" | "float" | "real" | "numeric" | "money" | "smallmoney"
            | "int2" | "float4" | "float8" | "double precision" | "decimal" => {
                TargetType::Decimal
            }
            "varchar" | "nvarchar" | "char" | "nchar" | "text" | "ntext" | "character varying"
            | "character" | "bpchar" => TargetType::LargeText,
            "datetime" | "datetime2" | "smalldatetime" | "timestamp"
            | "timestamp without time zone" | "timestamp with time zone" => TargetType::DateTime,
            "bit" | "boolean" | "bool" => TargetType::Boolean,
            "bigint" | "int8" => TargetType::BigInt,
            _ => TargetType::LargeText,
        }
    }

    /// PostgreSQL DDL type for this target type.
    pub fn sql_type(&self) -> &'static str {
        match self {
            TargetType::Integer => "INTEGER",
            TargetType::Decimal => "NUMERIC(18, 2)",
            TargetType::LargeText => "TEXT",
            TargetType::DateTime => "TIMESTAMP",
            TargetType::Boolean => "BOOLEAN",
            TargetType::BigInt => "BIGINT",
        }
    }
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TargetType::Integer => "INTEGER",
            TargetType::Decimal => "DECIMAL(18,2)",
            TargetType::LargeText => "LARGE_TEXT",
            TargetType::DateTime => "DATETIME",
            TargetType::Boolean => "BOOLEAN",
            TargetType::BigInt => "BIGINT",
        };
        f.write_str(name)
    }
}

/// Whether a source type is already read as text without a cast.
pub(crate) fn is_text_family(source_type: &str) -> bool {
    matches!(
        source_type.trim().to_ascii_lowercase().as_str(),
        "varchar"
            | "nvarchar"
            | "char"
            | "nchar"
            | "text"
            | "ntext"
            | "character varying"
            | "character"
            | "bpchar"
            | "name"
    )
}
