// ABOUTME: Builds the dynamic SQL statements used against station sources and the target
// ABOUTME: Every identifier is quoted here; values are always bound as parameters

use crate::schema::{ColumnDef, TableSchema, STATION_TAG_COLUMN, STATION_TAG_TYPE};
use crate::utils::quote_ident;

/// Append-only change log written by the tracking triggers on each source.
pub const CHANGE_LOG_TABLE: &str = "station_sync_changes";

const TRIGGER_NAME: &str = "station_sync_track";

/// Columns of a source table, in ordinal order.
pub const SOURCE_COLUMNS: &str = "\
    SELECT column_name, data_type \
    FROM information_schema.columns \
    WHERE table_schema = current_schema() AND table_name = $1 \
    ORDER BY ordinal_position";

/// Primary key columns of a source table.
pub const SOURCE_PRIMARY_KEY: &str = "\
    SELECT a.attname AS column_name \
    FROM pg_index i \
    JOIN pg_class c ON c.oid = i.indrelid \
    JOIN pg_namespace n ON n.oid = c.relnamespace \
    JOIN pg_attribute a ON a.attrelid = c.oid AND a.attnum = ANY(i.indkey) \
    WHERE i.indisprimary AND n.nspname = current_schema() AND c.relname = $1 \
    ORDER BY array_position(i.indkey, a.attnum)";

pub const TABLE_EXISTS: &str = "\
    SELECT EXISTS ( \
        SELECT 1 FROM information_schema.tables \
        WHERE table_schema = current_schema() AND table_name = $1 \
    ) AS present";

pub const TARGET_COLUMNS: &str = "\
    SELECT column_name \
    FROM information_schema.columns \
    WHERE table_schema = current_schema() AND table_name = $1 \
    ORDER BY ordinal_position";

pub const CHANGE_LOG_EXISTS: &str =
    "SELECT to_regclass('station_sync_changes') IS NOT NULL AS present";

pub const CURRENT_VERSION: &str =
    "SELECT COALESCE(MAX(sequence_id), 0)::bigint AS version FROM station_sync_changes";

fn station_index_name(table: &str) -> String {
    let mut name = format!("{}_station_key", table);
    name.truncate(crate::utils::MAX_IDENTIFIER_LEN);
    name
}

fn select_list(schema: &TableSchema, qualifier: Option<&str>) -> String {
    schema
        .columns
        .iter()
        .map(|c| c.select_expr(qualifier))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `CREATE TABLE` for a new target table, with the station tag column last.
pub fn create_target_table(schema: &TableSchema) -> String {
    let mut columns: Vec<String> = schema
        .columns
        .iter()
        .map(|c| format!("{} {}", quote_ident(&c.name), c.target_type.sql_type()))
        .collect();
    columns.push(format!(
        "{} {}",
        quote_ident(STATION_TAG_COLUMN),
        STATION_TAG_TYPE
    ));
    format!(
        "CREATE TABLE {} ({})",
        quote_ident(&schema.table),
        columns.join(", ")
    )
}

/// Unique index over (primary key, station tag).
pub fn create_station_index(schema: &TableSchema) -> String {
    format!(
        "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} ({}, {})",
        quote_ident(&station_index_name(&schema.table)),
        quote_ident(&schema.table),
        quote_ident(&schema.primary_key),
        quote_ident(STATION_TAG_COLUMN)
    )
}

pub fn add_column(table: &str, column: &ColumnDef) -> String {
    format!(
        "ALTER TABLE {} ADD COLUMN {} {}",
        quote_ident(table),
        quote_ident(&column.name),
        column.target_type.sql_type()
    )
}

pub fn add_station_tag(table: &str) -> String {
    format!(
        "ALTER TABLE {} ADD COLUMN {} {}",
        quote_ident(table),
        quote_ident(STATION_TAG_COLUMN),
        STATION_TAG_TYPE
    )
}

/// Keyset page: `$1` is the exclusive lower key bound, `$2` the page size.
pub fn select_page(schema: &TableSchema) -> String {
    let pk = quote_ident(&schema.primary_key);
    format!(
        "SELECT {} FROM {} WHERE {} > $1 ORDER BY {} LIMIT $2",
        select_list(schema, None),
        quote_ident(&schema.table),
        pk,
        pk
    )
}

/// Net change per key between two change-log positions.
///
/// `$1` is the table name, `$2` the exclusive lower sequence and `$3` the
/// inclusive upper sequence. Only the latest log entry per key survives.
/// The row's current values are joined in; deleted keys join to NULLs.
pub fn select_changes(schema: &TableSchema) -> String {
    format!(
        "SELECT ct.operation AS \"_change_op\", ct.row_key AS \"_change_key\", {} \
         FROM ( \
             SELECT DISTINCT ON (row_key) row_key, operation \
             FROM {} \
             WHERE table_name = $1 AND sequence_id > $2 AND sequence_id <= $3 \
             ORDER BY row_key, sequence_id DESC \
         ) AS ct \
         LEFT JOIN {} AS t ON t.{} = ct.row_key \
         ORDER BY ct.row_key",
        select_list(schema, Some("t")),
        CHANGE_LOG_TABLE,
        quote_ident(&schema.table),
        quote_ident(&schema.primary_key)
    )
}

/// Highest source keys: `$1` is the limit.
pub fn select_latest_source_keys(schema: &TableSchema) -> String {
    let pk = quote_ident(&schema.primary_key);
    format!(
        "SELECT {} FROM {} ORDER BY {} DESC LIMIT $1",
        pk,
        quote_ident(&schema.table),
        pk
    )
}

/// Highest target keys for one station: `$1` station, `$2` limit.
pub fn select_latest_target_keys(schema: &TableSchema) -> String {
    let pk = quote_ident(&schema.primary_key);
    format!(
        "SELECT {} FROM {} WHERE {} = $1 ORDER BY {} DESC LIMIT $2",
        pk,
        quote_ident(&schema.table),
        quote_ident(STATION_TAG_COLUMN),
        pk
    )
}

/// `$1` key, `$2` station.
pub fn row_exists(schema: &TableSchema) -> String {
    format!(
        "SELECT 1 AS present FROM {} WHERE {} = $1 AND {} = $2 LIMIT 1",
        quote_ident(&schema.table),
        quote_ident(&schema.primary_key),
        quote_ident(STATION_TAG_COLUMN)
    )
}

/// `$1..$n` column values, then the key and the station.
pub fn update_row(schema: &TableSchema, columns: &[&str]) -> String {
    let assignments = columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{} = ${}", quote_ident(c), i + 1))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "UPDATE {} SET {} WHERE {} = ${} AND {} = ${}",
        quote_ident(&schema.table),
        assignments,
        quote_ident(&schema.primary_key),
        columns.len() + 1,
        quote_ident(STATION_TAG_COLUMN),
        columns.len() + 2
    )
}

/// `$1..$n` column values, then the station.
pub fn insert_row(schema: &TableSchema, columns: &[&str]) -> String {
    let mut names: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    names.push(quote_ident(STATION_TAG_COLUMN));
    let placeholders = (1..=names.len())
        .map(|i| format!("${}", i))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(&schema.table),
        names.join(", "),
        placeholders
    )
}

/// `$1` key, `$2` station.
pub fn delete_row(schema: &TableSchema) -> String {
    format!(
        "DELETE FROM {} WHERE {} = $1 AND {} = $2",
        quote_ident(&schema.table),
        quote_ident(&schema.primary_key),
        quote_ident(STATION_TAG_COLUMN)
    )
}

/// `$1` station.
pub fn has_station_rows(table: &str) -> String {
    format!(
        "SELECT 1 AS present FROM {} WHERE {} = $1 LIMIT 1",
        quote_ident(table),
        quote_ident(STATION_TAG_COLUMN)
    )
}

/// Change log, trigger function and trigger for one source table.
///
/// Safe to run repeatedly. An update that changes the key logs a delete of
/// the old key and an update of the new one.
pub fn enable_tracking(schema: &TableSchema) -> String {
    let table = quote_ident(&schema.table);
    let pk = quote_ident(&schema.primary_key);
    let function = quote_ident(&format!("{}_{}", TRIGGER_NAME, schema.table));
    format!(
        "CREATE TABLE IF NOT EXISTS {log} (
    sequence_id BIGSERIAL PRIMARY KEY,
    table_name TEXT NOT NULL,
    operation CHAR(1) NOT NULL,
    row_key BIGINT NOT NULL,
    changed_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE INDEX IF NOT EXISTS {log}_table_seq ON {log} (table_name, sequence_id);
CREATE OR REPLACE FUNCTION {function}() RETURNS TRIGGER AS $fn$
BEGIN
    IF TG_OP = 'DELETE' THEN
        INSERT INTO {log} (table_name, operation, row_key) VALUES (TG_TABLE_NAME, 'D', OLD.{pk});
        RETURN OLD;
    END IF;
    IF TG_OP = 'UPDATE' AND OLD.{pk} IS DISTINCT FROM NEW.{pk} THEN
        INSERT INTO {log} (table_name, operation, row_key) VALUES (TG_TABLE_NAME, 'D', OLD.{pk});
    END IF;
    INSERT INTO {log} (table_name, operation, row_key) VALUES (TG_TABLE_NAME, LEFT(TG_OP, 1), NEW.{pk});
    RETURN NEW;
END;
$fn$ LANGUAGE plpgsql;
DROP TRIGGER IF EXISTS {trigger} ON {table};
CREATE TRIGGER {trigger} AFTER INSERT OR UPDATE OR DELETE ON {table}
    FOR EACH ROW EXECUTE FUNCTION {function}();",
        log = CHANGE_LOG_TABLE,
        function = function,
        pk = pk,
        trigger = TRIGGER_NAME,
        table = table
    )
}
