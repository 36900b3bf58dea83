// ABOUTME: Typed column values and rows flowing from station sources to the target
// ABOUTME: Decodes tokio-postgres rows once and encodes values per target column type

use anyhow::{Context, Result};
use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::error::Error;
use std::fmt;
use std::str::FromStr;
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};

type BoxError = Box<dyn Error + Sync + Send>;

/// A single column value.
///
/// The variant is decided when the value is read from the source. When the
/// value is written, [`ToSql`] converts it to whatever the target column's
/// type is, so a `Text("42")` can land in an INTEGER column and an
/// `Integer(1)` in a TEXT column.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SqlValue {
    #[default]
    Null,
    Text(String),
    Integer(i64),
    Decimal(Decimal),
    Boolean(bool),
    DateTime(NaiveDateTime),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Blank text is stored as NULL, everything else is kept.
    pub fn normalized(&self) -> SqlValue {
        match self {
            SqlValue::Text(s) if s.trim().is_empty() => SqlValue::Null,
            other => other.clone(),
        }
    }

    /// Read the value as a 64-bit key, if it represents an integral number.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Integer(i) => Some(*i),
            SqlValue::Decimal(d) if d.fract().is_zero() => d.to_i64(),
            SqlValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => write!(f, "NULL"),
            SqlValue::Text(s) => write!(f, "{}", s),
            SqlValue::Integer(i) => write!(f, "{}", i),
            SqlValue::Decimal(d) => write!(f, "{}", d),
            SqlValue::Boolean(b) => write!(f, "{}", b),
            SqlValue::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S%.f")),
        }
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Integer(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::Integer(v.into())
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Boolean(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<Decimal> for SqlValue {
    fn from(v: Decimal) -> Self {
        SqlValue::Decimal(v)
    }
}

impl From<NaiveDateTime> for SqlValue {
    fn from(v: NaiveDateTime) -> Self {
        SqlValue::DateTime(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
        match self {
            SqlValue::Null => Ok(IsNull::Yes),
            SqlValue::Text(s) => encode_text(s, ty, out),
            SqlValue::Integer(i) => encode_integer(*i, ty, out),
            SqlValue::Decimal(d) => encode_decimal(*d, ty, out),
            SqlValue::Boolean(b) => encode_bool(*b, ty, out),
            SqlValue::DateTime(dt) => encode_datetime(*dt, ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn encode_text(s: &str, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
    let t = s.trim();
    match *ty {
        Type::INT2 => t.parse::<i16>()?.to_sql(ty, out),
        Type::INT4 => t.parse::<i32>()?.to_sql(ty, out),
        Type::INT8 => t.parse::<i64>()?.to_sql(ty, out),
        Type::NUMERIC => parse_decimal(t)?.to_sql(ty, out),
        Type::FLOAT4 => t.parse::<f32>()?.to_sql(ty, out),
        Type::FLOAT8 => t.parse::<f64>()?.to_sql(ty, out),
        Type::BOOL => parse_bool(t)?.to_sql(ty, out),
        Type::TIMESTAMP => parse_datetime(t)?.to_sql(ty, out),
        Type::TIMESTAMPTZ => parse_datetime(t)?.and_utc().to_sql(ty, out),
        Type::DATE => parse_datetime(t)?.date().to_sql(ty, out),
        _ => s.to_sql(ty, out),
    }
}

fn encode_integer(i: i64, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
    match *ty {
        Type::INT2 => i16::try_from(i)?.to_sql(ty, out),
        Type::INT4 => i32::try_from(i)?.to_sql(ty, out),
        Type::INT8 => i.to_sql(ty, out),
        Type::NUMERIC => Decimal::from(i).to_sql(ty, out),
        Type::FLOAT4 => (i as f32).to_sql(ty, out),
        Type::FLOAT8 => (i as f64).to_sql(ty, out),
        Type::BOOL => (i != 0).to_sql(ty, out),
        _ => i.to_string().to_sql(ty, out),
    }
}

fn encode_decimal(d: Decimal, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
    match *ty {
        Type::NUMERIC => d.to_sql(ty, out),
        Type::FLOAT4 | Type::FLOAT8 => d
            .to_f64()
            .ok_or_else(|| format!("decimal {} does not fit a float", d))?
            .to_sql(ty, out),
        Type::INT2 | Type::INT4 | Type::INT8 => {
            if !d.fract().is_zero() {
                return Err(format!("decimal {} has a fractional part", d).into());
            }
            let i = d
                .to_i64()
                .ok_or_else(|| format!("decimal {} does not fit a 64-bit integer", d))?;
            encode_integer(i, ty, out)
        }
        Type::BOOL => (!d.is_zero()).to_sql(ty, out),
        _ => d.to_string().to_sql(ty, out),
    }
}

fn encode_bool(b: bool, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
    match *ty {
        Type::BOOL => b.to_sql(ty, out),
        Type::INT2 | Type::INT4 | Type::INT8 | Type::NUMERIC => encode_integer(b as i64, ty, out),
        _ => b.to_string().to_sql(ty, out),
    }
}

fn encode_datetime(
    dt: NaiveDateTime,
    ty: &Type,
    out: &mut BytesMut,
) -> std::result::Result<IsNull, BoxError> {
    match *ty {
        Type::TIMESTAMP => dt.to_sql(ty, out),
        Type::TIMESTAMPTZ => dt.and_utc().to_sql(ty, out),
        Type::DATE => dt.date().to_sql(ty, out),
        _ => SqlValue::DateTime(dt).to_string().to_sql(ty, out),
    }
}

fn parse_decimal(s: &str) -> std::result::Result<Decimal, BoxError> {
    Decimal::from_str(s)
        .or_else(|_| Decimal::from_scientific(s))
        .map_err(|e| format!("'{}' is not a decimal: {}", s, e).into())
}

fn parse_bool(s: &str) -> std::result::Result<bool, BoxError> {
    match s.to_ascii_lowercase().as_str() {
        "1" | "true" | "t" | "yes" | "y" => Ok(true),
        "0" | "false" | "f" | "no" | "n" => Ok(false),
        _ => Err(format!("'{}' is not a boolean", s).into()),
    }
}

fn parse_datetime(s: &str) -> std::result::Result<NaiveDateTime, BoxError> {
    const FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];
    for format in FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(dt);
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.naive_utc());
    }
    if let Some(dt) = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
    {
        return Ok(dt);
    }
    Err(format!("'{}' is not a timestamp", s).into())
}

/// An ordered set of named column values.
///
/// Lookups are case-insensitive, matching how column names are compared
/// between source and target.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<(String, SqlValue)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, mostly for tests and fakes.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.set(name, value.into());
        self
    }

    /// Insert or replace a column value.
    pub fn set(&mut self, name: impl Into<String>, value: SqlValue) {
        let name = name.into();
        match self
            .columns
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(&name))
        {
            Some((_, slot)) => *slot = value,
            None => self.columns.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(SqlValue::as_i64)
    }

    pub fn remove(&mut self, name: &str) -> Option<SqlValue> {
        let idx = self
            .columns
            .iter()
            .position(|(existing, _)| existing.eq_ignore_ascii_case(name))?;
        Some(self.columns.remove(idx).1)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.columns.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl FromIterator<(String, SqlValue)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, SqlValue)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (name, value) in iter {
            row.set(name, value);
        }
        row
    }
}

/// Decode a tokio-postgres row into a [`Row`].
pub fn decode_row(row: &tokio_postgres::Row) -> Result<Row> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(idx, column)| {
            let value = decode_column(row, idx)
                .with_context(|| format!("Failed to decode column '{}'", column.name()))?;
            Ok((column.name().to_string(), value))
        })
        .collect()
}

fn decode_column(row: &tokio_postgres::Row, idx: usize) -> Result<SqlValue> {
    let ty = row.columns()[idx].type_().clone();
    let value = match ty {
        Type::BOOL => row.try_get::<_, Option<bool>>(idx)?.map(SqlValue::Boolean),
        Type::INT2 => row
            .try_get::<_, Option<i16>>(idx)?
            .map(|v| SqlValue::Integer(v.into())),
        Type::INT4 => row
            .try_get::<_, Option<i32>>(idx)?
            .map(|v| SqlValue::Integer(v.into())),
        Type::INT8 => row.try_get::<_, Option<i64>>(idx)?.map(SqlValue::Integer),
        Type::NUMERIC => row.try_get::<_, Option<Decimal>>(idx)?.map(SqlValue::Decimal),
        Type::FLOAT4 => row
            .try_get::<_, Option<f32>>(idx)?
            .map(|v| float_value(v.into())),
        Type::FLOAT8 => row.try_get::<_, Option<f64>>(idx)?.map(float_value),
        Type::TIMESTAMP => row
            .try_get::<_, Option<NaiveDateTime>>(idx)?
            .map(SqlValue::DateTime),
        Type::TIMESTAMPTZ => row
            .try_get::<_, Option<DateTime<Utc>>>(idx)?
            .map(|v| SqlValue::DateTime(v.naive_utc())),
        Type::DATE => row
            .try_get::<_, Option<NaiveDate>>(idx)?
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(SqlValue::DateTime),
        Type::UUID => row
            .try_get::<_, Option<uuid::Uuid>>(idx)?
            .map(|v| SqlValue::Text(v.to_string())),
        Type::JSON | Type::JSONB => row
            .try_get::<_, Option<serde_json::Value>>(idx)?
            .map(|v| SqlValue::Text(v.to_string())),
        _ => row.try_get::<_, Option<String>>(idx)?.map(SqlValue::Text),
    };
    Ok(value.unwrap_or(SqlValue::Null))
}

fn float_value(v: f64) -> SqlValue {
    Decimal::from_f64_retain(v)
        .map(SqlValue::Decimal)
        .unwrap_or_else(|| SqlValue::Text(v.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_blank_text_is_null() {
        assert_eq!(SqlValue::Text("   ".into()).normalized(), SqlValue::Null);
        assert_eq!(SqlValue::Text(String::new()).normalized(), SqlValue::Null);
        assert_eq!(
            SqlValue::Text(" x ".into()).normalized(),
            SqlValue::Text(" x ".into())
        );
        assert_eq!(SqlValue::Integer(0).normalized(), SqlValue::Integer(0));
    }

    #[test]
    fn test_as_i64() {
        assert_eq!(SqlValue::Integer(7).as_i64(), Some(7));
        assert_eq!(SqlValue::Text(" 42 ".into()).as_i64(), Some(42));
        assert_eq!(SqlValue::Decimal(Decimal::new(500, 2)).as_i64(), Some(5));
        assert_eq!(SqlValue::Decimal(Decimal::new(501, 2)).as_i64(), None);
        assert_eq!(SqlValue::Null.as_i64(), None);
        assert_eq!(SqlValue::Boolean(true).as_i64(), None);
    }

    #[test]
    fn test_row_lookup_is_case_insensitive() {
        let row = Row::new().with("Id", 1i64).with("Val", "ten");
        assert_eq!(row.get_i64("id"), Some(1));
        assert_eq!(row.get("VAL"), Some(&SqlValue::Text("ten".into())));
        assert!(row.get("missing").is_none());
    }

    #[test]
    fn test_row_set_replaces_existing_column() {
        let mut row = Row::new().with("id", 1i64);
        row.set("ID", SqlValue::Integer(2));
        assert_eq!(row.len(), 1);
        assert_eq!(row.get_i64("id"), Some(2));
    }

    #[test]
    fn test_row_remove() {
        let mut row = Row::new().with("a", 1i64).with("b", 2i64);
        assert_eq!(row.remove("A"), Some(SqlValue::Integer(1)));
        assert_eq!(row.len(), 1);
        assert!(row.remove("a").is_none());
    }

    #[test]
    fn test_encode_text_into_typed_columns() {
        let mut buf = BytesMut::new();
        assert!(SqlValue::Text("12".into())
            .to_sql(&Type::INT4, &mut buf)
            .is_ok());
        assert!(SqlValue::Text("12.50".into())
            .to_sql(&Type::NUMERIC, &mut buf)
            .is_ok());
        assert!(SqlValue::Text("true".into())
            .to_sql(&Type::BOOL, &mut buf)
            .is_ok());
        assert!(SqlValue::Text("2024-05-01 10:00:00".into())
            .to_sql(&Type::TIMESTAMP, &mut buf)
            .is_ok());
        assert!(SqlValue::Text("abc".into())
            .to_sql(&Type::INT4, &mut buf)
            .is_err());
    }

    #[test]
    fn test_encode_integer_narrowing() {
        let mut buf = BytesMut::new();
        assert!(SqlValue::Integer(i64::from(i32::MAX))
            .to_sql(&Type::INT4, &mut buf)
            .is_ok());
        assert!(SqlValue::Integer(i64::from(i32::MAX) + 1)
            .to_sql(&Type::INT4, &mut buf)
            .is_err());
    }

    #[test]
    fn test_encode_null() {
        let mut buf = BytesMut::new();
        let is_null = SqlValue::Null.to_sql(&Type::INT4, &mut buf).unwrap();
        assert!(matches!(is_null, IsNull::Yes));
    }

    #[test]
    fn test_encode_fractional_decimal_into_integer_fails() {
        let mut buf = BytesMut::new();
        assert!(SqlValue::Decimal(Decimal::new(125, 1))
            .to_sql(&Type::INT8, &mut buf)
            .is_err());
        assert!(SqlValue::Decimal(Decimal::new(120, 1))
            .to_sql(&Type::INT8, &mut buf)
            .is_ok());
    }

    #[test]
    fn test_parse_datetime_formats() {
        assert!(parse_datetime("2024-05-01 10:00:00").is_ok());
        assert!(parse_datetime("2024-05-01T10:00:00.123").is_ok());
        assert!(parse_datetime("2024-05-01T10:00:00Z").is_ok());
        assert!(parse_datetime("2024-05-01").is_ok());
        assert!(parse_datetime("yesterday").is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(SqlValue::Null.to_string(), "NULL");
        assert_eq!(SqlValue::Integer(5).to_string(), "5");
        assert_eq!(SqlValue::Boolean(false).to_string(), "false");
    }
}
