//! Database-agnostic values and rows.
//!
//! This module provides the unified value type used for both statement
//! parameters and result cells, together with the per-database decoding of
//! driver rows into [`SqlRow`].
//!
//! # Architecture
//!
//! Decoding uses a two-phase approach:
//! 1. `TypeCategory` classifies column types into logical categories
//! 2. Database-specific decoders handle the actual value extraction
//!
//! This centralizes type classification while allowing database-specific
//! handling where needed.

use serde::Serialize;
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Decode, Row, Type, TypeInfo};

/// A single database value.
///
/// Used both for binding statement parameters and for decoded result cells.
/// The `List` variant never appears as a cell; it is produced by
/// [`SqlRow::reduce`] when a row carries more than one column.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Blob(Vec<u8>),
    List(Vec<SqlValue>),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        Self::Blob(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Self::Null,
        }
    }
}

/// Build a `&[SqlValue]` parameter slice from plain Rust values.
///
/// ```
/// # use sqlgate::params;
/// let args = params!["x", 42, true];
/// ```
#[macro_export]
macro_rules! params {
    () => {
        &[] as &[$crate::SqlValue]
    };
    ($($v:expr),+ $(,)?) => {
        &[$($crate::SqlValue::from($v)),+][..]
    };
}

/// A decoded result row: column names plus values, in column order.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlRow {
    columns: Vec<String>,
    values: Vec<SqlValue>,
}

impl SqlRow {
    pub(crate) fn new(columns: Vec<String>, values: Vec<SqlValue>) -> Self {
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The value at a column index.
    pub fn get(&self, idx: usize) -> Option<&SqlValue> {
        self.values.get(idx)
    }

    /// The value of a named column (case-insensitive).
    pub fn value(&self, name: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
            .and_then(|idx| self.values.get(idx))
    }

    /// Reduce the row to a single value: a one-column row yields the column
    /// value itself, any other width yields the values as an ordered
    /// [`SqlValue::List`].
    pub fn reduce(mut self) -> SqlValue {
        if self.values.len() == 1 {
            self.values.pop().unwrap_or(SqlValue::Null)
        } else {
            SqlValue::List(self.values)
        }
    }
}

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Binary,
    Unknown,
}

/// Classify a database type name into a logical category.
fn categorize_type(type_name: &str) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // Decimal/Numeric first, it overlaps with the float checks
    if lower.contains("decimal") || lower.contains("numeric") {
        return TypeCategory::Decimal;
    }

    if lower.contains("int") || lower.contains("serial") || lower.contains("tiny") {
        return TypeCategory::Integer;
    }

    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    if lower.contains("float")
        || lower.contains("double")
        || lower == "real"
        || lower == "float4"
        || lower == "float8"
    {
        return TypeCategory::Float;
    }

    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }

    // Text, dates, uuids and everything else decode through the text path.
    TypeCategory::Unknown
}

// =============================================================================
// Decimal Type Support
// =============================================================================

/// Wrapper type for raw DECIMAL/NUMERIC values as strings.
/// This preserves the exact database representation.
#[derive(Debug)]
struct RawDecimal(String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        <String as Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::Postgres>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

// =============================================================================
// Row Decoding Trait
// =============================================================================

/// Trait for converting driver rows into [`SqlRow`].
pub(crate) trait ToSqlRow {
    fn to_sql_row(&self) -> SqlRow;
}

impl ToSqlRow for MySqlRow {
    fn to_sql_row(&self) -> SqlRow {
        let columns: Vec<String> = self.columns().iter().map(|c| c.name().to_string()).collect();
        let values = self
            .columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let category = categorize_type(col.type_info().name());
                mysql::decode_column(self, idx, category)
            })
            .collect();
        SqlRow::new(columns, values)
    }
}

impl ToSqlRow for PgRow {
    fn to_sql_row(&self) -> SqlRow {
        let columns: Vec<String> = self.columns().iter().map(|c| c.name().to_string()).collect();
        let values = self
            .columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let category = categorize_type(col.type_info().name());
                postgres::decode_column(self, idx, category)
            })
            .collect();
        SqlRow::new(columns, values)
    }
}

impl ToSqlRow for SqliteRow {
    fn to_sql_row(&self) -> SqlRow {
        let columns: Vec<String> = self.columns().iter().map(|c| c.name().to_string()).collect();
        let values = self
            .columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let category = categorize_type(col.type_info().name());
                sqlite::decode_column(self, idx, category)
            })
            .collect();
        SqlRow::new(columns, values)
    }
}

// =============================================================================
// Database-Specific Decoders
// =============================================================================
//
// Each module below provides the same interface adapted to its database type.
// The code structure is intentionally parallel to make differences obvious.

mod mysql {
    use super::*;

    pub fn decode_column(row: &MySqlRow, idx: usize, category: TypeCategory) -> SqlValue {
        match category {
            TypeCategory::Decimal => decode_decimal(row, idx),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => decode_boolean(row, idx),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Binary => decode_binary(row, idx),
            TypeCategory::Unknown => decode_text(row, idx),
        }
    }

    fn decode_decimal(row: &MySqlRow, idx: usize) -> SqlValue {
        match row.try_get::<Option<RawDecimal>, _>(idx) {
            Ok(Some(v)) => SqlValue::Text(v.0),
            Ok(None) => SqlValue::Null,
            Err(e) => {
                tracing::error!("failed to decode DECIMAL: {:?}", e);
                SqlValue::Null
            }
        }
    }

    fn decode_integer(row: &MySqlRow, idx: usize) -> SqlValue {
        if let Ok(None) = row.try_get::<Option<i64>, _>(idx) {
            return SqlValue::Null;
        }
        if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(idx) {
            return SqlValue::Int(v);
        }
        if let Ok(Some(v)) = row.try_get::<Option<u64>, _>(idx) {
            return SqlValue::Int(v as i64);
        }
        SqlValue::Null
    }

    fn decode_boolean(row: &MySqlRow, idx: usize) -> SqlValue {
        row.try_get::<Option<bool>, _>(idx)
            .ok()
            .flatten()
            .map(SqlValue::Bool)
            .unwrap_or(SqlValue::Null)
    }

    fn decode_float(row: &MySqlRow, idx: usize) -> SqlValue {
        if let Ok(Some(v)) = row.try_get::<Option<f64>, _>(idx) {
            return SqlValue::Float(v);
        }
        if let Ok(Some(v)) = row.try_get::<Option<f32>, _>(idx) {
            return SqlValue::Float(v as f64);
        }
        SqlValue::Null
    }

    fn decode_binary(row: &MySqlRow, idx: usize) -> SqlValue {
        row.try_get::<Option<Vec<u8>>, _>(idx)
            .ok()
            .flatten()
            .map(SqlValue::Blob)
            .unwrap_or(SqlValue::Null)
    }

    fn decode_text(row: &MySqlRow, idx: usize) -> SqlValue {
        row.try_get::<Option<String>, _>(idx)
            .ok()
            .flatten()
            .map(SqlValue::Text)
            .unwrap_or(SqlValue::Null)
    }
}

mod postgres {
    use super::*;

    pub fn decode_column(row: &PgRow, idx: usize, category: TypeCategory) -> SqlValue {
        match category {
            TypeCategory::Decimal => decode_decimal(row, idx),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => decode_boolean(row, idx),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Binary => decode_binary(row, idx),
            TypeCategory::Unknown => decode_text(row, idx),
        }
    }

    fn decode_decimal(row: &PgRow, idx: usize) -> SqlValue {
        match row.try_get::<Option<RawDecimal>, _>(idx) {
            Ok(Some(v)) => SqlValue::Text(v.0),
            Ok(None) => SqlValue::Null,
            Err(e) => {
                tracing::error!("failed to decode NUMERIC: {:?}", e);
                SqlValue::Null
            }
        }
    }

    fn decode_integer(row: &PgRow, idx: usize) -> SqlValue {
        if let Ok(None) = row.try_get::<Option<i64>, _>(idx) {
            return SqlValue::Null;
        }
        if let Ok(Some(v)) = row.try_get::<Option<i16>, _>(idx) {
            return SqlValue::Int(v as i64);
        }
        if let Ok(Some(v)) = row.try_get::<Option<i32>, _>(idx) {
            return SqlValue::Int(v as i64);
        }
        if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(idx) {
            return SqlValue::Int(v);
        }
        SqlValue::Null
    }

    fn decode_boolean(row: &PgRow, idx: usize) -> SqlValue {
        row.try_get::<Option<bool>, _>(idx)
            .ok()
            .flatten()
            .map(SqlValue::Bool)
            .unwrap_or(SqlValue::Null)
    }

    fn decode_float(row: &PgRow, idx: usize) -> SqlValue {
        if let Ok(Some(v)) = row.try_get::<Option<f64>, _>(idx) {
            return SqlValue::Float(v);
        }
        if let Ok(Some(v)) = row.try_get::<Option<f32>, _>(idx) {
            return SqlValue::Float(v as f64);
        }
        SqlValue::Null
    }

    fn decode_binary(row: &PgRow, idx: usize) -> SqlValue {
        row.try_get::<Option<Vec<u8>>, _>(idx)
            .ok()
            .flatten()
            .map(SqlValue::Blob)
            .unwrap_or(SqlValue::Null)
    }

    fn decode_text(row: &PgRow, idx: usize) -> SqlValue {
        row.try_get::<Option<String>, _>(idx)
            .ok()
            .flatten()
            .map(SqlValue::Text)
            .unwrap_or(SqlValue::Null)
    }
}

mod sqlite {
    use super::*;

    pub fn decode_column(row: &SqliteRow, idx: usize, category: TypeCategory) -> SqlValue {
        match category {
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => decode_boolean(row, idx),
            TypeCategory::Float | TypeCategory::Decimal => decode_float(row, idx),
            TypeCategory::Binary => decode_binary(row, idx),
            TypeCategory::Unknown => decode_text(row, idx),
        }
    }

    fn decode_integer(row: &SqliteRow, idx: usize) -> SqlValue {
        row.try_get::<Option<i64>, _>(idx)
            .ok()
            .flatten()
            .map(SqlValue::Int)
            .unwrap_or(SqlValue::Null)
    }

    fn decode_boolean(row: &SqliteRow, idx: usize) -> SqlValue {
        row.try_get::<Option<bool>, _>(idx)
            .ok()
            .flatten()
            .map(SqlValue::Bool)
            .unwrap_or(SqlValue::Null)
    }

    // SQLite NUMERIC affinity stores plain numbers, no exact-decimal wire type
    fn decode_float(row: &SqliteRow, idx: usize) -> SqlValue {
        row.try_get::<Option<f64>, _>(idx)
            .ok()
            .flatten()
            .map(SqlValue::Float)
            .unwrap_or(SqlValue::Null)
    }

    fn decode_binary(row: &SqliteRow, idx: usize) -> SqlValue {
        row.try_get::<Option<Vec<u8>>, _>(idx)
            .ok()
            .flatten()
            .map(SqlValue::Blob)
            .unwrap_or(SqlValue::Null)
    }

    // Columns without a declared type land here; fall back through the
    // dynamic value types until one decodes.
    fn decode_text(row: &SqliteRow, idx: usize) -> SqlValue {
        if let Ok(Some(v)) = row.try_get::<Option<String>, _>(idx) {
            return SqlValue::Text(v);
        }
        if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(idx) {
            return SqlValue::Int(v);
        }
        if let Ok(Some(v)) = row.try_get::<Option<f64>, _>(idx) {
            return SqlValue::Float(v);
        }
        if let Ok(Some(v)) = row.try_get::<Option<Vec<u8>>, _>(idx) {
            return SqlValue::Blob(v);
        }
        SqlValue::Null
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reduce_single_column() {
        let row = SqlRow::new(vec!["id".into()], vec![SqlValue::Int(7)]);
        assert_eq!(row.reduce(), SqlValue::Int(7));
    }

    #[test]
    fn test_reduce_multi_column() {
        let row = SqlRow::new(
            vec!["a".into(), "b".into(), "c".into()],
            vec![
                SqlValue::Text("x".into()),
                SqlValue::Int(1),
                SqlValue::Null,
            ],
        );
        assert_eq!(
            row.reduce(),
            SqlValue::List(vec![
                SqlValue::Text("x".into()),
                SqlValue::Int(1),
                SqlValue::Null,
            ])
        );
    }

    #[test]
    fn test_reduce_empty_row_is_list() {
        let row = SqlRow::new(vec![], vec![]);
        assert_eq!(row.reduce(), SqlValue::List(vec![]));
    }

    #[test]
    fn test_named_lookup_is_case_insensitive() {
        let row = SqlRow::new(
            vec!["UserName".into()],
            vec![SqlValue::Text("kim".into())],
        );
        assert_eq!(row.value("username"), Some(&SqlValue::Text("kim".into())));
        assert_eq!(row.value("missing"), None);
    }

    #[test]
    fn test_categorize_type() {
        assert_eq!(categorize_type("BIGINT"), TypeCategory::Integer);
        assert_eq!(categorize_type("boolean"), TypeCategory::Boolean);
        assert_eq!(categorize_type("DOUBLE"), TypeCategory::Float);
        assert_eq!(categorize_type("NUMERIC(10,2)"), TypeCategory::Decimal);
        assert_eq!(categorize_type("BYTEA"), TypeCategory::Binary);
        assert_eq!(categorize_type("TEXT"), TypeCategory::Unknown);
    }

    #[test]
    fn test_params_macro() {
        let args = params!["x", 2, true];
        assert_eq!(
            args,
            &[
                SqlValue::Text("x".into()),
                SqlValue::Int(2),
                SqlValue::Bool(true)
            ]
        );
        let empty = params![];
        assert!(empty.is_empty());
    }

    #[test]
    fn test_from_option() {
        assert_eq!(SqlValue::from(None::<i64>), SqlValue::Null);
        assert_eq!(SqlValue::from(Some("a")), SqlValue::Text("a".into()));
    }

    #[test]
    fn test_serialize_untagged() {
        let v = serde_json::to_value(SqlValue::List(vec![
            SqlValue::Text("x".into()),
            SqlValue::Int(1),
            SqlValue::Null,
        ]))
        .unwrap();
        assert_eq!(v, serde_json::json!(["x", 1, null]));
    }
}
