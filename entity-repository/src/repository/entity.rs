//! Entities and the row representation exchanged with a store
//!
//! The repository never inspects an entity's fields directly. An [`Entity`]
//! describes its table and columns and converts itself to and from a [`Row`],
//! a column-name to [`Value`] map. Stores filter, project and page rows; the
//! repository turns the surviving rows back into typed results.
//!
//! # Example
//!
//! ```rust
//! use entity_repository::repository::{Entity, RepositoryResult, Row};
//!
//! #[derive(Debug, Clone, PartialEq)]
//! struct Author {
//!     id: i64,
//!     name: String,
//! }
//!
//! impl Entity for Author {
//!     const NAME: &'static str = "Author";
//!     const TABLE: &'static str = "authors";
//!     const COLUMNS: &'static [&'static str] = &["id", "name"];
//!
//!     fn key(&self) -> i64 {
//!         self.id
//!     }
//!
//!     fn set_key(&mut self, key: i64) {
//!         self.id = key;
//!     }
//!
//!     fn to_row(&self) -> Row {
//!         Row::new().with("id", self.id).with("name", self.name.as_str())
//!     }
//!
//!     fn from_row(row: &Row) -> RepositoryResult<Self> {
//!         Ok(Self {
//!             id: row.get("id")?,
//!             name: row.get("name")?,
//!         })
//!     }
//! }
//!
//! let author = Author { id: 3, name: "Le Guin".into() };
//! assert_eq!(Author::from_row(&author.to_row()).unwrap(), author);
//! ```

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};

use super::error::{RepositoryError, RepositoryOperation};
use super::RepositoryResult;

/// A persisted record type addressable by an integer primary key
///
/// A key of `0` means the store has not assigned one yet; [`Entity::set_key`]
/// receives the generated key after a successful insert.
pub trait Entity: Clone + Send + Sync + 'static {
    /// Human-readable type name used in errors and logs
    const NAME: &'static str;
    /// Backing table
    const TABLE: &'static str;
    /// Primary-key column
    const KEY: &'static str = "id";
    /// Every persisted column, key included
    const COLUMNS: &'static [&'static str];

    /// Current primary key (`0` when unassigned)
    fn key(&self) -> i64;

    /// Store the generated primary key
    fn set_key(&mut self, key: i64);

    /// Full persisted state as a row
    fn to_row(&self) -> Row;

    /// Rebuild the entity from a row carrying every column
    fn from_row(row: &Row) -> RepositoryResult<Self>;
}

/// Static description of an entity's table, handed to stores
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityDescriptor {
    pub name: &'static str,
    pub table: &'static str,
    pub key: &'static str,
    pub columns: &'static [&'static str],
}

impl EntityDescriptor {
    pub fn of<E: Entity>() -> Self {
        Self {
            name: E::NAME,
            table: E::TABLE,
            key: E::KEY,
            columns: E::COLUMNS,
        }
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.contains(&column)
    }

    /// Columns other than the primary key
    pub fn value_columns(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.columns.iter().copied().filter(move |c| *c != self.key)
    }

    /// Key value carried by a row (`0` when absent or null)
    pub fn key_of(&self, row: &Row) -> i64 {
        row.value(self.key).and_then(Value::as_i64).unwrap_or(0)
    }
}

/// A single column value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
}

impl Value {
    /// Name of the variant, for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Timestamp(_) => "timestamp",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Integer content, if this is an integer
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(n) => write!(f, "{}", n),
            Self::Float(x) => write!(f, "{}", x),
            Self::Text(s) => write!(f, "'{}'", s),
            Self::Timestamp(ts) => write!(f, "{}", ts.to_rfc3339()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Int(i64::from(n))
    }
}

impl From<i16> for Value {
    fn from(n: i16) -> Self {
        Self::Int(i64::from(n))
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(ts: DateTime<Utc>) -> Self {
        Self::Timestamp(ts)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Conversion from a column [`Value`] into a Rust type
pub trait FromValue: Sized {
    /// Convert, returning `None` when the value has the wrong shape
    fn from_value(value: &Value) -> Option<Self>;
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Option<Self> {
        Some(value.clone())
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_i64()
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_i64().and_then(|n| i32::try_from(n).ok())
    }
}

impl FromValue for i16 {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_i64().and_then(|n| i16::try_from(n).ok())
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Float(x) => Some(*x),
            Value::Int(n) => Some(*n as f64),
            _ => None,
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Text(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl FromValue for DateTime<Utc> {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(None),
            other => T::from_value(other).map(Some),
        }
    }
}

/// A materialised row: column name to value
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    values: BTreeMap<String, Value>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    #[must_use]
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(column, value);
        self
    }

    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(column.into(), value.into());
    }

    /// Raw value of a column, if present
    pub fn value(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.values.contains_key(column)
    }

    /// Typed value of a column
    ///
    /// A missing column or a value of the wrong shape is a serialization error.
    pub fn get<T: FromValue>(&self, column: &str) -> RepositoryResult<T> {
        let value = self.values.get(column).ok_or_else(|| {
            RepositoryError::serialization_error(
                RepositoryOperation::FindAll,
                format!("column `{}` is not present in the row", column),
            )
        })?;
        T::from_value(value).ok_or_else(|| {
            RepositoryError::serialization_error(
                RepositoryOperation::FindAll,
                format!(
                    "column `{}` holds a {} value that cannot be converted to {}",
                    column,
                    value.type_name(),
                    std::any::type_name::<T>()
                ),
            )
        })
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Copy only the given columns into a new row
    pub fn project<S: AsRef<str>>(&self, columns: &[S]) -> RepositoryResult<Row> {
        let mut projected = Row::new();
        for column in columns {
            let column = column.as_ref();
            let value = self.values.get(column).ok_or_else(|| {
                RepositoryError::invalid_query(
                    RepositoryOperation::Project,
                    format!("cannot project unknown column `{}`", column),
                )
            })?;
            projected.insert(column, value.clone());
        }
        Ok(projected)
    }
}

impl FromIterator<(String, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::RepositoryErrorKind;

    #[test]
    fn test_row_typed_get() {
        let row = Row::new()
            .with("id", 5_i64)
            .with("title", "Dune")
            .with("pages", 412_i32)
            .with("subtitle", Option::<String>::None);

        assert_eq!(row.get::<i64>("id").unwrap(), 5);
        assert_eq!(row.get::<i32>("pages").unwrap(), 412);
        assert_eq!(row.get::<String>("title").unwrap(), "Dune");
        assert_eq!(row.get::<Option<String>>("subtitle").unwrap(), None);
    }

    #[test]
    fn test_row_get_missing_column() {
        let row = Row::new().with("id", 1_i64);
        let err = row.get::<String>("title").unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::SerializationError);
        assert!(err.message.contains("title"));
    }

    #[test]
    fn test_row_get_wrong_type() {
        let row = Row::new().with("title", "Dune");
        let err = row.get::<i64>("title").unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::SerializationError);
    }

    #[test]
    fn test_narrow_integer_overflow_is_rejected() {
        let row = Row::new().with("big", i64::from(i32::MAX) + 1);
        assert!(row.get::<i32>("big").is_err());
    }

    #[test]
    fn test_row_project() {
        let row = Row::new().with("id", 1_i64).with("title", "Dune").with("pages", 412_i32);
        let projected = row.project(&["title"]).unwrap();
        assert_eq!(projected.len(), 1);
        assert_eq!(projected.get::<String>("title").unwrap(), "Dune");

        let err = row.project(&["isbn"]).unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::InvalidQuery);
    }

    #[test]
    fn test_value_display() {
        assert_eq!(Value::Null.to_string(), "NULL");
        assert_eq!(Value::from("x").to_string(), "'x'");
        assert_eq!(Value::from(3_i32).to_string(), "3");
    }
}
