//! Table definitions and row values.

use crate::error::{CoreError, CoreResult};
use crate::types::RowKey;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// A single column value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// SQL-style null.
    Null,
    /// 64-bit signed integer.
    Integer(i64),
    /// 64-bit float.
    Real(f64),
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Blob(Vec<u8>),
}

impl Value {
    /// Convenience constructor for text values.
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    /// Returns the integer payload, if any.
    #[must_use]
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the text payload, if any.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    fn fits(&self, ty: ColumnType) -> bool {
        matches!(
            (self, ty),
            (Value::Null, _)
                | (Value::Integer(_), ColumnType::Integer)
                | (Value::Real(_), ColumnType::Real)
                | (Value::Integer(_), ColumnType::Real)
                | (Value::Text(_), ColumnType::Text)
                | (Value::Blob(_), ColumnType::Blob)
        )
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Integer(v) => write!(f, "{v}"),
            Value::Real(v) => write!(f, "{v}"),
            Value::Text(s) => write!(f, "{s}"),
            Value::Blob(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

/// Declared type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    /// 64-bit signed integer.
    Integer,
    /// 64-bit float.
    Real,
    /// UTF-8 text.
    Text,
    /// Raw bytes.
    Blob,
}

/// A named, typed column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name.
    pub name: String,
    /// Column type.
    pub ty: ColumnType,
}

/// Definition of a table.
///
/// The first column is the primary key and must be an integer column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableDef {
    /// Table name.
    pub name: String,
    /// Columns in declaration order.
    pub columns: Vec<ColumnDef>,
}

impl TableDef {
    /// Starts a table definition with no columns.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
        }
    }

    /// Appends a column.
    #[must_use]
    pub fn column(mut self, name: impl Into<String>, ty: ColumnType) -> Self {
        self.columns.push(ColumnDef {
            name: name.into(),
            ty,
        });
        self
    }

    /// Checks that the definition is usable.
    ///
    /// # Errors
    ///
    /// Returns `SchemaMismatch` if the name is empty, there are no columns,
    /// the key column is not an integer, or column names repeat.
    pub fn validate(&self) -> CoreResult<()> {
        if self.name.is_empty() {
            return Err(CoreError::schema_mismatch("", "table name is empty"));
        }
        let first = self
            .columns
            .first()
            .ok_or_else(|| CoreError::schema_mismatch(&self.name, "table has no columns"))?;
        if first.ty != ColumnType::Integer {
            return Err(CoreError::schema_mismatch(
                &self.name,
                format!("key column '{}' must be an integer", first.name),
            ));
        }
        let mut seen = HashSet::new();
        for col in &self.columns {
            if !seen.insert(col.name.as_str()) {
                return Err(CoreError::schema_mismatch(
                    &self.name,
                    format!("duplicate column '{}'", col.name),
                ));
            }
        }
        Ok(())
    }

    /// Validates a row against this definition and returns its key.
    ///
    /// # Errors
    ///
    /// Returns `SchemaMismatch` on wrong arity, a null or non-integer key,
    /// or a value that does not fit its column type.
    pub fn check_row(&self, values: &[Value]) -> CoreResult<RowKey> {
        if values.len() != self.columns.len() {
            return Err(CoreError::schema_mismatch(
                &self.name,
                format!(
                    "expected {} values, got {}",
                    self.columns.len(),
                    values.len()
                ),
            ));
        }
        for (value, col) in values.iter().zip(&self.columns) {
            if !value.fits(col.ty) {
                return Err(CoreError::schema_mismatch(
                    &self.name,
                    format!("value {value:?} does not fit column '{}'", col.name),
                ));
            }
        }
        values
            .first()
            .and_then(Value::as_integer)
            .ok_or_else(|| CoreError::schema_mismatch(&self.name, "primary key must not be null"))
    }
}
