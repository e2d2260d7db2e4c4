//! Result-set rows and column metadata.

use crate::Result;
use crate::error::{Error, TypeError};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::ops::Deref;
use std::sync::Arc;

/// Metadata for one result column.
///
/// Equality and ordering are structural over the fields in declaration
/// order, comparing strings ordinally.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// The column name as the statement reports it (alias if any).
    pub name: String,
    /// Database the column originates from (`main`, `temp`, ...).
    pub database_name: String,
    /// Table the column originates from.
    pub table_name: String,
    /// Column name in the originating table.
    pub origin_name: String,
    /// Declared type, absent for expressions.
    pub declared_type: Option<String>,
}

impl ColumnInfo {
    /// Column metadata with only a name, as for a computed expression.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            database_name: String::new(),
            table_name: String::new(),
            origin_name: String::new(),
            declared_type: None,
        }
    }

    pub fn database_name(mut self, database: impl Into<String>) -> Self {
        self.database_name = database.into();
        self
    }

    pub fn table_name(mut self, table: impl Into<String>) -> Self {
        self.table_name = table.into();
        self
    }

    pub fn origin_name(mut self, origin: impl Into<String>) -> Self {
        self.origin_name = origin.into();
        self
    }

    pub fn declared_type(mut self, declared: impl Into<String>) -> Self {
        self.declared_type = Some(declared.into());
        self
    }
}

/// A value paired with the metadata of the column it came from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResultSetValue<'a> {
    pub value: &'a Value,
    pub column: &'a ColumnInfo,
}

impl Deref for ResultSetValue<'_> {
    type Target = Value;

    fn deref(&self) -> &Value {
        self.value
    }
}

/// A single row copied out of a result set.
///
/// Column metadata is shared via `Arc` between every row of the same
/// statement, so collecting many rows does not duplicate it.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    values: Vec<Value>,
    columns: Arc<[ColumnInfo]>,
}

impl Row {
    /// Create a row sharing `columns` with its siblings.
    pub fn new(columns: Arc<[ColumnInfo]>, values: Vec<Value>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { values, columns }
    }

    /// Build a row from bare column names. Handy in tests.
    pub fn from_names<S: Into<String>>(names: impl IntoIterator<Item = S>, values: Vec<Value>) -> Self {
        let columns: Arc<[ColumnInfo]> = names.into_iter().map(ColumnInfo::new).collect();
        Self::new(columns, values)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    /// The shared column metadata, for building sibling rows.
    pub fn column_info(&self) -> Arc<[ColumnInfo]> {
        Arc::clone(&self.columns)
    }

    /// Get a value by column index.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Get a value by column name. The first column with that exact name wins.
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.index_of(name).and_then(|i| self.values.get(i))
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Get a value with its column metadata.
    pub fn get_with_column(&self, index: usize) -> Option<ResultSetValue<'_>> {
        Some(ResultSetValue {
            value: self.values.get(index)?,
            column: self.columns.get(index)?,
        })
    }

    /// Get a typed value by column index.
    #[allow(clippy::result_large_err)]
    pub fn get_as<T: FromValue>(&self, index: usize) -> Result<T> {
        let value = self.get(index).ok_or_else(|| {
            Error::Type(TypeError {
                expected: std::any::type_name::<T>(),
                actual: format!(
                    "index {} out of bounds (row has {} columns)",
                    index,
                    self.len()
                ),
                column: None,
            })
        })?;
        T::from_value(value).map_err(|e| match e {
            Error::Type(mut te) => {
                te.column = self.columns.get(index).map(|c| c.name.clone());
                Error::Type(te)
            }
            e => e,
        })
    }

    /// Get a typed value by column name.
    #[allow(clippy::result_large_err)]
    pub fn get_named<T: FromValue>(&self, name: &str) -> Result<T> {
        let value = self.get_by_name(name).ok_or_else(|| {
            Error::Type(TypeError {
                expected: std::any::type_name::<T>(),
                actual: format!("column '{}' not found", name),
                column: Some(name.to_string()),
            })
        })?;
        T::from_value(value).map_err(|e| match e {
            Error::Type(mut te) => {
                te.column = Some(name.to_string());
                Error::Type(te)
            }
            e => e,
        })
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// Iterate over values paired with their column metadata.
    pub fn iter(&self) -> impl Iterator<Item = ResultSetValue<'_>> {
        self.values
            .iter()
            .zip(self.columns.iter())
            .map(|(value, column)| ResultSetValue { value, column })
    }
}

/// Strict conversion from a `Value` to a Rust type.
///
/// Unlike the `Value::to_*` coercions this refuses storage-class mismatches.
pub trait FromValue: Sized {
    #[allow(clippy::result_large_err)]
    fn from_value(value: &Value) -> Result<Self>;
}

fn mismatch(expected: &'static str, value: &Value) -> Error {
    Error::Type(TypeError {
        expected,
        actual: format!("{:?}", value.value_type()),
        column: None,
    })
}

macro_rules! impl_from_value_int {
    ($($t:ty),*) => {
        $(
            impl FromValue for $t {
                fn from_value(value: &Value) -> Result<Self> {
                    match value {
                        Value::Integer(v) => <$t>::try_from(*v).map_err(|_| {
                            Error::Type(TypeError {
                                expected: stringify!($t),
                                actual: format!("value {} out of range", v),
                                column: None,
                            })
                        }),
                        other => Err(mismatch(stringify!($t), other)),
                    }
                }
            }
        )*
    };
}

impl_from_value_int!(i8, i16, i32, u8, u16, u32, u64, usize);

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Integer(v) => Ok(*v),
            other => Err(mismatch("i64", other)),
        }
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Integer(v) => Ok(*v != 0),
            other => Err(mismatch("bool", other)),
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Float(v) => Ok(*v),
            Value::Integer(v) => Ok(*v as f64),
            other => Err(mismatch("f64", other)),
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
impl FromValue for f32 {
    fn from_value(value: &Value) -> Result<Self> {
        f64::from_value(value).map(|v| v as f32)
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Text(s) => Ok(s.clone()),
            other => Err(mismatch("String", other)),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Blob(b) => Ok(b.clone()),
            Value::Text(s) => Ok(s.as_bytes().to_vec()),
            other => Err(mismatch("Vec<u8>", other)),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self> {
        if value.is_null() {
            Ok(None)
        } else {
            T::from_value(value).map(Some)
        }
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self> {
        Ok(value.clone())
    }
}
