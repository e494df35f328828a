//! Column-oriented tabular payloads.
//!
//! Analytics computations mostly produce tables (commit histories, blame
//! summaries, file listings). A [`Table`] is an ordered list of named,
//! typed columns of equal length. Missing cells are `None`.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::error::TableError;

/// Storage type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    Int,
    Float,
    Text,
    Bool,
    Timestamp,
}

impl DType {
    /// Stable name used by the persisted representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            DType::Int => "int64",
            DType::Float => "float64",
            DType::Text => "string",
            DType::Bool => "bool",
            DType::Timestamp => "datetime",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "int64" => Ok(DType::Int),
            "float64" => Ok(DType::Float),
            "string" => Ok(DType::Text),
            "bool" => Ok(DType::Bool),
            "datetime" => Ok(DType::Timestamp),
            other => Err(format!("unknown dtype: {}", other)),
        }
    }
}

/// Cell storage for a single column.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Int(Vec<Option<i64>>),
    Float(Vec<Option<f64>>),
    Text(Vec<Option<String>>),
    Bool(Vec<Option<bool>>),
    Timestamp(Vec<Option<DateTime<Utc>>>),
}

impl ColumnData {
    /// Create an empty column of the given type.
    pub fn empty(dtype: DType) -> Self {
        match dtype {
            DType::Int => ColumnData::Int(Vec::new()),
            DType::Float => ColumnData::Float(Vec::new()),
            DType::Text => ColumnData::Text(Vec::new()),
            DType::Bool => ColumnData::Bool(Vec::new()),
            DType::Timestamp => ColumnData::Timestamp(Vec::new()),
        }
    }

    pub fn dtype(&self) -> DType {
        match self {
            ColumnData::Int(_) => DType::Int,
            ColumnData::Float(_) => DType::Float,
            ColumnData::Text(_) => DType::Text,
            ColumnData::Bool(_) => DType::Bool,
            ColumnData::Timestamp(_) => DType::Timestamp,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ColumnData::Int(v) => v.len(),
            ColumnData::Float(v) => v.len(),
            ColumnData::Text(v) => v.len(),
            ColumnData::Bool(v) => v.len(),
            ColumnData::Timestamp(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the cell at `row` is missing. Out-of-range rows count as missing.
    pub fn is_null(&self, row: usize) -> bool {
        match self {
            ColumnData::Int(v) => !matches!(v.get(row), Some(Some(_))),
            ColumnData::Float(v) => !matches!(v.get(row), Some(Some(_))),
            ColumnData::Text(v) => !matches!(v.get(row), Some(Some(_))),
            ColumnData::Bool(v) => !matches!(v.get(row), Some(Some(_))),
            ColumnData::Timestamp(v) => !matches!(v.get(row), Some(Some(_))),
        }
    }
}

/// A named column.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub data: ColumnData,
}

impl Column {
    pub fn new(name: impl Into<String>, data: ColumnData) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    pub fn int(name: impl Into<String>, values: Vec<Option<i64>>) -> Self {
        Self::new(name, ColumnData::Int(values))
    }

    pub fn float(name: impl Into<String>, values: Vec<Option<f64>>) -> Self {
        Self::new(name, ColumnData::Float(values))
    }

    pub fn text<S: Into<String>>(name: impl Into<String>, values: Vec<Option<S>>) -> Self {
        Self::new(
            name,
            ColumnData::Text(values.into_iter().map(|v| v.map(Into::into)).collect()),
        )
    }

    pub fn bool(name: impl Into<String>, values: Vec<Option<bool>>) -> Self {
        Self::new(name, ColumnData::Bool(values))
    }

    pub fn timestamp(name: impl Into<String>, values: Vec<Option<DateTime<Utc>>>) -> Self {
        Self::new(name, ColumnData::Timestamp(values))
    }

    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A columnar result set.
///
/// Invariants (enforced by [`Table::new`]): every column has the same number
/// of rows and column names are unique.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    columns: Vec<Column>,
}

impl Table {
    /// Build a table, validating column lengths and names.
    pub fn new(columns: Vec<Column>) -> Result<Self, TableError> {
        let mut seen = HashSet::with_capacity(columns.len());
        let expected = columns.first().map(Column::len).unwrap_or(0);

        for column in &columns {
            if !seen.insert(column.name.as_str()) {
                return Err(TableError::DuplicateColumn {
                    column: column.name.clone(),
                });
            }
            if column.len() != expected {
                return Err(TableError::LengthMismatch {
                    column: column.name.clone(),
                    expected,
                    got: column.len(),
                });
            }
        }

        Ok(Self { columns })
    }

    /// A table with no columns and no rows.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn num_rows(&self) -> usize {
        self.columns.first().map(Column::len).unwrap_or(0)
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows() == 0
    }

    pub fn into_columns(self) -> Vec<Column> {
        self.columns
    }
}
