//! In-memory tabular data: the shape of every query result and of the
//! staged change-sets handed to the merge engine.
//!
//! A [`Table`] is an ordered list of column names plus rows of [`Value`]s.
//! [`Table::empty`] has no columns as well as no rows; callers branch on
//! "are there any columns at all", so a zero-row result never carries a
//! column list.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};

use crate::error::{Result, StorageError};

/// A single cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    DateTimeOffset(DateTime<FixedOffset>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Truthiness as SQL Server sees a BIT: non-zero integers are true.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(i) => Some(*i != 0),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Convert a JSON scalar into a value. Nested arrays and objects are
    /// kept as their JSON text.
    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => n.as_f64().map(Value::Float).unwrap_or(Value::Null),
            },
            serde_json::Value::String(s) => Value::Text(s),
            other => Value::Text(other.to_string()),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Bytes(b) => serde_json::Value::Array(
                b.iter().map(|byte| serde_json::Value::from(*byte)).collect(),
            ),
            Value::Date(d) => serde_json::Value::String(d.format("%Y-%m-%d").to_string()),
            Value::Time(t) => serde_json::Value::String(t.format("%H:%M:%S%.f").to_string()),
            Value::DateTime(dt) => {
                serde_json::Value::String(dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
            }
            Value::DateTimeOffset(dt) => serde_json::Value::String(dt.to_rfc3339()),
        }
    }

    /// The column type this value would be stored as.
    fn sql_type(&self) -> Option<SqlType> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some(SqlType::Bit),
            Value::Int(_) => Some(SqlType::BigInt),
            Value::Float(_) => Some(SqlType::Float),
            Value::Text(_) => Some(SqlType::NVarCharMax),
            Value::Bytes(_) => Some(SqlType::VarBinaryMax),
            Value::Date(_) => Some(SqlType::Date),
            Value::Time(_) => Some(SqlType::Time),
            Value::DateTime(_) => Some(SqlType::DateTime2),
            Value::DateTimeOffset(_) => Some(SqlType::DateTimeOffset),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// SQL Server column types used when materializing a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Bit,
    BigInt,
    Float,
    NVarCharMax,
    VarBinaryMax,
    Date,
    Time,
    DateTime2,
    DateTimeOffset,
}

impl SqlType {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SqlType::Bit => "BIT",
            SqlType::BigInt => "BIGINT",
            SqlType::Float => "FLOAT",
            SqlType::NVarCharMax => "NVARCHAR(MAX)",
            SqlType::VarBinaryMax => "VARBINARY(MAX)",
            SqlType::Date => "DATE",
            SqlType::Time => "TIME",
            SqlType::DateTime2 => "DATETIME2",
            SqlType::DateTimeOffset => "DATETIMEOFFSET",
        }
    }

    /// The narrowest type able to hold values of both `self` and `other`.
    fn widen(self, other: SqlType) -> SqlType {
        use SqlType::*;
        match (self, other) {
            (a, b) if a == b => a,
            (BigInt, Float) | (Float, BigInt) => Float,
            (Bit, BigInt) | (BigInt, Bit) => BigInt,
            (Bit, Float) | (Float, Bit) => Float,
            (Date, DateTime2) | (DateTime2, Date) => DateTime2,
            _ => NVarCharMax,
        }
    }
}

/// An ordered set of named columns and the rows under them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    /// The zero-column, zero-row table.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A table with columns but no rows yet.
    pub fn with_columns<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Build a table, checking that every row has one value per column.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Result<Self> {
        if let Some((i, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != columns.len())
        {
            return Err(StorageError::InvalidArgument(format!(
                "row {i} has {} values but the table has {} columns",
                row.len(),
                columns.len()
            )));
        }
        Ok(Self { columns, rows })
    }

    pub fn push_row(&mut self, row: Vec<Value>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(StorageError::InvalidArgument(format!(
                "row has {} values but the table has {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    /// `(rows, columns)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.rows.len(), self.columns.len())
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// The value at `row` under column `name`.
    pub fn get(&self, row: usize, name: &str) -> Option<&Value> {
        let idx = self.column_index(name)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }

    /// A copy of the table without the named column. Missing columns are
    /// ignored.
    pub fn drop_column(&self, name: &str) -> Table {
        let Some(idx) = self.column_index(name) else {
            return self.clone();
        };
        let mut columns = self.columns.clone();
        columns.remove(idx);
        let rows = self
            .rows
            .iter()
            .map(|row| {
                let mut row = row.clone();
                row.remove(idx);
                row
            })
            .collect();
        Table { columns, rows }
    }

    /// Infer a SQL Server column type for every column from its values.
    /// Columns with only NULLs (or no rows at all) become `NVARCHAR(MAX)`.
    pub fn infer_column_types(&self) -> Vec<SqlType> {
        (0..self.columns.len())
            .map(|idx| {
                self.rows
                    .iter()
                    .filter_map(|row| row[idx].sql_type())
                    .reduce(SqlType::widen)
                    .unwrap_or(SqlType::NVarCharMax)
            })
            .collect()
    }

    /// Parse a JSON array of row objects. Column order follows first
    /// appearance; keys missing from a row become NULL.
    pub fn from_json_rows(json: serde_json::Value) -> Result<Self> {
        let serde_json::Value::Array(items) = json else {
            return Err(StorageError::InvalidArgument(
                "expected a JSON array of row objects".into(),
            ));
        };

        let mut objects = Vec::with_capacity(items.len());
        let mut columns: Vec<String> = Vec::new();
        for (i, item) in items.into_iter().enumerate() {
            let serde_json::Value::Object(map) = item else {
                return Err(StorageError::InvalidArgument(format!(
                    "row {i} is not a JSON object"
                )));
            };
            for key in map.keys() {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
            objects.push(map);
        }

        let rows = objects
            .into_iter()
            .map(|mut map| {
                columns
                    .iter()
                    .map(|c| map.remove(c).map(Value::from_json).unwrap_or(Value::Null))
                    .collect()
            })
            .collect();
        Ok(Table { columns, rows })
    }

    /// Render as a JSON array of row objects.
    pub fn to_json_rows(&self) -> serde_json::Value {
        serde_json::Value::Array(
            self.rows
                .iter()
                .map(|row| {
                    serde_json::Value::Object(
                        self.columns
                            .iter()
                            .cloned()
                            .zip(row.iter().map(Value::to_json))
                            .collect(),
                    )
                })
                .collect(),
        )
    }
}
