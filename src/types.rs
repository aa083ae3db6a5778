//! Core data model types.
//!
//! Every stage of the crate works on an in-memory [`DataSet`]: a [`Schema`] (an ordered list of
//! typed [`Field`]s) plus row-major [`Value`] storage. Transforms borrow their input and return a
//! new dataset.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::NaiveDateTime;

use crate::error::{ReconError, ReconResult};

/// Logical data type for a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    /// 64-bit signed integer.
    Int64,
    /// 64-bit floating point number.
    Float64,
    /// Boolean.
    Bool,
    /// UTF-8 string.
    Utf8,
    /// Timezone-naive timestamp.
    Datetime,
}

impl DataType {
    /// `Int64` and `Float64` are numeric; the post-join null fill and the comparators only
    /// touch numeric columns.
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Int64 | Self::Float64)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Int64 => "int64",
            Self::Float64 => "float64",
            Self::Bool => "bool",
            Self::Utf8 => "utf8",
            Self::Datetime => "datetime",
        };
        f.write_str(name)
    }
}

/// A single named, typed field in a [`Schema`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    /// Field/column name.
    pub name: String,
    /// Field data type.
    pub data_type: DataType,
}

impl Field {
    /// Create a new field.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// Ordered list of fields describing the shape of a [`DataSet`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    /// Ordered list of fields.
    pub fields: Vec<Field>,
}

impl Schema {
    /// Create a new schema from fields.
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    /// Iterate field names in order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Returns the index of a field by name, if present.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Returns `true` if a field with this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }
}

/// A single typed value in a [`DataSet`].
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Missing/empty value.
    Null,
    /// 64-bit signed integer.
    Int64(i64),
    /// 64-bit float.
    Float64(f64),
    /// Boolean.
    Bool(bool),
    /// UTF-8 string.
    Utf8(String),
    /// Timezone-naive timestamp.
    Datetime(NaiveDateTime),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Logical type of the value; `None` for nulls.
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Self::Null => None,
            Self::Int64(_) => Some(DataType::Int64),
            Self::Float64(_) => Some(DataType::Float64),
            Self::Bool(_) => Some(DataType::Bool),
            Self::Utf8(_) => Some(DataType::Utf8),
            Self::Datetime(_) => Some(DataType::Datetime),
        }
    }

    /// Numeric view of the value. `None` for nulls and non-numeric values.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int64(v) => Some(*v as f64),
            Self::Float64(v) => Some(*v),
            _ => None,
        }
    }

    /// Hashable, totally ordered form of the value, used for group-by and join keys.
    pub fn key(&self) -> KeyValue {
        match self {
            Self::Null => KeyValue::Null,
            Self::Int64(v) => KeyValue::Int(*v),
            Self::Float64(v) => {
                let fits = v.fract() == 0.0 && *v >= i64::MIN as f64 && *v < i64::MAX as f64;
                if fits {
                    KeyValue::Int(*v as i64)
                } else {
                    KeyValue::Float(FloatKey(*v))
                }
            }
            Self::Bool(v) => KeyValue::Bool(*v),
            Self::Utf8(s) => KeyValue::Utf8(s.clone()),
            Self::Datetime(d) => KeyValue::Datetime(*d),
        }
    }

    /// Total order over values of the same logical type; nulls sort last.
    pub fn total_cmp(&self, other: &Self) -> Ordering {
        if let (Self::Int64(a), Self::Int64(b)) = (self, other) {
            return a.cmp(b);
        }
        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) => a.total_cmp(&b),
            _ => self.key().cmp(&other.key()),
        }
    }
}

impl fmt::Display for Value {
    /// Text rendering used for synthetic join keys and CSV reports. Nulls render empty.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Int64(v) => write!(f, "{v}"),
            Self::Float64(v) if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e16 => {
                write!(f, "{v:.1}")
            }
            Self::Float64(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Utf8(s) => f.write_str(s),
            Self::Datetime(d) => write!(f, "{}", d.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

/// `f64` wrapper with bitwise equality and `total_cmp` ordering.
#[derive(Debug, Clone, Copy)]
pub struct FloatKey(pub f64);

impl FloatKey {
    fn canonical_bits(self) -> u64 {
        if self.0 == 0.0 {
            0.0f64.to_bits()
        } else if self.0.is_nan() {
            f64::NAN.to_bits()
        } else {
            self.0.to_bits()
        }
    }
}

impl PartialEq for FloatKey {
    fn eq(&self, other: &Self) -> bool {
        self.canonical_bits() == other.canonical_bits()
    }
}

impl Eq for FloatKey {}

impl Hash for FloatKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical_bits().hash(state);
    }
}

impl PartialOrd for FloatKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FloatKey {
    fn cmp(&self, other: &Self) -> Ordering {
        if self == other {
            Ordering::Equal
        } else {
            self.0.total_cmp(&other.0)
        }
    }
}

/// Key form of a [`Value`].
///
/// Nulls are a regular key value (`Null == Null`) and sort after everything else. Integral
/// floats collapse onto `Int` so `1` and `1.0` land in the same group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyValue {
    Bool(bool),
    Int(i64),
    Float(FloatKey),
    Datetime(NaiveDateTime),
    Utf8(String),
    Null,
}

/// In-memory tabular dataset.
///
/// Rows are stored as `Vec<Vec<Value>>` in the same order as the [`Schema`] fields.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSet {
    /// Schema describing row shape.
    pub schema: Schema,
    /// Row-major value storage.
    pub rows: Vec<Vec<Value>>,
}

impl DataSet {
    /// Create a dataset from schema and rows.
    pub fn new(schema: Schema, rows: Vec<Vec<Value>>) -> Self {
        Self { schema, rows }
    }

    /// Create a dataset with the given schema and no rows.
    pub fn empty(schema: Schema) -> Self {
        Self::new(schema, Vec::new())
    }

    /// Number of rows in the dataset.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Index of `name`, or a schema error naming the missing column and the `context` that
    /// needed it.
    pub fn require_column(&self, name: &str, context: &str) -> ReconResult<usize> {
        self.schema.index_of(name).ok_or_else(|| {
            ReconError::schema(format!(
                "{context}: missing column '{name}'. columns={:?}",
                self.schema.field_names().collect::<Vec<_>>()
            ))
        })
    }

    /// Iterate the values of column `idx` in row order.
    pub fn column(&self, idx: usize) -> impl Iterator<Item = &Value> + '_ {
        self.rows.iter().map(move |row| &row[idx])
    }

    /// Look up a cell by row index and column name.
    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.schema.index_of(column)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }

    /// Create a new dataset containing only rows that match `predicate`.
    ///
    /// The returned dataset preserves the original schema.
    pub fn filter_rows<F>(&self, mut predicate: F) -> Self
    where
        F: FnMut(&[Value]) -> bool,
    {
        let rows = self
            .rows
            .iter()
            .filter(|row| predicate(row.as_slice()))
            .cloned()
            .collect();
        Self {
            schema: self.schema.clone(),
            rows,
        }
    }

    /// Create a new dataset by applying `mapper` to every row.
    ///
    /// The returned dataset preserves the original schema.
    ///
    /// # Panics
    ///
    /// Panics if `mapper` returns a row with a different length than the schema field count.
    pub fn map_rows<F>(&self, mut mapper: F) -> Self
    where
        F: FnMut(&[Value]) -> Vec<Value>,
    {
        let expected_len = self.schema.fields.len();
        let rows = self
            .rows
            .iter()
            .map(|row| {
                let out = mapper(row.as_slice());
                assert!(
                    out.len() == expected_len,
                    "mapped row length {} does not match schema length {}",
                    out.len(),
                    expected_len
                );
                out
            })
            .collect();
        Self {
            schema: self.schema.clone(),
            rows,
        }
    }

    /// Project onto `columns` (in the given order), skipping names that do not exist.
    pub fn select(&self, columns: &[String]) -> Self {
        let mut seen = HashSet::new();
        let idxs: Vec<usize> = columns
            .iter()
            .filter(|c| seen.insert(c.as_str()))
            .filter_map(|c| self.schema.index_of(c))
            .collect();
        let fields = idxs.iter().map(|&i| self.schema.fields[i].clone()).collect();
        let rows = self
            .rows
            .iter()
            .map(|row| idxs.iter().map(|&i| row[i].clone()).collect())
            .collect();
        Self::new(Schema::new(fields), rows)
    }

    /// Append a column, or replace it in place if a column with the same name exists.
    ///
    /// # Panics
    ///
    /// Panics if `values.len()` differs from the row count.
    pub fn with_column(mut self, field: Field, values: Vec<Value>) -> Self {
        assert!(
            values.len() == self.rows.len(),
            "column '{}' has {} values for {} rows",
            field.name,
            values.len(),
            self.rows.len()
        );
        match self.schema.index_of(&field.name) {
            Some(idx) => {
                self.schema.fields[idx] = field;
                for (row, v) in self.rows.iter_mut().zip(values) {
                    row[idx] = v;
                }
            }
            None => {
                self.schema.fields.push(field);
                for (row, v) in self.rows.iter_mut().zip(values) {
                    row.push(v);
                }
            }
        }
        self
    }
}
