use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use super::error::{DataError, Result};

// ---------------------------------------------------------------------------
// FieldKind – the three semantic column kinds the pipeline understands
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FieldKind {
    /// Dates / timestamps: range filters and time-bucketed grouping.
    Temporal,
    /// Strings and booleans: inclusion-set filters and grouping dimensions.
    Categorical,
    /// Integers and floats: range filters and aggregation targets.
    Numeric,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::Temporal => write!(f, "temporal"),
            FieldKind::Categorical => write!(f, "categorical"),
            FieldKind::Numeric => write!(f, "numeric"),
        }
    }
}

// ---------------------------------------------------------------------------
// Value – a single cell
// ---------------------------------------------------------------------------

/// A dynamically-typed cell value mirroring common dataframe dtypes.
/// Used as a `BTreeMap` / `BTreeSet` key downstream, so it must be `Ord`.
#[derive(Debug, Clone)]
pub enum Value {
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    Timestamp(NaiveDateTime),
    /// Explicit "absent" marker. Never coerced to a default.
    Null,
}

// -- Manual Eq/Ord/Hash so floats can live in ordered sets --

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        use Value::*;
        fn discriminant(v: &Value) -> u8 {
            match v {
                Null => 0,
                Bool(_) => 1,
                Integer(_) => 2,
                Float(_) => 3,
                Text(_) => 4,
                Timestamp(_) => 5,
            }
        }
        let da = discriminant(self);
        let db = discriminant(other);
        if da != db {
            return da.cmp(&db);
        }
        match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Bool(a), Bool(b)) => a.cmp(b),
            (Integer(a), Integer(b)) => a.cmp(b),
            (Float(a), Float(b)) => a.total_cmp(b),
            (Text(a), Text(b)) => a.cmp(b),
            (Timestamp(a), Timestamp(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }
}

impl std::hash::Hash for Value {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Text(s) => s.hash(state),
            Value::Integer(i) => i.hash(state),
            Value::Float(f) => f.to_bits().hash(state),
            Value::Bool(b) => b.hash(state),
            Value::Timestamp(t) => t.hash(state),
            Value::Null => {}
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(s) => write!(f, "{s}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v:.2}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Timestamp(t) => write!(f, "{}", format_timestamp(t)),
            Value::Null => write!(f, "unknown"),
        }
    }
}

/// Midnight timestamps print as plain dates.
pub fn format_timestamp(t: &NaiveDateTime) -> String {
    if t.time() == NaiveTime::MIN {
        t.format("%Y-%m-%d").to_string()
    } else {
        t.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}

impl Value {
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    /// A timestamp at midnight of the given day.
    pub fn date(d: NaiveDate) -> Self {
        Value::Timestamp(d.and_time(NaiveTime::MIN))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The field kind this value belongs to; `None` for `Null`.
    pub fn kind(&self) -> Option<FieldKind> {
        match self {
            Value::Text(_) | Value::Bool(_) => Some(FieldKind::Categorical),
            Value::Integer(_) | Value::Float(_) => Some(FieldKind::Numeric),
            Value::Timestamp(_) => Some(FieldKind::Temporal),
            Value::Null => None,
        }
    }

    /// Try to interpret the value as an `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            Value::Timestamp(t) => Some(*t),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
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

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(t: NaiveDateTime) -> Self {
        Value::Timestamp(t)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Field {
    pub name: String,
    pub kind: FieldKind,
}

impl Field {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Field {
            name: name.into(),
            kind,
        }
    }
}

/// Ordered list of named, typed fields shared by every record of a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Schema {
    pub fields: Vec<Field>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Self {
        Schema { fields }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Position and definition of `name`, or `SchemaMismatch`.
    pub fn field(&self, name: &str) -> Result<(usize, &Field)> {
        self.index_of(name)
            .map(|i| (i, &self.fields[i]))
            .ok_or_else(|| DataError::missing(name))
    }

    /// Like [`Schema::field`] but also checks the field kind.
    pub fn field_of_kind(&self, name: &str, expected: FieldKind) -> Result<usize> {
        let (idx, field) = self.field(name)?;
        if field.kind != expected {
            return Err(DataError::KindMismatch {
                field: name.to_string(),
                expected,
                found: field.kind,
            });
        }
        Ok(idx)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    pub fn fields_of_kind(&self, kind: FieldKind) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(move |f| f.kind == kind)
    }
}

// ---------------------------------------------------------------------------
// Record – one row
// ---------------------------------------------------------------------------

/// One row of the source table (one visit, one referral, ...).
/// Values are positional and line up with the dataset's schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Record {
    pub values: Vec<Value>,
}

impl Record {
    pub fn new(values: Vec<Value>) -> Self {
        Record { values }
    }

    pub fn get(&self, idx: usize) -> &Value {
        self.values.get(idx).unwrap_or(&Value::Null)
    }
}

// ---------------------------------------------------------------------------
// Dataset – the complete loaded table
// ---------------------------------------------------------------------------

/// An ordered sequence of records sharing one schema.
///
/// The schema is validated once here; the filter and aggregate passes rely
/// on it afterwards and only resolve field names to positions.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    schema: Arc<Schema>,
    records: Vec<Record>,
}

impl Dataset {
    pub fn new(schema: Schema, records: Vec<Record>) -> Result<Self> {
        Self::with_shared_schema(Arc::new(schema), records)
    }

    pub fn with_shared_schema(schema: Arc<Schema>, records: Vec<Record>) -> Result<Self> {
        for (row, record) in records.iter().enumerate() {
            if record.values.len() != schema.len() {
                return Err(DataError::InvalidRecord {
                    row,
                    reason: format!(
                        "has {} values but the schema has {} fields",
                        record.values.len(),
                        schema.len()
                    ),
                });
            }
            for (value, field) in record.values.iter().zip(&schema.fields) {
                if let Some(kind) = value.kind() {
                    if kind != field.kind {
                        return Err(DataError::InvalidRecord {
                            row,
                            reason: format!(
                                "value '{value}' in {} column '{}' is {kind}",
                                field.kind, field.name
                            ),
                        });
                    }
                }
            }
        }
        Ok(Dataset { schema, records })
    }

    pub fn empty(schema: Arc<Schema>) -> Self {
        Dataset {
            schema,
            records: Vec::new(),
        }
    }

    /// Build a dataset from records already known to fit `schema`
    /// (subsets of another dataset).
    pub(crate) fn from_validated(schema: Arc<Schema>, records: Vec<Record>) -> Self {
        Dataset { schema, records }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn shared_schema(&self) -> Arc<Schema> {
        Arc::clone(&self.schema)
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the dataset is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterate the values of one column in record order.
    pub fn column(&self, name: &str) -> Result<impl Iterator<Item = &Value>> {
        let (idx, _) = self.schema.field(name)?;
        Ok(self.records.iter().map(move |r| r.get(idx)))
    }

    /// The sorted set of distinct values of a column (including `Null`).
    pub fn distinct_values(&self, name: &str) -> Result<BTreeSet<Value>> {
        Ok(self.column(name)?.cloned().collect())
    }

    /// Smallest and largest present value of a numeric column.
    pub fn numeric_extent(&self, name: &str) -> Result<Option<(f64, f64)>> {
        self.schema.field_of_kind(name, FieldKind::Numeric)?;
        Ok(self
            .column(name)?
            .filter_map(Value::as_f64)
            .fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            }))
    }

    /// First and last calendar day present in a temporal column.
    pub fn temporal_extent(&self, name: &str) -> Result<Option<(NaiveDate, NaiveDate)>> {
        self.schema.field_of_kind(name, FieldKind::Temporal)?;
        Ok(self
            .column(name)?
            .filter_map(Value::as_timestamp)
            .map(|t| t.date())
            .fold(None, |acc, d| match acc {
                None => Some((d, d)),
                Some((lo, hi)) => Some((lo.min(d), hi.max(d))),
            }))
    }
}
