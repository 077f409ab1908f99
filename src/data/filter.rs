use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};

use chrono::NaiveDate;

use super::error::{DataError, Result};
use super::model::{Dataset, FieldKind, Record, Schema, Value};

// ---------------------------------------------------------------------------
// Constraint: what one field must satisfy
// ---------------------------------------------------------------------------

/// A per-field predicate. Every bound is inclusive.
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    /// Temporal field: the record's calendar day lies in `[start, end]`.
    DateRange { start: NaiveDate, end: NaiveDate },
    /// Categorical field: the record's value is one of the selected values.
    /// An empty set matches nothing.
    OneOf(BTreeSet<Value>),
    /// Numeric field: `min <= value <= max`.
    NumberRange { min: f64, max: f64 },
}

impl Constraint {
    pub fn one_of<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Constraint::OneOf(values.into_iter().map(Into::into).collect())
    }

    /// The field kind this constraint applies to.
    pub fn kind(&self) -> FieldKind {
        match self {
            Constraint::DateRange { .. } => FieldKind::Temporal,
            Constraint::OneOf(_) => FieldKind::Categorical,
            Constraint::NumberRange { .. } => FieldKind::Numeric,
        }
    }

    /// Evaluate against a single cell. Absent values only pass a `OneOf`
    /// that explicitly selects `Null`.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Constraint::DateRange { start, end } => value
                .as_timestamp()
                .map(|t| {
                    let day = t.date();
                    *start <= day && day <= *end
                })
                .unwrap_or(false),
            Constraint::OneOf(selected) => selected.contains(value),
            Constraint::NumberRange { min, max } => value
                .as_f64()
                .map(|v| *min <= v && v <= *max)
                .unwrap_or(false),
        }
    }
}

impl Hash for Constraint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Constraint::DateRange { start, end } => {
                start.hash(state);
                end.hash(state);
            }
            Constraint::OneOf(selected) => selected.hash(state),
            Constraint::NumberRange { min, max } => {
                min.to_bits().hash(state);
                max.to_bits().hash(state);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// FilterCriteria: independent constraints combined with AND
// ---------------------------------------------------------------------------

/// Column name → constraint. A column without an entry is unconstrained.
#[derive(Debug, Clone, PartialEq, Hash, Default)]
pub struct FilterCriteria {
    constraints: BTreeMap<String, Constraint>,
}

impl FilterCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: impl Into<String>, constraint: Constraint) -> Self {
        self.set(field, constraint);
        self
    }

    pub fn set(&mut self, field: impl Into<String>, constraint: Constraint) {
        self.constraints.insert(field.into(), constraint);
    }

    pub fn remove(&mut self, field: &str) -> Option<Constraint> {
        self.constraints.remove(field)
    }

    pub fn get(&self, field: &str) -> Option<&Constraint> {
        self.constraints.get(field)
    }

    pub fn get_mut(&mut self, field: &str) -> Option<&mut Constraint> {
        self.constraints.get_mut(field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Constraint)> {
        self.constraints.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    /// Resolve every constraint to a column position, checking that the
    /// column exists and has the kind the constraint expects.
    fn resolve<'a>(&'a self, schema: &Schema) -> Result<Vec<(usize, &'a Constraint)>> {
        self.constraints
            .iter()
            .map(|(name, constraint)| {
                let (idx, field) = schema.field(name)?;
                if field.kind != constraint.kind() {
                    return Err(DataError::KindMismatch {
                        field: name.clone(),
                        expected: constraint.kind(),
                        found: field.kind,
                    });
                }
                Ok((idx, constraint))
            })
            .collect()
    }
}

/// Initialise criteria with everything selected (i.e., show everything):
/// every categorical column selects all of its values and the first
/// temporal column spans its full date range.
pub fn default_criteria(dataset: &Dataset) -> FilterCriteria {
    let mut criteria = FilterCriteria::new();
    let schema = dataset.schema();

    if let Some(field) = schema.fields_of_kind(FieldKind::Temporal).next() {
        if let Ok(Some((start, end))) = dataset.temporal_extent(&field.name) {
            criteria.set(field.name.clone(), Constraint::DateRange { start, end });
        }
    }
    for field in schema.fields_of_kind(FieldKind::Categorical) {
        if let Ok(values) = dataset.distinct_values(&field.name) {
            criteria.set(field.name.clone(), Constraint::OneOf(values));
        }
    }
    criteria
}

fn passes(record: &Record, resolved: &[(usize, &Constraint)]) -> bool {
    resolved
        .iter()
        .all(|(idx, constraint)| constraint.matches(record.get(*idx)))
}

/// The boolean inclusion mask: `mask[i]` is true when record `i` passes
/// every constraint.
pub fn filter_mask(dataset: &Dataset, criteria: &FilterCriteria) -> Result<Vec<bool>> {
    let resolved = criteria.resolve(dataset.schema())?;
    Ok(dataset
        .records()
        .iter()
        .map(|record| passes(record, &resolved))
        .collect())
}

/// Keep the records that pass every constraint, in their original order.
///
/// Fails with `SchemaMismatch` if a constraint names an unknown column and
/// with `KindMismatch` if it does not fit the column's kind.
pub fn apply_filters(dataset: &Dataset, criteria: &FilterCriteria) -> Result<Dataset> {
    let resolved = criteria.resolve(dataset.schema())?;
    let records: Vec<Record> = dataset
        .records()
        .iter()
        .filter(|record| passes(record, &resolved))
        .cloned()
        .collect();

    log::debug!(
        "filter kept {} of {} records ({} constraints)",
        records.len(),
        dataset.len(),
        criteria.len()
    );
    Ok(Dataset::from_validated(dataset.shared_schema(), records))
}
