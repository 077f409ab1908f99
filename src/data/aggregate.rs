use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};

use super::error::{DataError, Result};
use super::model::{Dataset, FieldKind, Record, Schema, Value};

// ---------------------------------------------------------------------------
// Time buckets for temporal grouping
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeBucket {
    Day,
    /// Weeks start on Monday.
    Week,
    Month,
    Year,
}

impl TimeBucket {
    /// Truncate a timestamp to midnight of the first day of its bucket.
    pub fn truncate(self, t: NaiveDateTime) -> NaiveDateTime {
        let date = t.date();
        let start = match self {
            TimeBucket::Day => Some(date),
            TimeBucket::Week => {
                Some(date - Duration::days(i64::from(date.weekday().num_days_from_monday())))
            }
            TimeBucket::Month => NaiveDate::from_ymd_opt(date.year(), date.month(), 1),
            TimeBucket::Year => NaiveDate::from_ymd_opt(date.year(), 1, 1),
        };
        start.unwrap_or(date).and_time(NaiveTime::MIN)
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// What to compute inside each group.
#[derive(Debug, Clone, PartialEq)]
pub enum Metric {
    /// Group cardinality; never looks at a target field.
    Count,
    Sum(String),
    Mean(String),
    Median(String),
    /// Linear interpolation between order statistics, `p` in `[0, 1]`.
    Quantile { field: String, p: f64 },
    /// Percentage of the group's records whose `field` equals `value`.
    Rate { field: String, value: Value },
}

impl Metric {
    pub fn quantile(field: impl Into<String>, p: f64) -> Self {
        Metric::Quantile {
            field: field.into(),
            p,
        }
    }

    pub fn rate(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Metric::Rate {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Short human label, used for chart axes.
    pub fn label(&self) -> String {
        match self {
            Metric::Count => "count".to_string(),
            Metric::Sum(f) => format!("sum of {f}"),
            Metric::Mean(f) => format!("mean {f}"),
            Metric::Median(f) => format!("median {f}"),
            Metric::Quantile { field, p } => format!("p{:.0} {field}", p * 100.0),
            Metric::Rate { field, value } => format!("% {field} = {value}"),
        }
    }
}

impl Hash for Metric {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Metric::Count => {}
            Metric::Sum(f) | Metric::Mean(f) | Metric::Median(f) => f.hash(state),
            Metric::Quantile { field, p } => {
                field.hash(state);
                p.to_bits().hash(state);
            }
            Metric::Rate { field, value } => {
                field.hash(state);
                value.hash(state);
            }
        }
    }
}

/// A metric bound to column positions of one schema.
enum Resolved<'a> {
    Count,
    Sum(usize),
    Mean(usize),
    Quantile(usize, f64),
    Rate(usize, &'a Value),
}

fn check_probability(p: f64) -> Result<()> {
    if (0.0..=1.0).contains(&p) {
        Ok(())
    } else {
        Err(DataError::InvalidProbability(p))
    }
}

fn resolve_metric<'a>(schema: &Schema, metric: &'a Metric) -> Result<Resolved<'a>> {
    let numeric = |name: &str| schema.field_of_kind(name, FieldKind::Numeric);
    Ok(match metric {
        Metric::Count => Resolved::Count,
        Metric::Sum(f) => Resolved::Sum(numeric(f)?),
        Metric::Mean(f) => Resolved::Mean(numeric(f)?),
        Metric::Median(f) => Resolved::Quantile(numeric(f)?, 0.5),
        Metric::Quantile { field, p } => {
            let idx = numeric(field)?;
            check_probability(*p)?;
            Resolved::Quantile(idx, *p)
        }
        Metric::Rate { field, value } => Resolved::Rate(schema.field(field)?.0, value),
    })
}

/// Present numeric values of one column; `Null` and NaN are skipped.
fn present_values(records: &[&Record], idx: usize) -> Vec<f64> {
    records
        .iter()
        .filter_map(|r| r.get(idx).as_f64())
        .filter(|v| !v.is_nan())
        .collect()
}

/// NaN results (e.g. a sum of `inf` and `-inf`) count as absent.
fn evaluate(records: &[&Record], metric: &Resolved<'_>) -> Option<f64> {
    evaluate_raw(records, metric).filter(|v| !v.is_nan())
}

fn evaluate_raw(records: &[&Record], metric: &Resolved<'_>) -> Option<f64> {
    match metric {
        Resolved::Count => Some(records.len() as f64),
        Resolved::Sum(idx) => {
            let values = present_values(records, *idx);
            (!values.is_empty()).then(|| values.iter().sum())
        }
        Resolved::Mean(idx) => mean(&present_values(records, *idx)),
        Resolved::Quantile(idx, p) => {
            let mut values = present_values(records, *idx);
            values.sort_by(f64::total_cmp);
            quantile_sorted(&values, *p)
        }
        Resolved::Rate(idx, value) => {
            if records.is_empty() {
                return None;
            }
            let hits = records.iter().filter(|r| r.get(*idx) == *value).count();
            Some(hits as f64 * 100.0 / records.len() as f64)
        }
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

/// `sorted` must be ascending; `p` must already be validated.
fn quantile_sorted(sorted: &[f64], p: f64) -> Option<f64> {
    let last = sorted.len().checked_sub(1)?;
    let rank = p * last as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let (a, b) = (sorted[lower], sorted[upper]);
    if lower == upper || a == b {
        return Some(a);
    }
    // weighted form stays finite for large values of opposite sign
    let frac = rank - lower as f64;
    Some((a * (1.0 - frac) + b * frac).clamp(a, b))
}

/// Quantile of `values` by linear interpolation between order statistics.
/// `None` for empty input.
pub fn quantile(values: &[f64], p: f64) -> Result<Option<f64>> {
    check_probability(p)?;
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    sorted.sort_by(f64::total_cmp);
    Ok(quantile_sorted(&sorted, p))
}

// ---------------------------------------------------------------------------
// AggregationSpec / AggregateResult
// ---------------------------------------------------------------------------

/// A grouping dimension plus a metric definition.
#[derive(Debug, Clone, PartialEq, Hash)]
pub struct AggregationSpec {
    pub group_by: String,
    /// Truncation applied to a temporal grouping field.
    pub bucket: Option<TimeBucket>,
    pub metric: Metric,
}

impl AggregationSpec {
    pub fn new(group_by: impl Into<String>, metric: Metric) -> Self {
        AggregationSpec {
            group_by: group_by.into(),
            bucket: None,
            metric,
        }
    }

    pub fn count(group_by: impl Into<String>) -> Self {
        Self::new(group_by, Metric::Count)
    }

    pub fn bucketed(mut self, bucket: TimeBucket) -> Self {
        self.bucket = Some(bucket);
        self
    }
}

/// One group of an aggregate.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateRow {
    /// Group key; `Value::Null` is the "unknown" group.
    pub key: Value,
    /// Number of records in the group.
    pub count: usize,
    /// Metric value; `None` when the group has no present target values.
    pub value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateResult {
    pub group_field: String,
    pub metric: Metric,
    pub rows: Vec<AggregateRow>,
}

impl AggregateResult {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First `n` rows ("Top N" under the default ranking order).
    pub fn top(&self, n: usize) -> AggregateResult {
        AggregateResult {
            group_field: self.group_field.clone(),
            metric: self.metric.clone(),
            rows: self.rows.iter().take(n).cloned().collect(),
        }
    }

    /// Sum of all present values.
    pub fn total(&self) -> f64 {
        self.rows.iter().filter_map(|r| r.value).sum()
    }

    pub fn get(&self, key: &Value) -> Option<&AggregateRow> {
        self.rows.iter().find(|r| &r.key == key)
    }
}

/// Resolve and validate the grouping column: it must exist, be categorical
/// or temporal, and only temporal columns may be bucketed.
fn group_column(schema: &Schema, name: &str, bucket: Option<TimeBucket>) -> Result<(usize, FieldKind)> {
    let (idx, field) = schema.field(name)?;
    let kind = field.kind;
    if kind == FieldKind::Numeric {
        return Err(DataError::KindMismatch {
            field: name.to_string(),
            expected: FieldKind::Categorical,
            found: kind,
        });
    }
    if bucket.is_some() && kind != FieldKind::Temporal {
        return Err(DataError::KindMismatch {
            field: name.to_string(),
            expected: FieldKind::Temporal,
            found: kind,
        });
    }
    Ok((idx, kind))
}

fn group_key(value: &Value, bucket: Option<TimeBucket>) -> Value {
    match (value, bucket) {
        (Value::Timestamp(t), Some(b)) => Value::Timestamp(b.truncate(*t)),
        _ => value.clone(),
    }
}

fn group_records(dataset: &Dataset, idx: usize, bucket: Option<TimeBucket>) -> BTreeMap<Value, Vec<&Record>> {
    let mut groups: BTreeMap<Value, Vec<&Record>> = BTreeMap::new();
    for record in dataset.records() {
        groups
            .entry(group_key(record.get(idx), bucket))
            .or_default()
            .push(record);
    }
    groups
}

/// Key order with the "unknown" group moved to the end.
fn chronological(a: &Value, b: &Value) -> Ordering {
    a.is_null().cmp(&b.is_null()).then_with(|| a.cmp(b))
}

/// Descending value, absent values last, ties by ascending key.
fn ranking(a: &AggregateRow, b: &AggregateRow) -> Ordering {
    match (a.value, b.value) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then_with(|| a.key.cmp(&b.key))
}

/// Group `dataset` by `spec.group_by` and compute `spec.metric` per group.
///
/// Rows come back by descending metric value, except for temporal
/// groupings which come back in ascending time order.
pub fn aggregate(dataset: &Dataset, spec: &AggregationSpec) -> Result<AggregateResult> {
    let schema = dataset.schema();
    let (idx, kind) = group_column(schema, &spec.group_by, spec.bucket)?;
    let metric = resolve_metric(schema, &spec.metric)?;

    let mut rows: Vec<AggregateRow> = group_records(dataset, idx, spec.bucket)
        .into_iter()
        .map(|(key, members)| AggregateRow {
            value: evaluate(&members, &metric),
            count: members.len(),
            key,
        })
        .collect();

    if kind == FieldKind::Temporal {
        rows.sort_by(|a, b| chronological(&a.key, &b.key));
    } else {
        rows.sort_by(ranking);
    }

    Ok(AggregateResult {
        group_field: spec.group_by.clone(),
        metric: spec.metric.clone(),
        rows,
    })
}

/// Compute a metric over the whole dataset as a single group.
pub fn aggregate_all(dataset: &Dataset, metric: &Metric) -> Result<Option<f64>> {
    let resolved = resolve_metric(dataset.schema(), metric)?;
    let records: Vec<&Record> = dataset.records().iter().collect();
    Ok(evaluate(&records, &resolved))
}

/// Split a dataset by the distinct values of one column.
pub fn partition(dataset: &Dataset, field: &str) -> Result<BTreeMap<Value, Dataset>> {
    let (idx, _) = dataset.schema().field(field)?;
    let mut parts: BTreeMap<Value, Vec<Record>> = BTreeMap::new();
    for record in dataset.records() {
        parts
            .entry(record.get(idx).clone())
            .or_default()
            .push(record.clone());
    }
    Ok(parts
        .into_iter()
        .map(|(key, records)| (key, Dataset::from_validated(dataset.shared_schema(), records)))
        .collect())
}

/// One line of a multi-series chart.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub key: Value,
    pub result: AggregateResult,
}

/// Aggregate each slice of `dataset` sharing a value of `series_field`.
/// Series come back ordered by key.
pub fn aggregate_by(dataset: &Dataset, series_field: &str, spec: &AggregationSpec) -> Result<Vec<Series>> {
    dataset
        .schema()
        .field_of_kind(series_field, FieldKind::Categorical)?;
    // validate the aggregation even when there is nothing to split
    aggregate(&Dataset::empty(dataset.shared_schema()), spec)?;

    partition(dataset, series_field)?
        .into_iter()
        .map(|(key, part)| Ok(Series { key, result: aggregate(&part, spec)? }))
        .collect()
}

// ---------------------------------------------------------------------------
// Five-number summaries (box plots)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Spread {
    pub min: f64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub max: f64,
    pub mean: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupSummary {
    pub key: Value,
    pub count: usize,
    /// `None` when every target value in the group is absent.
    pub spread: Option<Spread>,
}

fn spread(mut values: Vec<f64>) -> Option<Spread> {
    values.sort_by(f64::total_cmp);
    Some(Spread {
        min: *values.first()?,
        q1: quantile_sorted(&values, 0.25)?,
        median: quantile_sorted(&values, 0.5)?,
        q3: quantile_sorted(&values, 0.75)?,
        max: *values.last()?,
        mean: mean(&values)?,
    })
}

/// Per-group quantile bands of a numeric column, ordered by group key.
pub fn describe(dataset: &Dataset, group_by: &str, field: &str) -> Result<Vec<GroupSummary>> {
    let schema = dataset.schema();
    let (idx, _) = group_column(schema, group_by, None)?;
    let target = schema.field_of_kind(field, FieldKind::Numeric)?;

    let mut out: Vec<GroupSummary> = group_records(dataset, idx, None)
        .into_iter()
        .map(|(key, members)| GroupSummary {
            count: members.len(),
            spread: spread(present_values(&members, target)),
            key,
        })
        .collect();
    out.sort_by(|a, b| chronological(&a.key, &b.key));
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::Field;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    /// (category, wait, day)
    fn table(rows: &[(Option<&str>, Option<f64>, Option<NaiveDate>)]) -> Dataset {
        let schema = Schema::new(vec![
            Field::new("category", FieldKind::Categorical),
            Field::new("wait", FieldKind::Numeric),
            Field::new("when", FieldKind::Temporal),
        ]);
        let records = rows
            .iter()
            .map(|(c, w, d)| {
                Record::new(vec![
                    Value::from(*c),
                    Value::from(*w),
                    d.map(Value::date).unwrap_or(Value::Null),
                ])
            })
            .collect();
        Dataset::new(schema, records).unwrap()
    }

    #[test]
    fn count_ranks_groups_by_size() {
        let ds = table(&[(Some("A"), None, None), (Some("A"), None, None), (Some("B"), None, None)]);
        let result = aggregate(&ds, &AggregationSpec::count("category")).unwrap();
        let pairs: Vec<_> = result.rows.iter().map(|r| (r.key.to_string(), r.value)).collect();
        assert_eq!(
            pairs,
            vec![("A".to_string(), Some(2.0)), ("B".to_string(), Some(1.0))]
        );
    }

    #[test]
    fn median_interpolates_over_whole_dataset() {
        let ds = table(&[
            (Some("x"), Some(2.0), None),
            (Some("x"), Some(4.0), None),
            (Some("x"), Some(4.0), None),
            (Some("x"), Some(8.0), None),
        ]);
        assert_eq!(aggregate_all(&ds, &Metric::quantile("wait", 0.5)).unwrap(), Some(4.0));
        assert_eq!(aggregate_all(&ds, &Metric::quantile("wait", 0.25)).unwrap(), Some(3.5));
        assert_eq!(aggregate_all(&ds, &Metric::Median("wait".into())).unwrap(), Some(4.0));
    }

    #[test]
    fn single_value_group_returns_that_value_for_any_p() {
        for p in [0.0, 0.1, 0.5, 0.99, 1.0] {
            assert_eq!(quantile(&[7.0], p).unwrap(), Some(7.0));
        }
        assert_eq!(quantile(&[], 0.5).unwrap(), None);
    }

    #[test]
    fn probability_outside_unit_interval_is_rejected() {
        let ds = table(&[(Some("A"), Some(1.0), None)]);
        let spec = AggregationSpec::new("category", Metric::quantile("wait", 1.5));
        assert_eq!(aggregate(&ds, &spec).unwrap_err(), DataError::InvalidProbability(1.5));
        assert!(quantile(&[1.0], -0.1).is_err());
    }

    #[test]
    fn missing_group_values_form_an_unknown_group() {
        let ds = table(&[(Some("A"), Some(1.0), None), (None, Some(3.0), None), (None, Some(5.0), None)]);
        let result = aggregate(&ds, &AggregationSpec::new("category", Metric::Sum("wait".into()))).unwrap();
        assert_eq!(result.rows[0].key, Value::Null);
        assert_eq!(result.rows[0].value, Some(8.0));
        assert_eq!(result.rows[0].key.to_string(), "unknown");
        assert_eq!(result.total(), 9.0);
    }

    #[test]
    fn all_absent_targets_yield_no_value_not_zero() {
        let ds = table(&[(Some("A"), None, None), (Some("B"), Some(2.0), None)]);
        let result = aggregate(&ds, &AggregationSpec::new("category", Metric::Mean("wait".into()))).unwrap();
        assert_eq!(result.get(&Value::text("A")).unwrap().value, None);
        assert_eq!(result.get(&Value::text("A")).unwrap().count, 1);
        // absent values rank last
        assert_eq!(result.rows.last().unwrap().key, Value::text("A"));
    }

    #[test]
    fn temporal_groups_come_back_in_time_order() {
        let ds = table(&[
            (Some("A"), None, Some(day(2024, 3, 2))),
            (Some("A"), None, Some(day(2024, 1, 20))),
            (Some("A"), None, None),
            (Some("A"), None, Some(day(2024, 3, 30))),
            (Some("A"), None, Some(day(2024, 1, 3))),
            (Some("A"), None, Some(day(2024, 3, 9))),
        ]);
        let spec = AggregationSpec::count("when").bucketed(TimeBucket::Month);
        let result = aggregate(&ds, &spec).unwrap();
        let rows: Vec<_> = result.rows.iter().map(|r| (r.key.to_string(), r.count)).collect();
        assert_eq!(
            rows,
            vec![
                ("2024-01-01".to_string(), 2),
                ("2024-03-01".to_string(), 3),
                ("unknown".to_string(), 1),
            ]
        );
    }

    #[test]
    fn week_buckets_start_on_monday() {
        let sunday = day(2024, 3, 10).and_time(NaiveTime::MIN);
        assert_eq!(TimeBucket::Week.truncate(sunday).date(), day(2024, 3, 4));
        assert_eq!(TimeBucket::Year.truncate(sunday).date(), day(2024, 1, 1));
    }

    #[test]
    fn grouping_and_targets_are_kind_checked() {
        let ds = table(&[(Some("A"), Some(1.0), None)]);
        assert!(matches!(
            aggregate(&ds, &AggregationSpec::count("wait")),
            Err(DataError::KindMismatch { .. })
        ));
        assert!(matches!(
            aggregate(&ds, &AggregationSpec::count("category").bucketed(TimeBucket::Day)),
            Err(DataError::KindMismatch { .. })
        ));
        assert!(matches!(
            aggregate(&ds, &AggregationSpec::new("category", Metric::Mean("category".into()))),
            Err(DataError::KindMismatch { .. })
        ));
        assert_eq!(
            aggregate(&ds, &AggregationSpec::new("category", Metric::Sum("nope".into()))).unwrap_err(),
            DataError::missing("nope")
        );
    }

    #[test]
    fn empty_dataset_gives_empty_result() {
        let ds = table(&[]);
        let result = aggregate(&ds, &AggregationSpec::count("category")).unwrap();
        assert!(result.is_empty());
        assert_eq!(aggregate_all(&ds, &Metric::Mean("wait".into())).unwrap(), None);
    }

    #[test]
    fn rate_counts_every_record_in_the_denominator() {
        let ds = table(&[(Some("A"), None, None), (Some("B"), Some(1.0), None), (None, None, None), (Some("A"), None, None)]);
        assert_eq!(aggregate_all(&ds, &Metric::rate("category", "A")).unwrap(), Some(50.0));
    }

    #[test]
    fn series_split_aggregates_each_slice() {
        let ds = table(&[
            (Some("A"), None, Some(day(2024, 1, 2))),
            (Some("B"), None, Some(day(2024, 1, 5))),
            (Some("A"), None, Some(day(2024, 2, 5))),
        ]);
        let spec = AggregationSpec::count("when").bucketed(TimeBucket::Month);
        let series = aggregate_by(&ds, "category", &spec).unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].key, Value::text("A"));
        assert_eq!(series[0].result.len(), 2);
        assert_eq!(series[1].result.total(), 1.0);
    }

    #[test]
    fn describe_reports_quantile_bands() {
        let ds = table(&[
            (Some("A"), Some(1.0), None),
            (Some("A"), Some(2.0), None),
            (Some("A"), Some(3.0), None),
            (Some("A"), Some(4.0), None),
            (Some("A"), Some(5.0), None),
            (Some("B"), None, None),
        ]);
        let summaries = describe(&ds, "category", "wait").unwrap();
        let a = summaries[0].spread.unwrap();
        assert_eq!((a.min, a.q1, a.median, a.q3, a.max), (1.0, 2.0, 3.0, 4.0, 5.0));
        assert_eq!(a.mean, 3.0);
        assert_eq!(summaries[1].count, 1);
        assert!(summaries[1].spread.is_none());
    }

    #[test]
    fn quantile_stays_within_extreme_neighbours() {
        let q = quantile(&[-1e308, 1e308], 0.5).unwrap().unwrap();
        assert!(q.is_finite());
        assert!((-1e308..=1e308).contains(&q));
        assert_eq!(quantile(&[f64::INFINITY, f64::INFINITY], 0.5).unwrap(), Some(f64::INFINITY));
        assert_eq!(
            quantile(&[f64::NEG_INFINITY, 1.0], 0.5).unwrap(),
            Some(f64::NEG_INFINITY)
        );

        let ds = table(&[(Some("x"), Some(-1e308), None), (Some("x"), Some(1e308), None)]);
        let median = aggregate_all(&ds, &Metric::quantile("wait", 0.5)).unwrap().unwrap();
        assert!((-1e308..=1e308).contains(&median));
    }

    #[test]
    fn nan_metric_values_rank_as_absent() {
        let ds = table(&[
            (Some("A"), Some(f64::INFINITY), None),
            (Some("A"), Some(f64::NEG_INFINITY), None),
            (Some("B"), Some(3.0), None),
        ]);
        let result = aggregate(&ds, &AggregationSpec::new("category", Metric::Sum("wait".into()))).unwrap();
        assert_eq!(result.rows[0].key, Value::text("B"));
        assert_eq!(result.rows[1].value, None);
    }
}
