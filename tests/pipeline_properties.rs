use chrono::NaiveDate;
use proptest::prelude::*;

use esf_dashboard::data::error::DataError;
use esf_dashboard::data::{
    AggregationSpec, Constraint, Dataset, Field, FieldKind, FilterCriteria, Metric, Record, Schema,
    TimeBucket, Value, aggregate, aggregate_all, apply_filters, filter_mask,
};

const UNITS: [&str; 4] = ["UBS A", "UBS B", "UBS C", "UBS D"];

fn visit_schema() -> Schema {
    Schema::new(vec![
        Field::new("unidade", FieldKind::Categorical),
        Field::new("data_atendimento", FieldKind::Temporal),
        Field::new("tempo_espera_dias", FieldKind::Numeric),
    ])
}

fn day(offset: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Days::new(offset as u64)
}

fn record_strategy() -> impl Strategy<Value = Record> {
    (
        prop::option::weighted(0.9, prop::sample::select(UNITS.to_vec())),
        prop::option::weighted(0.9, 0u32..120),
        prop::option::weighted(0.9, 0i64..30),
    )
        .prop_map(|(unit, offset, wait)| {
            Record::new(vec![
                unit.map(Value::text).unwrap_or(Value::Null),
                offset.map(|o| Value::date(day(o))).unwrap_or(Value::Null),
                wait.map(Value::Integer).unwrap_or(Value::Null),
            ])
        })
}

fn dataset_strategy() -> impl Strategy<Value = Dataset> {
    prop::collection::vec(record_strategy(), 0..80)
        .prop_map(|records| Dataset::new(visit_schema(), records).unwrap())
}

fn criteria_strategy() -> impl Strategy<Value = FilterCriteria> {
    (
        prop::sample::subsequence(UNITS.to_vec(), 0..=UNITS.len()),
        prop::option::of((0u32..120, 0u32..120)),
        prop::option::of((0i64..30, 0i64..30)),
    )
        .prop_map(|(units, dates, waits)| {
            let mut criteria =
                FilterCriteria::new().with("unidade", Constraint::one_of(units));
            if let Some((a, b)) = dates {
                criteria.set(
                    "data_atendimento",
                    Constraint::DateRange {
                        start: day(a.min(b)),
                        end: day(a.max(b)),
                    },
                );
            }
            if let Some((lo, hi)) = waits {
                criteria.set(
                    "tempo_espera_dias",
                    Constraint::NumberRange {
                        min: lo as f64,
                        max: hi as f64,
                    },
                );
            }
            criteria
        })
}

proptest! {
    #[test]
    fn filtering_twice_changes_nothing(ds in dataset_strategy(), criteria in criteria_strategy()) {
        let once = apply_filters(&ds, &criteria).unwrap();
        let twice = apply_filters(&once, &criteria).unwrap();
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn filtered_rows_keep_their_order(ds in dataset_strategy(), criteria in criteria_strategy()) {
        let mask = filter_mask(&ds, &criteria).unwrap();
        prop_assert_eq!(mask.len(), ds.len());

        let expected: Vec<&Record> = ds
            .records()
            .iter()
            .zip(&mask)
            .filter_map(|(r, &keep)| keep.then_some(r))
            .collect();
        let filtered = apply_filters(&ds, &criteria).unwrap();
        let actual: Vec<&Record> = filtered.records().iter().collect();
        prop_assert_eq!(actual, expected);
        prop_assert_eq!(filtered.schema(), ds.schema());
    }

    #[test]
    fn empty_selection_excludes_everything(ds in dataset_strategy()) {
        let criteria = FilterCriteria::new().with("unidade", Constraint::one_of(Vec::<Value>::new()));
        prop_assert!(apply_filters(&ds, &criteria).unwrap().is_empty());
    }

    #[test]
    fn group_counts_add_up(ds in dataset_strategy()) {
        let result = aggregate(&ds, &AggregationSpec::count("unidade")).unwrap();
        let total: usize = result.rows.iter().map(|r| r.count).sum();
        prop_assert_eq!(total, ds.len());
        prop_assert_eq!(result.total(), ds.len() as f64);

        for pair in result.rows.windows(2) {
            prop_assert!(pair[0].count >= pair[1].count);
        }
    }

    #[test]
    fn quantiles_stay_within_the_observed_range(ds in dataset_strategy(), p in 0.0f64..=1.0) {
        let q = aggregate_all(&ds, &Metric::quantile("tempo_espera_dias", p)).unwrap();
        match ds.numeric_extent("tempo_espera_dias").unwrap() {
            Some((lo, hi)) => {
                let q = q.unwrap();
                prop_assert!(lo <= q && q <= hi, "{} not in [{}, {}]", q, lo, hi);
            }
            None => prop_assert_eq!(q, None),
        }
    }

    #[test]
    fn monthly_buckets_are_chronological(ds in dataset_strategy()) {
        let spec = AggregationSpec::count("data_atendimento").bucketed(TimeBucket::Month);
        let result = aggregate(&ds, &spec).unwrap();

        let known: Vec<_> = result.rows.iter().filter_map(|r| r.key.as_timestamp()).collect();
        for pair in known.windows(2) {
            prop_assert!(pair[0] < pair[1]);
        }
        if let Some(pos) = result.rows.iter().position(|r| r.key.is_null()) {
            prop_assert_eq!(pos, result.len() - 1);
        }
    }
}

// ---------------------------------------------------------------------------
// Worked examples
// ---------------------------------------------------------------------------

#[test]
fn counts_rank_by_descending_size() {
    let schema = Schema::new(vec![Field::new("category", FieldKind::Categorical)]);
    let records = ["A", "A", "B"]
        .iter()
        .map(|c| Record::new(vec![Value::text(*c)]))
        .collect();
    let ds = Dataset::new(schema, records).unwrap();

    let result = aggregate(&ds, &AggregationSpec::count("category")).unwrap();
    let rows: Vec<(String, usize)> = result
        .rows
        .iter()
        .map(|r| (r.key.to_string(), r.count))
        .collect();
    assert_eq!(rows, vec![("A".to_string(), 2), ("B".to_string(), 1)]);
}

#[test]
fn median_of_whole_dataset() {
    let schema = Schema::new(vec![Field::new("wait", FieldKind::Numeric)]);
    let records = [2, 4, 4, 8]
        .iter()
        .map(|w| Record::new(vec![Value::Integer(*w)]))
        .collect();
    let ds = Dataset::new(schema, records).unwrap();

    let median = aggregate_all(&ds, &Metric::quantile("wait", 0.5)).unwrap();
    assert_eq!(median, Some(4.0));
}

#[test]
fn date_range_end_is_inclusive_of_its_day_only() {
    let schema = Schema::new(vec![Field::new("data", FieldKind::Temporal)]);
    let records = vec![
        Record::new(vec![Value::date(NaiveDate::from_ymd_opt(2024, 1, 31).unwrap())]),
        Record::new(vec![Value::date(NaiveDate::from_ymd_opt(2024, 2, 1).unwrap())]),
    ];
    let ds = Dataset::new(schema, records).unwrap();
    let criteria = FilterCriteria::new().with(
        "data",
        Constraint::DateRange {
            start: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            end: NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
        },
    );

    let filtered = apply_filters(&ds, &criteria).unwrap();
    assert_eq!(filtered.len(), 1);
    assert_eq!(
        filtered.records()[0].get(0).as_timestamp().map(|t| t.date()),
        NaiveDate::from_ymd_opt(2024, 1, 31)
    );
}

#[test]
fn unknown_filter_column_is_rejected() {
    let ds = Dataset::new(visit_schema(), Vec::new()).unwrap();
    let criteria = FilterCriteria::new().with("nonexistent", Constraint::one_of(["x"]));
    assert_eq!(
        apply_filters(&ds, &criteria),
        Err(DataError::SchemaMismatch {
            field: "nonexistent".to_string()
        })
    );
}
