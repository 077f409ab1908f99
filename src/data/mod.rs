/// Data layer: core types, loading, filtering, aggregation and export.
///
/// Architecture:
/// ```text
///  .csv / .json / .parquet
///        │
///        ▼
///   ┌──────────┐
///   │  loader   │  parse file, infer column kinds → Dataset
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  filter   │  FilterCriteria (AND of per-column constraints) → Dataset
///   └──────────┘
///        │
///        ▼
///   ┌───────────┐
///   │ aggregate  │  group + metric → AggregateResult (charts, KPIs)
///   └───────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  export   │  filtered Dataset → .csv / .parquet
///   └──────────┘
/// ```
///
/// `filter` and `aggregate` are pure; `cache` memoizes them for the UI.

pub mod aggregate;
pub mod cache;
pub mod error;
pub mod export;
pub mod filter;
pub mod loader;
pub mod model;

pub use aggregate::{AggregateResult, AggregateRow, AggregationSpec, Metric, TimeBucket, aggregate, aggregate_all};
pub use error::DataError;
pub use filter::{Constraint, FilterCriteria, apply_filters, filter_mask};
pub use model::{Dataset, Field, FieldKind, Record, Schema, Value};
