use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use arrow::array::{Array, ArrayRef, AsArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Float64Type, Int64Type, TimeUnit, TimestampMillisecondType};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde_json::Value as JsonValue;

use super::model::{Dataset, Field, FieldKind, Record, Schema, Value};

// ---------------------------------------------------------------------------
// Public entry-point
// ---------------------------------------------------------------------------

/// Load a tabular dataset from a file.  Dispatch by extension.
///
/// Supported formats:
/// * `.parquet` – any flat Parquet table (written by Pandas, Polars, or
///   `generate_sample`)
/// * `.json`    – `[{ "column": value, ... }, ...]`
/// * `.csv`     – header row followed by one row per record
///
/// Column kinds are inferred once here; everything downstream works with
/// the resulting typed schema.
pub fn load_file(path: &Path) -> Result<Dataset> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let dataset = match ext.as_str() {
        "parquet" | "pq" => load_parquet(path),
        "json" => load_json(path),
        "csv" => load_csv(path),
        other => bail!("Unsupported file extension: .{other}"),
    }
    .with_context(|| format!("loading {}", path.display()))?;

    log::info!(
        "Loaded {} records with columns {:?} from {}",
        dataset.len(),
        dataset.schema().names().collect::<Vec<_>>(),
        path.display()
    );
    Ok(dataset)
}

// ---------------------------------------------------------------------------
// Kind inference over raw text cells
// ---------------------------------------------------------------------------

/// A column read as text, before its kind is known. `None` is an empty cell.
struct RawColumn {
    name: String,
    cells: Vec<Option<String>>,
}

/// Parse the timestamp layouts seen in exported visit tables.
/// Offsets are dropped and the wall-clock time kept.
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d.and_time(NaiveTime::MIN));
    }
    for layout in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(t) = NaiveDateTime::parse_from_str(s, layout) {
            return Some(t);
        }
    }
    DateTime::parse_from_rfc3339(s).ok().map(|t| t.naive_local())
}

fn parse_number(s: &str) -> Option<Value> {
    let s = s.trim();
    if let Ok(i) = s.parse::<i64>() {
        return Some(Value::Integer(i));
    }
    s.parse::<f64>().ok().map(Value::Float)
}

/// Cell texts read as absent, matching the default NA markers of pandas'
/// `read_csv`.
const MISSING_MARKERS: [&str; 13] = [
    "NA", "N/A", "n/a", "#N/A", "<NA>", "NaN", "-NaN", "nan", "-nan", "null", "NULL", "None", "#NA",
];

fn is_missing(s: &str) -> bool {
    let s = s.trim();
    s.is_empty() || MISSING_MARKERS.contains(&s)
}

/// Digit strings like `0301010030` are codes, not numbers.
fn is_zero_padded(s: &str) -> bool {
    let digits = s.trim().trim_start_matches('-');
    digits.len() > 1 && digits.starts_with('0') && digits.bytes().all(|b| b.is_ascii_digit())
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim() {
        "true" | "True" | "TRUE" => Some(true),
        "false" | "False" | "FALSE" => Some(false),
        _ => None,
    }
}

/// Decide a column's kind from all of its present cells and convert it.
///
/// * every cell a timestamp → Temporal
/// * every cell a number    → Numeric
/// * every cell a boolean   → Categorical booleans
/// * anything else          → Categorical text (cells kept verbatim)
///
/// Missing markers (`NA`, `null`, ...) become absent first. A column with a
/// zero-padded digit string stays text so codes keep their leading zeros.
fn infer_column(cells: Vec<Option<String>>) -> (FieldKind, Vec<Value>) {
    let cells: Vec<Option<String>> = cells
        .into_iter()
        .map(|c| c.filter(|s| !is_missing(s)))
        .collect();
    let present = || cells.iter().flatten();

    if present().next().is_none() {
        return (FieldKind::Categorical, cells.iter().map(|_| Value::Null).collect());
    }
    if present().all(|c| parse_number(c).is_some()) && !present().any(|c| is_zero_padded(c)) {
        let values = cells
            .iter()
            .map(|c| c.as_deref().and_then(parse_number).unwrap_or(Value::Null))
            .collect();
        return (FieldKind::Numeric, values);
    }
    if present().all(|c| parse_timestamp(c).is_some()) {
        let values = cells
            .iter()
            .map(|c| c.as_deref().and_then(parse_timestamp).map_or(Value::Null, Value::Timestamp))
            .collect();
        return (FieldKind::Temporal, values);
    }
    if present().all(|c| parse_bool(c).is_some()) {
        let values = cells
            .iter()
            .map(|c| c.as_deref().and_then(parse_bool).map_or(Value::Null, Value::Bool))
            .collect();
        return (FieldKind::Categorical, values);
    }
    let values = cells.into_iter().map(Value::from).collect();
    (FieldKind::Categorical, values)
}

/// Assemble typed columns into a row-oriented dataset.
fn from_columns(columns: Vec<(Field, Vec<Value>)>, n_rows: usize) -> Result<Dataset> {
    let mut records: Vec<Record> = (0..n_rows)
        .map(|_| Record::new(Vec::with_capacity(columns.len())))
        .collect();
    let mut fields = Vec::with_capacity(columns.len());

    for (field, values) in columns {
        if values.len() != n_rows {
            bail!(
                "column '{}' has {} values, expected {n_rows}",
                field.name,
                values.len()
            );
        }
        for (record, value) in records.iter_mut().zip(values) {
            record.values.push(value);
        }
        fields.push(field);
    }

    Ok(Dataset::new(Schema::new(fields), records)?)
}

fn from_raw_columns(columns: Vec<RawColumn>, n_rows: usize) -> Result<Dataset> {
    let typed = columns
        .into_iter()
        .map(|col| {
            let (kind, values) = infer_column(col.cells);
            (Field::new(col.name, kind), values)
        })
        .collect();
    from_columns(typed, n_rows)
}

// ---------------------------------------------------------------------------
// CSV loader
// ---------------------------------------------------------------------------

/// CSV layout: header row with column names, one record per line.
/// Empty cells are absent values.
fn load_csv(path: &Path) -> Result<Dataset> {
    let mut reader = csv::Reader::from_path(path).context("opening CSV")?;
    let mut columns: Vec<RawColumn> = reader
        .headers()
        .context("reading CSV headers")?
        .iter()
        .map(|h| RawColumn {
            name: h.trim().to_string(),
            cells: Vec::new(),
        })
        .collect();

    let mut n_rows = 0;
    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("CSV row {row_no}"))?;
        for (col_idx, column) in columns.iter_mut().enumerate() {
            let cell = record.get(col_idx).unwrap_or("");
            column.cells.push((!cell.is_empty()).then(|| cell.to_string()));
        }
        n_rows += 1;
    }

    from_raw_columns(columns, n_rows)
}

// ---------------------------------------------------------------------------
// JSON loader
// ---------------------------------------------------------------------------

/// Expected JSON schema (records-oriented, `df.to_json(orient='records',
/// date_format='iso')`):
///
/// ```json
/// [
///   { "data_atendimento": "2024-01-03", "unidade": "UBS A", "tempo_espera_dias": 4 },
///   ...
/// ]
/// ```
///
/// Keys missing from a row are absent values.
fn load_json(path: &Path) -> Result<Dataset> {
    let text = std::fs::read_to_string(path).context("reading JSON file")?;
    let root: JsonValue = serde_json::from_str(&text).context("parsing JSON")?;

    let rows = root.as_array().context("Expected top-level JSON array")?;

    let mut columns: Vec<RawColumn> = Vec::new();
    for (i, row) in rows.iter().enumerate() {
        let obj = row
            .as_object()
            .with_context(|| format!("Row {i} is not a JSON object"))?;
        for key in obj.keys() {
            if !columns.iter().any(|c| &c.name == key) {
                columns.push(RawColumn {
                    name: key.clone(),
                    cells: Vec::new(),
                });
            }
        }
    }

    for row in rows {
        // every row was checked to be an object above
        let Some(obj) = row.as_object() else { continue };
        for column in &mut columns {
            column.cells.push(obj.get(&column.name).and_then(json_cell));
        }
    }

    from_raw_columns(columns, rows.len())
}

fn json_cell(val: &JsonValue) -> Option<String> {
    match val {
        JsonValue::Null => None,
        JsonValue::String(s) if s.is_empty() => None,
        JsonValue::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Parquet loader
// ---------------------------------------------------------------------------

/// Load a flat Parquet table.
///
/// Column kinds follow the Arrow type:
/// - ints / floats → Numeric
/// - booleans → Categorical
/// - dates / timestamps → Temporal
/// - strings (and dictionary-encoded strings, e.g. Pandas categoricals) →
///   inferred like CSV cells, so ISO date strings become Temporal
///
/// Works with files written by both **Pandas** (`df.to_parquet()`) and
/// **Polars** (`df.write_parquet()`).
fn load_parquet(path: &Path) -> Result<Dataset> {
    let file = std::fs::File::open(path).context("opening parquet file")?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .context("reading parquet metadata")?;
    let arrow_schema = Arc::clone(builder.schema());
    let reader = builder.build().context("building parquet reader")?;

    let mut columns: Vec<ParquetColumn> = Vec::with_capacity(arrow_schema.fields().len());
    for field in arrow_schema.fields() {
        columns.push(ParquetColumn::new(field.name(), field.data_type())?);
    }

    let mut n_rows = 0;
    for batch_result in reader {
        let batch = batch_result.context("reading parquet record batch")?;
        for (idx, column) in columns.iter_mut().enumerate() {
            column
                .extend(batch.column(idx))
                .with_context(|| format!("reading column '{}'", column.name))?;
        }
        n_rows += batch.num_rows();
    }

    let typed = columns
        .into_iter()
        .map(ParquetColumn::finish)
        .collect();
    from_columns(typed, n_rows)
}

/// Accumulates one Arrow column across record batches.
struct ParquetColumn {
    name: String,
    target: ColumnTarget,
    values: Vec<Value>,
    raw: Vec<Option<String>>,
}

enum ColumnTarget {
    Numeric { integer: bool },
    Boolean,
    Temporal,
    Text,
}

impl ParquetColumn {
    fn new(name: &str, data_type: &DataType) -> Result<Self> {
        let target = match data_type {
            DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64 => ColumnTarget::Numeric { integer: true },
            DataType::Float16 | DataType::Float32 | DataType::Float64 | DataType::Decimal128(_, _) => {
                ColumnTarget::Numeric { integer: false }
            }
            DataType::Boolean => ColumnTarget::Boolean,
            DataType::Date32 | DataType::Date64 | DataType::Timestamp(_, _) => ColumnTarget::Temporal,
            DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View | DataType::Dictionary(_, _) => {
                ColumnTarget::Text
            }
            other => bail!("column '{name}' has unsupported type {other:?}"),
        };
        Ok(ParquetColumn {
            name: name.to_string(),
            target,
            values: Vec::new(),
            raw: Vec::new(),
        })
    }

    fn extend(&mut self, col: &ArrayRef) -> Result<()> {
        match self.target {
            ColumnTarget::Numeric { integer: true } => {
                let arr = cast(col, &DataType::Int64)?;
                let arr = arr.as_primitive::<Int64Type>();
                self.values
                    .extend(arr.iter().map(|v| v.map_or(Value::Null, Value::Integer)));
            }
            ColumnTarget::Numeric { integer: false } => {
                let arr = cast(col, &DataType::Float64)?;
                let arr = arr.as_primitive::<Float64Type>();
                self.values
                    .extend(arr.iter().map(|v| v.map_or(Value::Null, Value::Float)));
            }
            ColumnTarget::Boolean => {
                let arr = col.as_boolean();
                self.values
                    .extend(arr.iter().map(|v| v.map_or(Value::Null, Value::Bool)));
            }
            ColumnTarget::Temporal => {
                let arr = cast(col, &DataType::Timestamp(TimeUnit::Millisecond, None))?;
                let arr = arr.as_primitive::<TimestampMillisecondType>();
                self.values.extend((0..arr.len()).map(|row| {
                    if arr.is_null(row) {
                        Value::Null
                    } else {
                        arr.value_as_datetime(row).map_or(Value::Null, Value::Timestamp)
                    }
                }));
            }
            ColumnTarget::Text => {
                let arr = cast(col, &DataType::Utf8)?;
                let arr = arr.as_string::<i32>();
                self.raw.extend(
                    arr.iter()
                        .map(|v| v.filter(|s| !s.is_empty()).map(str::to_string)),
                );
            }
        }
        Ok(())
    }

    fn finish(self) -> (Field, Vec<Value>) {
        match self.target {
            ColumnTarget::Numeric { .. } => (Field::new(self.name, FieldKind::Numeric), self.values),
            ColumnTarget::Boolean => (Field::new(self.name, FieldKind::Categorical), self.values),
            ColumnTarget::Temporal => (Field::new(self.name, FieldKind::Temporal), self.values),
            ColumnTarget::Text => {
                let (kind, values) = infer_column(self.raw);
                (Field::new(self.name, kind), values)
            }
        }
    }
}
