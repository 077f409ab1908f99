use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray, TimestampMillisecondArray};
use arrow::datatypes::{DataType, Field as ArrowField, Schema as ArrowSchema, TimeUnit};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;

use super::model::{Dataset, FieldKind, Value, format_timestamp};

/// Text written for one cell. Absent values become empty cells and floats
/// keep full precision.
fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Float(v) => v.to_string(),
        Value::Timestamp(t) => format_timestamp(t),
        other => other.to_string(),
    }
}

/// Serialize records as CSV with the schema's field order as header.
pub fn write_csv<W: Write>(dataset: &Dataset, writer: W) -> Result<()> {
    let mut out = csv::Writer::from_writer(writer);
    out.write_record(dataset.schema().names())
        .context("writing CSV header")?;
    for (row, record) in dataset.records().iter().enumerate() {
        out.write_record(record.values.iter().map(cell_text))
            .with_context(|| format!("writing CSV row {row}"))?;
    }
    out.flush().context("flushing CSV output")?;
    Ok(())
}

pub fn save_csv(dataset: &Dataset, path: &Path) -> Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("creating {}", path.display()))?;
    write_csv(dataset, std::io::BufWriter::new(file))?;
    log::info!("Exported {} records to {}", dataset.len(), path.display());
    Ok(())
}

// ---------------------------------------------------------------------------
// Parquet
// ---------------------------------------------------------------------------

/// Build one typed Arrow column from a dataset column.
fn arrow_column(dataset: &Dataset, idx: usize, kind: FieldKind) -> (DataType, ArrayRef) {
    let cells = || dataset.records().iter().map(move |r| r.get(idx));

    match kind {
        FieldKind::Temporal => {
            let arr: TimestampMillisecondArray = cells()
                .map(|v| v.as_timestamp().map(|t| t.and_utc().timestamp_millis()))
                .collect();
            (DataType::Timestamp(TimeUnit::Millisecond, None), Arc::new(arr))
        }
        FieldKind::Numeric => {
            let all_integers = cells().all(|v| matches!(v, Value::Integer(_) | Value::Null));
            if all_integers {
                let arr: Int64Array = cells()
                    .map(|v| match v {
                        Value::Integer(i) => Some(*i),
                        _ => None,
                    })
                    .collect();
                (DataType::Int64, Arc::new(arr))
            } else {
                let arr: Float64Array = cells().map(Value::as_f64).collect();
                (DataType::Float64, Arc::new(arr))
            }
        }
        FieldKind::Categorical => {
            let all_bools = cells().all(|v| matches!(v, Value::Bool(_) | Value::Null));
            if all_bools {
                let arr: BooleanArray = cells().map(Value::as_bool).collect();
                (DataType::Boolean, Arc::new(arr))
            } else {
                let arr: StringArray = cells()
                    .map(|v| (!v.is_null()).then(|| v.to_string()))
                    .collect();
                (DataType::Utf8, Arc::new(arr))
            }
        }
    }
}

/// The dataset as one Arrow record batch, every column nullable.
pub fn to_record_batch(dataset: &Dataset) -> Result<RecordBatch> {
    let mut fields = Vec::with_capacity(dataset.schema().len());
    let mut arrays = Vec::with_capacity(dataset.schema().len());
    for (idx, field) in dataset.schema().fields.iter().enumerate() {
        let (data_type, array) = arrow_column(dataset, idx, field.kind);
        fields.push(ArrowField::new(&field.name, data_type, true));
        arrays.push(array);
    }

    let schema = Arc::new(ArrowSchema::new(fields));
    RecordBatch::try_new(schema, arrays).context("building record batch")
}

/// Write the dataset as a single-batch Parquet file.
pub fn save_parquet(dataset: &Dataset, path: &Path) -> Result<()> {
    let batch = to_record_batch(dataset)?;

    let file = std::fs::File::create(path)
        .with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None).context("creating parquet writer")?;
    writer.write(&batch).context("writing parquet batch")?;
    writer.close().context("closing parquet writer")?;

    log::info!("Wrote {} records to {}", dataset.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::loader::load_file;
    use crate::data::model::{Field, Record, Schema};
    use chrono::NaiveDate;

    fn sample() -> Dataset {
        let schema = Schema::new(vec![
            Field::new("unidade", FieldKind::Categorical),
            Field::new("data_atendimento", FieldKind::Temporal),
            Field::new("tempo_espera_dias", FieldKind::Numeric),
            Field::new("encaminhado", FieldKind::Categorical),
        ]);
        let day = NaiveDate::from_ymd_opt(2024, 1, 3).unwrap();
        Dataset::new(
            schema,
            vec![
                Record::new(vec![Value::text("UBS A"), Value::date(day), Value::Float(2.125), Value::Bool(true)]),
                Record::new(vec![Value::Null, Value::Null, Value::Integer(4), Value::Null]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn csv_keeps_field_order_and_blanks_absent_cells() {
        let mut buf = Vec::new();
        write_csv(&sample(), &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "unidade,data_atendimento,tempo_espera_dias,encaminhado");
        assert_eq!(lines[1], "UBS A,2024-01-03,2.125,true");
        assert_eq!(lines[2], ",,4,");
    }

    #[test]
    fn parquet_export_loads_back_with_the_same_kinds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("visits.parquet");
        let ds = sample();
        save_parquet(&ds, &path).unwrap();

        let loaded = load_file(&path).unwrap();
        assert_eq!(loaded.schema(), ds.schema());
        assert_eq!(loaded.len(), 2);
        // the mixed numeric column is widened to floats
        let waits: Vec<_> = loaded.column("tempo_espera_dias").unwrap().cloned().collect();
        assert_eq!(waits, vec![Value::Float(2.125), Value::Float(4.0)]);
    }

    #[test]
    fn procedure_codes_survive_a_csv_reload() {
        let schema = Schema::new(vec![
            Field::new("procedimento_sigtap", FieldKind::Categorical),
            Field::new("tempo_espera_dias", FieldKind::Numeric),
        ]);
        let ds = Dataset::new(
            schema,
            vec![
                Record::new(vec![Value::text("0301010030"), Value::Integer(3)]),
                Record::new(vec![Value::text("0202010034"), Value::Null]),
            ],
        )
        .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("visits.csv");
        save_csv(&ds, &path).unwrap();

        let loaded = load_file(&path).unwrap();
        assert_eq!(loaded.schema(), ds.schema());
        assert_eq!(loaded.records()[0].get(0), &Value::text("0301010030"));
    }
}
