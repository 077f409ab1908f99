use thiserror::Error;

use super::model::FieldKind;

/// Errors raised by the filter / aggregate pipeline.
///
/// All of them are fatal to the call that produced them: the pipeline
/// never returns a partial result.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DataError {
    /// A filter, grouping or target field is not part of the dataset schema.
    #[error("column '{field}' is not present in the dataset")]
    SchemaMismatch { field: String },

    /// Quantile probability outside `[0, 1]`.
    #[error("quantile probability {0} is outside [0, 1]")]
    InvalidProbability(f64),

    /// A constraint or metric was applied to a field of the wrong kind.
    #[error("column '{field}' is {found}, expected {expected}")]
    KindMismatch {
        field: String,
        expected: FieldKind,
        found: FieldKind,
    },

    /// A record does not fit the schema it was loaded with.
    #[error("row {row}: {reason}")]
    InvalidRecord { row: usize, reason: String },
}

impl DataError {
    pub fn missing(field: &str) -> Self {
        DataError::SchemaMismatch {
            field: field.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DataError>;
