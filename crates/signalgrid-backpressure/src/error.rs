//! Metrics validation errors.

use thiserror::Error;

/// A metrics sample was rejected. Only that sample is dropped; the monitor
/// keeps running with its previous state.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("metrics sample is missing required field `{0}`")]
    MissingField(&'static str),

    #[error("metrics field `{field}` out of range: {value}")]
    OutOfRange { field: &'static str, value: f64 },

    #[error("malformed metrics payload: {0}")]
    Malformed(String),
}
