use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use strum::Display;
use thiserror::Error;

/// Errors raised while assembling a MILP instance, before any solver is involved.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ModelError {
    #[error("data inconsistency for entity '{entity}': {reason}")]
    DataInconsistency { entity: String, reason: String },
}

impl ModelError {
    pub fn inconsistent(entity: &str, reason: impl Into<String>) -> Self {
        ModelError::DataInconsistency {
            entity: entity.to_string(),
            reason: reason.into(),
        }
    }
}

/// Why a single (entity, configuration) pair produced no proven-optimal plan.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FailureKind {
    DataInconsistency,
    InfeasibleModel,
    UnboundedModel,
    SolverTimeout,
    SolverUnavailable,
}

/// Errors from the CSV data loader.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed CSV in '{path}': {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("'{path}' has no column '{column}'")]
    MissingColumn { path: PathBuf, column: String },

    #[error("'{path}' row {row}, column '{column}': cannot parse '{value}' as a number")]
    InvalidCell {
        path: PathBuf,
        row: usize,
        column: String,
        value: String,
    },

    #[error("'{path}' contains no data rows")]
    Empty { path: PathBuf },

    #[error("{what}: expected {expected} entries, found {found}")]
    LengthMismatch {
        what: String,
        expected: usize,
        found: usize,
    },

    #[error("invalid data: {0}")]
    Invalid(String),
}
