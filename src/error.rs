//! Error type shared by the generator, encoder, driver, drain detector and validator.

use thiserror::Error;

/// Errors raised while producing, submitting or verifying a dataset.
///
/// Three families matter to callers:
/// - structural (`Exhausted`, `ExhaustedKeySpace`, `SchemaMismatch`, `Configuration`): abort the
///   calling operation.
/// - operational (`Submission`, `Probe`): logged by the loop that hit them, never fatal there.
/// - validation (`DuplicateKey`, `Mismatch`): the verdict of a validation run.
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("dataset exhausted after {iterations} iterations")]
    Exhausted { iterations: usize },

    #[error("key space exhausted: {used} of {max_key_value} keys used, {requested} more requested")]
    ExhaustedKeySpace {
        used: usize,
        requested: usize,
        max_key_value: u32,
    },

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("submission to {table} failed: {reason}")]
    Submission { table: String, reason: String },

    #[error("queue depth probe for '{queue}' failed: {reason}")]
    Probe { queue: String, reason: String },

    #[error("{count} key(s) appear more than once in materialized output")]
    DuplicateKey { count: usize },

    #[error(
        "{count} row(s) do not match the expected data ({unexpected} unexpected, {missing} missing)"
    )]
    Mismatch {
        count: usize,
        unexpected: usize,
        missing: usize,
    },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("unknown table '{0}'")]
    UnknownTable(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Arrow(#[from] arrow::error::ArrowError),

    #[error(transparent)]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

impl VerifyError {
    /// True for the two terminal results a validation run exists to detect.
    pub fn is_validation_failure(&self) -> bool {
        matches!(self, Self::DuplicateKey { .. } | Self::Mismatch { .. })
    }

    /// Number of offending keys or rows for validation failures.
    pub fn offending_count(&self) -> Option<usize> {
        match self {
            Self::DuplicateKey { count } | Self::Mismatch { count, .. } => Some(*count),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, VerifyError>;
