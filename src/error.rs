//! Error taxonomy shared by the sampling and analysis pipeline.

use std::path::PathBuf;

/// Errors raised by the growth-estimation pipeline.
///
/// `ConfigMismatch`, `InsufficientData`, `ParseError` and `NonMonotonicCounter`
/// are scoped to a single run or series: the dataset builder records them and
/// moves on. `ExternalQueryFailure` ends a live sampling session unless the
/// sampler is configured to record gaps.
#[derive(Debug, thiserror::Error)]
pub enum GrowthError {
    #[error("Run does not match filter: {0}")]
    ConfigMismatch(String),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("External query failed: {0}")]
    ExternalQueryFailure(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Counter '{counter}' decreased from {previous} to {current}")]
    NonMonotonicCounter {
        counter: &'static str,
        previous: f64,
        current: f64,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl GrowthError {
    /// Short stable name used when counting skipped runs by reason.
    pub fn kind(&self) -> &'static str {
        match self {
            GrowthError::ConfigMismatch(_) => "config_mismatch",
            GrowthError::InsufficientData(_) => "insufficient_data",
            GrowthError::ExternalQueryFailure(_) => "external_query_failure",
            GrowthError::ParseError(_) => "parse_error",
            GrowthError::NonMonotonicCounter { .. } => "non_monotonic_counter",
            GrowthError::Cancelled => "cancelled",
            GrowthError::Io { .. } => "io",
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        GrowthError::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<csv::Error> for GrowthError {
    fn from(err: csv::Error) -> Self {
        GrowthError::ParseError(err.to_string())
    }
}
