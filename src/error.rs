use std::time::Duration;

use thiserror::Error;

/// Every failure the pipeline can surface. Nothing here is retried.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("column '{column}' bound to {role} is missing from the input")]
    MissingColumn { role: &'static str, column: String },

    #[error("no rows to create")]
    NoRows,

    #[error("row {row}: column '{column}' has invalid value '{value}': {reason}")]
    InvalidValue {
        row: usize,
        column: String,
        value: String,
        reason: String,
    },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("{endpoint} returned {status}: {body}")]
    Http {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("malformed response from {endpoint}: {message}")]
    Decode { endpoint: String, message: String },

    #[error("matcher failed: {0}")]
    Matcher(String),

    #[error("job {job_id} failed on the platform (status {status})")]
    JobFailed { job_id: String, status: String },

    #[error("job {job_id} not finished after {waited:?}")]
    PollTimeout { job_id: String, waited: Duration },

    #[error("cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Parquet error: {0}")]
    Parquet(String),
}

impl PipelineError {
    /// True for the fail-fast class raised before any network call.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::MissingColumn { .. } | Self::NoRows | Self::InvalidValue { .. }
        )
    }

    pub(crate) fn decode(endpoint: impl Into<String>, message: impl ToString) -> Self {
        Self::Decode {
            endpoint: endpoint.into(),
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
