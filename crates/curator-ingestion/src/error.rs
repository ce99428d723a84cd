//! Error types for the ingestion crate.
//!
//! [`SourceError`] is fatal to a run, [`StageError`] is recorded per record and
//! never escapes it, [`PipelineError`] is what `run` returns instead of a
//! report.

use thiserror::Error;

/// Failure of the metadata source. Aborts the run.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source request timed out")]
    Timeout,

    #[error("source rate limit exceeded")]
    RateLimited,

    #[error("source returned HTTP {status}")]
    Status { status: u16 },

    #[error("source request failed: {0}")]
    Request(String),

    #[error("could not parse source response: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SourceError::Timeout
        } else if let Some(status) = err.status() {
            SourceError::Status { status: status.as_u16() }
        } else {
            SourceError::Request(err.to_string())
        }
    }
}

impl From<curator_common::CuratorError> for SourceError {
    fn from(err: curator_common::CuratorError) -> Self {
        SourceError::Request(err.to_string())
    }
}

/// Failure of one stage for one record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageError {
    /// The adapter gave up after its own deadline.
    #[error("timed out")]
    Timeout,

    /// Transient: network hiccup, 5xx, pool exhaustion.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Permanent: 4xx, blocked host, rejected document.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The input itself is unusable (corrupt or oversized PDF).
    #[error("invalid content: {0}")]
    Invalid(String),

    /// The adapter finished but produced nothing.
    #[error("no result")]
    Empty,
}

impl StageError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StageError::Timeout | StageError::Unavailable(_))
    }
}

impl From<reqwest::Error> for StageError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return StageError::Timeout;
        }
        match err.status() {
            Some(status) if status.is_server_error() || status.as_u16() == 429 => {
                StageError::Unavailable(format!("HTTP {status}"))
            }
            Some(status) => StageError::Rejected(format!("HTTP {status}")),
            None => StageError::Unavailable(err.to_string()),
        }
    }
}

impl From<sqlx::Error> for StageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StageError::Unavailable(err.to_string())
            }
            other => StageError::Rejected(other.to_string()),
        }
    }
}

impl From<curator_common::CuratorError> for StageError {
    fn from(err: curator_common::CuratorError) -> Self {
        match err {
            curator_common::CuratorError::Http(e) => e.into(),
            other => StageError::Rejected(other.to_string()),
        }
    }
}

/// Why a run produced no report.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("pipeline execution failed: {0}")]
    Source(#[from] SourceError),

    #[error("persist requested but no paper store is configured")]
    MissingStore,

    #[error("index requested but no search indexer is configured")]
    MissingIndexer,

    #[error("invalid pipeline options: {0}")]
    InvalidOptions(String),
}
