//! Error taxonomy for the validation pipeline
//!
//! None of these abort a run. Each kind has a local recovery: a failed
//! source contributes no endpoints, a failed cache degrades to fail-open,
//! a failed probe classifies the endpoint as unusable and a failed
//! enrichment falls back to unknown location data.

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ValidatorError {
    #[error("failed to fetch source {url}: {source}")]
    SourceFetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("cache backend error: {0}")]
    CacheBackend(String),

    #[error("probe timed out after {0:?}")]
    ProbeTimeout(Duration),

    #[error("probe connection failed: {0}")]
    ProbeConnection(String),

    #[error("probe protocol error: {0}")]
    ProbeProtocol(String),

    #[error("enrichment lookup failed: {0}")]
    Enrichment(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ValidatorError {
    /// Whether this error came out of the probe stage
    pub fn is_probe_failure(&self) -> bool {
        matches!(
            self,
            ValidatorError::ProbeTimeout(_)
                | ValidatorError::ProbeConnection(_)
                | ValidatorError::ProbeProtocol(_)
        )
    }
}

impl From<sqlx::Error> for ValidatorError {
    fn from(err: sqlx::Error) -> Self {
        ValidatorError::CacheBackend(err.to_string())
    }
}
