//! Probe adapter port and the HTTP implementation
//!
//! The validator only relies on the `ProbeAdapter` contract: given an
//! endpoint, a test target and a timeout, report pass/fail or an error.

use crate::error::ValidatorError;
use crate::proxy::models::Endpoint;
use crate::Result;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_LANGUAGE, REFERER};
use reqwest::{Client, Proxy as ReqwestProxy};
use std::time::Duration;

/// Default user agent sent through the candidate proxy
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/128.0.0.0 Safari/537.36";

/// Page fragment served by the challenge interstitial
pub const DEFAULT_BLOCK_MARKER: &str = "Just a moment...";

/// Outcome of a probe that ran to completion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub passed: bool,
}

impl ProbeOutcome {
    pub fn pass() -> Self {
        Self { passed: true }
    }

    pub fn fail() -> Self {
        Self { passed: false }
    }
}

/// Live reachability/behaviour test for one endpoint
#[async_trait]
pub trait ProbeAdapter: Send + Sync {
    /// Errors cover timeouts, refused connections and protocol failures.
    /// Implementations should stop by `timeout`; the validator enforces it
    /// regardless.
    async fn probe(
        &self,
        endpoint: &Endpoint,
        test_target: &str,
        timeout: Duration,
    ) -> std::result::Result<ProbeOutcome, ValidatorError>;
}

/// Fetches the test target through the candidate proxy and fails when the
/// response still carries the block marker
#[derive(Debug, Clone)]
pub struct HttpProbe {
    user_agent: String,
    block_marker: String,
}

impl HttpProbe {
    pub fn new(block_marker: impl Into<String>) -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            block_marker: block_marker.into(),
        }
    }

    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }

    /// Create a reqwest client routed through the endpoint
    fn create_client(&self, endpoint: &Endpoint, timeout: Duration) -> Result<Client> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
        headers.insert(REFERER, HeaderValue::from_static("https://www.google.com/"));

        let client = Client::builder()
            .proxy(ReqwestProxy::all(endpoint.proxy_url())?)
            .user_agent(&self.user_agent)
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(client)
    }

    fn classify_error(err: reqwest::Error, timeout: Duration) -> ValidatorError {
        if err.is_timeout() {
            ValidatorError::ProbeTimeout(timeout)
        } else if err.is_connect() {
            ValidatorError::ProbeConnection(err.to_string())
        } else {
            ValidatorError::ProbeProtocol(err.to_string())
        }
    }
}

impl Default for HttpProbe {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK_MARKER)
    }
}

#[async_trait]
impl ProbeAdapter for HttpProbe {
    async fn probe(
        &self,
        endpoint: &Endpoint,
        test_target: &str,
        timeout: Duration,
    ) -> std::result::Result<ProbeOutcome, ValidatorError> {
        let client = self
            .create_client(endpoint, timeout)
            .map_err(|e| ValidatorError::ProbeProtocol(e.to_string()))?;

        let response = client
            .get(test_target)
            .send()
            .await
            .map_err(|e| Self::classify_error(e, timeout))?;
        let body = response
            .text()
            .await
            .map_err(|e| Self::classify_error(e, timeout))?;

        Ok(ProbeOutcome {
            passed: !body.contains(&self.block_marker),
        })
    }
}
