//! Per-endpoint validation state machine
//!
//! ```text
//! Start -> CacheCheck -> CachedValid                       (success)
//!                     -> CachedInvalid                     (failure, Suppress policy)
//!                     -> Probing -> ProbeSuccess           (success)
//!                                -> ProbeFailure           (failure)
//! ```
//!
//! The validator only decides. Cache writes and progress updates are
//! carried out by the scheduler's completion hooks once a `Settlement`
//! exists, which keeps the classification rules testable on their own.

use crate::error::ValidatorError;
use crate::proxy::cache::VerdictCache;
use crate::proxy::geo::GeoProvider;
use crate::proxy::models::{Classification, Endpoint, ProbeResult, ResultSource, Verdict};
use crate::proxy::probe::{ProbeAdapter, ProbeOutcome, DEFAULT_BLOCK_MARKER};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Default timeout for a single probe in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default number of endpoints validated at once
const DEFAULT_CONCURRENCY: usize = 5;

/// Default page fetched through each candidate
const DEFAULT_TEST_URL: &str = "https://cf-clearance.pages.dev";

/// How long a confirmed-good verdict is trusted
const DEFAULT_VALID_TTL: Duration = Duration::from_secs(24 * 3600);

/// How long a failed verdict is trusted
const DEFAULT_INVALID_TTL: Duration = Duration::from_secs(2 * 3600);

/// What a cached, unexpired Invalid verdict means for the next run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NegativeCachePolicy {
    /// Settle as a failure without probing until the verdict expires
    #[default]
    Suppress,
    /// Ignore the negative verdict and probe again
    Reprobe,
}

/// Configuration for endpoint validation
#[derive(Debug, Clone)]
pub struct CheckerConfig {
    /// Timeout for each probe
    pub timeout: Duration,
    /// Number of endpoints validated concurrently
    pub concurrency: usize,
    /// Target fetched through each endpoint
    pub test_url: String,
    /// Response fragment that marks a blocked request
    pub block_marker: String,
    /// Cache lifetime of a Valid verdict
    pub valid_ttl: Duration,
    /// Cache lifetime of an Invalid verdict
    pub invalid_ttl: Duration,
    /// Treatment of cached Invalid verdicts
    pub negative_cache: NegativeCachePolicy,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            concurrency: DEFAULT_CONCURRENCY,
            test_url: DEFAULT_TEST_URL.to_string(),
            block_marker: DEFAULT_BLOCK_MARKER.to_string(),
            valid_ttl: DEFAULT_VALID_TTL,
            invalid_ttl: DEFAULT_INVALID_TTL,
            negative_cache: NegativeCachePolicy::default(),
        }
    }
}

impl CheckerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Concurrency is clamped to at least one
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_test_url(mut self, url: String) -> Self {
        self.test_url = url;
        self
    }

    pub fn with_block_marker(mut self, marker: String) -> Self {
        self.block_marker = marker;
        self
    }

    pub fn with_ttls(mut self, valid_ttl: Duration, invalid_ttl: Duration) -> Self {
        self.valid_ttl = valid_ttl;
        self.invalid_ttl = invalid_ttl;
        self
    }

    pub fn with_negative_cache(mut self, policy: NegativeCachePolicy) -> Self {
        self.negative_cache = policy;
        self
    }
}

/// Where the state machine left an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalState {
    CachedValid,
    CachedInvalid,
    ProbeSuccess,
    ProbeFailure,
    /// The task died before settling; counted as a failure, nothing cached
    Aborted,
}

impl TerminalState {
    pub fn is_valid(&self) -> bool {
        matches!(self, TerminalState::CachedValid | TerminalState::ProbeSuccess)
    }

    pub fn was_probed(&self) -> bool {
        matches!(self, TerminalState::ProbeSuccess | TerminalState::ProbeFailure)
    }

    /// Cache write owed by this state, if any. Only fresh probe results are
    /// written; cached states leave the existing entry alone.
    pub fn cache_write(&self, config: &CheckerConfig) -> Option<(Classification, Duration)> {
        match self {
            TerminalState::ProbeSuccess => Some((Classification::Valid, config.valid_ttl)),
            TerminalState::ProbeFailure => Some((Classification::Invalid, config.invalid_ttl)),
            TerminalState::CachedValid | TerminalState::CachedInvalid | TerminalState::Aborted => {
                None
            }
        }
    }
}

/// Transition out of `CacheCheck`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheDecision {
    CachedValid,
    CachedInvalid,
    Probe,
}

/// Decide what a cache lookup result means
pub fn after_cache_check(verdict: Verdict, policy: NegativeCachePolicy) -> CacheDecision {
    match (verdict, policy) {
        (Verdict::Valid { .. }, _) => CacheDecision::CachedValid,
        (Verdict::Invalid { .. }, NegativeCachePolicy::Suppress) => CacheDecision::CachedInvalid,
        (Verdict::Invalid { .. }, NegativeCachePolicy::Reprobe) | (Verdict::Unknown, _) => {
            CacheDecision::Probe
        }
    }
}

/// Decide what a probe result means; only an explicit pass succeeds
pub fn after_probe(outcome: &Result<ProbeOutcome, ValidatorError>) -> TerminalState {
    match outcome {
        Ok(ProbeOutcome { passed: true }) => TerminalState::ProbeSuccess,
        Ok(ProbeOutcome { passed: false }) | Err(_) => TerminalState::ProbeFailure,
    }
}

/// Final outcome of validating one endpoint
#[derive(Debug, Clone)]
pub struct Settlement {
    pub endpoint: Endpoint,
    pub state: TerminalState,
    /// Present exactly when `state.is_valid()`
    pub result: Option<ProbeResult>,
    /// Why a probe failed or a task aborted
    pub error: Option<String>,
}

impl Settlement {
    pub fn aborted(endpoint: Endpoint, reason: String) -> Self {
        Self {
            endpoint,
            state: TerminalState::Aborted,
            result: None,
            error: Some(reason),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.state.is_valid()
    }
}

/// Runs the state machine for one endpoint at a time
#[derive(Clone)]
pub struct EndpointValidator {
    config: CheckerConfig,
    cache: Arc<VerdictCache>,
    probe: Arc<dyn ProbeAdapter>,
    geo: Arc<dyn GeoProvider>,
}

impl EndpointValidator {
    pub fn new(
        config: CheckerConfig,
        cache: Arc<VerdictCache>,
        probe: Arc<dyn ProbeAdapter>,
        geo: Arc<dyn GeoProvider>,
    ) -> Self {
        Self {
            config,
            cache,
            probe,
            geo,
        }
    }

    pub fn config(&self) -> &CheckerConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<VerdictCache> {
        &self.cache
    }

    /// Validate a single endpoint
    pub async fn validate(&self, endpoint: Endpoint) -> Settlement {
        let verdict = self.cache.get(&endpoint).await.unexpired(Utc::now());

        match after_cache_check(verdict, self.config.negative_cache) {
            CacheDecision::CachedValid => {
                debug!("{} valid from cache", endpoint);
                self.succeed(endpoint, TerminalState::CachedValid, ResultSource::Cache)
                    .await
            }
            CacheDecision::CachedInvalid => {
                debug!("{} invalid from cache", endpoint);
                Settlement {
                    endpoint,
                    state: TerminalState::CachedInvalid,
                    result: None,
                    error: None,
                }
            }
            CacheDecision::Probe => self.run_probe(endpoint).await,
        }
    }

    async fn run_probe(&self, endpoint: Endpoint) -> Settlement {
        let timeout = self.config.timeout;
        let outcome = match tokio::time::timeout(
            timeout,
            self.probe.probe(&endpoint, &self.config.test_url, timeout),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(ValidatorError::ProbeTimeout(timeout)),
        };

        match after_probe(&outcome) {
            TerminalState::ProbeSuccess => {
                debug!("{} passed probe", endpoint);
                self.succeed(endpoint, TerminalState::ProbeSuccess, ResultSource::Probe)
                    .await
            }
            state => {
                let error = match outcome {
                    Ok(_) => "blocked response".to_string(),
                    Err(e) => e.to_string(),
                };
                debug!("{} failed probe: {}", endpoint, error);
                Settlement {
                    endpoint,
                    state,
                    result: None,
                    error: Some(error),
                }
            }
        }
    }

    /// Enrichment is looked up fresh for every success; only the verdict is cached
    async fn succeed(
        &self,
        endpoint: Endpoint,
        state: TerminalState,
        source: ResultSource,
    ) -> Settlement {
        let geo = self.geo.lookup(&endpoint.host).await;
        Settlement {
            result: Some(ProbeResult::new(endpoint.clone(), geo, source)),
            endpoint,
            state,
            error: None,
        }
    }
}
