//! Bounded-concurrency scheduler for validation tasks
//!
//! At most `concurrency` endpoints are in flight at any instant. Each one
//! runs on its own tokio task so a panic is contained to that endpoint and
//! surfaces as an `Aborted` settlement. Side effects (cache writes,
//! progress) run as completion hooks after a task settles.

use crate::proxy::cache::VerdictCache;
use crate::proxy::checker::{CheckerConfig, EndpointValidator, Settlement};
use crate::proxy::models::Endpoint;
use crate::proxy::progress::ProgressTracker;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{info, warn};

/// Side effect invoked once for every settled endpoint
#[async_trait]
pub trait CompletionHook: Send + Sync {
    async fn on_settled(&self, settlement: &Settlement);
}

/// Persists the verdict owed by a fresh probe
pub struct CacheWriteHook {
    cache: Arc<VerdictCache>,
    config: CheckerConfig,
}

impl CacheWriteHook {
    pub fn new(cache: Arc<VerdictCache>, config: CheckerConfig) -> Self {
        Self { cache, config }
    }
}

#[async_trait]
impl CompletionHook for CacheWriteHook {
    async fn on_settled(&self, settlement: &Settlement) {
        if let Some((classification, ttl)) = settlement.state.cache_write(&self.config) {
            self.cache.set(&settlement.endpoint, classification, ttl).await;
        }
    }
}

/// Counts settlements and logs the running totals
pub struct ProgressHook {
    tracker: Arc<ProgressTracker>,
}

impl ProgressHook {
    pub fn new(tracker: Arc<ProgressTracker>) -> Self {
        Self { tracker }
    }
}

#[async_trait]
impl CompletionHook for ProgressHook {
    async fn on_settled(&self, settlement: &Settlement) {
        let snapshot = self.tracker.record_completion(settlement.is_valid());
        info!("Progress: {}", snapshot);
    }
}

/// Dispatches validation tasks with a fixed concurrency limit
pub struct Scheduler {
    concurrency: usize,
    hooks: Vec<Arc<dyn CompletionHook>>,
}

impl Scheduler {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            hooks: Vec::new(),
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn CompletionHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Validate every endpoint and return one settlement per input, in
    /// input order
    pub async fn run(
        &self,
        validator: &EndpointValidator,
        endpoints: Vec<Endpoint>,
    ) -> Vec<Settlement> {
        let hooks = &self.hooks;

        let mut settled: Vec<(usize, Settlement)> = stream::iter(endpoints.into_iter().enumerate())
            .map(|(index, endpoint)| {
                let validator = validator.clone();
                async move {
                    let task_endpoint = endpoint.clone();
                    let handle =
                        tokio::spawn(async move { validator.validate(task_endpoint).await });

                    let settlement = match handle.await {
                        Ok(settlement) => settlement,
                        Err(e) => {
                            warn!("Validation of {} aborted: {}", endpoint, e);
                            Settlement::aborted(endpoint, e.to_string())
                        }
                    };

                    for hook in hooks {
                        hook.on_settled(&settlement).await;
                    }
                    (index, settlement)
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        settled.sort_by_key(|(index, _)| *index);
        settled.into_iter().map(|(_, settlement)| settlement).collect()
    }
}
