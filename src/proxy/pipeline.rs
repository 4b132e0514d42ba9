//! End-to-end validation run: sources -> unique endpoints -> settlements -> report

use crate::proxy::cache::{MemoryBackend, SqliteBackend, VerdictCache};
use crate::proxy::checker::EndpointValidator;
use crate::proxy::crawler::{HttpSourceProvider, ProxyCrawler, SourceProvider};
use crate::proxy::geo::{GeoProvider, IpApiGeoProvider, MmdbGeoProvider, NoGeo};
use crate::proxy::models::Endpoint;
use crate::proxy::probe::{HttpProbe, ProbeAdapter};
use crate::proxy::progress::ProgressTracker;
use crate::proxy::report::RunReport;
use crate::proxy::scheduler::{CacheWriteHook, ProgressHook, Scheduler};
use crate::{Config, GeoSource, Result};
use std::sync::Arc;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

/// Owns the collaborators of a run and executes runs on demand
pub struct ValidationPipeline {
    crawler: ProxyCrawler,
    validator: EndpointValidator,
}

impl ValidationPipeline {
    pub fn new(source_provider: Arc<dyn SourceProvider>, validator: EndpointValidator) -> Self {
        Self {
            crawler: ProxyCrawler::new(source_provider),
            validator,
        }
    }

    /// Assemble the HTTP, cache and geo adapters described by `config`.
    ///
    /// An unreachable cache or an unreadable geo database is logged and
    /// replaced by its fail-open counterpart rather than returned as an error.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let cache = Arc::new(open_cache(config.cache_url.as_deref()).await);
        let geo = open_geo(&config.geo)?;
        let probe: Arc<dyn ProbeAdapter> =
            Arc::new(HttpProbe::new(config.checker.block_marker.clone()));
        let sources: Arc<dyn SourceProvider> = Arc::new(HttpSourceProvider::new()?);

        let validator = EndpointValidator::new(config.checker.clone(), cache, probe, geo);
        Ok(Self::new(sources, validator))
    }

    pub fn validator(&self) -> &EndpointValidator {
        &self.validator
    }

    /// Fetch all sources, then validate the unique endpoints they list
    pub async fn run(&self, sources: &[String]) -> RunReport {
        let run_id = Uuid::new_v4();
        let span = info_span!("run", id = %run_id);

        async {
            let endpoints = self.crawler.collect_endpoints(sources).await;
            self.validate_endpoints(endpoints).await
        }
        .instrument(span)
        .await
    }

    /// Validate an already-normalized endpoint list
    pub async fn validate_endpoints(&self, endpoints: Vec<Endpoint>) -> RunReport {
        let tracker = Arc::new(ProgressTracker::new(endpoints.len()));
        let config = self.validator.config();
        let scheduler = Scheduler::new(config.concurrency)
            .with_hook(Arc::new(CacheWriteHook::new(
                Arc::clone(self.validator.cache()),
                config.clone(),
            )))
            .with_hook(Arc::new(ProgressHook::new(Arc::clone(&tracker))));

        info!(
            "Validating {} endpoints with concurrency {}",
            endpoints.len(),
            scheduler.concurrency()
        );
        let settlements = scheduler.run(&self.validator, endpoints).await;
        let report = RunReport::from_settlements(settlements, tracker.report());

        info!(
            "Run finished: {} | cache hits: {} | probed: {} | aborted: {}",
            report.progress, report.cache_hits, report.probed, report.aborted
        );
        report
    }
}

/// Open the configured cache, falling back to fail-open mode if it is unreachable
pub async fn open_cache(cache_url: Option<&str>) -> VerdictCache {
    match cache_url {
        None => VerdictCache::new(Arc::new(MemoryBackend::new())),
        Some(url) => match SqliteBackend::connect(url).await {
            Ok(backend) => VerdictCache::new(Arc::new(backend)),
            Err(e) => {
                warn!("Verdict cache at {} unavailable, running without it: {}", url, e);
                VerdictCache::disabled()
            }
        },
    }
}

fn open_geo(source: &GeoSource) -> Result<Arc<dyn GeoProvider>> {
    let provider: Arc<dyn GeoProvider> = match source {
        GeoSource::Disabled => Arc::new(NoGeo),
        GeoSource::IpApi { base_url } => Arc::new(IpApiGeoProvider::new(base_url.clone())?),
        GeoSource::Mmdb { path } => match MmdbGeoProvider::from_path(path) {
            Ok(provider) => Arc::new(provider),
            Err(e) => {
                warn!("Cannot open {}: {}; locations will be Unknown", path.display(), e);
                Arc::new(NoGeo)
            }
        },
    };
    Ok(provider)
}
