//! Proxy module for validating candidate endpoints
//!
//! This module provides functionality for:
//! - Parsing and deduplicating `host:port` candidates from raw source text
//! - Caching pass/fail verdicts with asymmetric expiry
//! - Probing endpoints with bounded concurrency
//! - Enriching usable endpoints with location data
//! - Aggregating the run into a report

pub mod cache;
pub mod checker;
pub mod crawler;
pub mod geo;
pub mod models;
pub mod parser;
pub mod pipeline;
pub mod probe;
pub mod progress;
pub mod report;
pub mod scheduler;

pub use cache::{CacheBackend, MemoryBackend, SqliteBackend, VerdictCache};
pub use checker::{
    CheckerConfig, EndpointValidator, NegativeCachePolicy, Settlement, TerminalState,
};
pub use crawler::{CrawlerConfig, HttpSourceProvider, ProxyCrawler, SourceProvider};
pub use geo::{GeoProvider, IpApiGeoProvider, MmdbGeoProvider, NoGeo};
pub use models::{
    Classification, Endpoint, GeoInfo, ProbeResult, ProxyRecord, ResultSource, Verdict,
};
pub use parser::EndpointParser;
pub use pipeline::ValidationPipeline;
pub use probe::{HttpProbe, ProbeAdapter, ProbeOutcome};
pub use progress::{ProgressSnapshot, ProgressTracker};
pub use report::RunReport;
pub use scheduler::{CacheWriteHook, CompletionHook, ProgressHook, Scheduler};
