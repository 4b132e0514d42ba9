//! Proxy Sieve - cached, bounded-concurrency proxy validation
//!
//! Collects candidate `host:port` endpoints from remote lists, checks each
//! one through a live probe, caches the verdict and reports the endpoints
//! that are usable.

pub mod error;
pub mod proxy;

pub use error::ValidatorError;
pub use proxy::*;

use std::path::PathBuf;

/// Application result type
pub type Result<T> = anyhow::Result<T>;

/// Where location data for usable endpoints comes from
#[derive(Debug, Clone, PartialEq)]
pub enum GeoSource {
    /// ip-api compatible JSON service; the host is appended to `base_url`
    IpApi { base_url: String },
    /// Local MaxMind City database
    Mmdb { path: PathBuf },
    Disabled,
}

impl Default for GeoSource {
    fn default() -> Self {
        GeoSource::IpApi {
            base_url: proxy::geo::DEFAULT_GEO_API.to_string(),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Validation settings
    pub checker: CheckerConfig,
    /// URLs of raw candidate lists
    pub sources: Vec<String>,
    /// SQLite URL of the verdict cache; in-memory when unset
    pub cache_url: Option<String>,
    /// Enrichment provider
    pub geo: GeoSource,
    /// One usable host per line
    pub output_txt: PathBuf,
    /// Structured records of usable endpoints
    pub output_json: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            checker: CheckerConfig::default(),
            sources: Vec::new(),
            cache_url: None,
            geo: GeoSource::default(),
            output_txt: PathBuf::from("pyip.txt"),
            output_json: PathBuf::from("proxies.json"),
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_checker(mut self, checker: CheckerConfig) -> Self {
        self.checker = checker;
        self
    }

    pub fn with_sources(mut self, sources: Vec<String>) -> Self {
        self.sources = sources;
        self
    }

    pub fn with_cache_url(mut self, url: Option<String>) -> Self {
        self.cache_url = url;
        self
    }

    pub fn with_geo(mut self, geo: GeoSource) -> Self {
        self.geo = geo;
        self
    }

    pub fn with_outputs(mut self, output_txt: PathBuf, output_json: PathBuf) -> Self {
        self.output_txt = output_txt;
        self.output_json = output_json;
        self
    }
}
