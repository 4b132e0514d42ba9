//! Geolocation enrichment for usable endpoints
//!
//! Every provider swallows its own failures and answers with
//! `GeoInfo::default()`, so enrichment can never turn a valid endpoint
//! into an invalid one.

use crate::error::ValidatorError;
use crate::proxy::models::{GeoInfo, UNKNOWN};
use crate::Result;
use async_trait::async_trait;
use maxminddb::{geoip2, Reader};
use reqwest::Client;
use serde::Deserialize;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Default ip-api endpoint; the host is appended to it
pub const DEFAULT_GEO_API: &str = "http://ip-api.com/json/";

/// Timeout for a single enrichment request
const GEO_TIMEOUT_SECS: u64 = 10;

/// Resolves location metadata for a host
#[async_trait]
pub trait GeoProvider: Send + Sync {
    async fn lookup(&self, host: &str) -> GeoInfo;
}

fn known(value: Option<String>) -> String {
    value
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| UNKNOWN.to_string())
}

/// Enrichment turned off; every lookup yields the unknown defaults
#[derive(Debug, Clone, Copy, Default)]
pub struct NoGeo;

#[async_trait]
impl GeoProvider for NoGeo {
    async fn lookup(&self, _host: &str) -> GeoInfo {
        GeoInfo::default()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IpApiResponse {
    country: Option<String>,
    region_name: Option<String>,
    city: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
    org: Option<String>,
}

impl From<IpApiResponse> for GeoInfo {
    fn from(res: IpApiResponse) -> Self {
        GeoInfo {
            country: known(res.country),
            region: known(res.region_name),
            city: known(res.city),
            lat: res.lat,
            lon: res.lon,
            isp: known(res.org),
        }
    }
}

/// Looks hosts up against an ip-api compatible JSON service
#[derive(Clone)]
pub struct IpApiGeoProvider {
    client: Client,
    base_url: String,
}

impl IpApiGeoProvider {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(GEO_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    async fn try_lookup(&self, host: &str) -> std::result::Result<GeoInfo, ValidatorError> {
        let url = format!("{}{}", self.base_url, host);
        let enrichment = |e: reqwest::Error| ValidatorError::Enrichment(e.to_string());

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(enrichment)?;
        let body: IpApiResponse = response.json().await.map_err(enrichment)?;
        Ok(body.into())
    }
}

#[async_trait]
impl GeoProvider for IpApiGeoProvider {
    async fn lookup(&self, host: &str) -> GeoInfo {
        match self.try_lookup(host).await {
            Ok(geo) => geo,
            Err(e) => {
                debug!("Geo lookup for {} failed: {}", host, e);
                GeoInfo::default()
            }
        }
    }
}

/// Looks hosts up in a local MaxMind City database
pub struct MmdbGeoProvider {
    reader: Arc<Reader<Vec<u8>>>,
}

impl MmdbGeoProvider {
    /// Open an MMDB file
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = Reader::open_readfile(path)?;
        Ok(Self {
            reader: Arc::new(reader),
        })
    }

    fn try_lookup(&self, host: &str) -> std::result::Result<GeoInfo, ValidatorError> {
        let ip: IpAddr = host
            .parse()
            .map_err(|_| ValidatorError::Enrichment(format!("not an IP address: {}", host)))?;
        let lookup_result = self
            .reader
            .lookup(ip)
            .map_err(|e| ValidatorError::Enrichment(e.to_string()))?;
        let city: Option<geoip2::City> = lookup_result
            .decode()
            .map_err(|e| ValidatorError::Enrichment(e.to_string()))?;

        let Some(city) = city else {
            return Ok(GeoInfo::default());
        };

        Ok(GeoInfo {
            country: known(city.country.names.english.map(String::from)),
            // continent is the only region-level field in City records
            region: known(city.continent.code.map(String::from)),
            city: known(city.city.names.english.map(String::from)),
            lat: city.location.latitude,
            lon: city.location.longitude,
            // City databases carry no ISP data
            isp: UNKNOWN.to_string(),
        })
    }
}

impl Clone for MmdbGeoProvider {
    fn clone(&self) -> Self {
        Self {
            reader: Arc::clone(&self.reader),
        }
    }
}

#[async_trait]
impl GeoProvider for MmdbGeoProvider {
    async fn lookup(&self, host: &str) -> GeoInfo {
        match self.try_lookup(host) {
            Ok(geo) => geo,
            Err(e) => {
                debug!("MMDB lookup for {} failed: {}", host, e);
                GeoInfo::default()
            }
        }
    }
}
