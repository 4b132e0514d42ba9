//! Proxy data models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Placeholder used for every enrichment field that could not be resolved
pub const UNKNOWN: &str = "Unknown";

/// Candidate proxy endpoint.
///
/// Host and port are kept exactly as they appeared in the source text, so
/// identity is textual: `1.2.3.4:8080` and `1.2.3.4:08080` are different
/// endpoints. Octet and port ranges are not checked here; the probe rejects
/// addresses that cannot be dialled.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: String,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: port.into(),
        }
    }

    /// Key under which this endpoint's verdict is cached
    pub fn cache_key(&self) -> String {
        format!("proxy:{}:{}", self.host, self.port)
    }

    /// Proxy URL used when routing a probe through this endpoint
    pub fn proxy_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Numeric port, if it fits in a real TCP port
    pub fn port_number(&self) -> Option<u16> {
        self.port.parse().ok()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Cached classification of an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Valid { expires_at: DateTime<Utc> },
    Invalid { expires_at: DateTime<Utc> },
    /// No cached verdict, or the cache is unavailable
    Unknown,
}

/// Pass/fail classification written to the verdict cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Valid,
    Invalid,
}

impl Classification {
    /// Value stored in the cache backend
    pub fn cache_value(&self) -> &'static str {
        match self {
            Classification::Valid => "valid",
            Classification::Invalid => "invalid",
        }
    }

    pub fn verdict(self, expires_at: DateTime<Utc>) -> Verdict {
        match self {
            Classification::Valid => Verdict::Valid { expires_at },
            Classification::Invalid => Verdict::Invalid { expires_at },
        }
    }
}

impl Verdict {
    /// Rebuild a verdict from a raw cache value and its expiry.
    ///
    /// Unrecognised values and entries already past their expiry read as
    /// `Unknown`.
    pub fn from_cache_value(value: &str, expires_at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        if expires_at <= now {
            return Verdict::Unknown;
        }
        match value {
            "valid" => Classification::Valid.verdict(expires_at),
            "invalid" => Classification::Invalid.verdict(expires_at),
            _ => Verdict::Unknown,
        }
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Verdict::Valid { expires_at } | Verdict::Invalid { expires_at } => Some(*expires_at),
            Verdict::Unknown => None,
        }
    }

    /// Downgrade to `Unknown` once `now` has reached the expiry
    pub fn unexpired(self, now: DateTime<Utc>) -> Self {
        match self.expires_at() {
            Some(expires_at) if expires_at > now => self,
            _ => Verdict::Unknown,
        }
    }
}

/// Location and network metadata attached to a usable endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoInfo {
    pub country: String,
    pub region: String,
    pub city: String,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub isp: String,
}

impl Default for GeoInfo {
    fn default() -> Self {
        Self {
            country: UNKNOWN.to_string(),
            region: UNKNOWN.to_string(),
            city: UNKNOWN.to_string(),
            lat: None,
            lon: None,
            isp: UNKNOWN.to_string(),
        }
    }
}

impl GeoInfo {
    /// True when nothing beyond the defaults was resolved
    pub fn is_unknown(&self) -> bool {
        *self == GeoInfo::default()
    }
}

/// How a usable endpoint was confirmed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultSource {
    Cache,
    Probe,
}

/// Outcome emitted for every endpoint classified as valid
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeResult {
    pub endpoint: Endpoint,
    pub geo: GeoInfo,
    pub source: ResultSource,
    pub checked_at: DateTime<Utc>,
}

impl ProbeResult {
    pub fn new(endpoint: Endpoint, geo: GeoInfo, source: ResultSource) -> Self {
        Self {
            endpoint,
            geo,
            source,
            checked_at: Utc::now(),
        }
    }

    pub fn to_record(&self) -> ProxyRecord {
        ProxyRecord {
            ip: self.endpoint.host.clone(),
            port: self.endpoint.port.clone(),
            country: self.geo.country.clone(),
            region: self.geo.region.clone(),
            city: self.geo.city.clone(),
            lat: self.geo.lat,
            lon: self.geo.lon,
            isp: self.geo.isp.clone(),
            last_checked: self.checked_at.timestamp_millis(),
        }
    }
}

/// Flat JSON record written to the structured report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyRecord {
    pub ip: String,
    pub port: String,
    pub country: String,
    pub region: String,
    pub city: String,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub isp: String,
    pub last_checked: i64,
}
