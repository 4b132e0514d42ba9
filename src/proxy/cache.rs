//! Verdict cache with fail-open degradation
//!
//! `VerdictCache` sits in front of a `CacheBackend`. The first backend error
//! flips the cache into degraded mode for the rest of its lifetime: lookups
//! return `Verdict::Unknown` and writes are dropped. Validation results
//! therefore never depend on the cache being reachable.

use crate::error::ValidatorError;
use crate::proxy::models::{Classification, Endpoint, Verdict};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Raw value held by a backend together with its expiry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedValue {
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

/// Key-value store with per-entry expiry
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Fetch a value; `Ok(None)` is a miss
    async fn get(&self, key: &str) -> Result<Option<CachedValue>, ValidatorError>;

    /// Store a value that expires `ttl` from now
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration)
        -> Result<(), ValidatorError>;
}

/// Absolute expiry for a TTL starting at `now`, saturating on overflow
pub fn expiry_after(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Process-local backend
#[derive(Default)]
pub struct MemoryBackend {
    entries: DashMap<String, CachedValue>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<CachedValue>, ValidatorError> {
        let now = Utc::now();
        let hit = self.entries.get(key).map(|entry| entry.value().clone());
        match hit {
            Some(entry) if entry.expires_at > now => Ok(Some(entry)),
            Some(_) => {
                self.entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), ValidatorError> {
        self.entries.insert(
            key.to_string(),
            CachedValue {
                value: value.to_string(),
                expires_at: expiry_after(Utc::now(), ttl),
            },
        );
        Ok(())
    }
}

/// SQLite-backed store that survives between runs
#[derive(Clone)]
pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    /// Open (creating if needed) the database at `url` and ensure the table exists
    pub async fn connect(url: &str) -> Result<Self, ValidatorError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        // every connection to an in-memory database is its own database
        let max_connections = if url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS verdicts(
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            expires_at INTEGER NOT NULL
        )"#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    /// Delete every expired row, returning how many were removed
    pub async fn purge_expired(&self) -> Result<u64, ValidatorError> {
        let result = sqlx::query("DELETE FROM verdicts WHERE expires_at <= ?1")
            .bind(Utc::now().timestamp_millis())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Count stored rows, expired or not
    pub async fn count(&self) -> Result<i64, ValidatorError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM verdicts")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }
}

#[async_trait]
impl CacheBackend for SqliteBackend {
    async fn get(&self, key: &str) -> Result<Option<CachedValue>, ValidatorError> {
        let row = sqlx::query("SELECT value, expires_at FROM verdicts WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let value: String = row.try_get("value")?;
        let expires_ms: i64 = row.try_get("expires_at")?;
        let Some(expires_at) = DateTime::<Utc>::from_timestamp_millis(expires_ms) else {
            return Ok(None);
        };
        if expires_at <= Utc::now() {
            return Ok(None);
        }

        Ok(Some(CachedValue { value, expires_at }))
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), ValidatorError> {
        let expires_at = expiry_after(Utc::now(), ttl);
        sqlx::query(
            r#"INSERT INTO verdicts(key, value, expires_at) VALUES(?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                value=excluded.value,
                expires_at=excluded.expires_at
        "#,
        )
        .bind(key)
        .bind(value)
        .bind(expires_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Fail-open verdict cache shared by every validation task of a run
pub struct VerdictCache {
    backend: Option<Arc<dyn CacheBackend>>,
    degraded: AtomicBool,
}

impl VerdictCache {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend: Some(backend),
            degraded: AtomicBool::new(false),
        }
    }

    /// A cache that is degraded from the start, used when the backend
    /// could not be reached at startup
    pub fn disabled() -> Self {
        Self {
            backend: None,
            degraded: AtomicBool::new(true),
        }
    }

    pub fn is_available(&self) -> bool {
        self.backend.is_some() && !self.degraded.load(Ordering::Acquire)
    }

    /// Look up the verdict for an endpoint.
    ///
    /// Misses, expired entries, unreadable values and backend failures all
    /// read as `Verdict::Unknown`.
    pub async fn get(&self, endpoint: &Endpoint) -> Verdict {
        let Some(backend) = self.active_backend() else {
            return Verdict::Unknown;
        };

        match backend.get(&endpoint.cache_key()).await {
            Ok(Some(cached)) => {
                Verdict::from_cache_value(&cached.value, cached.expires_at, Utc::now())
            }
            Ok(None) => Verdict::Unknown,
            Err(e) => {
                self.degrade(&e);
                Verdict::Unknown
            }
        }
    }

    /// Best-effort write; failures degrade the cache and are never returned
    pub async fn set(&self, endpoint: &Endpoint, classification: Classification, ttl: Duration) {
        let Some(backend) = self.active_backend() else {
            return;
        };

        let key = endpoint.cache_key();
        match backend
            .set_with_ttl(&key, classification.cache_value(), ttl)
            .await
        {
            Ok(()) => debug!("Cached {} as {:?} for {:?}", endpoint, classification, ttl),
            Err(e) => self.degrade(&e),
        }
    }

    fn active_backend(&self) -> Option<&Arc<dyn CacheBackend>> {
        if self.degraded.load(Ordering::Acquire) {
            return None;
        }
        self.backend.as_ref()
    }

    fn degrade(&self, err: &ValidatorError) {
        if !self.degraded.swap(true, Ordering::AcqRel) {
            warn!("Verdict cache unavailable, continuing without it for this run: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// Backend whose every call fails, counting attempts
    #[derive(Default)]
    struct BrokenBackend {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CacheBackend for BrokenBackend {
        async fn get(&self, _key: &str) -> Result<Option<CachedValue>, ValidatorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ValidatorError::CacheBackend("connection refused".into()))
        }

        async fn set_with_ttl(
            &self,
            _key: &str,
            _value: &str,
            _ttl: Duration,
        ) -> Result<(), ValidatorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ValidatorError::CacheBackend("connection refused".into()))
        }
    }

    /// Memory backend that starts failing once its call allowance is spent
    struct FlakyBackend {
        inner: MemoryBackend,
        allowance: AtomicUsize,
        calls: AtomicUsize,
    }

    impl FlakyBackend {
        fn new(allowance: usize) -> Self {
            Self {
                inner: MemoryBackend::new(),
                allowance: AtomicUsize::new(allowance),
                calls: AtomicUsize::new(0),
            }
        }

        fn check(&self) -> Result<(), ValidatorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let spent = self
                .allowance
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_err();
            if spent {
                return Err(ValidatorError::CacheBackend("connection reset".into()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl CacheBackend for FlakyBackend {
        async fn get(&self, key: &str) -> Result<Option<CachedValue>, ValidatorError> {
            self.check()?;
            self.inner.get(key).await
        }

        async fn set_with_ttl(
            &self,
            key: &str,
            value: &str,
            ttl: Duration,
        ) -> Result<(), ValidatorError> {
            self.check()?;
            self.inner.set_with_ttl(key, value, ttl).await
        }
    }

    fn endpoint() -> Endpoint {
        Endpoint::new("1.2.3.4", "8080")
    }

    #[tokio::test]
    async fn test_miss_is_unknown() {
        let cache = VerdictCache::new(Arc::new(MemoryBackend::new()));
        assert_eq!(cache.get(&endpoint()).await, Verdict::Unknown);
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let cache = VerdictCache::new(Arc::new(MemoryBackend::new()));
        cache
            .set(&endpoint(), Classification::Valid, Duration::from_secs(3600))
            .await;
        assert!(matches!(cache.get(&endpoint()).await, Verdict::Valid { .. }));

        cache
            .set(&endpoint(), Classification::Invalid, Duration::from_secs(3600))
            .await;
        assert!(matches!(cache.get(&endpoint()).await, Verdict::Invalid { .. }));
    }

    #[tokio::test]
    async fn test_expired_entry_is_miss() {
        let backend = Arc::new(MemoryBackend::new());
        let cache = VerdictCache::new(backend.clone());
        cache.set(&endpoint(), Classification::Valid, Duration::ZERO).await;

        assert_eq!(cache.get(&endpoint()).await, Verdict::Unknown);
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_keys_are_per_endpoint() {
        let cache = VerdictCache::new(Arc::new(MemoryBackend::new()));
        cache
            .set(&endpoint(), Classification::Valid, Duration::from_secs(60))
            .await;
        let other_port = Endpoint::new("1.2.3.4", "3128");
        assert_eq!(cache.get(&other_port).await, Verdict::Unknown);
    }

    #[tokio::test]
    async fn test_backend_failure_degrades_for_rest_of_run() {
        let backend = Arc::new(BrokenBackend::default());
        let cache = VerdictCache::new(backend.clone());
        assert!(cache.is_available());

        assert_eq!(cache.get(&endpoint()).await, Verdict::Unknown);
        assert!(!cache.is_available());

        cache
            .set(&endpoint(), Classification::Valid, Duration::from_secs(60))
            .await;
        assert_eq!(cache.get(&endpoint()).await, Verdict::Unknown);

        // only the first call reached the backend
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_backend_lost_mid_run() {
        let backend = Arc::new(FlakyBackend::new(2));
        let cache = VerdictCache::new(backend.clone());
        let other = Endpoint::new("5.6.7.8", "3128");

        cache
            .set(&endpoint(), Classification::Valid, Duration::from_secs(60))
            .await;
        assert!(matches!(cache.get(&endpoint()).await, Verdict::Valid { .. }));

        // allowance spent: this lookup fails and switches the cache off
        assert_eq!(cache.get(&other).await, Verdict::Unknown);
        assert!(!cache.is_available());

        cache
            .set(&other, Classification::Invalid, Duration::from_secs(60))
            .await;
        assert_eq!(backend.inner.len(), 1);

        // the stored verdict is no longer consulted
        assert_eq!(cache.get(&endpoint()).await, Verdict::Unknown);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_disabled_cache() {
        let cache = VerdictCache::disabled();
        assert!(!cache.is_available());
        cache
            .set(&endpoint(), Classification::Valid, Duration::from_secs(60))
            .await;
        assert_eq!(cache.get(&endpoint()).await, Verdict::Unknown);
    }

    #[test]
    fn test_expiry_after_saturates() {
        let now = Utc::now();
        assert_eq!(expiry_after(now, Duration::from_secs(0)), now);
        assert_eq!(expiry_after(now, Duration::MAX), DateTime::<Utc>::MAX_UTC);
    }

    #[tokio::test]
    async fn test_sqlite_backend_roundtrip() {
        let backend = SqliteBackend::connect("sqlite::memory:").await.unwrap();
        assert_eq!(backend.get("proxy:1.1.1.1:80").await.unwrap(), None);

        backend
            .set_with_ttl("proxy:1.1.1.1:80", "valid", Duration::from_secs(3600))
            .await
            .unwrap();
        let hit = backend.get("proxy:1.1.1.1:80").await.unwrap().unwrap();
        assert_eq!(hit.value, "valid");

        backend
            .set_with_ttl("proxy:1.1.1.1:80", "invalid", Duration::from_secs(3600))
            .await
            .unwrap();
        let hit = backend.get("proxy:1.1.1.1:80").await.unwrap().unwrap();
        assert_eq!(hit.value, "invalid");
        assert_eq!(backend.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_sqlite_backend_expiry_and_purge() {
        let backend = SqliteBackend::connect("sqlite::memory:").await.unwrap();
        backend
            .set_with_ttl("proxy:1.1.1.1:80", "valid", Duration::ZERO)
            .await
            .unwrap();
        backend
            .set_with_ttl("proxy:2.2.2.2:80", "valid", Duration::from_secs(3600))
            .await
            .unwrap();

        assert_eq!(backend.get("proxy:1.1.1.1:80").await.unwrap(), None);
        assert_eq!(backend.purge_expired().await.unwrap(), 1);
        assert_eq!(backend.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_sqlite_backend_persists_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("verdicts.db").display());

        {
            let backend = SqliteBackend::connect(&url).await.unwrap();
            backend
                .set_with_ttl("proxy:9.9.9.9:9", "valid", Duration::from_secs(3600))
                .await
                .unwrap();
        }

        let reopened = SqliteBackend::connect(&url).await.unwrap();
        let hit = reopened.get("proxy:9.9.9.9:9").await.unwrap();
        assert!(hit.is_some());
    }
}
