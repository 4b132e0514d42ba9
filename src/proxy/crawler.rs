//! Source crawler for fetching raw candidate lists
//!
//! This module provides:
//! - The `SourceProvider` port used by the pipeline to obtain raw text
//! - An HTTP implementation backed by reqwest
//! - `ProxyCrawler`, which harvests many sources where a failing source
//!   never affects the others

use crate::error::ValidatorError;
use crate::proxy::models::Endpoint;
use crate::proxy::parser::EndpointParser;
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Default timeout for HTTP requests in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default user agent for HTTP requests
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/128.0.0.0 Safari/537.36";

/// Supplies the raw text of one candidate source
#[async_trait]
pub trait SourceProvider: Send + Sync {
    async fn fetch_source_text(&self, url: &str) -> std::result::Result<String, ValidatorError>;
}

/// Result of harvesting a single source
#[derive(Debug, Clone)]
pub struct CrawlResult {
    /// The source that was fetched
    pub source: String,
    /// Raw text returned by the source, empty on failure
    pub text: String,
    /// Error message if fetching failed
    pub error: Option<String>,
}

impl CrawlResult {
    pub fn success(source: String, text: String) -> Self {
        Self {
            source,
            text,
            error: None,
        }
    }

    pub fn failure(source: String, error: String) -> Self {
        Self {
            source,
            text: String::new(),
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Configuration for the HTTP source provider
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    /// Timeout for HTTP requests
    pub timeout: Duration,
    /// User agent for HTTP requests
    pub user_agent: String,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl CrawlerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }
}

/// Fetches sources over plain HTTP GET
pub struct HttpSourceProvider {
    client: Client,
}

impl HttpSourceProvider {
    pub fn new() -> Result<Self> {
        Self::with_config(CrawlerConfig::default())
    }

    pub fn with_config(config: CrawlerConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl SourceProvider for HttpSourceProvider {
    async fn fetch_source_text(&self, url: &str) -> std::result::Result<String, ValidatorError> {
        let to_error = |source| ValidatorError::SourceFetch {
            url: url.to_string(),
            source,
        };

        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(to_error)?;
        response.text().await.map_err(to_error)
    }
}

/// Harvests many sources through a `SourceProvider`
#[derive(Clone)]
pub struct ProxyCrawler {
    provider: Arc<dyn SourceProvider>,
}

impl ProxyCrawler {
    pub fn new(provider: Arc<dyn SourceProvider>) -> Self {
        Self { provider }
    }

    /// Fetch every source in turn, recording failures instead of returning them
    pub async fn crawl_sources_with_results(&self, sources: &[String]) -> Vec<CrawlResult> {
        let mut results = Vec::with_capacity(sources.len());

        for source in sources {
            let result = match self.provider.fetch_source_text(source).await {
                Ok(text) => CrawlResult::success(source.clone(), text),
                Err(e) => {
                    warn!("Skipping source {}: {}", source, e);
                    CrawlResult::failure(source.clone(), e.to_string())
                }
            };
            results.push(result);
        }

        results
    }

    /// Fetch all sources and return their unique endpoints
    pub async fn collect_endpoints(&self, sources: &[String]) -> Vec<Endpoint> {
        let results = self.crawl_sources_with_results(sources).await;

        for result in results.iter().filter(|r| r.is_success()) {
            let found = EndpointParser::parse_string(&result.text).len();
            info!("Found {} candidate lines in {}", found, result.source);
        }

        let endpoints = EndpointParser::normalize(results.iter().map(|r| r.text.as_str()));
        info!(
            "Collected {} unique endpoints from {} sources",
            endpoints.len(),
            sources.len()
        );
        endpoints
    }

    /// Read a list of source URLs, one per line, skipping blanks and `#` comments
    pub fn load_source_list<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
        let content = std::fs::read_to_string(path)?;
        Ok(content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(String::from)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Serves canned text per URL; unknown URLs fail
    struct StaticSources(HashMap<String, String>);

    #[async_trait]
    impl SourceProvider for StaticSources {
        async fn fetch_source_text(
            &self,
            url: &str,
        ) -> std::result::Result<String, ValidatorError> {
            self.0
                .get(url)
                .cloned()
                .ok_or_else(|| ValidatorError::Io(std::io::Error::other("unreachable")))
        }
    }

    #[test]
    fn test_crawler_config_default() {
        let config = CrawlerConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        assert_eq!(config.user_agent, DEFAULT_USER_AGENT);
    }

    #[test]
    fn test_crawler_config_builder() {
        let config = CrawlerConfig::new()
            .with_timeout(Duration::from_secs(60))
            .with_user_agent("Custom Agent".to_string());

        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.user_agent, "Custom Agent");
    }

    #[test]
    fn test_crawl_result_failure() {
        let result = CrawlResult::failure("src".to_string(), "Connection failed".to_string());
        assert!(!result.is_success());
        assert!(result.text.is_empty());
        assert_eq!(result.error, Some("Connection failed".to_string()));
    }

    #[tokio::test]
    async fn test_failing_source_does_not_block_others() {
        let mut sources = HashMap::new();
        sources.insert("a".to_string(), "1.1.1.1:80\n2.2.2.2:8080".to_string());
        sources.insert("c".to_string(), "2.2.2.2:8080\n3.3.3.3:3128".to_string());
        let crawler = ProxyCrawler::new(Arc::new(StaticSources(sources)));

        let urls = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let results = crawler.crawl_sources_with_results(&urls).await;
        assert_eq!(results.len(), 3);
        assert!(results[0].is_success());
        assert!(!results[1].is_success());
        assert!(results[2].is_success());

        let endpoints = crawler.collect_endpoints(&urls).await;
        assert_eq!(endpoints.len(), 3);
    }

    #[tokio::test]
    async fn test_all_sources_unreachable_yields_nothing() {
        let crawler = ProxyCrawler::new(Arc::new(StaticSources(HashMap::new())));
        let endpoints = crawler
            .collect_endpoints(&["x".to_string(), "y".to_string()])
            .await;
        assert!(endpoints.is_empty());
    }

    #[tokio::test]
    async fn test_http_provider_fetches_text() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/list"))
            .respond_with(ResponseTemplate::new(200).set_body_string("1.1.1.1:80\n2.2.2.2:8080"))
            .mount(&server)
            .await;

        let provider = HttpSourceProvider::new().unwrap();
        let text = provider
            .fetch_source_text(&format!("{}/list", server.uri()))
            .await
            .unwrap();
        assert!(text.contains("2.2.2.2:8080"));
    }

    #[tokio::test]
    async fn test_http_provider_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let provider = HttpSourceProvider::new().unwrap();
        let err = provider
            .fetch_source_text(&format!("{}/gone", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, ValidatorError::SourceFetch { .. }));
    }

    #[test]
    fn test_load_source_list() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sources.txt");
        std::fs::write(
            &path,
            "# lists\nhttps://a.example/list.txt\n\n  https://b.example/x  \n",
        )
        .unwrap();

        let sources = ProxyCrawler::load_source_list(&path).unwrap();
        assert_eq!(sources, vec!["https://a.example/list.txt", "https://b.example/x"]);
    }
}
