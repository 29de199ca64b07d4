//! Page-fetch capability and its default HTTP implementation.
//!
//! Errors carry the transient/permanent split that drives the worker pool's
//! retry policy: timeouts, connection failures, and 5xx responses are
//! retryable; 4xx responses and malformed bodies are not.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::debug;
use url::Url;

use siteminer_shared::{CrawlConfig, Result, SiteMinerError};

/// User-Agent string for crawl requests.
const USER_AGENT: &str = concat!("SiteMiner/", env!("CARGO_PKG_VERSION"));

/// Redirect ceiling per request.
const MAX_REDIRECTS: usize = 5;

/// A successfully fetched page.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub status: u16,
    pub html: String,
}

/// Capability trait for fetching one page.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<FetchOutcome>;
}

/// Default fetcher over reqwest.
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(config: &CrawlConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| {
                SiteMinerError::TransientFetch(format!("failed to build HTTP client: {e}"))
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchOutcome> {
        debug!(%url, "fetching page");

        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| classify_request_error(url, &e))?;

        let status = response.status();
        if let Some(err) = classify_status(url, status) {
            return Err(err);
        }

        let html = response.text().await.map_err(|e| {
            SiteMinerError::TransientFetch(format!("{url}: body read failed: {e}"))
        })?;

        Ok(FetchOutcome {
            status: status.as_u16(),
            html,
        })
    }
}

/// Map a reqwest transport error onto the retry taxonomy.
fn classify_request_error(url: &Url, e: &reqwest::Error) -> SiteMinerError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        SiteMinerError::TransientFetch(format!("{url}: {e}"))
    } else if e.is_redirect() {
        SiteMinerError::PermanentFetch(format!("{url}: too many redirects"))
    } else {
        SiteMinerError::TransientFetch(format!("{url}: {e}"))
    }
}

/// Map a non-success HTTP status onto the retry taxonomy.
fn classify_status(url: &Url, status: StatusCode) -> Option<SiteMinerError> {
    if status.is_success() {
        return None;
    }
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        Some(SiteMinerError::TransientFetch(format!(
            "{url}: HTTP {status}"
        )))
    } else {
        Some(SiteMinerError::PermanentFetch(format!(
            "{url}: HTTP {status}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config() -> CrawlConfig {
        CrawlConfig::from(&siteminer_shared::AppConfig::default())
    }

    #[tokio::test]
    async fn fetch_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>ok</html>"))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&test_config()).unwrap();
        let url = Url::parse(&format!("{}/page", server.uri())).unwrap();
        let outcome = fetcher.fetch(&url).await.expect("fetch succeeds");
        assert_eq!(outcome.status, 200);
        assert!(outcome.html.contains("ok"));
    }

    #[tokio::test]
    async fn server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&test_config()).unwrap();
        let url = Url::parse(&server.uri()).unwrap();
        let err = fetcher.fetch(&url).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn not_found_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&test_config()).unwrap();
        let url = Url::parse(&server.uri()).unwrap();
        let err = fetcher.fetch(&url).await.unwrap_err();
        assert!(!err.is_transient());
        assert!(matches!(err, SiteMinerError::PermanentFetch(_)));
    }

    #[tokio::test]
    async fn rate_limit_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&test_config()).unwrap();
        let url = Url::parse(&server.uri()).unwrap();
        assert!(fetcher.fetch(&url).await.unwrap_err().is_transient());
    }
}
