//! Page fetching.
//!
//! A single HTTP GET per site, bounded by the configured timeout and sent
//! with a desktop-browser user agent. Every failure (network error, timeout,
//! non-2xx status) is returned as a [`FetchError`] value so the pipeline can
//! record it and move on. There are no retries: one failed attempt is final
//! for that site in that run.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::FetchConfig;

/// Why a page could not be fetched. The payload is the underlying cause
/// text, kept verbatim for the report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("HTTP status {status} {reason}")]
    Status { status: u16, reason: String },
    #[error("{0}")]
    Network(String),
}

/// Raw page bytes, or the reason the fetch failed.
pub type FetchOutcome = Result<Vec<u8>, FetchError>;

/// Fetches raw page content for a URL.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> FetchOutcome;
}

/// [`Fetcher`] backed by a shared `reqwest` client.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> FetchOutcome {
        debug!(url, "fetching");

        let response = self.client.get(url).send().await.map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or_default().to_string(),
            });
        }

        let body = response.bytes().await.map_err(classify)?;
        debug!(url, bytes = body.len(), "fetched");
        Ok(body.to_vec())
    }
}

fn classify(err: reqwest::Error) -> FetchError {
    let message = error_chain(&err);
    if err.is_timeout() {
        FetchError::Timeout(message)
    } else {
        FetchError::Network(message)
    }
}

/// `reqwest` keeps the useful part (DNS failure, refused connection) in the
/// source chain rather than in its own message.
fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::HeaderMap, http::StatusCode, routing::get, Router};

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn app() -> Router {
        Router::new()
            .route("/page", get(|| async { "<p class=\"price\">10.00</p>" }))
            .route("/missing", get(|| async { StatusCode::NOT_FOUND }))
            .route(
                "/ua",
                get(|headers: HeaderMap| async move {
                    headers
                        .get("user-agent")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string()
                }),
            )
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(3)).await;
                    "late"
                }),
            )
    }

    #[tokio::test]
    async fn fetch_returns_body_on_success() {
        let base = serve(app()).await;
        let fetcher = HttpFetcher::new(&FetchConfig::default()).unwrap();
        let body = fetcher.fetch(&format!("{}/page", base)).await.unwrap();
        assert_eq!(body, b"<p class=\"price\">10.00</p>");
    }

    #[tokio::test]
    async fn fetch_sends_browser_user_agent() {
        let base = serve(app()).await;
        let fetcher = HttpFetcher::new(&FetchConfig::default()).unwrap();
        let body = fetcher.fetch(&format!("{}/ua", base)).await.unwrap();
        let ua = String::from_utf8(body).unwrap();
        assert!(ua.starts_with("Mozilla/5.0"), "got: {}", ua);
    }

    #[tokio::test]
    async fn non_success_status_is_a_failure() {
        let base = serve(app()).await;
        let fetcher = HttpFetcher::new(&FetchConfig::default()).unwrap();
        let err = fetcher.fetch(&format!("{}/missing", base)).await.unwrap_err();
        assert_eq!(
            err,
            FetchError::Status {
                status: 404,
                reason: "Not Found".to_string()
            }
        );
        assert_eq!(err.to_string(), "HTTP status 404 Not Found");
    }

    #[tokio::test]
    async fn slow_response_times_out() {
        let base = serve(app()).await;
        let config = FetchConfig {
            timeout_secs: 1,
            ..FetchConfig::default()
        };
        let fetcher = HttpFetcher::new(&config).unwrap();
        let err = fetcher.fetch(&format!("{}/slow", base)).await.unwrap_err();
        assert!(matches!(err, FetchError::Timeout(_)), "got: {:?}", err);
    }

    #[tokio::test]
    async fn unreachable_host_is_a_network_failure() {
        // Bind then drop to get a port nothing listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let fetcher = HttpFetcher::new(&FetchConfig::default()).unwrap();
        let err = fetcher.fetch(&format!("http://{}/", addr)).await.unwrap_err();
        assert!(matches!(err, FetchError::Network(_)), "got: {:?}", err);
        assert!(!err.to_string().is_empty());
    }
}
