//! Retrying JSON transport shared by the network-backed providers.

use std::time::Duration;

use anyhow::Context;
use reqwest::{RequestBuilder, StatusCode};
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, info_span, Instrument};

const ERROR_BODY_SNIPPET_CHARS: usize = 512;

/// 5xx and 429 are worth another attempt; everything else is final.
fn retryable_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

fn retryable_transport(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

/// Doubling delay between attempts, capped at `max_delay`.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_after(&self, attempt: usize) -> Duration {
        let exponent = u32::try_from(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}: {body}")]
    HttpStatus { status: u16, url: String, body: String },
    #[error("invalid JSON body from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            backoff: config.backoff,
        })
    }

    pub async fn get_json(&self, url: &str, bearer: Option<&str>) -> Result<JsonValue, FetchError> {
        let span = info_span!("http_get", url = without_query(url));
        let bytes = self
            .send_with_retry(|| self.authorized(self.client.get(url), bearer))
            .instrument(span)
            .await?;
        decode_json(url, &bytes)
    }

    pub async fn post_json<B>(
        &self,
        url: &str,
        bearer: Option<&str>,
        body: &B,
    ) -> Result<JsonValue, FetchError>
    where
        B: Serialize + Sync + ?Sized,
    {
        let span = info_span!("http_post", url = without_query(url));
        let bytes = self
            .send_with_retry(|| self.authorized(self.client.post(url), bearer).json(body))
            .instrument(span)
            .await?;
        decode_json(url, &bytes)
    }

    fn authorized(&self, builder: RequestBuilder, bearer: Option<&str>) -> RequestBuilder {
        match bearer {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send_with_retry<F>(&self, build: F) -> Result<Vec<u8>, FetchError>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt = 0usize;
        loop {
            let exhausted = attempt >= self.backoff.max_retries;
            let reason = match build().send().await {
                Ok(resp) if resp.status().is_success() => {
                    let body = resp.bytes().await.map_err(|e| e.without_url())?;
                    return Ok(body.to_vec());
                }
                Ok(resp) => {
                    let status = resp.status();
                    if exhausted || !retryable_status(status) {
                        return Err(status_error(resp).await);
                    }
                    format!("http status {status}")
                }
                Err(err) => {
                    let err = err.without_url();
                    if exhausted || !retryable_transport(&err) {
                        return Err(FetchError::Request(err));
                    }
                    err.to_string()
                }
            };

            let delay = self.backoff.delay_after(attempt);
            debug!(%reason, attempt, ?delay, "retrying upstream request");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

async fn status_error(resp: reqwest::Response) -> FetchError {
    let status = resp.status().as_u16();
    let url = without_query(resp.url().as_str()).to_string();
    let body = resp.text().await.unwrap_or_default();
    FetchError::HttpStatus {
        status,
        url,
        body: body.chars().take(ERROR_BODY_SNIPPET_CHARS).collect(),
    }
}

/// Query strings carry API keys; keep them out of logs and error messages.
fn without_query(url: &str) -> &str {
    url.split(['?', '#']).next().unwrap_or(url)
}

fn decode_json(url: &str, bytes: &[u8]) -> Result<JsonValue, FetchError> {
    serde_json::from_slice(bytes).map_err(|source| FetchError::Decode {
        url: without_query(url).to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_backoff_retries_twice_then_caps() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.max_retries, 2);
        assert_eq!(policy.delay_after(0), Duration::from_millis(250));
        assert_eq!(policy.delay_after(1), Duration::from_millis(500));
        assert_eq!(policy.delay_after(4), Duration::from_secs(4));
        assert_eq!(policy.delay_after(5), Duration::from_secs(5));
        assert_eq!(policy.delay_after(usize::MAX), Duration::from_secs(5));
    }

    #[test]
    fn throttling_and_server_errors_are_retryable() {
        assert!(retryable_status(StatusCode::BAD_GATEWAY));
        assert!(retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(!retryable_status(StatusCode::UNAUTHORIZED));
        assert!(!retryable_status(StatusCode::NOT_FOUND));
    }

    #[tokio::test]
    async fn refused_connections_fail_after_retries() {
        let fetcher = HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(2),
            user_agent: Some("evhub-test".into()),
            backoff: BackoffPolicy {
                max_retries: 1,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(1),
            },
        })
        .unwrap();
        let err = fetcher
            .get_json("http://127.0.0.1:9/items?key=secret", None)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Request(_)));
        assert!(!err.to_string().contains("secret"));
    }

    #[test]
    fn query_strings_are_redacted() {
        assert_eq!(
            without_query("https://www.googleapis.com/customsearch/v1?key=secret&q=x"),
            "https://www.googleapis.com/customsearch/v1"
        );
        assert_eq!(without_query("https://a.example/b"), "https://a.example/b");
    }

    #[test]
    fn decode_errors_name_the_url() {
        let err = decode_json("https://api.example.com/x", b"<html>").unwrap_err();
        assert!(err.to_string().contains("https://api.example.com/x"));
        let ok = decode_json("https://api.example.com/x", br#"{"items": []}"#).unwrap();
        assert!(ok.get("items").is_some());
    }
}
