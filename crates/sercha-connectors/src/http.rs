//! Shared request-retry plumbing used by every remote connector:
//! rate-limiter-gated sends, 429-aware backoff, and a consistent mapping
//! from HTTP status codes to [`ConnectorError`].
//!
//! One `RetryingClient` is built per connector instance from the
//! `RateLimiter`/`TokenProvider` ports, so every provider family shares the
//! same retry/backoff implementation instead of reimplementing it.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response, StatusCode};
use sercha_core::domain::{ConnectorError, CredentialsId};
use sercha_core::ports::{RateLimiter, TokenProvider};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use sercha_ratelimit::parse_retry_after;

const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(30);
const MAX_RETRIES: u32 = 5;

/// A `reqwest::Client` wired up to a rate limiter and a bearer-token
/// source, shared by the Google/Microsoft/Dropbox/GitHub connectors.
#[derive(Clone)]
pub struct RetryingClient {
    http: reqwest::Client,
    base_url: String,
    rate_limiter: Arc<dyn RateLimiter>,
    token_provider: Arc<dyn TokenProvider>,
    credentials_id: CredentialsId,
}

impl RetryingClient {
    pub fn new(
        base_url: impl Into<String>,
        rate_limiter: Arc<dyn RateLimiter>,
        token_provider: Arc<dyn TokenProvider>,
        credentials_id: CredentialsId,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            rate_limiter,
            token_provider,
            credentials_id,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn builder(&self, method: Method, url: &str) -> RequestBuilder {
        self.http.request(method, url)
    }

    /// Sends a GET against a path relative to `base_url`, retrying on 429
    /// and mapping terminal failures onto [`ConnectorError`].
    pub async fn get(&self, path: &str, cancel: CancellationToken) -> Result<Response, ConnectorError> {
        let url = format!("{}{}", self.base_url, path);
        self.send(Method::GET, &url, cancel).await
    }

    /// Same as [`Self::get`] but against an absolute URL (pagination
    /// `next_link`/`continue` responses hand back full URLs).
    pub async fn get_absolute(
        &self,
        url: &str,
        cancel: CancellationToken,
    ) -> Result<Response, ConnectorError> {
        self.send(Method::GET, url, cancel).await
    }

    pub async fn post_json(
        &self,
        path: &str,
        body: impl serde::Serialize,
        cancel: CancellationToken,
    ) -> Result<Response, ConnectorError> {
        let url = format!("{}{}", self.base_url, path);
        self.send_with(Method::POST, &url, cancel, |b| b.json(&body)).await
    }

    /// Dropbox's content-endpoint calling convention: an empty POST body
    /// with request parameters JSON-encoded into a `Dropbox-API-Arg`
    /// header instead.
    pub async fn post_json_with_dropbox_arg(
        &self,
        path: &str,
        arg: impl serde::Serialize,
        cancel: CancellationToken,
    ) -> Result<Response, ConnectorError> {
        let url = format!("{}{}", self.base_url, path);
        let header_value = serde_json::to_string(&arg).map_err(|e| ConnectorError::Other(e.into()))?;
        self.send_with(Method::POST, &url, cancel, move |b| {
            b.header("Dropbox-API-Arg", header_value.clone())
        })
        .await
    }

    async fn send(&self, method: Method, url: &str, cancel: CancellationToken) -> Result<Response, ConnectorError> {
        self.send_with(method, url, cancel, |b| b).await
    }

    /// Notion requires a `Notion-Version` header on every request; the
    /// other providers have no equivalent, so this stays a one-off rather
    /// than a field on `RetryingClient` itself.
    pub async fn get_with_header(
        &self,
        path: &str,
        header_name: &'static str,
        header_value: &'static str,
        cancel: CancellationToken,
    ) -> Result<Response, ConnectorError> {
        let url = format!("{}{}", self.base_url, path);
        self.send_with(Method::GET, &url, cancel, move |b| b.header(header_name, header_value))
            .await
    }

    pub async fn post_json_with_header(
        &self,
        path: &str,
        body: impl serde::Serialize,
        header_name: &'static str,
        header_value: &'static str,
        cancel: CancellationToken,
    ) -> Result<Response, ConnectorError> {
        let url = format!("{}{}", self.base_url, path);
        self.send_with(Method::POST, &url, cancel, move |b| {
            b.header(header_name, header_value).json(&body)
        })
        .await
    }

    async fn send_with(
        &self,
        method: Method,
        url: &str,
        cancel: CancellationToken,
        decorate: impl Fn(RequestBuilder) -> RequestBuilder,
    ) -> Result<Response, ConnectorError> {
        for attempt in 0..=MAX_RETRIES {
            self.rate_limiter.wait(cancel.clone()).await?;
            if cancel.is_cancelled() {
                return Err(ConnectorError::Other(anyhow::anyhow!("sync cancelled")));
            }

            let token = self.token_provider.get_token(self.credentials_id).await?;
            let request = decorate(self.builder(method.clone(), url)).bearer_auth(token);
            let response = request
                .send()
                .await
                .map_err(|e| ConnectorError::Other(e.into()))?;

            if response.status() == StatusCode::TOO_MANY_REQUESTS {
                let retry_after_header = response
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok())
                    .map(|v| parse_retry_after(v, DEFAULT_RETRY_AFTER));
                let retry_after = retry_after_header.unwrap_or(DEFAULT_RETRY_AFTER);

                self.rate_limiter
                    .record_rate_limit_error(Some(retry_after.as_secs()));

                if attempt >= MAX_RETRIES {
                    return Err(ConnectorError::RateLimited {
                        retry_after: Some(retry_after),
                    });
                }
                info!(url, attempt, retry_after_secs = retry_after.as_secs(), "429, backing off");
                tokio::time::sleep(retry_after).await;
                continue;
            }

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(Self::map_status_error(status, &body));
            }

            return Ok(response);
        }

        Err(ConnectorError::RateLimited { retry_after: None })
    }

    /// Maps a non-2xx status (after the 429 path has already been
    /// handled) onto the connector error taxonomy.
    pub fn map_status_error(status: StatusCode, body: &str) -> ConnectorError {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ConnectorError::AuthInvalid,
            StatusCode::NOT_FOUND => ConnectorError::NotFound(body.to_string()),
            // A stale page/delta/sync token is the overwhelmingly common
            // cause of a 400/410 on these change-feed endpoints.
            StatusCode::GONE | StatusCode::BAD_REQUEST => ConnectorError::InvalidCursor,
            other => {
                warn!(status = %other, body, "unexpected response status");
                ConnectorError::Other(anyhow::anyhow!("http {other}: {body}"))
            }
        }
    }
}
