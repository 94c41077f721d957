use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use super::{FeedPage, FeedSource, PageCursor};
use crate::config::{ApiConfig, RetryConfig};
use crate::error::{EventoError, Result};
use crate::models::import::ImportKind;

/// Response envelope wrapped around every Evento payload.
#[derive(Debug, Deserialize)]
struct Envelope {
    success: bool,
    #[serde(rename = "hasMoreData", default)]
    has_more_data: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: serde_json::Value,
}

fn feed_path(kind: ImportKind) -> &'static str {
    match kind {
        ImportKind::Users => "users",
        ImportKind::Events => "events",
        ImportKind::Admins => "event-admins",
    }
}

/// HTTP client for the Evento REST feeds.
///
/// Retries network failures, 429 and 5xx responses with exponential backoff
/// and pauses for the configured interval after every request.
pub struct EventoClient {
    base_url: String,
    auth_key: String,
    auth_secret: String,
    http: Client,
    retry: RetryConfig,
    request_interval: Duration,
}

impl EventoClient {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self::with_http_client(config, http))
    }

    /// Create a client with a custom reqwest::Client (useful for testing).
    pub fn with_http_client(config: &ApiConfig, http: Client) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth_key: config.auth_key.clone(),
            auth_secret: config.auth_secret.clone(),
            http,
            retry: config.retry.clone(),
            request_interval: Duration::from_millis(config.request_interval_ms),
        }
    }

    /// Send a GET request, retrying transient failures. Returns `None` on 404.
    async fn get_envelope(&self, url: &str, query: &[(&str, String)]) -> Result<Option<Envelope>> {
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            debug!(url = %url, attempt, "Requesting Evento feed");

            let response = self
                .http
                .get(url)
                .query(query)
                .header("X-Api-Key", &self.auth_key)
                .header("X-Api-Secret", &self.auth_secret)
                .send()
                .await;

            if !self.request_interval.is_zero() {
                tokio::time::sleep(self.request_interval).await;
            }

            let retryable = match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status == StatusCode::NOT_FOUND {
                        return Ok(None);
                    }
                    if status.is_success() {
                        let body = resp.text().await.map_err(|e| {
                            EventoError::Communication(format!("failed to read response: {e}"))
                        })?;
                        let envelope: Envelope = serde_json::from_str(&body).map_err(|e| {
                            EventoError::Communication(format!("malformed envelope from {url}: {e}"))
                        })?;
                        if !envelope.success {
                            return Err(EventoError::Communication(format!(
                                "Evento reported failure: {}",
                                envelope.message.as_deref().unwrap_or("no message")
                            )));
                        }
                        return Ok(Some(envelope));
                    }
                    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                        format!("status {status}")
                    } else {
                        let body = resp.text().await.unwrap_or_default();
                        return Err(EventoError::Communication(format!(
                            "request to {url} failed with status {status}: {body}"
                        )));
                    }
                }
                Err(e) => e.to_string(),
            };

            if attempt > self.retry.max_retries {
                return Err(EventoError::Communication(format!(
                    "request to {url} failed after {attempt} attempts: {retryable}"
                )));
            }

            let backoff = self.retry.backoff(attempt);
            warn!(
                url = %url,
                attempt,
                reason = %retryable,
                backoff_ms = backoff.as_millis() as u64,
                "Evento request failed, retrying"
            );
            tokio::time::sleep(backoff).await;
        }
    }
}

#[async_trait]
impl FeedSource for EventoClient {
    async fn fetch_page(&self, kind: ImportKind, cursor: &PageCursor) -> Result<FeedPage> {
        let url = format!("{}/{}", self.base_url, feed_path(kind));
        let query = [
            ("skip", cursor.skip.to_string()),
            ("take", cursor.take.to_string()),
        ];

        let envelope = self.get_envelope(&url, &query).await?.ok_or_else(|| {
            EventoError::Communication(format!("feed endpoint {url} not found"))
        })?;

        let records = match envelope.data {
            serde_json::Value::Null => Vec::new(),
            serde_json::Value::Array(items) => items,
            other => {
                return Err(EventoError::Communication(format!(
                    "expected a list from {url}, got {other}"
                )))
            }
        };

        Ok(FeedPage {
            records,
            has_more: envelope.has_more_data,
        })
    }

    async fn fetch_by_id(
        &self,
        kind: ImportKind,
        evento_id: i64,
    ) -> Result<Option<serde_json::Value>> {
        let url = format!("{}/{}/{evento_id}", self.base_url, feed_path(kind));
        let Some(envelope) = self.get_envelope(&url, &[]).await? else {
            return Ok(None);
        };

        Ok(match envelope.data {
            serde_json::Value::Null => None,
            serde_json::Value::Array(mut items) => {
                if items.is_empty() {
                    None
                } else {
                    Some(items.swap_remove(0))
                }
            }
            other => Some(other),
        })
    }
}
