use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use thiserror::Error;

const MAX_ERROR_BODY_CHARS: usize = 1024;
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivered {
    pub status: u16,
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("HTTP {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("request failed: {0}")]
    Request(String),
    #[error("delivery timed out")]
    Timeout,
    #[error("cannot build HTTP client: {0}")]
    Client(String),
}

/// How bundles leave the machine.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn deliver(&self, payload: Bytes, token: &str) -> Result<Delivered, DeliveryError>;

    /// Informational reachability check. Never gates delivery.
    async fn probe(&self) -> bool;
}

pub struct HttpTransport {
    client: reqwest::Client,
    endpoint_url: String,
    probe_url: Option<String>,
}

impl HttpTransport {
    pub fn new(
        endpoint_url: impl Into<String>,
        timeout: Duration,
        probe_url: Option<String>,
    ) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DeliveryError::Client(e.to_string()))?;

        Ok(Self {
            client,
            endpoint_url: endpoint_url.into(),
            probe_url,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn deliver(&self, payload: Bytes, token: &str) -> Result<Delivered, DeliveryError> {
        let resp = self
            .client
            .post(&self.endpoint_url)
            .header(CONTENT_TYPE, "application/json")
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .body(payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DeliveryError::Timeout
                } else {
                    DeliveryError::Request(e.to_string())
                }
            })?;

        let status = resp.status();
        if status.is_success() {
            return Ok(Delivered {
                status: status.as_u16(),
            });
        }

        let body = resp
            .text()
            .await
            .unwrap_or_default()
            .chars()
            .take(MAX_ERROR_BODY_CHARS)
            .collect::<String>();

        Err(DeliveryError::Rejected {
            status: status.as_u16(),
            body,
        })
    }

    async fn probe(&self) -> bool {
        let Some(url) = &self.probe_url else {
            return true;
        };

        match self.client.get(url).timeout(PROBE_TIMEOUT).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                tracing::debug!("Probe of {url} failed: {e}");
                false
            }
        }
    }
}

/// Bearer token for a payload: its top-level `installation_id` when the
/// payload is a JSON object carrying one.
pub fn installation_token(payload: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(payload).ok()?;
    value
        .get("installation_id")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
