//! Carrier transport abstraction.
//!
//! Channel adapters build carrier-specific payloads and interpret the replies; the transport only
//! moves JSON over HTTP. Keeping it behind a trait lets the adapters be exercised without a
//! network.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

/// JSON request addressed to a path under the carrier's base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct CarrierRequest {
    pub path: String,
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CarrierResponse {
    pub status: u16,
    /// Parsed JSON body, or the raw text wrapped in `Value::String` when it was not JSON.
    pub body: Value,
}

impl CarrierResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("timed out after {0} ms")]
    Timeout(u64),
    #[error("carrier unreachable: {0}")]
    Connection(String),
    #[error("carrier rejected message: {0}")]
    Rejected(String),
    #[error("unexpected carrier response: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait CarrierTransport: Send + Sync {
    async fn submit(&self, request: &CarrierRequest) -> Result<CarrierResponse, TransportError>;
}

/// Production transport posting JSON with a bearer token.
#[derive(Clone)]
pub struct HttpCarrierTransport {
    client: reqwest::Client,
    base_url: String,
    bearer_token: String,
    timeout: Duration,
}

impl HttpCarrierTransport {
    pub fn new(base_url: impl Into<String>, bearer_token: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            bearer_token: bearer_token.into(),
            timeout,
        }
    }

    fn url_for(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl CarrierTransport for HttpCarrierTransport {
    #[tracing::instrument(skip(self, request), fields(path = %request.path))]
    async fn submit(&self, request: &CarrierRequest) -> Result<CarrierResponse, TransportError> {
        let url = self.url_for(&request.path);
        let mut builder = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(&request.payload);

        if !self.bearer_token.is_empty() {
            builder = builder.bearer_auth(&self.bearer_token);
        }

        let response = builder.send().await.map_err(|err| {
            if err.is_timeout() {
                TransportError::Timeout(self.timeout.as_millis() as u64)
            } else {
                tracing::warn!(url = %url, error = %err, "carrier request failed");
                TransportError::Connection(err.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|err| TransportError::InvalidResponse(err.to_string()))?;
        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));

        tracing::debug!(status, "carrier request completed");
        Ok(CarrierResponse { status, body })
    }
}

/// Accepts every message locally without contacting a carrier.
///
/// Used when a channel has no gateway configured so campaigns can be rehearsed end to end.
#[derive(Debug, Default)]
pub struct DryRunTransport {
    sequence: AtomicU64,
}

impl DryRunTransport {
    fn next_id(&self) -> String {
        let id = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        format!("dry-run-{id:06}")
    }
}

#[async_trait]
impl CarrierTransport for DryRunTransport {
    async fn submit(&self, request: &CarrierRequest) -> Result<CarrierResponse, TransportError> {
        let body = match request.payload.get("messages").and_then(Value::as_array) {
            Some(messages) => {
                let results: Vec<Value> = messages
                    .iter()
                    .map(|message| {
                        json!({
                            "to": message.get("to").cloned().unwrap_or(Value::Null),
                            "status": "accepted",
                            "message_id": self.next_id(),
                        })
                    })
                    .collect();
                json!({ "results": results })
            }
            None => {
                let id = self.next_id();
                json!({
                    "status": "accepted",
                    "message_id": id,
                    "messages": [{ "id": id }],
                })
            }
        };

        tracing::info!(path = %request.path, "dry-run carrier accepted message");
        Ok(CarrierResponse { status: 200, body })
    }
}

/// Pull a human-readable error out of a carrier reply.
pub(crate) fn error_message(response: &CarrierResponse) -> String {
    let body = &response.body;
    let detail = body
        .pointer("/error/message")
        .or_else(|| body.get("error"))
        .or_else(|| body.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| body.as_str().map(str::to_string))
        .filter(|detail| !detail.trim().is_empty());

    match detail {
        Some(detail) => format!("HTTP {}: {}", response.status, detail),
        None => format!("HTTP {}", response.status),
    }
}
