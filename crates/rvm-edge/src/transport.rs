//! # HTTP Transport
//!
//! The seam between the edge runtime and the backend API.
//!
//! ```text
//! ProtocolDriver / SyncEngine
//!        │  post_json("/edge/heartbeat", &payload, 5s)
//!        ▼
//! ┌───────────────────────┐        ┌──────────────────────────────┐
//! │  dyn HttpTransport    │◄───────│ ReqwestTransport (device)    │
//! │  status + JSON body   │        │ scripted mocks (tests)       │
//! └───────────────────────┘        └──────────────────────────────┘
//! ```
//!
//! Any HTTP status comes back as an [`HttpResponse`]; only failures to get
//! an answer at all (timeout, connection) are errors. Callers decide what a
//! non-2xx status means.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use serde_json::Value;
use tracing::debug;

use crate::error::{EdgeError, EdgeResult, TransportError};

/// Header carrying the device API key (sent as `X-RVM-API-KEY`).
pub const API_KEY_HEADER: &str = "x-rvm-api-key";

// =============================================================================
// Response
// =============================================================================

/// Status code and parsed body of one backend answer.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    /// Parsed JSON; a non-JSON body is kept as a JSON string, an empty one
    /// as `null`.
    pub body: Value,
}

impl HttpResponse {
    pub fn new(status: u16, body: Value) -> Self {
        HttpResponse { status, body }
    }

    /// Returns true for 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Returns true when the body says `"status": "success"`.
    pub fn reports_success(&self) -> bool {
        self.body.get("status").and_then(Value::as_str) == Some("success")
    }

    /// Converts a non-2xx answer into a [`TransportError::Status`].
    pub fn error_for_status(self) -> Result<Self, TransportError> {
        if self.is_success() {
            return Ok(self);
        }

        let body = match &self.body {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        Err(TransportError::Status {
            status: self.status,
            body: truncate(&body, 200),
        })
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

// =============================================================================
// Transport Trait
// =============================================================================

/// Authenticated JSON POST with a bounded timeout.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// POSTs `body` to `path` (relative to the API root).
    async fn post_json(
        &self,
        path: &str,
        body: &Value,
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError>;
}

// =============================================================================
// Reqwest Transport
// =============================================================================

/// Production transport backed by a pooled `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: String,
}

impl ReqwestTransport {
    /// Builds a client that sends the API key on every request, both as
    /// `X-RVM-API-KEY` and as a bearer token.
    pub fn new(base_url: &str, api_key: &str) -> EdgeResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, header_value(api_key)?);
        headers.insert(AUTHORIZATION, header_value(&format!("Bearer {}", api_key))?);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| EdgeError::Internal(format!("HTTP client: {}", e)))?;

        Ok(ReqwestTransport {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Full URL for an API path.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

fn header_value(value: &str) -> EdgeResult<HeaderValue> {
    let mut header = HeaderValue::from_str(value)
        .map_err(|_| EdgeError::InvalidConfig("API key contains invalid characters".into()))?;
    header.set_sensitive(true);
    Ok(header)
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn post_json(
        &self,
        path: &str,
        body: &Value,
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        let url = self.endpoint(path);
        debug!(url = %url, ?timeout, "POST");

        let response = self
            .client
            .post(&url)
            .json(body)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(e, timeout))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| TransportError::from_reqwest(e, timeout))?;

        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        debug!(url = %url, status, "Response received");
        Ok(HttpResponse { status, body })
    }
}

// =============================================================================
// Test Support
// =============================================================================


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_endpoint_joining() {
        let transport = ReqwestTransport::new("https://example.com/api/v1/", "key").unwrap();
        assert_eq!(
            transport.endpoint("/edge/heartbeat"),
            "https://example.com/api/v1/edge/heartbeat"
        );
        assert_eq!(
            transport.endpoint("edge/sync-offline"),
            "https://example.com/api/v1/edge/sync-offline"
        );
    }

    #[test]
    fn test_invalid_api_key_is_config_error() {
        let err = ReqwestTransport::new("https://example.com", "bad\nkey").unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_reports_success() {
        assert!(HttpResponse::new(200, json!({"status": "success"})).reports_success());
        assert!(!HttpResponse::new(200, json!({"status": "error"})).reports_success());
        assert!(!HttpResponse::new(200, Value::Null).reports_success());
    }

    #[test]
    fn test_error_for_status() {
        assert!(HttpResponse::new(201, Value::Null).error_for_status().is_ok());

        let err = HttpResponse::new(500, json!("Internal Server Error"))
            .error_for_status()
            .unwrap_err();
        assert!(matches!(err, TransportError::Status { status: 500, ref body } if body == "Internal Server Error"));
    }
}
