//! HTTP transport abstraction.
//!
//! All network I/O goes through the [`HttpTransport`] trait so tests can
//! substitute a scripted transport (e.g. a call-counting token endpoint)
//! without a real server. [`ReqwestTransport`] is the production
//! implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::constants::{DEFAULT_TIMEOUT_SECS, USER_AGENT};
use crate::error::ApiError;

/// An outgoing request, transport-agnostic.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl TransportRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set or replace a header in place. Used by the auth layer, which must
    /// overwrite a stale `Authorization` header on retry.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        for (existing, v) in &mut self.headers {
            if existing.eq_ignore_ascii_case(name) {
                *v = value;
                return;
            }
        }
        self.headers.push((name.to_string(), value));
    }

    /// Attach a JSON body and the matching `Content-Type`.
    pub fn json<T: Serialize>(mut self, payload: &T) -> Result<Self, ApiError> {
        self.body = Some(serde_json::to_vec(payload)?);
        self.set_header("Content-Type", "application/json");
        Ok(self)
    }

    /// Attach a `application/x-www-form-urlencoded` body.
    pub fn form(mut self, fields: &[(&str, &str)]) -> Self {
        let encoded = fields
            .iter()
            .map(|(name, value)| format!("{}={}", name, urlencoding::encode(value)))
            .collect::<Vec<_>>()
            .join("&");
        self.body = Some(encoded.into_bytes());
        self.set_header("Content-Type", "application/x-www-form-urlencoded");
        self
    }
}

/// A response as seen by the client core: status, headers, raw body.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// First header value with the given name, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_slice(&self.body)
            .map_err(|err| ApiError::Decode(format!("response body: {err}")))
    }

    /// Classify a non-2xx response into an [`ApiError`], honoring
    /// `Retry-After` on 429.
    pub fn classify_error(&self) -> ApiError {
        if self.status == 429 {
            let retry_after = self
                .header("Retry-After")
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return ApiError::RateLimited { retry_after };
        }
        ApiError::from_status(self.status, self.body_text())
    }
}

/// Pluggable HTTP layer.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, ApiError>;
}

/// Production transport backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| ApiError::Config(format!("failed to build HTTP client: {err}")))?;
        Ok(Self { client })
    }

    /// Wrap an already-configured `reqwest` client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, ApiError> {
        let mut builder = self.client.request(request.method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(map_reqwest_error)?
            .to_vec();

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}

fn map_reqwest_error(err: reqwest::Error) -> ApiError {
    if err.is_timeout() {
        ApiError::Timeout {
            detail: err.to_string(),
        }
    } else {
        ApiError::Network {
            detail: err.to_string(),
        }
    }
}
