//! Error types for the ServiceNow client.
//!
//! Every failure carries a classified [`ErrorCategory`] which the retry
//! engine and callers use to decide whether an operation is worth retrying.
//! Categories survive propagation: errors are never flattened into a generic
//! "request failed" message.

use std::time::Duration;

use thiserror::Error;

/// Classification of a failure, used to drive retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Credentials rejected (HTTP 401) or a token exchange failure.
    Authentication,
    /// Authenticated but not permitted (HTTP 403).
    Authorization,
    /// Target resource does not exist (HTTP 404).
    NotFound,
    /// Request rejected by the server (other 4xx) or invalid client-side input.
    Validation,
    /// Server-side throttling (HTTP 429).
    RateLimit,
    /// HTTP 408 or a client-side deadline.
    Timeout,
    /// Connection-level failure before a status code was produced.
    Network,
    /// Server fault (5xx).
    Server,
    /// The caller's cancellation token fired.
    Cancelled,
    /// The whole batch envelope failed at the transport level.
    BatchSubmission,
    /// The server response did not have the expected shape.
    Decode,
    /// Invalid local configuration.
    Config,
    /// Anything the classifier does not recognize.
    Unknown,
}

impl ErrorCategory {
    /// Whether this category is retryable under the default policy.
    /// Callers may opt additional categories in via `RetryConfig::retry_on`.
    pub fn default_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimit | Self::Timeout | Self::Network | Self::Server
        )
    }
}

/// Unified error type for all client operations.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Invalid local configuration (bad rate, missing env var, ...).
    #[error("configuration error: {0}")]
    Config(String),

    /// HTTP 401, or a rejected token exchange. The response body is carried
    /// as detail so callers can see why the credentials were refused.
    #[error("authentication failed: {detail}")]
    Authentication { detail: String },

    /// HTTP 403.
    #[error("authorization denied: {detail}")]
    Authorization { detail: String },

    /// HTTP 404.
    #[error("not found: {detail}")]
    NotFound { detail: String },

    /// Client-side validation failure or an unclassified 4xx. A local
    /// validation error (e.g. duplicate batch IDs) carries status 0.
    #[error("request rejected (HTTP {status}): {detail}")]
    Validation { status: u16, detail: String },

    /// HTTP 429.
    #[error("rate limited by server")]
    RateLimited { retry_after: Option<Duration> },

    /// HTTP 408 or a client-side deadline.
    #[error("request timed out: {detail}")]
    Timeout { detail: String },

    /// Connection-level failure.
    #[error("network error: {detail}")]
    Network { detail: String },

    /// HTTP 5xx.
    #[error("server error (HTTP {status}): {detail}")]
    Server { status: u16, detail: String },

    /// The caller's cancellation token fired during a wait or backoff sleep.
    #[error("operation cancelled")]
    Cancelled,

    /// The batch envelope itself could not be submitted. Per-item failures
    /// are NOT reported here; they live in `BatchResult::errors`.
    #[error("batch submission failed: {0}")]
    BatchSubmission(#[source] Box<ApiError>),

    /// The server response was missing expected fields or had the wrong shape.
    #[error("malformed server response: {0}")]
    Decode(String),

    /// A payload could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Status code outside every known class.
    #[error("unexpected response (HTTP {status}): {detail}")]
    Unknown { status: u16, detail: String },
}

impl ApiError {
    /// Classify an HTTP status code into an error, carrying the response body
    /// as detail. 429 with a known `Retry-After` should be built directly as
    /// [`ApiError::RateLimited`] instead.
    pub fn from_status(status: u16, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        match status {
            401 => Self::Authentication { detail },
            403 => Self::Authorization { detail },
            404 => Self::NotFound { detail },
            408 => Self::Timeout { detail },
            429 => Self::RateLimited { retry_after: None },
            400..=499 => Self::Validation { status, detail },
            500..=599 => Self::Server { status, detail },
            _ => Self::Unknown { status, detail },
        }
    }

    pub fn validation(detail: impl Into<String>) -> Self {
        Self::Validation {
            status: 0,
            detail: detail.into(),
        }
    }

    /// The classification of this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Config(_) => ErrorCategory::Config,
            Self::Authentication { .. } => ErrorCategory::Authentication,
            Self::Authorization { .. } => ErrorCategory::Authorization,
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::Validation { .. } => ErrorCategory::Validation,
            Self::RateLimited { .. } => ErrorCategory::RateLimit,
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::Network { .. } => ErrorCategory::Network,
            Self::Server { .. } => ErrorCategory::Server,
            Self::Cancelled => ErrorCategory::Cancelled,
            Self::BatchSubmission(_) => ErrorCategory::BatchSubmission,
            Self::Decode(_) => ErrorCategory::Decode,
            Self::Serialization(_) => ErrorCategory::Decode,
            Self::Unknown { .. } => ErrorCategory::Unknown,
        }
    }

    /// Whether this error is retryable under the default policy.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.category().default_retryable()
    }

    /// Server-suggested delay before retrying, if any.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}
