//! Resilient ServiceNow REST API client
//!
//! This crate provides the core a typed ServiceNow SDK is built on: credential
//! management with transparent single-flight token refresh, per-endpoint-
//! category rate limiting, classified retries with exponential backoff, and
//! Batch API execution with per-operation partial-failure semantics.
//!
//! ```no_run
//! use serde_json::json;
//! use servicenow_client::{
//!     BatchRequest, Environment, ResilienceConfig, ServiceNowClient,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), servicenow_client::ApiError> {
//! let environment = Environment::from_env()?;
//! let client = ServiceNowClient::new(environment, ResilienceConfig::default())?;
//!
//! let batch = BatchRequest::builder()
//!     .create("incident", json!({"short_description": "disk full"}))
//!     .create("incident", json!({"short_description": "printer on fire"}))
//!     .build()?;
//!
//! let result = client.execute_batch(&CancellationToken::new(), &batch).await?;
//! println!(
//!     "{} succeeded, {} failed",
//!     result.successful_requests(),
//!     result.failed_requests()
//! );
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod client;
pub mod clock;
pub mod constants;
pub mod error;
pub mod models;
pub mod operations;
pub mod resilience;
pub mod transport;

pub use auth::{AuthManager, FileTokenStore, MemoryTokenStore, TokenStore};
pub use client::{ServiceNowClient, ServiceNowClientBuilder};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ApiError, ErrorCategory};
pub use models::{CredentialSet, Environment, TokenInfo};
pub use operations::{
    BatchHeader, BatchItemError, BatchRequest, BatchRequestBuilder, BatchResponseParser,
    BatchResult, Operation, ServicedResult, SubRequest,
};
pub use resilience::{
    CategoryLimit, ConcurrencyConfig, ConcurrencyLimiter, EndpointCategory, RateLimitConfig,
    RateLimiter, Reservation, ResilienceConfig, RetryConfig, RetryPolicy,
};
pub use transport::{HttpTransport, ReqwestTransport, TransportRequest, TransportResponse};
