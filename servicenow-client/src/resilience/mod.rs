//! Resilience and hardening features
//!
//! Provides retry policies, per-endpoint-category rate limiting, and
//! concurrency limiting for production-grade ServiceNow API interactions.

pub mod concurrency;
pub mod config;
pub mod rate_limiter;
pub mod retry;

pub use concurrency::ConcurrencyLimiter;
pub use config::{
    CategoryLimit, ConcurrencyConfig, RateLimitConfig, ResilienceConfig, ResilienceConfigBuilder,
};
pub use rate_limiter::{EndpointCategory, RateLimiter, Reservation};
pub use retry::{RetryConfig, RetryPolicy};
