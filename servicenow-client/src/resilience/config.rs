//! Resilience configuration with builder pattern
//!
//! Provides a unified configuration for retry policies, rate limiting,
//! and concurrency limiting with sane defaults.

use super::rate_limiter::EndpointCategory;
use super::retry::RetryConfig;
use crate::error::ApiError;

/// Global resilience configuration for API operations
#[derive(Debug, Clone)]
pub struct ResilienceConfig {
    pub retry: RetryConfig,
    pub rate_limit: RateLimitConfig,
    pub concurrency: ConcurrencyConfig,
}

/// Concurrency limiting configuration
#[derive(Debug, Clone)]
pub struct ConcurrencyConfig {
    /// Maximum concurrent HTTP requests to the instance
    pub max_concurrent_requests: usize,
    /// Whether concurrency limiting is enabled
    pub enabled: bool,
}

/// Token-bucket parameters for one endpoint category.
#[derive(Debug, Clone, Copy)]
pub struct CategoryLimit {
    /// Sustained rate in requests per second. Must be > 0.
    pub requests_per_second: f64,
    /// Maximum tokens held, i.e. the burst allowance. Must be >= 1.
    pub burst_capacity: u32,
}

impl CategoryLimit {
    pub fn new(requests_per_second: f64, burst_capacity: u32) -> Self {
        Self {
            requests_per_second,
            burst_capacity,
        }
    }
}

/// Rate limiting configuration, one bucket per endpoint category.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub table: CategoryLimit,
    pub attachment: CategoryLimit,
    pub import: CategoryLimit,
    pub default: CategoryLimit,
    pub enabled: bool,
}

impl RateLimitConfig {
    /// The limit for a given endpoint category.
    pub fn limit_for(&self, category: EndpointCategory) -> CategoryLimit {
        match category {
            EndpointCategory::Table => self.table,
            EndpointCategory::Attachment => self.attachment,
            EndpointCategory::Import => self.import,
            EndpointCategory::Default => self.default,
        }
    }

    /// Reject non-positive rates and zero burst capacities at construction
    /// time rather than panicking at runtime.
    pub fn validate(&self) -> Result<(), ApiError> {
        for category in EndpointCategory::ALL {
            let limit = self.limit_for(category);
            if !(limit.requests_per_second > 0.0) || !limit.requests_per_second.is_finite() {
                return Err(ApiError::Config(format!(
                    "rate limit for {category} must be a positive rate, got {}",
                    limit.requests_per_second
                )));
            }
            if limit.burst_capacity == 0 {
                return Err(ApiError::Config(format!(
                    "burst capacity for {category} must be at least 1"
                )));
            }
        }
        Ok(())
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            // Table API carries the bulk of traffic; attachments and import
            // sets are heavier server-side and get tighter buckets.
            table: CategoryLimit::new(5.0, 10),
            attachment: CategoryLimit::new(2.0, 5),
            import: CategoryLimit::new(2.0, 5),
            default: CategoryLimit::new(10.0, 20),
            enabled: true,
        }
    }
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 16,
            enabled: true,
        }
    }
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            rate_limit: RateLimitConfig::default(),
            concurrency: ConcurrencyConfig::default(),
        }
    }
}

impl ResilienceConfig {
    /// Create a new builder for ResilienceConfig
    pub fn builder() -> ResilienceConfigBuilder {
        ResilienceConfigBuilder::new()
    }

    /// Conservative config for production environments
    pub fn conservative() -> Self {
        Self {
            retry: RetryConfig::conservative(),
            rate_limit: RateLimitConfig {
                table: CategoryLimit::new(2.0, 5),
                attachment: CategoryLimit::new(1.0, 2),
                import: CategoryLimit::new(1.0, 2),
                default: CategoryLimit::new(5.0, 10),
                enabled: true,
            },
            concurrency: ConcurrencyConfig {
                max_concurrent_requests: 8,
                enabled: true,
            },
        }
    }

    /// Aggressive config for development/testing against non-shared instances
    pub fn aggressive() -> Self {
        Self {
            retry: RetryConfig::aggressive(),
            rate_limit: RateLimitConfig {
                table: CategoryLimit::new(20.0, 40),
                attachment: CategoryLimit::new(10.0, 20),
                import: CategoryLimit::new(10.0, 20),
                default: CategoryLimit::new(40.0, 80),
                enabled: false,
            },
            concurrency: ConcurrencyConfig {
                max_concurrent_requests: 32,
                enabled: false,
            },
        }
    }

    /// Disable all resilience features (for testing)
    pub fn disabled() -> Self {
        Self {
            retry: RetryConfig {
                max_attempts: 1,
                ..RetryConfig::default()
            },
            rate_limit: RateLimitConfig {
                enabled: false,
                ..RateLimitConfig::default()
            },
            concurrency: ConcurrencyConfig {
                max_concurrent_requests: usize::MAX,
                enabled: false,
            },
        }
    }
}

/// Builder for ResilienceConfig
#[derive(Debug)]
pub struct ResilienceConfigBuilder {
    config: ResilienceConfig,
}

impl ResilienceConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ResilienceConfig::default(),
        }
    }

    /// Configure retry behavior
    pub fn retry_config(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    /// Set max retry attempts
    pub fn max_retries(mut self, attempts: u32) -> Self {
        self.config.retry.max_attempts = attempts;
        self
    }

    /// Configure rate limiting
    pub fn rate_limit_config(mut self, rate_limit: RateLimitConfig) -> Self {
        self.config.rate_limit = rate_limit;
        self
    }

    /// Set the bucket for one endpoint category
    pub fn category_limit(mut self, category: EndpointCategory, limit: CategoryLimit) -> Self {
        match category {
            EndpointCategory::Table => self.config.rate_limit.table = limit,
            EndpointCategory::Attachment => self.config.rate_limit.attachment = limit,
            EndpointCategory::Import => self.config.rate_limit.import = limit,
            EndpointCategory::Default => self.config.rate_limit.default = limit,
        }
        self
    }

    /// Enable/disable rate limiting
    pub fn enable_rate_limiting(mut self, enabled: bool) -> Self {
        self.config.rate_limit.enabled = enabled;
        self
    }

    /// Configure concurrency limiting
    pub fn concurrency_config(mut self, concurrency: ConcurrencyConfig) -> Self {
        self.config.concurrency = concurrency;
        self
    }

    /// Set max concurrent requests
    pub fn max_concurrent_requests(mut self, max: usize) -> Self {
        self.config.concurrency.max_concurrent_requests = max;
        self
    }

    /// Enable/disable concurrency limiting
    pub fn enable_concurrency_limiting(mut self, enabled: bool) -> Self {
        self.config.concurrency.enabled = enabled;
        self
    }

    /// Build the final configuration
    pub fn build(self) -> ResilienceConfig {
        self.config
    }
}

impl Default for ResilienceConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ResilienceConfig::default();

        assert_eq!(config.retry.max_attempts, 3);
        assert!(config.rate_limit.enabled);
        assert_eq!(config.rate_limit.table.burst_capacity, 10);
        assert_eq!(config.concurrency.max_concurrent_requests, 16);
        assert!(config.concurrency.enabled);
        assert!(config.rate_limit.validate().is_ok());
    }

    #[test]
    fn test_conservative_config() {
        let config = ResilienceConfig::conservative();

        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.rate_limit.table.requests_per_second, 2.0);
        assert!(config.rate_limit.enabled);
        assert_eq!(config.concurrency.max_concurrent_requests, 8);
    }

    #[test]
    fn test_aggressive_config() {
        let config = ResilienceConfig::aggressive();

        assert_eq!(config.retry.max_attempts, 5);
        assert!(!config.rate_limit.enabled);
        assert!(!config.concurrency.enabled);
    }

    #[test]
    fn test_disabled_config() {
        let config = ResilienceConfig::disabled();

        assert_eq!(config.retry.max_attempts, 1);
        assert!(!config.rate_limit.enabled);
        assert!(!config.concurrency.enabled);
    }

    #[test]
    fn test_builder_pattern() {
        let config = ResilienceConfig::builder()
            .max_retries(5)
            .category_limit(EndpointCategory::Table, CategoryLimit::new(1.0, 3))
            .enable_rate_limiting(true)
            .max_concurrent_requests(4)
            .build();

        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.rate_limit.table.requests_per_second, 1.0);
        assert_eq!(config.rate_limit.table.burst_capacity, 3);
        assert_eq!(config.concurrency.max_concurrent_requests, 4);
    }

    #[test]
    fn test_validate_rejects_non_positive_rate() {
        let mut config = RateLimitConfig::default();
        config.table.requests_per_second = 0.0;
        assert!(config.validate().is_err());

        config.table.requests_per_second = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_burst() {
        let mut config = RateLimitConfig::default();
        config.import.burst_capacity = 0;
        assert!(config.validate().is_err());
    }
}
