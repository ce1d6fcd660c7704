//! Per-endpoint-category token-bucket rate limiter.
//!
//! Each endpoint category owns an independent bucket; categories never
//! contend on the same lock. Tokens are replenished lazily from elapsed time
//! at the moment of use, so there is no background refill task and the whole
//! limiter is deterministic under an injected [`Clock`].

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::debug;
use tokio_util::sync::CancellationToken;

use super::config::RateLimitConfig;
use crate::clock::Clock;
use crate::error::ApiError;

/// Logical endpoint category, resolved from the request path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointCategory {
    Table,
    Attachment,
    Import,
    Default,
}

impl EndpointCategory {
    pub const ALL: [EndpointCategory; 4] = [
        EndpointCategory::Table,
        EndpointCategory::Attachment,
        EndpointCategory::Import,
        EndpointCategory::Default,
    ];

    /// Resolve a request path to its category. Pure prefix inspection:
    /// paths under the Table API map to `Table`, attachment endpoints to
    /// `Attachment`, import sets to `Import`, everything else to `Default`.
    pub fn from_path(path: &str) -> Self {
        let path = path.to_ascii_lowercase();
        if path.contains("/table/") {
            Self::Table
        } else if path.contains("/attachment") {
            Self::Attachment
        } else if path.contains("/import") {
            Self::Import
        } else {
            Self::Default
        }
    }
}

impl fmt::Display for EndpointCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Table => "table",
            Self::Attachment => "attachment",
            Self::Import => "import",
            Self::Default => "default",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
struct Bucket {
    rate: f64,
    burst: f64,
    tokens: f64,
    last_refill: DateTime<Utc>,
}

impl Bucket {
    fn new(rate: f64, burst: f64, now: DateTime<Utc>) -> Self {
        Self {
            rate,
            burst,
            tokens: burst,
            last_refill: now,
        }
    }

    fn refill(&mut self, now: DateTime<Utc>) {
        let elapsed_ms = (now - self.last_refill).num_milliseconds().max(0);
        let replenished = elapsed_ms as f64 / 1000.0 * self.rate;
        self.tokens = (self.tokens + replenished).min(self.burst);
        self.last_refill = now;
    }

    /// Consume one token, or report how long until one is available.
    fn try_consume(&mut self, now: DateTime<Utc>) -> Result<(), Duration> {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            Err(Duration::from_secs_f64((1.0 - self.tokens) / self.rate))
        }
    }
}

/// Admission controller pacing outbound requests per endpoint category.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    buckets: Arc<HashMap<EndpointCategory, Mutex<Bucket>>>,
    enabled: bool,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Build a limiter from configuration. Rejects non-positive rates and
    /// zero burst capacities with a configuration error.
    pub fn new(config: &RateLimitConfig, clock: Arc<dyn Clock>) -> Result<Self, ApiError> {
        config.validate()?;

        let now = clock.now();
        let buckets = EndpointCategory::ALL
            .into_iter()
            .map(|category| {
                let limit = config.limit_for(category);
                let bucket = Bucket::new(
                    limit.requests_per_second,
                    f64::from(limit.burst_capacity),
                    now,
                );
                (category, Mutex::new(bucket))
            })
            .collect();

        Ok(Self {
            buckets: Arc::new(buckets),
            enabled: config.enabled,
            clock,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn bucket(&self, category: EndpointCategory) -> MutexGuard<'_, Bucket> {
        self.buckets
            .get(&category)
            .expect("bucket exists for every category")
            .lock()
            .expect("bucket lock poisoned")
    }

    /// Non-blocking: consume one token if available.
    pub fn allow(&self, category: EndpointCategory) -> bool {
        if !self.enabled {
            return true;
        }
        self.bucket(category).try_consume(self.clock.now()).is_ok()
    }

    /// Block until a token is available, then consume it.
    ///
    /// Cancellation during the sleep returns [`ApiError::Cancelled`] promptly
    /// and does not consume a token. The consume is re-attempted after each
    /// sleep because concurrent callers in the same category may have taken
    /// the token this caller was waiting for.
    pub async fn wait(
        &self,
        category: EndpointCategory,
        cancel: &CancellationToken,
    ) -> Result<(), ApiError> {
        if !self.enabled {
            return Ok(());
        }

        loop {
            let wait_for = match self.bucket(category).try_consume(self.clock.now()) {
                Ok(()) => return Ok(()),
                Err(wait_for) => wait_for,
            };

            debug!("rate limiter: {category} bucket empty, waiting {wait_for:?}");
            tokio::select! {
                _ = cancel.cancelled() => return Err(ApiError::Cancelled),
                _ = tokio::time::sleep(wait_for) => {}
            }
        }
    }

    /// Reserve one token immediately, receiving the delay until it becomes
    /// valid. The reservation may be [cancelled](Reservation::cancel), which
    /// returns the token to the bucket.
    pub fn reserve(&self, category: EndpointCategory) -> Reservation {
        if !self.enabled {
            return Reservation {
                limiter: self.clone(),
                category,
                delay: Duration::ZERO,
                consumed: false,
            };
        }

        let mut bucket = self.bucket(category);
        bucket.refill(self.clock.now());
        let delay = if bucket.tokens >= 1.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64((1.0 - bucket.tokens) / bucket.rate)
        };
        // The token is taken now; a deficit is repaid by future refills.
        bucket.tokens -= 1.0;

        Reservation {
            limiter: self.clone(),
            category,
            delay,
            consumed: true,
        }
    }

    /// Available tokens right now, for observability.
    pub fn available_tokens(&self, category: EndpointCategory) -> f64 {
        if !self.enabled {
            return f64::INFINITY;
        }
        let mut bucket = self.bucket(category);
        bucket.refill(self.clock.now());
        bucket.tokens
    }

    fn release(&self, category: EndpointCategory) {
        let mut bucket = self.bucket(category);
        bucket.tokens = (bucket.tokens + 1.0).min(bucket.burst);
    }
}

/// A token taken from a bucket ahead of time.
#[derive(Debug)]
pub struct Reservation {
    limiter: RateLimiter,
    category: EndpointCategory,
    delay: Duration,
    consumed: bool,
}

impl Reservation {
    /// How long until the reserved token becomes valid. Zero when the bucket
    /// had capacity at reservation time.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn ready_immediately(&self) -> bool {
        self.delay.is_zero()
    }

    /// Give the token back without using it.
    pub fn cancel(mut self) {
        if self.consumed {
            self.limiter.release(self.category);
            self.consumed = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, SystemClock};
    use crate::resilience::config::CategoryLimit;

    fn config(rate: f64, burst: u32) -> RateLimitConfig {
        RateLimitConfig {
            table: CategoryLimit::new(rate, burst),
            attachment: CategoryLimit::new(rate, burst),
            import: CategoryLimit::new(rate, burst),
            default: CategoryLimit::new(rate, burst),
            enabled: true,
        }
    }

    fn manual_limiter(rate: f64, burst: u32) -> (RateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let limiter = RateLimiter::new(&config(rate, burst), clock.clone()).unwrap();
        (limiter, clock)
    }

    #[test]
    fn category_resolution_from_paths() {
        assert_eq!(
            EndpointCategory::from_path("/api/now/table/incident"),
            EndpointCategory::Table
        );
        assert_eq!(
            EndpointCategory::from_path("/api/now/attachment/abc123/file"),
            EndpointCategory::Attachment
        );
        assert_eq!(
            EndpointCategory::from_path("/api/now/import/u_incidents"),
            EndpointCategory::Import
        );
        assert_eq!(
            EndpointCategory::from_path("/api/now/v1/batch"),
            EndpointCategory::Default
        );
        assert_eq!(
            EndpointCategory::from_path("/api/now/stats/incident"),
            EndpointCategory::Default
        );
    }

    #[test]
    fn burst_allows_then_denies() {
        let (limiter, _clock) = manual_limiter(2.0, 3);
        for n in 0..3 {
            assert!(limiter.allow(EndpointCategory::Table), "allow #{n} failed");
        }
        assert!(!limiter.allow(EndpointCategory::Table));
    }

    #[test]
    fn refills_after_elapsed_time() {
        let (limiter, clock) = manual_limiter(2.0, 3);
        for _ in 0..3 {
            assert!(limiter.allow(EndpointCategory::Table));
        }
        assert!(!limiter.allow(EndpointCategory::Table));

        // rate=2.0 means one token every 500ms.
        clock.advance(chrono::Duration::milliseconds(500));
        assert!(limiter.allow(EndpointCategory::Table));
        assert!(!limiter.allow(EndpointCategory::Table));
    }

    #[test]
    fn refill_caps_at_burst() {
        let (limiter, clock) = manual_limiter(10.0, 3);
        clock.advance(chrono::Duration::seconds(60));
        assert!((limiter.available_tokens(EndpointCategory::Table) - 3.0).abs() < 1e-9);
    }

    #[test]
    fn categories_do_not_share_buckets() {
        let (limiter, _clock) = manual_limiter(1.0, 1);
        assert!(limiter.allow(EndpointCategory::Table));
        assert!(!limiter.allow(EndpointCategory::Table));
        // Draining the table bucket leaves the others untouched.
        assert!(limiter.allow(EndpointCategory::Attachment));
        assert!(limiter.allow(EndpointCategory::Default));
    }

    #[test]
    fn rejects_invalid_configuration() {
        let clock = Arc::new(SystemClock);
        let result = RateLimiter::new(&config(0.0, 3), clock.clone());
        assert!(matches!(result, Err(ApiError::Config(_))));

        let result = RateLimiter::new(&config(2.0, 0), clock);
        assert!(matches!(result, Err(ApiError::Config(_))));
    }

    #[test]
    fn disabled_limiter_always_allows() {
        let clock = Arc::new(SystemClock);
        let mut cfg = config(1.0, 1);
        cfg.enabled = false;
        let limiter = RateLimiter::new(&cfg, clock).unwrap();
        for _ in 0..100 {
            assert!(limiter.allow(EndpointCategory::Table));
        }
    }

    #[test]
    fn reservation_reports_delay_and_cancel_returns_token() {
        let (limiter, _clock) = manual_limiter(2.0, 1);
        let first = limiter.reserve(EndpointCategory::Table);
        assert!(first.ready_immediately());

        let second = limiter.reserve(EndpointCategory::Table);
        // Bucket is empty; one token takes 1/rate = 500ms.
        assert!(second.delay() >= Duration::from_millis(499));

        // Returning both tokens restores immediate admission.
        second.cancel();
        first.cancel();
        assert!(limiter.allow(EndpointCategory::Table));
    }

    #[tokio::test]
    async fn scenario_rate_2_burst_3() {
        // rate=2.0, burst=3: three Allow calls succeed, a fourth fails, and
        // after ~500ms a fifth succeeds.
        let clock = Arc::new(SystemClock);
        let limiter = RateLimiter::new(&config(2.0, 3), clock).unwrap();

        assert!(limiter.allow(EndpointCategory::Default));
        assert!(limiter.allow(EndpointCategory::Default));
        assert!(limiter.allow(EndpointCategory::Default));
        assert!(!limiter.allow(EndpointCategory::Default));

        tokio::time::sleep(Duration::from_millis(550)).await;
        assert!(limiter.allow(EndpointCategory::Default));
    }

    #[tokio::test]
    async fn wait_consumes_after_sleeping() {
        let clock = Arc::new(SystemClock);
        let limiter = RateLimiter::new(&config(10.0, 1), clock).unwrap();
        let cancel = CancellationToken::new();

        assert!(limiter.allow(EndpointCategory::Table));

        let started = std::time::Instant::now();
        limiter
            .wait(EndpointCategory::Table, &cancel)
            .await
            .unwrap();
        // One token at rate 10/s is ~100ms away.
        assert!(started.elapsed() >= Duration::from_millis(80));
    }

    #[tokio::test]
    async fn cancelled_wait_returns_promptly_without_consuming() {
        // A limiter needing ~5s of wait, cancelled after 10ms, must return
        // Cancelled within a few tens of milliseconds.
        let clock = Arc::new(SystemClock);
        let limiter = RateLimiter::new(&config(0.2, 1), clock).unwrap();
        let cancel = CancellationToken::new();

        assert!(limiter.allow(EndpointCategory::Table));

        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel_clone.cancel();
        });

        let started = std::time::Instant::now();
        let result = limiter.wait(EndpointCategory::Table, &cancel).await;
        let elapsed = started.elapsed();

        assert!(matches!(result, Err(ApiError::Cancelled)));
        assert!(elapsed < Duration::from_millis(100), "took {elapsed:?}");

        // No token was consumed by the aborted wait: the bucket still owes
        // at most the one token it was already short.
        let available = limiter.available_tokens(EndpointCategory::Table);
        assert!(available > -1e-9, "wait consumed a token: {available}");
    }
}
