//! Retry policy with classified failures and exponential backoff.
//!
//! A [`RetryPolicy`] wraps an arbitrary async operation. On failure the
//! error's [`ErrorCategory`] decides whether another attempt is worth making;
//! the delay between attempts grows exponentially, capped at a maximum, and
//! is jittered to avoid synchronized retry storms across many clients.

use std::time::Duration;

use log::debug;
use tokio_util::sync::CancellationToken;

use crate::error::{ApiError, ErrorCategory};

/// Retry behavior configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total number of attempts, 1-indexed. 1 means no retries.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on any computed delay.
    pub max_delay: Duration,
    /// Growth factor between attempts.
    pub backoff_multiplier: f64,
    /// Perturb each delay uniformly into `[0.5 x delay, 1.5 x delay)`.
    pub jitter: bool,
    /// Failure categories worth retrying.
    pub retry_on: Vec<ErrorCategory>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
            retry_on: Self::default_retry_on(),
        }
    }
}

impl RetryConfig {
    /// The categories retried unless a caller opts otherwise.
    pub fn default_retry_on() -> Vec<ErrorCategory> {
        vec![
            ErrorCategory::RateLimit,
            ErrorCategory::Timeout,
            ErrorCategory::Network,
            ErrorCategory::Server,
        ]
    }

    /// Fewer attempts, longer delays. For shared production instances.
    pub fn conservative() -> Self {
        Self {
            max_attempts: 2,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            ..Self::default()
        }
    }

    /// More attempts, shorter initial delay. For bulk jobs where throughput
    /// matters more than politeness.
    pub fn aggressive() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(60),
            ..Self::default()
        }
    }

    fn retries(&self, category: ErrorCategory) -> bool {
        self.retry_on.contains(&category)
    }
}

/// Executes operations with bounded, classified retries.
///
/// Holds no mutable state: each [`execute`](RetryPolicy::execute) call owns
/// its attempt counter, so one policy instance is safe to share across tasks
/// without coordination.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// The un-jittered delay before retrying after attempt `attempt` (1-indexed):
    /// `min(max_delay, base_delay x multiplier^(attempt-1))`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(64);
        let factor = self.config.backoff_multiplier.powi(exponent as i32);
        if !factor.is_finite() {
            return self.config.max_delay;
        }
        let scaled = self.config.base_delay.as_secs_f64() * factor;
        if scaled >= self.config.max_delay.as_secs_f64() {
            self.config.max_delay
        } else {
            Duration::from_secs_f64(scaled)
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let delay = self.delay_for_attempt(attempt);
        if self.config.jitter {
            delay.mul_f64(0.5 + rand::random::<f64>())
        } else {
            delay
        }
    }

    /// Run `operation` with retries.
    ///
    /// The operation is invoked up to `max_attempts` times. A failure whose
    /// category is not in `retry_on`, or a failure on the final attempt,
    /// is returned verbatim so the caller sees the true cause rather than a
    /// generic "gave up" wrapper. Cancellation during a backoff sleep returns
    /// [`ApiError::Cancelled`] immediately.
    pub async fn execute<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let category = err.category();
                    if attempt >= max_attempts || !self.config.retries(category) {
                        return Err(err);
                    }

                    let delay = self.backoff_delay(attempt);
                    debug!(
                        "attempt {attempt}/{max_attempts} failed ({category:?}), retrying in {delay:?}"
                    );

                    tokio::select! {
                        _ = cancel.cancelled() => return Err(ApiError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    fn no_jitter(max_attempts: u32, base_ms: u64) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_attempts,
            base_delay: Duration::from_millis(base_ms),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: false,
            retry_on: RetryConfig::default_retry_on(),
        })
    }

    #[test]
    fn delay_sequence_is_exact_without_jitter() {
        let policy = no_jitter(5, 100);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(800));
    }

    #[test]
    fn delay_sequence_is_non_decreasing_and_caps() {
        let policy = RetryPolicy::new(RetryConfig {
            max_attempts: 20,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            jitter: false,
            retry_on: RetryConfig::default_retry_on(),
        });
        let mut previous = Duration::ZERO;
        for attempt in 1..=20 {
            let delay = policy.delay_for_attempt(attempt);
            assert!(delay >= previous, "delay shrank at attempt {attempt}");
            assert!(delay <= Duration::from_secs(5));
            previous = delay;
        }
        assert_eq!(policy.delay_for_attempt(20), Duration::from_secs(5));
    }

    #[test]
    fn jitter_stays_in_half_to_three_halves() {
        let policy = RetryPolicy::new(RetryConfig {
            jitter: true,
            base_delay: Duration::from_millis(100),
            ..RetryConfig::default()
        });
        for _ in 0..200 {
            let delay = policy.backoff_delay(1);
            assert!(delay >= Duration::from_millis(50), "{delay:?} too short");
            assert!(delay < Duration::from_millis(150), "{delay:?} too long");
        }
    }

    #[tokio::test]
    async fn retries_server_error_exactly_max_attempts_times() {
        // Scenario: 3 attempts, 100ms base, x2 multiplier, no jitter, server
        // error every time. Expect 3 invocations, ~300ms of backoff total,
        // and the Server error returned verbatim.
        let policy = no_jitter(3, 100);
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let cancel = CancellationToken::new();

        let started = Instant::now();
        let result: Result<(), ApiError> = policy
            .execute(&cancel, move || {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ApiError::from_status(503, "unavailable"))
                }
            })
            .await;
        let elapsed = started.elapsed();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(elapsed >= Duration::from_millis(290), "slept {elapsed:?}");
        assert!(elapsed < Duration::from_millis(800), "slept {elapsed:?}");
        match result {
            Err(ApiError::Server { status: 503, .. }) => {}
            other => panic!("expected the original Server error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn does_not_retry_non_retryable_category() {
        let policy = no_jitter(3, 10);
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let cancel = CancellationToken::new();

        let result: Result<(), ApiError> = policy
            .execute(&cancel, move || {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ApiError::from_status(404, "missing"))
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(ApiError::NotFound { .. })));
    }

    #[tokio::test]
    async fn caller_can_opt_into_retrying_authentication() {
        let policy = RetryPolicy::new(RetryConfig {
            max_attempts: 2,
            base_delay: Duration::from_millis(5),
            jitter: false,
            retry_on: vec![ErrorCategory::Authentication],
            ..RetryConfig::default()
        });
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let cancel = CancellationToken::new();

        let _: Result<(), ApiError> = policy
            .execute(&cancel, move || {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ApiError::from_status(401, "expired"))
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn returns_value_after_transient_failures() {
        let policy = no_jitter(3, 5);
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let cancel = CancellationToken::new();

        let result = policy
            .execute(&cancel, move || {
                let calls = calls_clone.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(ApiError::from_status(500, "flaky"))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn cancellation_during_backoff_returns_promptly() {
        let policy = no_jitter(3, 5_000);
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel_clone.cancel();
        });

        let started = Instant::now();
        let result: Result<(), ApiError> = policy
            .execute(&cancel, || async {
                Err(ApiError::from_status(500, "down"))
            })
            .await;

        assert!(matches!(result, Err(ApiError::Cancelled)));
        assert!(started.elapsed() < Duration::from_millis(200));
    }
}
