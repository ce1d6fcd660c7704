//! Semaphore cap on in-flight requests.
//!
//! ServiceNow instances cut off clients that hold too many simultaneous
//! connections, so the client bounds in-flight requests independently of the
//! per-category pacing done by the rate limiter.

use std::sync::Arc;

use log::debug;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use super::config::ConcurrencyConfig;
use crate::error::ApiError;

// Tokio's Semaphore max is 2^61-1; this stands in for "unlimited" when the
// limiter is disabled.
const UNLIMITED_PERMITS: usize = 1 << 20;

/// Bounds the number of requests simultaneously on the wire.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
    enabled: bool,
}

impl ConcurrencyLimiter {
    pub fn new(config: &ConcurrencyConfig) -> Self {
        let permits = if config.enabled {
            config.max_concurrent_requests.min(UNLIMITED_PERMITS)
        } else {
            UNLIMITED_PERMITS
        };
        Self {
            semaphore: Arc::new(Semaphore::new(permits)),
            max_concurrent: permits,
            enabled: config.enabled,
        }
    }

    /// Acquire a slot, waiting if all are in use. The permit releases itself
    /// when dropped. Cancellation while queued returns [`ApiError::Cancelled`].
    pub async fn acquire(
        &self,
        cancel: &CancellationToken,
    ) -> Result<OwnedSemaphorePermit, ApiError> {
        if self.semaphore.available_permits() == 0 {
            debug!(
                "concurrency limiter: all {} slots in use, queueing",
                self.max_concurrent
            );
        }

        tokio::select! {
            _ = cancel.cancelled() => Err(ApiError::Cancelled),
            permit = self.semaphore.clone().acquire_owned() => {
                // The semaphore is never closed while the limiter is alive.
                permit.map_err(|_| ApiError::Cancelled)
            }
        }
    }

    /// Take a slot only if one is free right now.
    pub fn try_acquire(&self) -> Option<OwnedSemaphorePermit> {
        self.semaphore.clone().try_acquire_owned().ok()
    }

    pub fn available_slots(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn in_flight(&self) -> usize {
        self.max_concurrent
            .saturating_sub(self.semaphore.available_permits())
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}
