//! Partitioned batch outcomes.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;

/// Outcome of one serviced (successful) sub-request.
#[derive(Debug, Clone)]
pub struct ServicedResult {
    pub status_code: u16,
    pub status_text: String,
    /// Decoded JSON payload. `None` when the sub-request produced no body or
    /// the body could not be decoded.
    pub body: Option<Value>,
    /// Server-side execution time for this sub-request.
    pub execution_time: Duration,
}

/// Outcome of one unserviced (failed) sub-request.
#[derive(Debug, Clone)]
pub struct BatchItemError {
    pub status_code: u16,
    pub status_text: String,
    pub detail: Option<String>,
}

/// The decoded outcome of a whole batch, partitioned into successes and
/// failures keyed by sub-request ID.
///
/// Every submitted ID appears in exactly one of the two maps. Constructed
/// once by the response decoder and immutable afterwards; partial failure is
/// expressed here, not as an error from the executor.
#[derive(Debug, Clone)]
pub struct BatchResult {
    correlation_id: Option<String>,
    results: HashMap<String, ServicedResult>,
    errors: HashMap<String, BatchItemError>,
}

impl BatchResult {
    pub(crate) fn new(
        correlation_id: Option<String>,
        results: HashMap<String, ServicedResult>,
        errors: HashMap<String, BatchItemError>,
    ) -> Self {
        Self {
            correlation_id,
            results,
            errors,
        }
    }

    /// Envelope-level correlation ID echoed by the server.
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn get_result(&self, id: &str) -> Option<&ServicedResult> {
        self.results.get(id)
    }

    pub fn get_error(&self, id: &str) -> Option<&BatchItemError> {
        self.errors.get(id)
    }

    pub fn results(&self) -> &HashMap<String, ServicedResult> {
        &self.results
    }

    pub fn errors(&self) -> &HashMap<String, BatchItemError> {
        &self.errors
    }

    pub fn successful_requests(&self) -> usize {
        self.results.len()
    }

    pub fn failed_requests(&self) -> usize {
        self.errors.len()
    }

    pub fn total_requests(&self) -> usize {
        self.results.len() + self.errors.len()
    }

    pub fn is_complete_success(&self) -> bool {
        self.errors.is_empty()
    }
}
