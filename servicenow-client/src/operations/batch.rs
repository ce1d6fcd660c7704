//! Batch envelope and wire codec.
//!
//! A [`BatchRequest`] packs any number of logical sub-requests into the
//! single physical request the Batch API accepts. Sub-request bodies travel
//! base64-encoded; results are routed back to callers by sub-request ID, so
//! decoding is order-independent regardless of `preserve_order`.

use std::collections::HashMap;
use std::collections::HashSet;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::operation::Operation;
use super::result::{BatchItemError, BatchResult, ServicedResult};
use crate::error::ApiError;

/// One header on a sub-request, in wire form.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchHeader {
    pub name: String,
    pub value: String,
}

/// One logical request inside a batch envelope. This is the real protocol
/// contract; [`Operation`] and the builder's convenience adders are sugar
/// over it.
#[derive(Debug, Clone)]
pub struct SubRequest {
    /// Caller-assigned ID, unique within the envelope. The decoder uses it
    /// to route this sub-request's result back.
    pub id: String,
    pub method: Method,
    /// Path relative to the instance, e.g. `/api/now/table/incident`.
    pub path: String,
    pub headers: Vec<BatchHeader>,
    pub body: Option<Vec<u8>>,
    pub exclude_response_headers: bool,
}

impl SubRequest {
    pub fn new(id: impl Into<String>, method: Method, path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            method,
            path: path.into(),
            headers: Vec::new(),
            body: None,
            exclude_response_headers: true,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(BatchHeader {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_json_body(mut self, payload: &Value) -> Result<Self, ApiError> {
        self.body = Some(serde_json::to_vec(payload)?);
        self.headers.push(BatchHeader {
            name: "Content-Type".into(),
            value: "application/json".into(),
        });
        Ok(self)
    }
}

/// The envelope submitted to the Batch API.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    /// Envelope-level correlation ID echoed back by the server.
    pub correlation_id: String,
    /// Ask the server to execute sub-requests sequentially in submission
    /// order. Client-side decoding is unaffected: results are keyed by
    /// sub-request ID either way.
    pub preserve_order: bool,
    pub sub_requests: Vec<SubRequest>,
}

impl BatchRequest {
    pub fn new() -> Self {
        Self {
            correlation_id: Uuid::new_v4().to_string(),
            preserve_order: false,
            sub_requests: Vec::new(),
        }
    }

    pub fn builder() -> BatchRequestBuilder {
        BatchRequestBuilder::new()
    }

    pub fn len(&self) -> usize {
        self.sub_requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sub_requests.is_empty()
    }

    pub fn submitted_ids(&self) -> Vec<String> {
        self.sub_requests.iter().map(|sub| sub.id.clone()).collect()
    }

    /// Duplicate sub-request IDs would make result routing ambiguous, so
    /// they are a caller error caught before anything reaches the wire.
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.sub_requests.is_empty() {
            return Err(ApiError::validation("batch contains no sub-requests"));
        }
        let mut seen = HashSet::new();
        for sub in &self.sub_requests {
            if !seen.insert(sub.id.as_str()) {
                return Err(ApiError::validation(format!(
                    "duplicate sub-request id '{}' in batch",
                    sub.id
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn to_wire(&self) -> WireBatchRequest {
        WireBatchRequest {
            correlation_id: self.correlation_id.clone(),
            preserve_order: self.preserve_order,
            sub_requests: self
                .sub_requests
                .iter()
                .map(|sub| WireSubRequest {
                    id: sub.id.clone(),
                    url: sub.path.clone(),
                    method: sub.method.to_string(),
                    headers: sub.headers.clone(),
                    body: sub.body.as_deref().map(|bytes| BASE64.encode(bytes)),
                    exclude_response_headers: sub.exclude_response_headers,
                })
                .collect(),
        }
    }
}

impl Default for BatchRequest {
    fn default() -> Self {
        Self::new()
    }
}

/// Fluent builder assembling a [`BatchRequest`] from operations and raw
/// sub-requests. IDs are assigned sequentially ("1", "2", ...) unless the
/// caller supplies their own.
#[derive(Debug, Default)]
pub struct BatchRequestBuilder {
    correlation_id: Option<String>,
    preserve_order: bool,
    entries: Vec<Entry>,
}

#[derive(Debug)]
enum Entry {
    Op { id: Option<String>, op: Operation },
    Raw(SubRequest),
}

impl BatchRequestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn preserve_order(mut self, preserve: bool) -> Self {
        self.preserve_order = preserve;
        self
    }

    pub fn operation(mut self, op: Operation) -> Self {
        self.entries.push(Entry::Op { id: None, op });
        self
    }

    pub fn operation_with_id(mut self, id: impl Into<String>, op: Operation) -> Self {
        self.entries.push(Entry::Op {
            id: Some(id.into()),
            op,
        });
        self
    }

    pub fn sub_request(mut self, sub: SubRequest) -> Self {
        self.entries.push(Entry::Raw(sub));
        self
    }

    pub fn create(self, table: impl Into<String>, data: Value) -> Self {
        self.operation(Operation::create(table, data))
    }

    pub fn update(
        self,
        table: impl Into<String>,
        sys_id: impl Into<String>,
        data: Value,
    ) -> Self {
        self.operation(Operation::update(table, sys_id, data))
    }

    pub fn delete(self, table: impl Into<String>, sys_id: impl Into<String>) -> Self {
        self.operation(Operation::delete(table, sys_id))
    }

    pub fn get(self, table: impl Into<String>, sys_id: impl Into<String>) -> Self {
        self.operation(Operation::get(table, sys_id))
    }

    pub fn build(self) -> Result<BatchRequest, ApiError> {
        let mut request = BatchRequest::new();
        if let Some(correlation_id) = self.correlation_id {
            request.correlation_id = correlation_id;
        }
        request.preserve_order = self.preserve_order;

        for (index, entry) in self.entries.into_iter().enumerate() {
            let sub = match entry {
                Entry::Op { id, op } => {
                    let id = id.unwrap_or_else(|| (index + 1).to_string());
                    op.into_sub_request(id)?
                }
                Entry::Raw(sub) => sub,
            };
            request.sub_requests.push(sub);
        }

        request.validate()?;
        Ok(request)
    }
}

// --- wire types ---

#[derive(Debug, Serialize)]
pub(crate) struct WireBatchRequest {
    pub correlation_id: String,
    pub preserve_order: bool,
    pub sub_requests: Vec<WireSubRequest>,
}

#[derive(Debug, Serialize)]
pub(crate) struct WireSubRequest {
    pub id: String,
    pub url: String,
    pub method: String,
    pub headers: Vec<BatchHeader>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    pub exclude_response_headers: bool,
}

#[derive(Debug, Deserialize)]
struct WireBatchResponse {
    correlation_id: Option<String>,
    serviced: Vec<WireServicedResult>,
    unserviced: Vec<WireUnservicedResult>,
}

#[derive(Debug, Deserialize)]
struct WireServicedResult {
    id: String,
    status_code: u16,
    status_text: String,
    body: Option<String>,
    execution_time_ms: u64,
}

#[derive(Debug, Deserialize)]
struct WireUnservicedResult {
    id: String,
    status_code: u16,
    status_text: String,
    error_detail: Option<String>,
}

/// Decodes the Batch API response into a [`BatchResult`].
pub struct BatchResponseParser;

impl BatchResponseParser {
    /// Decode a response body. `submitted_ids` are the IDs that went out in
    /// the envelope; a response that fails to account for one of them is
    /// malformed and reported as a decode error, never silently dropped.
    pub fn parse(body: &[u8], submitted_ids: &[String]) -> Result<BatchResult, ApiError> {
        let wire: WireBatchResponse = serde_json::from_slice(body)
            .map_err(|err| ApiError::Decode(format!("batch response envelope: {err}")))?;

        let mut results = HashMap::new();
        let mut errors = HashMap::new();

        for serviced in wire.serviced {
            let decoded_body = serviced.body.as_deref().and_then(decode_result_body);
            results.insert(
                serviced.id,
                ServicedResult {
                    status_code: serviced.status_code,
                    status_text: serviced.status_text,
                    body: decoded_body,
                    execution_time: Duration::from_millis(serviced.execution_time_ms),
                },
            );
        }

        for unserviced in wire.unserviced {
            if results.contains_key(&unserviced.id) {
                return Err(ApiError::Decode(format!(
                    "sub-request '{}' reported as both serviced and unserviced",
                    unserviced.id
                )));
            }
            errors.insert(
                unserviced.id,
                BatchItemError {
                    status_code: unserviced.status_code,
                    status_text: unserviced.status_text,
                    detail: unserviced.error_detail,
                },
            );
        }

        for id in submitted_ids {
            if !results.contains_key(id) && !errors.contains_key(id) {
                return Err(ApiError::Decode(format!(
                    "batch response did not account for sub-request '{id}'"
                )));
            }
        }

        Ok(BatchResult::new(wire.correlation_id, results, errors))
    }
}

/// Base64-decode and JSON-decode a serviced body. Either step failing leaves
/// the body inaccessible while the sub-request itself stays successful;
/// status codes are authoritative, payloads are best-effort.
fn decode_result_body(encoded: &str) -> Option<Value> {
    let bytes = BASE64.decode(encoded).ok()?;
    serde_json::from_slice(&bytes).ok()
}
