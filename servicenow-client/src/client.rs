//! The client: composition point for auth, pacing, retries, and batching.
//!
//! `ServiceNowClient` is the narrow interface the typed CRUD/query layers
//! call into. It owns one `AuthManager` and one `RateLimiter`, shared by all
//! in-flight requests; each call is otherwise independent and the client
//! holds no per-request state.

use std::sync::Arc;

use log::debug;
use reqwest::Method;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::auth::{AuthManager, TokenStore};
use crate::clock::{Clock, SystemClock};
use crate::constants::BATCH_API_PATH;
use crate::error::ApiError;
use crate::models::Environment;
use crate::operations::{BatchRequest, BatchResponseParser, BatchResult, Operation};
use crate::resilience::{
    ConcurrencyLimiter, EndpointCategory, RateLimiter, ResilienceConfig, RetryPolicy,
};
use crate::transport::{HttpTransport, ReqwestTransport, TransportRequest, TransportResponse};

/// A client bound to one ServiceNow instance.
pub struct ServiceNowClient {
    instance_url: String,
    auth: Arc<AuthManager>,
    transport: Arc<dyn HttpTransport>,
    rate_limiter: RateLimiter,
    concurrency: ConcurrencyLimiter,
    retry: RetryPolicy,
}

impl ServiceNowClient {
    /// Build a client with the default `reqwest` transport and system clock.
    pub fn new(environment: Environment, resilience: ResilienceConfig) -> Result<Self, ApiError> {
        Self::builder(environment).resilience(resilience).build()
    }

    pub fn builder(environment: Environment) -> ServiceNowClientBuilder {
        ServiceNowClientBuilder {
            environment,
            resilience: ResilienceConfig::default(),
            transport: None,
            clock: None,
            token_store: None,
        }
    }

    pub fn instance_url(&self) -> &str {
        &self.instance_url
    }

    pub fn auth(&self) -> &AuthManager {
        &self.auth
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    /// Issue a single authenticated, rate-limited, retried request against
    /// the instance. `path` is relative (e.g. `/api/now/table/incident`);
    /// non-2xx responses come back as classified errors.
    pub async fn request(
        &self,
        cancel: &CancellationToken,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<TransportResponse, ApiError> {
        let category = EndpointCategory::from_path(path);
        let mut template = TransportRequest::new(method, format!("{}{}", self.instance_url, path))
            .header("Accept", "application/json");
        if let Some(body) = body {
            template = template.json(body)?;
        }
        self.submit(cancel, category, &template).await
    }

    /// Execute a single operation outside of a batch.
    pub async fn execute(
        &self,
        cancel: &CancellationToken,
        operation: Operation,
    ) -> Result<TransportResponse, ApiError> {
        let method = operation.http_method();
        let path = operation.path();
        let body = match &operation {
            Operation::Create { data, .. } | Operation::Update { data, .. } => Some(data.clone()),
            Operation::Delete { .. } | Operation::Get { .. } => None,
        };
        self.request(cancel, method, &path, body.as_ref()).await
    }

    /// Submit a batch envelope and decode the per-operation outcomes.
    ///
    /// Partial failure is not an error here: sub-request failures land in
    /// [`BatchResult::errors`]. An `Err` from this method means the envelope
    /// itself never made it — invalid before submission, cancelled, or a
    /// transport-level failure that survived the retry policy; the latter is
    /// wrapped as [`ApiError::BatchSubmission`] with its classified cause
    /// intact.
    pub async fn execute_batch(
        &self,
        cancel: &CancellationToken,
        batch: &BatchRequest,
    ) -> Result<BatchResult, ApiError> {
        batch.validate()?;

        let template = TransportRequest::new(
            Method::POST,
            format!("{}{}", self.instance_url, BATCH_API_PATH),
        )
        .header("Accept", "application/json")
        .json(&batch.to_wire())?;

        debug!(
            "submitting batch {} with {} sub-requests",
            batch.correlation_id,
            batch.len()
        );

        let category = EndpointCategory::from_path(BATCH_API_PATH);
        let response = match self.submit(cancel, category, &template).await {
            Ok(response) => response,
            Err(ApiError::Cancelled) => return Err(ApiError::Cancelled),
            Err(err) => return Err(ApiError::BatchSubmission(Box::new(err))),
        };

        BatchResponseParser::parse(&response.body, &batch.submitted_ids())
    }

    /// One pass through the full stack: concurrency slot, rate-limit token,
    /// fresh authorization, transport, status classification — all inside
    /// the retry loop, so a refreshed token or replenished bucket is picked
    /// up by every attempt.
    async fn submit(
        &self,
        cancel: &CancellationToken,
        category: EndpointCategory,
        template: &TransportRequest,
    ) -> Result<TransportResponse, ApiError> {
        self.retry
            .execute(cancel, || {
                let mut request = template.clone();
                async move {
                    let _permit = self.concurrency.acquire(cancel).await?;
                    self.rate_limiter.wait(category, cancel).await?;
                    self.auth.apply(&mut request).await?;

                    let response = tokio::select! {
                        _ = cancel.cancelled() => return Err(ApiError::Cancelled),
                        response = self.transport.send(request) => response?,
                    };

                    if response.is_success() {
                        Ok(response)
                    } else {
                        Err(response.classify_error())
                    }
                }
            })
            .await
    }
}

/// Builder injecting transport, clock, and token store. Defaults are the
/// production `reqwest` transport and the system clock.
pub struct ServiceNowClientBuilder {
    environment: Environment,
    resilience: ResilienceConfig,
    transport: Option<Arc<dyn HttpTransport>>,
    clock: Option<Arc<dyn Clock>>,
    token_store: Option<Arc<dyn TokenStore>>,
}

impl ServiceNowClientBuilder {
    pub fn resilience(mut self, resilience: ResilienceConfig) -> Self {
        self.resilience = resilience;
        self
    }

    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn token_store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.token_store = Some(store);
        self
    }

    pub fn build(self) -> Result<ServiceNowClient, ApiError> {
        let transport: Arc<dyn HttpTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new()?),
        };
        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let mut auth = AuthManager::new(
            self.environment.instance_url.clone(),
            self.environment.credentials.clone(),
            transport.clone(),
            clock.clone(),
        );
        if let Some(store) = self.token_store {
            auth = auth.with_store(store);
        }

        let rate_limiter = RateLimiter::new(&self.resilience.rate_limit, clock)?;
        let concurrency = ConcurrencyLimiter::new(&self.resilience.concurrency);
        let retry = RetryPolicy::new(self.resilience.retry.clone());

        Ok(ServiceNowClient {
            instance_url: self.environment.instance_url,
            auth: Arc::new(auth),
            transport,
            rate_limiter,
            concurrency,
            retry,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CredentialSet;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Transport that replays a scripted sequence of responses and records
    /// every request it saw.
    struct SeqTransport {
        responses: Mutex<VecDeque<TransportResponse>>,
        requests: Mutex<Vec<TransportRequest>>,
    }

    impl SeqTransport {
        fn new(responses: Vec<TransportResponse>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn response(status: u16, body: Vec<u8>) -> TransportResponse {
            TransportResponse {
                status,
                headers: Vec::new(),
                body,
            }
        }

        fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        fn request_at(&self, index: usize) -> TransportRequest {
            self.requests.lock().unwrap()[index].clone()
        }
    }

    #[async_trait]
    impl HttpTransport for SeqTransport {
        async fn send(&self, request: TransportRequest) -> Result<TransportResponse, ApiError> {
            self.requests.lock().unwrap().push(request);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| ApiError::Network {
                    detail: "no scripted response left".into(),
                })
        }
    }

    fn environment() -> Environment {
        Environment::new(
            "test",
            "https://dev.service-now.com",
            CredentialSet::Basic {
                username: "admin".into(),
                password: "pw".into(),
            },
        )
    }

    fn fast_retry_config() -> ResilienceConfig {
        let mut config = ResilienceConfig::default();
        config.retry.base_delay = std::time::Duration::from_millis(5);
        config.retry.jitter = false;
        config.rate_limit.enabled = false;
        config
    }

    fn client(transport: Arc<SeqTransport>) -> ServiceNowClient {
        ServiceNowClient::builder(environment())
            .resilience(fast_retry_config())
            .transport(transport)
            .build()
            .unwrap()
    }

    fn batch_response_body(serviced: Value, unserviced: Value) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "correlation_id": "corr",
            "serviced": serviced,
            "unserviced": unserviced,
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn request_attaches_auth_and_accept() {
        let transport = SeqTransport::new(vec![SeqTransport::response(200, b"{}".to_vec())]);
        let client = client(transport.clone());
        let cancel = CancellationToken::new();

        client
            .request(&cancel, Method::GET, "/api/now/table/incident/abc", None)
            .await
            .unwrap();

        let sent = transport.request_at(0);
        assert_eq!(sent.url, "https://dev.service-now.com/api/now/table/incident/abc");
        assert!(sent.headers.iter().any(|(name, _)| name == "Authorization"));
        assert!(
            sent.headers
                .iter()
                .any(|(name, value)| name == "Accept" && value == "application/json")
        );
    }

    #[tokio::test]
    async fn non_retryable_status_fails_without_retry() {
        let transport = SeqTransport::new(vec![SeqTransport::response(404, b"gone".to_vec())]);
        let client = client(transport.clone());
        let cancel = CancellationToken::new();

        let err = client
            .request(&cancel, Method::GET, "/api/now/table/incident/x", None)
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::NotFound { .. }));
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn server_error_is_retried_until_success() {
        let transport = SeqTransport::new(vec![
            SeqTransport::response(503, b"down".to_vec()),
            SeqTransport::response(200, b"{}".to_vec()),
        ]);
        let client = client(transport.clone());
        let cancel = CancellationToken::new();

        let response = client
            .request(&cancel, Method::GET, "/api/now/table/incident", None)
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(transport.request_count(), 2);
    }

    #[tokio::test]
    async fn batch_partial_failure_is_not_an_error() {
        let body = batch_response_body(
            json!([
                {"id": "1", "status_code": 201, "status_text": "Created",
                 "body": null, "execution_time_ms": 4},
                {"id": "3", "status_code": 201, "status_text": "Created",
                 "body": null, "execution_time_ms": 6},
            ]),
            json!([
                {"id": "2", "status_code": 400, "status_text": "Bad Request",
                 "error_detail": "invalid field"},
            ]),
        );
        let transport = SeqTransport::new(vec![SeqTransport::response(200, body)]);
        let client = client(transport);
        let cancel = CancellationToken::new();

        let batch = BatchRequest::builder()
            .create("incident", json!({"a": 1}))
            .create("incident", json!({"b": 2}))
            .create("incident", json!({"c": 3}))
            .build()
            .unwrap();

        let result = client.execute_batch(&cancel, &batch).await.unwrap();
        assert_eq!(result.successful_requests(), 2);
        assert_eq!(result.failed_requests(), 1);
        assert_eq!(result.get_error("2").unwrap().status_code, 400);
    }

    #[tokio::test]
    async fn batch_transport_failure_wraps_classified_cause() {
        let transport = SeqTransport::new(vec![
            SeqTransport::response(502, b"bad gateway".to_vec()),
            SeqTransport::response(502, b"bad gateway".to_vec()),
            SeqTransport::response(502, b"bad gateway".to_vec()),
        ]);
        let client = client(transport.clone());
        let cancel = CancellationToken::new();

        let batch = BatchRequest::builder()
            .get("incident", "abc")
            .build()
            .unwrap();

        let err = client.execute_batch(&cancel, &batch).await.unwrap_err();
        match err {
            ApiError::BatchSubmission(cause) => {
                assert!(matches!(*cause, ApiError::Server { status: 502, .. }))
            }
            other => panic!("expected BatchSubmission, got {other:?}"),
        }
        // Default retry policy: 3 attempts before giving up.
        assert_eq!(transport.request_count(), 3);
    }

    #[tokio::test]
    async fn duplicate_batch_ids_fail_before_submission() {
        let transport = SeqTransport::new(vec![]);
        let client = client(transport.clone());
        let cancel = CancellationToken::new();

        let mut batch = BatchRequest::new();
        batch
            .sub_requests
            .push(crate::operations::SubRequest::new("1", Method::GET, "/x"));
        batch
            .sub_requests
            .push(crate::operations::SubRequest::new("1", Method::GET, "/y"));

        let err = client.execute_batch(&cancel, &batch).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation { .. }));
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn malformed_batch_response_is_a_decode_error() {
        let transport =
            SeqTransport::new(vec![SeqTransport::response(200, b"not json".to_vec())]);
        let client = client(transport);
        let cancel = CancellationToken::new();

        let batch = BatchRequest::builder()
            .get("incident", "abc")
            .build()
            .unwrap();

        let err = client.execute_batch(&cancel, &batch).await.unwrap_err();
        assert!(matches!(err, ApiError::Decode(_)));
    }
}
