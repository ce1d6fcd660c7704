//! Credential management.
//!
//! [`AuthManager`] attaches authorization to outgoing requests, refreshing
//! OAuth tokens transparently. The check-then-refresh sequence is serialized
//! per manager, so N concurrent callers observing an expired token produce
//! exactly one token-endpoint exchange; the rest wait on that result.
//!
//! Static credentials (basic auth, API key) never expire and never touch the
//! network.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use reqwest::Method;
use tokio::sync::Mutex;

use crate::clock::Clock;
use crate::constants::{API_KEY_HEADER, OAUTH_TOKEN_PATH};
use crate::error::ApiError;
use crate::models::{CredentialSet, TokenInfo, TokenResponse};
use crate::transport::{HttpTransport, TransportRequest};

/// Optional persistence for refreshed tokens, so a new process can pick up a
/// still-valid token instead of hitting the token endpoint again.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn load(&self) -> Result<Option<TokenInfo>, ApiError>;
    async fn save(&self, token: &TokenInfo) -> Result<(), ApiError>;
}

/// JSON-file-backed token store.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn load(&self) -> Result<Option<TokenInfo>, ApiError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(ApiError::Config(format!(
                    "token store {}: {err}",
                    self.path.display()
                )));
            }
        };
        let token = serde_json::from_slice(&bytes)
            .map_err(|err| ApiError::Decode(format!("stored token: {err}")))?;
        Ok(Some(token))
    }

    async fn save(&self, token: &TokenInfo) -> Result<(), ApiError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|err| {
                ApiError::Config(format!("token store {}: {err}", self.path.display()))
            })?;
        }
        let bytes = serde_json::to_vec_pretty(token)?;
        tokio::fs::write(&self.path, bytes).await.map_err(|err| {
            ApiError::Config(format!("token store {}: {err}", self.path.display()))
        })
    }
}

/// In-memory token store.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    token: Mutex<Option<TokenInfo>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn load(&self) -> Result<Option<TokenInfo>, ApiError> {
        Ok(self.token.lock().await.clone())
    }

    async fn save(&self, token: &TokenInfo) -> Result<(), ApiError> {
        *self.token.lock().await = Some(token.clone());
        Ok(())
    }
}

/// Produces valid authorization for outgoing requests.
pub struct AuthManager {
    instance_url: String,
    credentials: CredentialSet,
    transport: Arc<dyn HttpTransport>,
    clock: Arc<dyn Clock>,
    // Single-writer discipline: expiry check and refresh happen under this
    // lock, so concurrent callers cannot race duplicate exchanges.
    token: Mutex<Option<TokenInfo>>,
    store: Option<Arc<dyn TokenStore>>,
}

impl AuthManager {
    pub fn new(
        instance_url: impl Into<String>,
        credentials: CredentialSet,
        transport: Arc<dyn HttpTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            instance_url: instance_url.into().trim_end_matches('/').to_string(),
            credentials,
            transport,
            clock,
            token: Mutex::new(None),
            store: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn credentials(&self) -> &CredentialSet {
        &self.credentials
    }

    /// Attach current valid authorization to `request`, refreshing first if
    /// the held token is expired.
    pub async fn apply(&self, request: &mut TransportRequest) -> Result<(), ApiError> {
        match &self.credentials {
            CredentialSet::Basic { username, password } => {
                let encoded = BASE64.encode(format!("{username}:{password}"));
                request.set_header("Authorization", format!("Basic {encoded}"));
                Ok(())
            }
            CredentialSet::ApiKey { key } => {
                request.set_header(API_KEY_HEADER, key.clone());
                Ok(())
            }
            CredentialSet::ClientCredentials { .. } | CredentialSet::RefreshToken { .. } => {
                let access_token = self.ensure_token().await?;
                request.set_header("Authorization", format!("Bearer {access_token}"));
                Ok(())
            }
        }
    }

    /// Whether the held credential is expired right now. Static credentials
    /// never expire; a token variant with no token yet counts as expired.
    pub async fn is_expired(&self) -> bool {
        if self.credentials.is_static() {
            return false;
        }
        match self.token.lock().await.as_ref() {
            Some(token) => token.is_expired(self.clock.now()),
            None => true,
        }
    }

    /// Force a token exchange, regardless of expiry. No-op for static
    /// credentials. Refresh failures surface to the caller unretried; the
    /// retry policy upstream decides whether the category warrants another
    /// attempt.
    pub async fn refresh(&self) -> Result<(), ApiError> {
        if self.credentials.is_static() {
            return Ok(());
        }
        let mut guard = self.token.lock().await;
        self.refresh_locked(&mut guard).await
    }

    /// A clone of the currently held token, if any.
    pub async fn token_info(&self) -> Option<TokenInfo> {
        self.token.lock().await.clone()
    }

    /// Return a valid access token, performing at most one exchange among
    /// any number of concurrent callers.
    async fn ensure_token(&self) -> Result<String, ApiError> {
        let mut guard = self.token.lock().await;

        // First use: adopt a persisted token if a store is configured. An
        // expired stored token is still kept for its refresh_token.
        if guard.is_none() {
            if let Some(store) = &self.store {
                match store.load().await {
                    Ok(persisted) => *guard = persisted,
                    Err(err) => warn!("ignoring unreadable token store: {err}"),
                }
            }
        }

        let now = self.clock.now();
        if let Some(token) = guard.as_ref() {
            if !token.is_expired(now) {
                return Ok(token.access_token.clone());
            }
            debug!("access token expired, refreshing");
        }

        self.refresh_locked(&mut guard).await?;
        Ok(guard
            .as_ref()
            .map(|token| token.access_token.clone())
            .unwrap_or_default())
    }

    /// Perform the token-endpoint exchange. Caller must hold the token lock.
    ///
    /// The exchange runs on a detached task: a caller whose own context is
    /// cancelled abandons its wait, while the network call itself is allowed
    /// to complete.
    async fn refresh_locked(&self, guard: &mut Option<TokenInfo>) -> Result<(), ApiError> {
        let prior_refresh_token = guard.as_ref().and_then(|token| token.refresh_token.clone());
        let exchange = exchange_token(
            self.transport.clone(),
            format!("{}{}", self.instance_url, OAUTH_TOKEN_PATH),
            self.credentials.clone(),
            prior_refresh_token,
            self.clock.now(),
        );
        let refreshed = tokio::spawn(exchange)
            .await
            .map_err(|err| ApiError::Network {
                detail: format!("token exchange task failed: {err}"),
            })??;

        if let Some(store) = &self.store {
            if let Err(err) = store.save(&refreshed).await {
                warn!("failed to persist refreshed token: {err}");
            }
        }

        *guard = Some(refreshed);
        Ok(())
    }
}

async fn exchange_token(
    transport: Arc<dyn HttpTransport>,
    token_url: String,
    credentials: CredentialSet,
    prior_refresh_token: Option<String>,
    now: DateTime<Utc>,
) -> Result<TokenInfo, ApiError> {
    let fields: Vec<(&str, &str)> = match &credentials {
        CredentialSet::ClientCredentials {
            client_id,
            client_secret,
        } => vec![
            ("grant_type", "client_credentials"),
            ("client_id", client_id.as_str()),
            ("client_secret", client_secret.as_str()),
        ],
        CredentialSet::RefreshToken {
            client_id,
            client_secret,
            refresh_token,
        } => vec![
            ("grant_type", "refresh_token"),
            (
                "refresh_token",
                prior_refresh_token.as_deref().unwrap_or(refresh_token),
            ),
            ("client_id", client_id.as_str()),
            ("client_secret", client_secret.as_str()),
        ],
        CredentialSet::Basic { .. } | CredentialSet::ApiKey { .. } => {
            return Err(ApiError::Config(
                "static credentials do not use the token endpoint".into(),
            ));
        }
    };

    let request = TransportRequest::new(Method::POST, token_url)
        .header("Accept", "application/json")
        .form(&fields);

    let response = transport.send(request).await?;
    if !response.is_success() {
        // Surface the body so the caller can see whether this is a bad
        // secret (non-retryable) or a transient instance fault.
        return Err(ApiError::Authentication {
            detail: format!(
                "token exchange returned HTTP {}: {}",
                response.status,
                response.body_text()
            ),
        });
    }

    let parsed: TokenResponse = response.json()?;
    let mut token = TokenInfo::from_token_response(parsed, now);
    // Some grants omit the refresh token on renewal; keep using the old one.
    if token.refresh_token.is_none() {
        token.refresh_token = prior_refresh_token.or(match credentials {
            CredentialSet::RefreshToken { refresh_token, .. } => Some(refresh_token),
            _ => None,
        });
    }
    Ok(token)
}
