//! Instance and credential models.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::TOKEN_EXPIRY_SKEW_SECS;
use crate::error::ApiError;

/// A ServiceNow instance plus the credentials used to reach it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Environment {
    /// Display name, e.g. "prod" or "dev".
    pub name: String,
    /// Base URL of the instance, e.g. `https://dev12345.service-now.com`.
    /// Stored without a trailing slash.
    pub instance_url: String,
    pub credentials: CredentialSet,
}

impl Environment {
    pub fn new(
        name: impl Into<String>,
        instance_url: impl Into<String>,
        credentials: CredentialSet,
    ) -> Self {
        let instance_url = instance_url.into().trim_end_matches('/').to_string();
        Self {
            name: name.into(),
            instance_url,
            credentials,
        }
    }

    /// Build an environment from `SERVICENOW_*` environment variables.
    ///
    /// `SERVICENOW_INSTANCE_URL` is required. Credentials are resolved in
    /// order: basic auth (`SERVICENOW_USERNAME`/`SERVICENOW_PASSWORD`), API
    /// key (`SERVICENOW_API_KEY`), then OAuth (`SERVICENOW_CLIENT_ID`/
    /// `SERVICENOW_CLIENT_SECRET`, optionally `SERVICENOW_REFRESH_TOKEN`).
    pub fn from_env() -> Result<Self, ApiError> {
        dotenvy::dotenv().ok();

        let instance_url = std::env::var("SERVICENOW_INSTANCE_URL")
            .map_err(|_| ApiError::Config("SERVICENOW_INSTANCE_URL is not set".into()))?;
        let name =
            std::env::var("SERVICENOW_ENVIRONMENT").unwrap_or_else(|_| "default".to_string());

        let credentials = if let (Ok(username), Ok(password)) = (
            std::env::var("SERVICENOW_USERNAME"),
            std::env::var("SERVICENOW_PASSWORD"),
        ) {
            CredentialSet::Basic { username, password }
        } else if let Ok(key) = std::env::var("SERVICENOW_API_KEY") {
            CredentialSet::ApiKey { key }
        } else if let (Ok(client_id), Ok(client_secret)) = (
            std::env::var("SERVICENOW_CLIENT_ID"),
            std::env::var("SERVICENOW_CLIENT_SECRET"),
        ) {
            match std::env::var("SERVICENOW_REFRESH_TOKEN") {
                Ok(refresh_token) => CredentialSet::RefreshToken {
                    client_id,
                    client_secret,
                    refresh_token,
                },
                Err(_) => CredentialSet::ClientCredentials {
                    client_id,
                    client_secret,
                },
            }
        } else {
            return Err(ApiError::Config(
                "no credentials found: set SERVICENOW_USERNAME/SERVICENOW_PASSWORD, \
                 SERVICENOW_API_KEY, or SERVICENOW_CLIENT_ID/SERVICENOW_CLIENT_SECRET"
                    .into(),
            ));
        };

        Ok(Self::new(name, instance_url, credentials))
    }
}

/// Authorization material for an instance.
///
/// Static variants (`Basic`, `ApiKey`) never expire. Token variants go through
/// the OAuth token endpoint and are refreshed by the `AuthManager`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CredentialSet {
    Basic {
        username: String,
        password: String,
    },
    ApiKey {
        key: String,
    },
    ClientCredentials {
        client_id: String,
        client_secret: String,
    },
    RefreshToken {
        client_id: String,
        client_secret: String,
        refresh_token: String,
    },
}

impl CredentialSet {
    /// Static credentials are attached as-is and never refreshed.
    pub fn is_static(&self) -> bool {
        matches!(self, Self::Basic { .. } | Self::ApiKey { .. })
    }

    pub fn credential_type(&self) -> &'static str {
        match self {
            Self::Basic { .. } => "basic",
            Self::ApiKey { .. } => "api_key",
            Self::ClientCredentials { .. } => "client_credentials",
            Self::RefreshToken { .. } => "refresh_token",
        }
    }
}

/// An access token plus its expiry, as held in memory and in a token store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenInfo {
    pub access_token: String,
    pub token_type: String,
    /// `None` means the token never expires.
    pub expires_at: Option<DateTime<Utc>>,
    pub refresh_token: Option<String>,
}

impl TokenInfo {
    /// Pure, time-based expiry check. A token is treated as expired
    /// [`TOKEN_EXPIRY_SKEW_SECS`] seconds early so it cannot lapse while a
    /// request carrying it is in flight.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => now + Duration::seconds(TOKEN_EXPIRY_SKEW_SECS) >= expires_at,
            None => false,
        }
    }

    pub(crate) fn from_token_response(response: TokenResponse, now: DateTime<Utc>) -> Self {
        Self {
            access_token: response.access_token,
            token_type: response.token_type.unwrap_or_else(|| "Bearer".to_string()),
            expires_at: response
                .expires_in
                .map(|seconds| now + Duration::seconds(seconds)),
            refresh_token: response.refresh_token,
        }
    }
}

/// Raw token-endpoint response.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    pub token_type: Option<String>,
    pub expires_in: Option<i64>,
    pub refresh_token: Option<String>,
}
