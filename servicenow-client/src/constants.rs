//! Shared constants for the ServiceNow REST API surface.

/// Batch API endpoint, relative to the instance base URL.
pub const BATCH_API_PATH: &str = "/api/now/v1/batch";

/// Table API prefix (e.g. `/api/now/table/incident`).
pub const TABLE_API_PREFIX: &str = "/api/now/table";

/// Attachment API prefix.
pub const ATTACHMENT_API_PREFIX: &str = "/api/now/attachment";

/// Import Set API prefix.
pub const IMPORT_API_PREFIX: &str = "/api/now/import";

/// OAuth token endpoint on the instance.
pub const OAUTH_TOKEN_PATH: &str = "/oauth_token.do";

/// Header used for API-key authentication.
pub const API_KEY_HEADER: &str = "x-sn-apikey";

/// Default HTTP timeout for a single request.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Treat a token as expired this many seconds before its actual expiry,
/// so a token cannot lapse between the check and the request hitting the wire.
pub const TOKEN_EXPIRY_SKEW_SECS: i64 = 30;

/// User-Agent sent by the default transport.
pub const USER_AGENT: &str = concat!("servicenow-client/", env!("CARGO_PKG_VERSION"));
