//! Data models for the HTTP API

use logsink_core::identity::{AppSummary, IdentityService, IssuedCredentials};
use logsink_core::storage::Database;
use logsink_core::LogRecord;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as TokioMutex;

/// Application shared state
pub struct AppState {
    /// Database shared with the identity service
    pub database: Arc<TokioMutex<Database>>,
    /// Account and API-key lifecycle
    pub identity: Arc<IdentityService>,
    /// How long ingested logs are kept (None keeps them forever)
    pub log_ttl: Option<Duration>,
}

impl AppState {
    /// Build state around a database and an identity service sharing it
    pub fn new(
        database: Arc<TokioMutex<Database>>,
        identity: IdentityService,
        log_ttl: Option<Duration>,
    ) -> Self {
        Self {
            database,
            identity: Arc::new(identity),
            log_ttl,
        }
    }
}

/// API response envelope
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }
}

impl ApiResponse<()> {
    /// Success with no payload
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
        }
    }

    /// Failure envelope
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
        }
    }
}

/// `POST /logs`
#[derive(Debug, Deserialize)]
pub struct IngestLogRequest {
    pub log: LogRecord,
}

/// `POST /logs/bulk`
#[derive(Debug, Deserialize)]
pub struct IngestBulkRequest {
    pub logs: Vec<LogRecord>,
}

/// `GET /logs` query
#[derive(Debug, Default, Deserialize)]
pub struct LogQuery {
    pub cursor: Option<i64>,
    pub limit: Option<usize>,
}

/// `POST /users/login`
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub login_token: String,
    pub existing_apps: Vec<AppInfo>,
}

/// An application as listed to its owner
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppInfo {
    pub app_name: String,
    pub status: String,
    pub expires: i64,
    pub usable: bool,
}

impl From<AppSummary> for AppInfo {
    fn from(app: AppSummary) -> Self {
        Self {
            app_name: app.app_name,
            status: app.status.as_str().to_string(),
            expires: app.expires,
            usable: app.usable,
        }
    }
}

/// `POST /users/apps` and `POST /apps/authorize`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeRequest {
    pub email: String,
    pub app_name: String,
    /// Lifetime in seconds
    pub expires: Option<u64>,
}

/// `GET /users/apps` query
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OtpDispatchQuery {
    pub app_name: String,
    pub login_token: String,
}

/// `POST /users/otp`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OtpAuthorizeRequest {
    pub otp: String,
    pub email: String,
    pub app_name: String,
    pub expires: Option<u64>,
}

/// Freshly issued credentials; the only time the secret is shown
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretResponse {
    pub app_name: String,
    pub api_secret: String,
    pub token: String,
    pub expires: i64,
}

impl From<IssuedCredentials> for SecretResponse {
    fn from(issued: IssuedCredentials) -> Self {
        Self {
            app_name: issued.app_name,
            api_secret: issued.api_secret,
            token: issued.token,
            expires: issued.expires,
        }
    }
}

/// `POST /apps/verify`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub app_name: String,
    pub api_secret: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub valid: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IngestResponse {
    pub count: usize,
}
