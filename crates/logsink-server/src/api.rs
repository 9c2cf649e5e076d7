//! REST API endpoints
//!
//! Ingestion routes sit behind [`crate::auth::require_app`]; identity routes
//! are public and authenticate through email, login token or one-time code.

use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use logsink_core::identity::{AppContext, DEFAULT_EXPIRES_SECS};
use logsink_core::ingest::{self, LogPage};
use logsink_core::Error;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::auth;
use crate::models::*;

/// Core error rendered as an HTTP response
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(Error::validation(rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self(Error::validation(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let message = if self.0.is_client_error() {
            self.0.to_string()
        } else {
            error!(kind = self.0.kind().as_str(), "Request failed: {:?}", self.0);
            "internal server error".to_string()
        };

        (status, Json(ApiResponse::failure(message))).into_response()
    }
}

pub type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

/// Liveness probe
pub async fn health() -> Json<ApiResponse<()>> {
    Json(ApiResponse::message("ok"))
}

// ========================================
// Ingestion
// ========================================

/// Store one log for the authenticated application
pub async fn ingest_log(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AppContext>,
    payload: Result<Json<IngestLogRequest>, JsonRejection>,
) -> ApiResult<IngestResponse> {
    let Json(request) = payload?;
    let db = state.database.lock().await;
    let ids = ingest::ingest_logs(&db, &ctx, vec![request.log], state.log_ttl)?;
    Ok(Json(ApiResponse::ok("log received", IngestResponse { count: ids.len() })))
}

/// Store a batch of logs for the authenticated application
pub async fn ingest_bulk(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AppContext>,
    payload: Result<Json<IngestBulkRequest>, JsonRejection>,
) -> ApiResult<IngestResponse> {
    let Json(request) = payload?;
    let db = state.database.lock().await;
    let ids = ingest::ingest_logs(&db, &ctx, request.logs, state.log_ttl)?;
    Ok(Json(ApiResponse::ok("logs received", IngestResponse { count: ids.len() })))
}

/// Page through the authenticated application's logs, decrypted
pub async fn list_logs(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AppContext>,
    query: Result<Query<LogQuery>, QueryRejection>,
) -> ApiResult<LogPage> {
    let Query(query) = query?;
    let db = state.database.lock().await;
    let page = ingest::read_logs(&db, &ctx.app_name, query.cursor, query.limit)?;
    Ok(Json(ApiResponse::ok("ok", page)))
}

// ========================================
// Identity
// ========================================

/// Log in (creating the account on first use) and list existing apps
pub async fn login(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult<LoginResponse> {
    let Json(request) = payload?;
    let outcome = state.identity.login(&request.email).await?;
    Ok(Json(ApiResponse::ok(
        "logged in",
        LoginResponse {
            login_token: outcome.login_token,
            existing_apps: outcome.existing_apps.into_iter().map(AppInfo::from).collect(),
        },
    )))
}

/// Create an application or re-authorize an expired/disabled one
pub async fn authorize(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<AuthorizeRequest>, JsonRejection>,
) -> ApiResult<SecretResponse> {
    let Json(request) = payload?;
    let issued = state
        .identity
        .authorize(
            &request.email,
            &request.app_name,
            request.expires.unwrap_or(DEFAULT_EXPIRES_SECS),
        )
        .await?;
    info!(app = %issued.app_name, "Issued application secret");
    Ok(Json(ApiResponse::ok("application authorized", issued.into())))
}

/// Re-authorize an existing application
pub async fn api_authorize(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<AuthorizeRequest>, JsonRejection>,
) -> ApiResult<SecretResponse> {
    let Json(request) = payload?;
    let issued = state
        .identity
        .api_authorize(
            &request.email,
            &request.app_name,
            request.expires.unwrap_or(DEFAULT_EXPIRES_SECS),
        )
        .await?;
    Ok(Json(ApiResponse::ok("application authorized", issued.into())))
}

/// Send the login-token holder a one-time code bound to an application name
pub async fn request_otp(
    State(state): State<Arc<AppState>>,
    query: Result<Query<OtpDispatchQuery>, QueryRejection>,
) -> ApiResult<()> {
    let Query(query) = query?;
    state
        .identity
        .request_otp(&query.app_name, &query.login_token)
        .await?;
    Ok(Json(ApiResponse::message("one-time code sent")))
}

/// Exchange a one-time code for a fresh secret
pub async fn authorize_with_otp(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<OtpAuthorizeRequest>, JsonRejection>,
) -> ApiResult<SecretResponse> {
    let Json(request) = payload?;
    let issued = state
        .identity
        .authorize_with_otp(
            &request.email,
            &request.otp,
            &request.app_name,
            request.expires.unwrap_or(DEFAULT_EXPIRES_SECS),
        )
        .await?;
    Ok(Json(ApiResponse::ok("application authorized", issued.into())))
}

/// Check a secret without requiring the application to be usable
pub async fn verify_app(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<VerifyRequest>, JsonRejection>,
) -> ApiResult<VerifyResponse> {
    let Json(request) = payload?;
    let valid = state
        .identity
        .verify(&request.app_name, &request.api_secret)
        .await?;
    Ok(Json(ApiResponse::ok("ok", VerifyResponse { valid })))
}

/// Disable the authenticated application
pub async fn revoke(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AppContext>,
    headers: HeaderMap,
) -> ApiResult<()> {
    let secret = auth::bearer_secret(&headers).ok_or_else(|| Error::auth("missing bearer secret"))?;
    state.identity.revoke(&ctx.app_name, secret).await.map_err(|e| {
        warn!(app = %ctx.app_name, "Revoke failed: {}", e);
        e
    })?;
    Ok(Json(ApiResponse::message("application revoked")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn render(error: Error) -> (StatusCode, serde_json::Value) {
        let response = ApiError(error).into_response();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_error_statuses() {
        assert_eq!(render(Error::validation("x")).await.0, StatusCode::BAD_REQUEST);
        assert_eq!(render(Error::InvalidOtp).await.0, StatusCode::UNAUTHORIZED);
        assert_eq!(render(Error::not_found("app")).await.0, StatusCode::NOT_FOUND);
        assert_eq!(render(Error::conflict("active")).await.0, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_internal_errors_are_opaque() {
        let (status, body) = render(Error::storage("disk I/O error at /var/lib")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "internal server error");
        assert!(body.get("data").is_none());
    }
}
