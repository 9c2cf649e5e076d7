//! API-key authentication middleware
//!
//! Protected routes expect `Authorization: Bearer <secret>` and an
//! `X-App-Name` header. On success the [`AppContext`] is stored in the
//! request extensions for handlers to pick up.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use logsink_core::delivery::APP_NAME_HEADER;
use logsink_core::identity::AppContext;
use logsink_core::logging::RedactedKey;
use logsink_core::Error;
use std::sync::Arc;
use tracing::debug;

use crate::api::ApiError;
use crate::models::AppState;

/// Where interactive callers are sent when not authenticated
pub const LOGIN_PATH: &str = "/login";

/// Bearer credential from the `Authorization` header
pub fn bearer_secret(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Target application from the `X-App-Name` header
pub fn app_name(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(APP_NAME_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Browsers get a redirect instead of a JSON error
fn is_interactive(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|accept| accept.contains("text/html"))
        .unwrap_or(false)
}

async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<AppContext, Error> {
    let secret = bearer_secret(headers).ok_or_else(|| Error::auth("missing bearer secret"))?;
    let app = app_name(headers).ok_or_else(|| Error::auth("missing application name"))?;
    state.identity.authenticate(app, secret).await.map_err(|e| {
        debug!(app = %app, key = %RedactedKey(secret), "Rejected API key: {:?}", e);
        e
    })
}

/// Require a valid, usable application key
pub async fn require_app(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let result = authenticate(&state, request.headers()).await;
    match result {
        Ok(ctx) => {
            request.extensions_mut().insert(ctx);
            next.run(request).await
        }
        Err(_) if is_interactive(request.headers()) => Redirect::to(LOGIN_PATH).into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}
