//! LogSink HTTP server
//!
//! Ingestion and identity API over a single SQLite database.
//!
//! ## Security Features
//! - API-key authentication on ingestion routes
//! - Only credential hashes stored, payloads encrypted at rest
//! - Request body limit and security headers on every response

use axum::{
    extract::Request,
    http::{header, HeaderName, HeaderValue, Method},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;

pub mod api;
pub mod auth;
pub mod models;

pub use models::AppState;

/// Request body limit (bulk ingestion included)
pub const DEFAULT_BODY_LIMIT: usize = 5 * 1024 * 1024;

/// Security headers middleware
async fn security_headers_middleware(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static("default-src 'none'; frame-ancestors 'none'"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(header::REFERRER_POLICY, HeaderValue::from_static("no-referrer"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));

    response
}

/// Build the full application router
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-app-name"),
        ])
        .max_age(Duration::from_secs(3600));

    // Routes that need a valid application key
    let protected = Router::new()
        .route("/logs", post(api::ingest_log).get(api::list_logs))
        .route("/logs/bulk", post(api::ingest_bulk))
        .route("/apps/revoke", post(api::revoke))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth::require_app,
        ));

    Router::new()
        .route("/health", get(api::health))
        // Identity
        .route("/users/login", post(api::login))
        .route("/users/apps", post(api::authorize).get(api::request_otp))
        .route("/users/otp", post(api::authorize_with_otp))
        .route("/apps/authorize", post(api::api_authorize))
        .route("/apps/verify", post(api::verify_app))
        .merge(protected)
        .layer(RequestBodyLimitLayer::new(DEFAULT_BODY_LIMIT))
        .layer(middleware::from_fn(security_headers_middleware))
        .layer(cors)
        .with_state(state)
}
