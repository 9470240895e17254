//! HTTP API for account status
//!
//! Every request is scoped to an API key taken from the `x-api-key`
//! header. Includes CORS configuration and request tracing.

mod accounts;
mod error;
mod events;

pub use accounts::{HealthResponse, MergeRequest, SetEnabledRequest};
pub use error::{ApiResult, ProblemDetails};
pub use events::{CHANGE_EVENT, SNAPSHOT_EVENT};

use axum::{
    http::HeaderMap,
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tower_http::LatencyUnit;

use crate::adapters::outbound::messaging::ChangeBroadcaster;
use crate::application::AccountMonitor;

pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Clone)]
pub struct AppState {
    pub monitor: Arc<AccountMonitor>,
    pub broadcaster: ChangeBroadcaster,
    /// Event streams end when this flips to true
    pub shutdown: watch::Receiver<bool>,
    pub allowed_origins: Vec<String>,
    pub cors_disabled: bool,
}

/// API key of the caller; missing or blank is 401
pub fn api_key(headers: &HeaderMap) -> ApiResult<String> {
    headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ProblemDetails::unauthorized(format!("missing {} header", API_KEY_HEADER)))
}

pub fn create_router(state: AppState) -> Router {
    let cors = if state.cors_disabled {
        tracing::warn!(
            "CORS is DISABLED - allowing all origins. This should only be used in development!"
        );
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
            .allow_origin(
                state
                    .allowed_origins
                    .iter()
                    .filter_map(|origin| origin.parse().ok())
                    .collect::<Vec<_>>(),
            )
            .allow_methods([
                axum::http::Method::GET,
                axum::http::Method::POST,
                axum::http::Method::PUT,
                axum::http::Method::DELETE,
                axum::http::Method::OPTIONS,
            ])
            .allow_headers([
                axum::http::header::CONTENT_TYPE,
                axum::http::HeaderName::from_static(API_KEY_HEADER),
            ])
    };

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(tracing::Level::INFO))
        .on_request(|request: &axum::http::Request<_>, _span: &tracing::Span| {
            tracing::info!(
                method = %request.method(),
                uri = %request.uri(),
                version = ?request.version(),
                "HTTP request started"
            );
        })
        .on_response(
            DefaultOnResponse::new()
                .level(tracing::Level::INFO)
                .latency_unit(LatencyUnit::Millis),
        );

    Router::new()
        .route("/api/health", get(accounts::health))
        .route("/api/accounts", get(accounts::get_accounts))
        .route("/api/accounts/snapshots", get(accounts::get_snapshots))
        .route("/api/accounts/events", get(events::account_events))
        .route("/api/accounts/merge", post(accounts::merge_accounts))
        // `:account` is an account id for /enabled and a PLATFORM:id key for DELETE
        .route("/api/accounts/:account", delete(accounts::remove_account))
        .route("/api/accounts/:account/enabled", put(accounts::set_enabled))
        .layer(trace_layer)
        .layer(cors)
        .with_state(state)
}
