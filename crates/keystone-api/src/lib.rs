//! # keystone-api — HTTP Service for the Keystone Financial Core
//!
//! ## API Surface
//!
//! | Route | Module |
//! |-------|--------|
//! | `POST /webhook` | [`routes::webhook`] |
//! | `POST /webhook/retry/{failure_id}` | [`routes::webhook`] |
//! | `GET /webhook/failures` | [`routes::webhook`] |
//! | `GET /audit/verify` | [`routes::audit`] |
//! | `GET /audit/entity/{entity}/{entity_id}` | [`routes::audit`] |
//! | `GET /openapi.json` | [`openapi`] |
//! | `GET /health/liveness`, `GET /health/readiness`, `GET /metrics` | here |
//!
//! ## Middleware Stack (execution order)
//!
//! ```text
//! TraceLayer → MetricsMiddleware → Handler
//! ```
//!
//! ## Crate Policy
//!
//! - No business logic in route handlers; they delegate to `keystone-ledger`.
//! - All errors map to structured HTTP responses via [`AppError`].
//! - PostgreSQL access lives in [`db`] behind the ledger's storage ports.

pub mod bootstrap;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod middleware;
pub mod openapi;
pub mod routes;
pub mod state;

use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, StatusCode};
use axum::middleware::from_fn;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

pub use config::AppConfig;
pub use error::AppError;
pub use state::AppState;

/// Provider events are small; anything larger is not a real delivery.
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Assemble the application router.
///
/// Health probes and `/metrics` are mounted outside the request metrics
/// layer so scrapes do not count themselves.
pub fn app(state: AppState) -> Router {
    let api = Router::new()
        .merge(routes::webhook::router())
        .merge(routes::audit::router())
        .merge(openapi::router())
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(from_fn(middleware::metrics::metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    let probes = Router::new()
        .route("/health/liveness", get(liveness))
        .route("/health/readiness", get(readiness))
        .route("/metrics", get(prometheus_metrics))
        .with_state(state);

    Router::new().merge(probes).merge(api)
}

/// GET /metrics in Prometheus text exposition format.
async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = state
        .metrics
        .as_ref()
        .map(|handle| handle.render())
        .unwrap_or_default();
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// Liveness probe: 200 while the process is running.
async fn liveness() -> &'static str {
    "ok"
}

/// Readiness probe: checks the database when one is configured.
async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    if let Some(pool) = &state.db_pool {
        if let Err(e) = sqlx::query("SELECT 1").execute(pool).await {
            tracing::warn!("Database health check failed: {e}");
            return (StatusCode::SERVICE_UNAVAILABLE, "database unreachable").into_response();
        }
    }
    (StatusCode::OK, "ready").into_response()
}
