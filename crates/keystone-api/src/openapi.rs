//! # OpenAPI Specification Assembly
//!
//! Assembles the utoipa-documented routes into one OpenAPI document served
//! at `/openapi.json`.

use axum::routing::get;
use axum::{Json, Router};
use utoipa::OpenApi;

use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Keystone Financial Core",
        description = "Payment webhook ingestion with dead-letter retry, oldest-first payment allocation, and hash-chained audit trails.\n\nAudit routes are scoped by the `X-Org-Id` header. Webhook deliveries are authenticated by the provider signature header."
    ),
    paths(
        crate::routes::webhook::receive_webhook,
        crate::routes::webhook::retry_webhook,
        crate::routes::webhook::list_failures,
        crate::routes::audit::verify_chain,
        crate::routes::audit::entity_trail,
    ),
    components(
        schemas(
            crate::error::ErrorBody,
            crate::error::ErrorDetail,
            crate::routes::webhook::WebhookAck,
            crate::routes::webhook::RetryResponse,
            crate::routes::webhook::FailureView,
            crate::routes::audit::VerifyResponse,
            crate::routes::audit::BadEventView,
            crate::routes::audit::TrailEntry,
        ),
    ),
    tags(
        (name = "webhooks", description = "Provider webhook ingestion, dead letters, and explicit retry"),
        (name = "audit", description = "Audit chain verification and entity trails"),
    )
)]
pub struct ApiDoc;

pub fn router() -> Router<AppState> {
    Router::new().route("/openapi.json", get(openapi_json))
}

/// GET /openapi.json
async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
