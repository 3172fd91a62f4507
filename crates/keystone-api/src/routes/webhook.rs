//! # Webhook Routes
//!
//! - `POST /webhook`: receive one provider delivery.
//! - `POST /webhook/retry/{failure_id}`: explicitly re-run a dead-lettered event.
//! - `GET  /webhook/failures`: unresolved dead letters, newest first.
//!
//! Retries are never scheduled automatically; an operator (or external job)
//! calls the retry route.

use axum::body::Bytes;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use keystone_ledger::webhook::SIGNATURE_HEADER;
use keystone_ledger::{RetryOutcome, WebhookFailure};

use crate::error::AppError;
use crate::extractors::{extract_validated_query, Validate};
use crate::middleware::metrics;
use crate::state::AppState;

const DEFAULT_FAILURE_LIMIT: usize = 50;
const MAX_FAILURE_LIMIT: usize = 500;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/webhook", post(receive_webhook))
        .route("/webhook/retry/{failure_id}", post(retry_webhook))
        .route("/webhook/failures", get(list_failures))
}

/// Acknowledgement of a delivery that was processed or deduplicated.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WebhookAck {
    pub received: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duplicate: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RetryResponse {
    pub success: bool,
    pub message: String,
    /// Retry count after this attempt. Absent when the failure is unknown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<i32>,
}

impl From<&RetryOutcome> for RetryResponse {
    fn from(outcome: &RetryOutcome) -> Self {
        Self {
            success: outcome.success(),
            message: outcome.message().to_string(),
            retry_count: outcome.failure().map(|f| f.retry_count),
        }
    }
}

/// A dead-lettered event as shown to operators.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FailureView {
    pub id: Uuid,
    pub provider: String,
    pub event_id: String,
    pub error_message: String,
    pub retry_count: i32,
    pub last_retry_at: Option<String>,
    pub created_at: String,
    #[schema(value_type = Object)]
    pub payload: serde_json::Value,
}

impl From<WebhookFailure> for FailureView {
    fn from(f: WebhookFailure) -> Self {
        Self {
            id: f.id,
            provider: f.provider,
            event_id: f.event_id,
            error_message: f.error_message,
            retry_count: f.retry_count,
            last_retry_at: f.last_retry_at.map(|t| t.to_rfc3339_millis()),
            created_at: f.created_at.to_rfc3339_millis(),
            payload: f.payload,
        }
    }
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct FailuresQuery {
    /// Maximum rows to return (1-500, default 50).
    pub limit: Option<usize>,
}

impl Validate for FailuresQuery {
    fn validate(&self) -> Result<(), String> {
        match self.limit {
            Some(0) => Err("limit must be at least 1".into()),
            Some(n) if n > MAX_FAILURE_LIMIT => {
                Err(format!("limit must be at most {MAX_FAILURE_LIMIT}"))
            }
            _ => Ok(()),
        }
    }
}

/// Receive a provider webhook.
///
/// The raw body is verified against the signature header before parsing.
/// Redeliveries of an already-stored event are acknowledged with
/// `duplicate: true` and have no side effects.
#[utoipa::path(
    post,
    path = "/webhook",
    request_body(content = String, content_type = "application/json"),
    responses(
        (status = 200, description = "Event processed or deduplicated", body = WebhookAck),
        (status = 400, description = "Bad signature or malformed envelope", body = crate::error::ErrorBody),
        (status = 500, description = "Handler failed; event dead-lettered", body = crate::error::ErrorBody),
    ),
    tag = "webhooks"
)]
async fn receive_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    let signature = match headers.get(SIGNATURE_HEADER) {
        Some(value) => Some(
            value
                .to_str()
                .map_err(|_| AppError::BadRequest(format!("{SIGNATURE_HEADER} is not valid ASCII")))?,
        ),
        None => None,
    };

    let result = state.ingestor.receive(&body, signature).await;
    metrics::record_webhook(&result);

    let outcome = result?;
    Ok(Json(WebhookAck {
        received: true,
        duplicate: outcome.is_duplicate().then_some(true),
    }))
}

/// Re-run a dead-lettered event.
///
/// Unknown ids answer 404 with `success: false`. A failure that was already
/// resolved is reported as a success and not re-executed.
#[utoipa::path(
    post,
    path = "/webhook/retry/{failure_id}",
    params(
        ("failure_id" = String, Path, description = "Webhook failure ID")
    ),
    responses(
        (status = 200, description = "Retry attempted", body = RetryResponse),
        (status = 404, description = "Webhook failure not found", body = RetryResponse),
    ),
    tag = "webhooks"
)]
async fn retry_webhook(
    State(state): State<AppState>,
    Path(failure_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = match Uuid::try_parse(&failure_id) {
        Ok(id) => state.ingestor.retry(id).await?,
        Err(_) => RetryOutcome::NotFound,
    };
    metrics::record_retry(&outcome);

    let status = match outcome {
        RetryOutcome::NotFound => StatusCode::NOT_FOUND,
        _ => StatusCode::OK,
    };
    Ok((status, Json(RetryResponse::from(&outcome))))
}

/// List unresolved webhook failures, newest first.
#[utoipa::path(
    get,
    path = "/webhook/failures",
    params(FailuresQuery),
    responses(
        (status = 200, description = "Unresolved failures", body = Vec<FailureView>),
        (status = 400, description = "Invalid limit", body = crate::error::ErrorBody),
    ),
    tag = "webhooks"
)]
async fn list_failures(
    State(state): State<AppState>,
    query: Result<Query<FailuresQuery>, QueryRejection>,
) -> Result<Json<Vec<FailureView>>, AppError> {
    let query = extract_validated_query(query)?;
    let limit = query.limit.unwrap_or(DEFAULT_FAILURE_LIMIT);
    let failures = state.ingestor.failures(limit).await?;
    Ok(Json(failures.into_iter().map(FailureView::from).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_limit_bounds() {
        assert!(FailuresQuery { limit: None }.validate().is_ok());
        assert!(FailuresQuery { limit: Some(500) }.validate().is_ok());
        assert!(FailuresQuery { limit: Some(0) }.validate().is_err());
        assert!(FailuresQuery { limit: Some(501) }.validate().is_err());
    }

    #[test]
    fn not_found_response_has_no_retry_count() {
        let body = serde_json::to_value(RetryResponse::from(&RetryOutcome::NotFound)).unwrap();
        assert_eq!(
            body,
            serde_json::json!({"success": false, "message": "Webhook failure not found"})
        );
    }
}
