//! # API Error Types
//!
//! Structured error type implementing `axum::response::IntoResponse`.
//! Maps ledger and webhook errors to HTTP status codes with a JSON body of
//! the form `{"error": {"code", "message", "details"?}}`. Internal error
//! details are logged, never returned.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use keystone_ledger::{LedgerError, StoreError, WebhookError};

/// Structured JSON error response body.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g. "BAD_REQUEST").
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Application-level error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// Malformed request, bad signature, or missing org scope (400).
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// A webhook handler failed; the event is dead-lettered as `failure_id` (500).
    #[error("webhook processing failed")]
    WebhookProcessing { failure_id: Uuid },

    /// The storage backend failed or is unreachable (503). Message is logged
    /// but not returned to client.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// Internal server error (500). Message is logged but not returned to client.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::WebhookProcessing { .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "WEBHOOK_PROCESSING_FAILED",
            ),
            Self::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let (message, details) = match &self {
            Self::Internal(_) => {
                tracing::error!(error = %self, "internal server error");
                ("An internal error occurred".to_string(), None)
            }
            Self::Unavailable(_) => {
                tracing::warn!(error = %self, "dependency unavailable");
                ("Service temporarily unavailable".to_string(), None)
            }
            Self::WebhookProcessing { failure_id } => (
                "Webhook processing failed; the event was recorded for retry".to_string(),
                Some(serde_json::json!({ "failureId": failure_id })),
            ),
            other => (other.to_string(), None),
        };

        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message,
                details,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<keystone_core::ValidationError> for AppError {
    fn from(err: keystone_core::ValidationError) -> Self {
        Self::BadRequest(err.to_string())
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => Self::NotFound(what),
            StoreError::Backend(msg) => Self::Unavailable(msg),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Store(e) => e.into(),
            LedgerError::Validation(e) => e.into(),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<WebhookError> for AppError {
    fn from(err: WebhookError) -> Self {
        match err {
            WebhookError::Signature(e) => Self::BadRequest(e.to_string()),
            WebhookError::Envelope(e) => Self::BadRequest(e.to_string()),
            WebhookError::Processing { failure_id, .. } => Self::WebhookProcessing { failure_id },
            WebhookError::Store(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use keystone_ledger::webhook::SignatureError;

    async fn response_parts(err: AppError) -> (StatusCode, ErrorBody) {
        let response = err.into_response();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: ErrorBody = serde_json::from_slice(&bytes).unwrap();
        (status, body)
    }

    #[test]
    fn status_codes() {
        assert_eq!(
            AppError::BadRequest("x".into()).status_and_code(),
            (StatusCode::BAD_REQUEST, "BAD_REQUEST")
        );
        assert_eq!(
            AppError::NotFound("x".into()).status_and_code().0,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::Unavailable("db".into()).status_and_code().0,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn internal_hides_details() {
        let (status, body) =
            response_parts(AppError::Internal("db connection failed".into())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.error.code, "INTERNAL_ERROR");
        assert_eq!(body.error.message, "An internal error occurred");
        assert!(body.error.details.is_none());
    }

    #[tokio::test]
    async fn webhook_failure_carries_failure_id_only() {
        let failure_id = Uuid::new_v4();
        let err: AppError = WebhookError::Processing {
            failure_id,
            message: "storage backend error: password authentication failed".into(),
        }
        .into();
        let (status, body) = response_parts(err).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.error.code, "WEBHOOK_PROCESSING_FAILED");
        assert!(!body.error.message.contains("password"));
        assert_eq!(
            body.error.details.unwrap()["failureId"],
            failure_id.to_string()
        );
    }

    #[test]
    fn signature_errors_are_client_errors() {
        let err: AppError = WebhookError::Signature(SignatureError::Mismatch).into();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn store_errors_map_by_kind() {
        let err: AppError = LedgerError::Store(StoreError::NotFound("payment".into())).into();
        assert!(matches!(err, AppError::NotFound(_)));
        let err: AppError = StoreError::Conflict("40001".into()).into();
        assert!(matches!(err, AppError::Internal(_)));
        let err: AppError = StoreError::Backend("pool timed out".into()).into();
        assert!(matches!(err, AppError::Unavailable(_)));
    }
}
