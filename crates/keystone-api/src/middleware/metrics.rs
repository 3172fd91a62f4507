//! # Prometheus Metrics
//!
//! Recorded through the `metrics` facade; the Prometheus recorder installed
//! by `main` renders them at `GET /metrics`. Without an installed recorder
//! every call here is a no-op, which is how the tests run.
//!
//! HTTP-level metrics are recorded in [`metrics_middleware`]. Webhook
//! outcomes are recorded by the webhook routes.

use std::time::Instant;

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;

use keystone_ledger::{ReceiveOutcome, RetryOutcome, WebhookError};

pub const HTTP_REQUESTS_TOTAL: &str = "keystone_http_requests_total";
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "keystone_http_request_duration_seconds";
pub const WEBHOOKS_RECEIVED_TOTAL: &str = "keystone_webhooks_received_total";
pub const WEBHOOK_RETRIES_TOTAL: &str = "keystone_webhook_retries_total";

/// Replace UUID path segments with `{id}` to keep label cardinality bounded.
fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            if uuid::Uuid::try_parse(segment).is_ok() {
                "{id}"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Middleware that records request counts and latency.
pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let path = normalize_path(request.uri().path());
    let start = Instant::now();

    let response = next.run(request).await;

    let status = response.status().as_u16().to_string();
    metrics::counter!(
        HTTP_REQUESTS_TOTAL,
        "method" => method.clone(),
        "path" => path.clone(),
        "status" => status
    )
    .increment(1);
    metrics::histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "method" => method,
        "path" => path
    )
    .record(start.elapsed().as_secs_f64());

    response
}

/// Label for a webhook delivery result.
pub fn receive_outcome_label(result: &Result<ReceiveOutcome, WebhookError>) -> &'static str {
    match result {
        Ok(ReceiveOutcome::Processed { .. }) => "processed",
        Ok(ReceiveOutcome::Duplicate { .. }) => "duplicate",
        Err(err) if err.is_validation() => "rejected",
        Err(_) => "failed",
    }
}

pub fn record_webhook(result: &Result<ReceiveOutcome, WebhookError>) {
    metrics::counter!(WEBHOOKS_RECEIVED_TOTAL, "outcome" => receive_outcome_label(result))
        .increment(1);
}

pub fn retry_outcome_label(outcome: &RetryOutcome) -> &'static str {
    match outcome {
        RetryOutcome::NotFound => "not_found",
        RetryOutcome::AlreadyResolved(_) => "already_resolved",
        RetryOutcome::Succeeded(_) => "succeeded",
        RetryOutcome::Failed(_) => "failed",
    }
}

pub fn record_retry(outcome: &RetryOutcome) {
    metrics::counter!(WEBHOOK_RETRIES_TOTAL, "outcome" => retry_outcome_label(outcome))
        .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_ledger::webhook::SignatureError;
    use metrics_exporter_prometheus::PrometheusBuilder;

    #[test]
    fn normalize_path_replaces_uuid() {
        let path = "/webhook/retry/550e8400-e29b-41d4-a716-446655440000";
        assert_eq!(normalize_path(path), "/webhook/retry/{id}");
    }

    #[test]
    fn normalize_path_preserves_other_segments() {
        assert_eq!(normalize_path("/audit/entity/charge/c-1"), "/audit/entity/charge/c-1");
        assert_eq!(normalize_path("/health/liveness"), "/health/liveness");
    }

    #[test]
    fn receive_labels() {
        let dup = Ok(ReceiveOutcome::Duplicate {
            event_id: "evt_1".into(),
        });
        assert_eq!(receive_outcome_label(&dup), "duplicate");

        let rejected = Err(WebhookError::Signature(SignatureError::Mismatch));
        assert_eq!(receive_outcome_label(&rejected), "rejected");

        let failed = Err(WebhookError::Processing {
            failure_id: uuid::Uuid::new_v4(),
            message: "unknown tenant".into(),
        });
        assert_eq!(receive_outcome_label(&failed), "failed");
    }

    #[test]
    fn webhook_counter_is_rendered() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, || {
            record_webhook(&Ok(ReceiveOutcome::Duplicate {
                event_id: "evt_1".into(),
            }));
            record_retry(&RetryOutcome::NotFound);
        });
        let rendered = handle.render();
        assert!(rendered.contains("keystone_webhooks_received_total{outcome=\"duplicate\"} 1"));
        assert!(rendered.contains("keystone_webhook_retries_total{outcome=\"not_found\"} 1"));
    }
}
