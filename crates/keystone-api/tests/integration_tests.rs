//! # Integration Tests for keystone-api
//!
//! Drives the assembled router with `oneshot` against the in-memory store:
//! health probes, webhook ingestion and deduplication, signature rejection,
//! dead-lettering and explicit retry, audit verification and trails, and
//! the OpenAPI document.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::NaiveDate;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use keystone_api::config::AppConfig;
use keystone_api::state::AppState;
use keystone_core::{Cents, OrgId, Timestamp};
use keystone_ledger::{
    Charge, ChargeStatus, FixtureTenantDirectory, MemoryLedgerStore, SignatureVerifier,
};

const ORG: &str = "org-http";
const SECRET: &str = "whsec_http";

struct Harness {
    app: axum::Router,
    store: Arc<MemoryLedgerStore>,
    tenants: Arc<FixtureTenantDirectory>,
    tenant: Uuid,
}

fn harness(config: AppConfig) -> Harness {
    let store = Arc::new(MemoryLedgerStore::new());
    let tenant = Uuid::new_v4();
    let tenants =
        Arc::new(FixtureTenantDirectory::new().with_tenant(tenant, OrgId::new(ORG).unwrap()));
    let state = AppState::new(config, store.clone(), tenants.clone());
    Harness {
        app: keystone_api::app(state),
        store,
        tenants,
        tenant,
    }
}

/// Unsigned mode, as in `AppConfig::default()`.
fn test_harness() -> Harness {
    harness(AppConfig::default())
}

fn signed_harness() -> Harness {
    harness(AppConfig {
        webhook_secret: Some(SECRET.to_string()),
        webhook_allow_unsigned: false,
        ..AppConfig::default()
    })
}

impl Harness {
    async fn seed_charge(&self, due: (i32, u32, u32), cents: i64) -> Uuid {
        let id = Uuid::new_v4();
        self.store
            .seed_charge(Charge {
                id,
                org_id: OrgId::new(ORG).unwrap(),
                tenant_id: self.tenant,
                amount: Cents::new(cents).unwrap(),
                due_date: NaiveDate::from_ymd_opt(due.0, due.1, due.2).unwrap(),
                status: ChargeStatus::Unpaid,
                created_at: Timestamp::now(),
            })
            .await;
        id
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, String) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    async fn send_json(&self, request: Request<Body>) -> (StatusCode, Value) {
        let (status, body) = self.send(request).await;
        (status, serde_json::from_str(&body).unwrap())
    }
}

fn payment_event(event_id: &str, intent: &str, tenant: Uuid, cents: i64) -> String {
    json!({
        "id": event_id,
        "type": "payment_intent.succeeded",
        "data": {"object": {
            "id": intent,
            "amount_received": cents,
            "metadata": {"tenantId": tenant.to_string()}
        }}
    })
    .to_string()
}

fn post_webhook(body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/webhook")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn post_signed_webhook(body: &str, signature: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/webhook")
        .header("content-type", "application/json")
        .header("Stripe-Signature", signature)
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn post_retry(id: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/webhook/retry/{id}"))
        .body(Body::empty())
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn get_scoped(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("X-Org-Id", ORG)
        .body(Body::empty())
        .unwrap()
}

// -- Health Probes ------------------------------------------------------------

#[tokio::test]
async fn test_liveness_probe() {
    let h = test_harness();
    let (status, body) = h.send(get("/health/liveness")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "ok");
}

#[tokio::test]
async fn test_readiness_probe_without_database() {
    let h = test_harness();
    let (status, body) = h.send(get("/health/readiness")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "ready");
}

#[tokio::test]
async fn test_metrics_endpoint_without_recorder_is_empty() {
    let h = test_harness();
    let (status, body) = h.send(get("/metrics")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.is_empty());
}

// -- Webhook ingestion --------------------------------------------------------

#[tokio::test]
async fn test_payment_webhook_allocates_and_dedupes() {
    let h = test_harness();
    let older = h.seed_charge((2024, 1, 1), 5_000).await;
    let newer = h.seed_charge((2024, 2, 1), 5_000).await;
    let body = payment_event("evt_1", "pi_1", h.tenant, 7_000);

    let (status, ack) = h.send_json(post_webhook(&body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack, json!({"received": true}));

    assert_eq!(h.store.charge(older).await.unwrap().status, ChargeStatus::Paid);
    assert_eq!(
        h.store.charge(newer).await.unwrap().status,
        ChargeStatus::PartiallyPaid
    );

    let (status, ack) = h.send_json(post_webhook(&body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack, json!({"received": true, "duplicate": true}));
    assert_eq!(h.store.allocations().await.len(), 2);
    assert_eq!(h.store.envelope_count().await, 1);
}

#[tokio::test]
async fn test_malformed_envelope_is_rejected_without_persisting() {
    let h = test_harness();
    let (status, body) = h
        .send_json(post_webhook(r#"{"type":"payment_intent.succeeded"}"#))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
    assert_eq!(h.store.envelope_count().await, 0);
}

#[tokio::test]
async fn test_signed_mode_rejects_missing_and_bad_signatures() {
    let h = signed_harness();
    let body = payment_event("evt_sig", "pi_sig", h.tenant, 100);

    let (status, err) = h.send_json(post_webhook(&body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["error"]["code"], "BAD_REQUEST");

    let forged = SignatureVerifier::new("whsec_other")
        .sign(body.as_bytes(), chrono::Utc::now().timestamp())
        .unwrap();
    let (status, _) = h.send_json(post_signed_webhook(&body, &forged)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(h.store.envelope_count().await, 0);
}

#[tokio::test]
async fn test_signed_mode_accepts_valid_signature() {
    let h = signed_harness();
    h.seed_charge((2024, 1, 1), 100).await;
    let body = payment_event("evt_ok", "pi_ok", h.tenant, 100);
    let signature = SignatureVerifier::new(SECRET)
        .sign(body.as_bytes(), chrono::Utc::now().timestamp())
        .unwrap();

    let (status, ack) = h.send_json(post_signed_webhook(&body, &signature)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["received"], true);
    assert_eq!(h.store.allocations().await.len(), 1);
}

#[tokio::test]
async fn test_no_secret_without_unsigned_opt_in_rejects_webhooks() {
    let h = harness(AppConfig {
        webhook_secret: None,
        webhook_allow_unsigned: false,
        ..AppConfig::default()
    });
    h.seed_charge((2024, 1, 1), 100).await;
    let body = payment_event("evt_nosecret", "pi_nosecret", h.tenant, 100);

    let (status, err) = h.send_json(post_webhook(&body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["error"]["code"], "BAD_REQUEST");
    assert_eq!(h.store.envelope_count().await, 0);
    assert!(h.store.allocations().await.is_empty());
}

// -- Dead letters and retry ---------------------------------------------------

#[tokio::test]
async fn test_unknown_tenant_is_dead_lettered_then_retried() {
    let h = test_harness();
    let stranger = Uuid::new_v4();
    let body = payment_event("evt_dl", "pi_dl", stranger, 2_500);

    let (status, err) = h.send_json(post_webhook(&body)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(err["error"]["code"], "WEBHOOK_PROCESSING_FAILED");
    let failure_id = err["error"]["details"]["failureId"]
        .as_str()
        .unwrap()
        .to_string();

    let (status, failures) = h.send_json(get("/webhook/failures")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(failures.as_array().unwrap().len(), 1);
    assert_eq!(failures[0]["id"], failure_id);
    assert_eq!(failures[0]["eventId"], "evt_dl");
    assert_eq!(failures[0]["retryCount"], 0);

    // Still unknown: the retry fails and is counted.
    let (status, retry) = h.send_json(post_retry(&failure_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(retry["success"], false);
    assert_eq!(retry["message"], "Webhook retry failed");
    assert_eq!(retry["retryCount"], 1);

    h.tenants.insert(stranger, OrgId::new(ORG).unwrap());
    let (status, retry) = h.send_json(post_retry(&failure_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(retry["success"], true);
    assert_eq!(retry["message"], "Webhook retried successfully");
    assert_eq!(retry["retryCount"], 2);

    let (_, retry) = h.send_json(post_retry(&failure_id)).await;
    assert_eq!(retry["success"], true);
    assert_eq!(retry["message"], "Webhook already processed");
    assert_eq!(retry["retryCount"], 2);

    let (_, failures) = h.send_json(get("/webhook/failures")).await;
    assert!(failures.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_retry_unknown_failure() {
    let h = test_harness();
    for id in [Uuid::new_v4().to_string(), "not-a-uuid".to_string()] {
        let (status, body) = h.send_json(post_retry(&id)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(
            body,
            json!({"success": false, "message": "Webhook failure not found"})
        );
    }
}

#[tokio::test]
async fn test_failures_limit_is_validated() {
    let h = test_harness();
    let (status, body) = h.send_json(get("/webhook/failures?limit=0")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}

// -- Audit --------------------------------------------------------------------

#[tokio::test]
async fn test_audit_routes_require_org_scope() {
    let h = test_harness();
    let (status, body) = h.send_json(get("/audit/verify")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_audit_verify_and_trail_after_allocation() {
    let h = test_harness();
    let charge = h.seed_charge((2024, 1, 1), 1_000).await;
    h.send(post_webhook(&payment_event("evt_a", "pi_a", h.tenant, 400)))
        .await;
    h.send(post_webhook(&payment_event("evt_b", "pi_b", h.tenant, 600)))
        .await;

    let (status, verify) = h.send_json(get_scoped("/audit/verify")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(verify["valid"], true);
    // Two allocation_created events on the charge, one payment_received per payment.
    assert_eq!(verify["totalEvents"], 4);
    assert!(verify.get("firstBadEvent").is_none());

    let (status, trail) = h
        .send_json(get_scoped(&format!("/audit/entity/charge/{charge}")))
        .await;
    assert_eq!(status, StatusCode::OK);
    let trail = trail.as_array().unwrap();
    assert_eq!(trail.len(), 2);
    assert!(trail[0]["prevHashHex"].is_null());
    assert_eq!(trail[1]["prevHashHex"], trail[0]["hashHex"]);
    assert_eq!(trail[0]["action"], "allocation_created");
    assert_eq!(trail[0]["metadata"]["amountCents"], 400);
    assert_eq!(trail[1]["metadata"]["chargeStatus"], "paid");
}

#[tokio::test]
async fn test_audit_verify_reports_tampering() {
    let h = test_harness();
    let charge = h.seed_charge((2024, 1, 1), 1_000).await;
    h.send(post_webhook(&payment_event("evt_t", "pi_t", h.tenant, 300)))
        .await;

    let (_, trail) = h
        .send_json(get_scoped(&format!("/audit/entity/charge/{charge}")))
        .await;
    let event_id: Uuid = trail[0]["id"].as_str().unwrap().parse().unwrap();
    h.store
        .tamper_audit_event(event_id, |e| e.metadata = json!({"amountCents": 1}))
        .await
        .unwrap();

    let (_, verify) = h.send_json(get_scoped("/audit/verify")).await;
    assert_eq!(verify["valid"], false);
    assert_eq!(verify["firstBadEvent"]["id"], event_id.to_string());
    assert_eq!(verify["firstBadEvent"]["entity"], "charge");
    assert_eq!(verify["firstBadEvent"]["reason"], "hash_mismatch");
}

#[tokio::test]
async fn test_unknown_entity_trail_is_empty() {
    let h = test_harness();
    let (status, trail) = h
        .send_json(get_scoped("/audit/entity/charge/does-not-exist"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(trail, json!([]));
}

// -- OpenAPI ------------------------------------------------------------------

#[tokio::test]
async fn test_openapi_json() {
    let h = test_harness();
    let (status, spec) = h.send_json(get("/openapi.json")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(spec["paths"]["/webhook"].is_object());
    assert!(spec["paths"]["/audit/verify"].is_object());
}
