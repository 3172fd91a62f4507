//! # Audit Routes
//!
//! - `GET /audit/verify`: verify every chain of the caller's organization.
//! - `GET /audit/entity/{entity}/{entity_id}`: one chain in append order.
//!
//! The organization comes from the `X-Org-Id` header; see [`OrgScope`].

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use keystone_core::ChainKey;
use keystone_ledger::{AuditEvent, BadEvent, ChainVerification};

use crate::error::AppError;
use crate::extractors::OrgScope;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/audit/verify", get(verify_chain))
        .route("/audit/entity/{entity}/{entity_id}", get(entity_trail))
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub valid: bool,
    pub total_events: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_bad_event: Option<BadEventView>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BadEventView {
    pub id: Uuid,
    pub entity: String,
    pub entity_id: String,
    /// Lowercase hex, or `"null"`.
    pub expected_hash: String,
    pub actual_hash: String,
    /// `unexpected_prev_hash`, `broken_link`, `hash_mismatch`, or
    /// `unhashable_payload`.
    pub reason: String,
}

impl From<BadEvent> for BadEventView {
    fn from(bad: BadEvent) -> Self {
        Self {
            id: bad.id,
            entity: bad.entity,
            entity_id: bad.entity_id,
            expected_hash: bad.expected_hash,
            actual_hash: bad.actual_hash,
            reason: bad.reason.as_str().to_string(),
        }
    }
}

impl From<ChainVerification> for VerifyResponse {
    fn from(v: ChainVerification) -> Self {
        Self {
            valid: v.valid,
            total_events: v.total_events,
            first_bad_event: v.first_bad_event.map(BadEventView::from),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TrailEntry {
    pub id: Uuid,
    pub action: String,
    pub actor_id: Option<String>,
    #[schema(value_type = Object)]
    pub metadata: serde_json::Value,
    pub created_at: String,
    /// `null` for the first event of a chain.
    pub prev_hash_hex: Option<String>,
    pub hash_hex: String,
}

impl From<AuditEvent> for TrailEntry {
    fn from(event: AuditEvent) -> Self {
        Self {
            id: event.id,
            action: event.action,
            actor_id: event.actor_id,
            metadata: event.metadata,
            created_at: event.created_at.to_rfc3339_millis(),
            prev_hash_hex: event.prev_hash.map(|h| h.to_hex()),
            hash_hex: event.hash.to_hex(),
        }
    }
}

/// Verify all audit chains of the organization.
///
/// A broken chain is reported, never repaired.
#[utoipa::path(
    get,
    path = "/audit/verify",
    params(
        ("X-Org-Id" = String, Header, description = "Organization scope")
    ),
    responses(
        (status = 200, description = "Verification result", body = VerifyResponse),
        (status = 400, description = "Missing organization scope", body = crate::error::ErrorBody),
    ),
    tag = "audit"
)]
async fn verify_chain(
    State(state): State<AppState>,
    OrgScope(org): OrgScope,
) -> Result<Json<VerifyResponse>, AppError> {
    let verification = state.ledger.verify_chain(&org).await?;
    Ok(Json(verification.into()))
}

/// The audit trail of one entity. Unknown entities yield an empty array.
#[utoipa::path(
    get,
    path = "/audit/entity/{entity}/{entity_id}",
    params(
        ("X-Org-Id" = String, Header, description = "Organization scope"),
        ("entity" = String, Path, description = "Entity type, e.g. charge or payment"),
        ("entity_id" = String, Path, description = "Entity ID")
    ),
    responses(
        (status = 200, description = "Events in append order", body = Vec<TrailEntry>),
        (status = 400, description = "Missing organization scope", body = crate::error::ErrorBody),
    ),
    tag = "audit"
)]
async fn entity_trail(
    State(state): State<AppState>,
    OrgScope(org): OrgScope,
    Path((entity, entity_id)): Path<(String, String)>,
) -> Result<Json<Vec<TrailEntry>>, AppError> {
    let chain = ChainKey::new(entity, entity_id)?;
    let events = state.ledger.trail(&org, &chain).await?;
    Ok(Json(events.into_iter().map(TrailEntry::from).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_core::{OrgId, Timestamp};
    use keystone_ledger::NewAuditEvent;

    #[test]
    fn first_event_has_no_prev_hash() {
        let new = NewAuditEvent::new(
            OrgId::new("org-1").unwrap(),
            "payment_received",
            ChainKey::new("payment", "p-1").unwrap(),
            serde_json::json!({"amountCents": 100}),
        );
        let event = AuditEvent::seal(new, None, Timestamp::now()).unwrap();
        let entry = TrailEntry::from(event.clone());
        assert!(entry.prev_hash_hex.is_none());
        assert_eq!(entry.hash_hex, event.hash.to_hex());
        assert_eq!(entry.hash_hex.len(), 64);
    }
}
