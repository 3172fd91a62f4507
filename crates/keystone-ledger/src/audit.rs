//! # Audit Ledger — Per-Entity Hash Chains
//!
//! Every mutation of ledger-relevant state appends an audit event inside the
//! transaction that performs the mutation. Events are grouped into chains by
//! `(entity_type, entity_id)` within an organization:
//!
//! - the first event of a chain has `prev_hash = None`;
//! - every later event's `prev_hash` is the preceding event's `hash`;
//! - `hash = SHA256(prev_hex + ":" + canonical_payload)`.
//!
//! Verification is a pure function of stored rows ([`verify_events`]). It
//! reports the first offending event and never repairs anything.
//!
//! Immutability is enforced below the application: the write role holds
//! INSERT only on `audit_log` (see the migrations of `keystone-api`).

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use keystone_core::{
    canonicalize, chain_digest, hex_or_null, AuditPayload, CanonicalizationError, ChainKey,
    ContentDigest, OrgId, Timestamp,
};

use crate::error::LedgerError;
use crate::store::{LedgerStore, LedgerTx};

/// An audit event as requested by a business operation.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAuditEvent {
    pub org_id: OrgId,
    pub actor_id: Option<String>,
    pub action: String,
    pub chain: ChainKey,
    pub metadata: Value,
}

impl NewAuditEvent {
    pub fn new(org_id: OrgId, action: impl Into<String>, chain: ChainKey, metadata: Value) -> Self {
        Self {
            org_id,
            actor_id: None,
            action: action.into(),
            chain,
            metadata,
        }
    }

    pub fn with_actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }
}

/// A sealed, stored audit event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub org_id: OrgId,
    pub actor_id: Option<String>,
    pub action: String,
    pub chain: ChainKey,
    pub metadata: Value,
    pub prev_hash: Option<ContentDigest>,
    pub hash: ContentDigest,
    pub created_at: Timestamp,
}

impl AuditEvent {
    /// Seal a new event onto a chain whose head hash is `prev`.
    pub fn seal(
        new: NewAuditEvent,
        prev: Option<ContentDigest>,
        created_at: Timestamp,
    ) -> Result<Self, CanonicalizationError> {
        let payload = canonicalize(&AuditPayload {
            org_id: &new.org_id,
            actor_id: new.actor_id.as_deref(),
            action: &new.action,
            chain: &new.chain,
            metadata: &new.metadata,
            created_at,
        })?;
        let hash = chain_digest(prev.as_ref(), &payload);
        Ok(Self {
            id: Uuid::new_v4(),
            org_id: new.org_id,
            actor_id: new.actor_id,
            action: new.action,
            chain: new.chain,
            metadata: new.metadata,
            prev_hash: prev,
            hash,
            created_at,
        })
    }

    /// Recompute this event's hash from its stored fields and stored `prev_hash`.
    pub fn recompute_hash(&self) -> Result<ContentDigest, CanonicalizationError> {
        let payload = canonicalize(&AuditPayload {
            org_id: &self.org_id,
            actor_id: self.actor_id.as_deref(),
            action: &self.action,
            chain: &self.chain,
            metadata: &self.metadata,
            created_at: self.created_at,
        })?;
        Ok(chain_digest(self.prev_hash.as_ref(), &payload))
    }
}

// ── Verification ─────────────────────────────────────────────────────

/// Why verification stopped at an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityFault {
    /// The first event of a chain carries a non-null `prev_hash`.
    UnexpectedPrevHash,
    /// `prev_hash` differs from the preceding event's `hash`.
    BrokenLink,
    /// The recomputed hash differs from the stored one.
    HashMismatch,
    /// The stored payload can no longer be canonicalized.
    UnhashablePayload,
}

impl IntegrityFault {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnexpectedPrevHash => "unexpected_prev_hash",
            Self::BrokenLink => "broken_link",
            Self::HashMismatch => "hash_mismatch",
            Self::UnhashablePayload => "unhashable_payload",
        }
    }
}

/// The first event that failed verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BadEvent {
    pub id: Uuid,
    pub entity: String,
    pub entity_id: String,
    /// Lowercase hex, or the literal `"null"`.
    pub expected_hash: String,
    /// Lowercase hex, or the literal `"null"`.
    pub actual_hash: String,
    pub reason: IntegrityFault,
}

/// Outcome of verifying every chain of an organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainVerification {
    pub valid: bool,
    pub total_events: usize,
    pub first_bad_event: Option<BadEvent>,
}

/// Verify a set of events belonging to one organization.
///
/// Events are walked in `(entity_type, entity_id, created_at, id)` order
/// regardless of the input order.
pub fn verify_events(events: &[AuditEvent]) -> ChainVerification {
    let mut ordered: Vec<&AuditEvent> = events.iter().collect();
    ordered.sort_by(|a, b| {
        (&a.chain, a.created_at, a.id).cmp(&(&b.chain, b.created_at, b.id))
    });

    let mut prior: Option<&AuditEvent> = None;
    for event in ordered {
        let predecessor = prior.filter(|p| p.chain == event.chain);
        if let Some(bad) = check_event(event, predecessor) {
            return ChainVerification {
                valid: false,
                total_events: events.len(),
                first_bad_event: Some(bad),
            };
        }
        prior = Some(event);
    }

    ChainVerification {
        valid: true,
        total_events: events.len(),
        first_bad_event: None,
    }
}

fn check_event(event: &AuditEvent, predecessor: Option<&AuditEvent>) -> Option<BadEvent> {
    let bad = |expected: String, actual: String, reason| BadEvent {
        id: event.id,
        entity: event.chain.entity_type.clone(),
        entity_id: event.chain.entity_id.clone(),
        expected_hash: expected,
        actual_hash: actual,
        reason,
    };

    match predecessor {
        None if event.prev_hash.is_some() => {
            return Some(bad(
                "null".to_string(),
                hex_or_null(event.prev_hash.as_ref()),
                IntegrityFault::UnexpectedPrevHash,
            ));
        }
        Some(p) if event.prev_hash != Some(p.hash) => {
            return Some(bad(
                p.hash.to_hex(),
                hex_or_null(event.prev_hash.as_ref()),
                IntegrityFault::BrokenLink,
            ));
        }
        _ => {}
    }

    match event.recompute_hash() {
        Ok(expected) if expected == event.hash => None,
        Ok(expected) => Some(bad(
            expected.to_hex(),
            event.hash.to_hex(),
            IntegrityFault::HashMismatch,
        )),
        Err(e) => Some(bad(
            format!("unhashable: {e}"),
            event.hash.to_hex(),
            IntegrityFault::UnhashablePayload,
        )),
    }
}

// ── Service ──────────────────────────────────────────────────────────

/// Append, verify, and read audit chains.
#[derive(Clone)]
pub struct AuditLedger {
    store: Arc<dyn LedgerStore>,
}

impl AuditLedger {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Append an event inside the caller's transaction.
    ///
    /// Reads (and locks) the chain head, seals the event onto it, and
    /// inserts exactly one row. If the caller's transaction rolls back, so
    /// does the event.
    pub async fn append(
        &self,
        tx: &mut dyn LedgerTx,
        event: NewAuditEvent,
    ) -> Result<Uuid, LedgerError> {
        append(tx, event).await
    }

    /// Verify every chain of an organization.
    pub async fn verify_chain(&self, org: &OrgId) -> Result<ChainVerification, LedgerError> {
        let events = self.store.audit_events(org).await?;
        let verification = verify_events(&events);
        match &verification.first_bad_event {
            Some(bad) => tracing::warn!(
                org_id = %org,
                event_id = %bad.id,
                entity = %bad.entity,
                entity_id = %bad.entity_id,
                reason = ?bad.reason,
                "audit chain verification failed"
            ),
            None => tracing::debug!(
                org_id = %org,
                total_events = verification.total_events,
                "audit chains verified"
            ),
        }
        Ok(verification)
    }

    /// Events of one chain in chronological order.
    pub async fn trail(&self, org: &OrgId, chain: &ChainKey) -> Result<Vec<AuditEvent>, LedgerError> {
        Ok(self.store.audit_trail(org, chain).await?)
    }
}

/// Append an event to its chain within `tx`.
pub async fn append(tx: &mut dyn LedgerTx, event: NewAuditEvent) -> Result<Uuid, LedgerError> {
    let head = tx.chain_head(&event.org_id, &event.chain).await?;
    let created_at = match head {
        Some(h) => Timestamp::now().not_before(h.created_at),
        None => Timestamp::now(),
    };
    let sealed = AuditEvent::seal(event, head.map(|h| h.hash), created_at)?;
    tx.insert_audit_event(&sealed).await?;
    tracing::debug!(
        audit_id = %sealed.id,
        action = %sealed.action,
        chain = %sealed.chain,
        "audit event appended"
    );
    Ok(sealed.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn org() -> OrgId {
        OrgId::new("org-1").unwrap()
    }

    /// Build a valid chain of `n` events on one key, one second apart.
    fn chain_of(n: usize, key: &ChainKey) -> Vec<AuditEvent> {
        let base = Timestamp::parse("2024-01-01T00:00:00Z").unwrap();
        let mut out: Vec<AuditEvent> = Vec::new();
        for i in 0..n {
            let ts = Timestamp::from_utc(
                *base.as_datetime() + chrono::Duration::seconds(i as i64),
            );
            let prev = out.last().map(|e| e.hash);
            let ev = AuditEvent::seal(
                NewAuditEvent::new(org(), "allocation_created", key.clone(), json!({"n": i})),
                prev,
                ts,
            )
            .unwrap();
            out.push(ev);
        }
        out
    }

    #[test]
    fn empty_set_is_valid() {
        let v = verify_events(&[]);
        assert!(v.valid);
        assert_eq!(v.total_events, 0);
    }

    #[test]
    fn intact_chain_verifies() {
        let key = ChainKey::new("charge", "c-1").unwrap();
        let events = chain_of(6, &key);
        let v = verify_events(&events);
        assert!(v.valid, "{v:?}");
        assert_eq!(v.total_events, 6);
    }

    #[test]
    fn independent_chains_each_start_at_null() {
        let mut events = chain_of(3, &ChainKey::new("charge", "a").unwrap());
        events.extend(chain_of(2, &ChainKey::new("payment", "b").unwrap()));
        events.reverse();
        let v = verify_events(&events);
        assert!(v.valid);
        assert_eq!(v.total_events, 5);
    }

    #[test]
    fn tampered_metadata_flags_that_event() {
        let key = ChainKey::new("charge", "c-1").unwrap();
        let mut events = chain_of(4, &key);
        events[2].metadata = json!({"n": 999});
        let v = verify_events(&events);
        assert!(!v.valid);
        let bad = v.first_bad_event.unwrap();
        assert_eq!(bad.id, events[2].id);
        assert_eq!(bad.reason, IntegrityFault::HashMismatch);
        assert_eq!(bad.reason.as_str(), "hash_mismatch");
        assert_eq!(bad.actual_hash, events[2].hash.to_hex());
    }

    #[test]
    fn tampered_hash_flags_that_event_not_its_successor() {
        let key = ChainKey::new("charge", "c-1").unwrap();
        let mut events = chain_of(4, &key);
        events[1].hash = keystone_core::sha256(b"forged");
        let v = verify_events(&events);
        let bad = v.first_bad_event.unwrap();
        assert_eq!(bad.id, events[1].id);
        assert_eq!(bad.reason, IntegrityFault::HashMismatch);
        assert_eq!(bad.actual_hash, keystone_core::sha256(b"forged").to_hex());
    }

    #[test]
    fn non_null_prev_on_first_event_is_flagged() {
        let key = ChainKey::new("payment", "p-1").unwrap();
        let mut events = chain_of(2, &key);
        events[0].prev_hash = Some(keystone_core::sha256(b"phantom"));
        let v = verify_events(&events);
        let bad = v.first_bad_event.unwrap();
        assert_eq!(bad.id, events[0].id);
        assert_eq!(bad.expected_hash, "null");
        assert_eq!(bad.reason, IntegrityFault::UnexpectedPrevHash);
    }

    #[test]
    fn relinked_event_reports_broken_link() {
        let key = ChainKey::new("payment", "p-1").unwrap();
        let mut events = chain_of(3, &key);
        events[2].prev_hash = None;
        let v = verify_events(&events);
        let bad = v.first_bad_event.unwrap();
        assert_eq!(bad.id, events[2].id);
        assert_eq!(bad.reason, IntegrityFault::BrokenLink);
        assert_eq!(bad.expected_hash, events[1].hash.to_hex());
        assert_eq!(bad.actual_hash, "null");
    }

    #[test]
    fn float_injected_into_metadata_is_unhashable() {
        let key = ChainKey::new("charge", "c-1").unwrap();
        let mut events = chain_of(1, &key);
        events[0].metadata = json!({"amount": 10.5});
        let bad = verify_events(&events).first_bad_event.unwrap();
        assert_eq!(bad.reason, IntegrityFault::UnhashablePayload);
    }
}
