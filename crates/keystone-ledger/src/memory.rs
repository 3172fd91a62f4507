//! # In-Memory Ledger Store
//!
//! Fixture implementation of [`LedgerStore`] for tests and
//! `DATA_SOURCE=fixture` deployments. Each store is an explicitly
//! constructed value; nothing is process-global.
//!
//! Transactions are fully serialized: [`LedgerStore::begin`] takes an owned
//! guard on the whole state and works on a copy, which is written back only
//! by [`LedgerTx::commit`]. Dropping a transaction discards its writes. This
//! satisfies every locking requirement of the storage ports trivially.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use keystone_core::{ChainKey, OrgId, Timestamp};

use crate::audit::AuditEvent;
use crate::error::StoreError;
use crate::model::{
    Allocation, Charge, ChargeStatus, FailureReport, OutstandingCharge, Payment, PaymentStatus,
    RetryRecord, WebhookEnvelope, WebhookFailure,
};
use crate::store::{ChainHead, LedgerStore, LedgerTx};

#[derive(Debug, Clone, Default)]
struct State {
    audit: Vec<AuditEvent>,
    envelopes: HashMap<(String, String), WebhookEnvelope>,
    failures: Vec<WebhookFailure>,
    charges: HashMap<Uuid, Charge>,
    payments: HashMap<Uuid, Payment>,
    allocations: Vec<Allocation>,
}

/// Serialized, copy-on-begin ledger store.
#[derive(Debug, Clone, Default)]
pub struct MemoryLedgerStore {
    state: Arc<Mutex<State>>,
    injected_conflicts: Arc<AtomicU32>,
    dead_letters_unavailable: Arc<AtomicBool>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Fixture helpers ──────────────────────────────────────────────

    pub async fn seed_charge(&self, charge: Charge) {
        self.state.lock().await.charges.insert(charge.id, charge);
    }

    pub async fn seed_payment(&self, payment: Payment) {
        self.state.lock().await.payments.insert(payment.id, payment);
    }

    pub async fn charge(&self, id: Uuid) -> Option<Charge> {
        self.state.lock().await.charges.get(&id).cloned()
    }

    pub async fn payments(&self) -> Vec<Payment> {
        self.state.lock().await.payments.values().cloned().collect()
    }

    pub async fn allocations(&self) -> Vec<Allocation> {
        self.state.lock().await.allocations.clone()
    }

    pub async fn envelope_count(&self) -> usize {
        self.state.lock().await.envelopes.len()
    }

    /// Make the next `n` commits fail with [`StoreError::Conflict`].
    pub fn inject_conflicts(&self, n: u32) {
        self.injected_conflicts.store(n, Ordering::SeqCst);
    }

    /// Make [`LedgerStore::record_failure`] fail with [`StoreError::Backend`].
    pub fn set_dead_letters_unavailable(&self, unavailable: bool) {
        self.dead_letters_unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Operator correction of a dead-lettered payload ahead of a retry.
    pub async fn replace_failure_payload(&self, id: Uuid, payload: Value) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let failure = state
            .failures
            .iter_mut()
            .find(|f| f.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("webhook failure {id}")))?;
        failure.payload = payload;
        Ok(())
    }

    /// Rewrite a stored audit event in place, bypassing append-only rules.
    pub async fn tamper_audit_event<F>(&self, id: Uuid, edit: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut AuditEvent),
    {
        let mut state = self.state.lock().await;
        let event = state
            .audit
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("audit event {id}")))?;
        edit(event);
        Ok(())
    }

    fn take_injected_conflict(&self) -> bool {
        self.injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

fn chain_order(a: &AuditEvent, b: &AuditEvent) -> std::cmp::Ordering {
    (&a.chain, a.created_at, a.id).cmp(&(&b.chain, b.created_at, b.id))
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>, StoreError> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTx {
            guard,
            working,
            store: self.clone(),
        }))
    }

    async fn audit_events(&self, org: &OrgId) -> Result<Vec<AuditEvent>, StoreError> {
        let state = self.state.lock().await;
        let mut events: Vec<AuditEvent> = state
            .audit
            .iter()
            .filter(|e| &e.org_id == org)
            .cloned()
            .collect();
        events.sort_by(chain_order);
        Ok(events)
    }

    async fn audit_trail(
        &self,
        org: &OrgId,
        chain: &ChainKey,
    ) -> Result<Vec<AuditEvent>, StoreError> {
        let state = self.state.lock().await;
        let mut events: Vec<AuditEvent> = state
            .audit
            .iter()
            .filter(|e| &e.org_id == org && &e.chain == chain)
            .cloned()
            .collect();
        events.sort_by(chain_order);
        Ok(events)
    }

    async fn webhook_failure(&self, id: Uuid) -> Result<Option<WebhookFailure>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.failures.iter().find(|f| f.id == id).cloned())
    }

    async fn unresolved_failures(&self, limit: usize) -> Result<Vec<WebhookFailure>, StoreError> {
        let state = self.state.lock().await;
        let mut open: Vec<WebhookFailure> = state
            .failures
            .iter()
            .filter(|f| f.resolved_at.is_none())
            .cloned()
            .collect();
        open.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        open.truncate(limit);
        Ok(open)
    }

    async fn record_failure(&self, report: &FailureReport) -> Result<WebhookFailure, StoreError> {
        if self.dead_letters_unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("dead-letter table unavailable".into()));
        }
        let mut state = self.state.lock().await;
        if let Some(existing) = state
            .failures
            .iter_mut()
            .find(|f| f.provider == report.provider && f.event_id == report.event_id)
        {
            existing.retry_count += 1;
            existing.last_retry_at = Some(report.at);
            existing.error_message = report.error_message.clone();
            existing.error_stack = report.error_stack.clone();
            return Ok(existing.clone());
        }

        let failure = WebhookFailure {
            id: Uuid::new_v4(),
            provider: report.provider.clone(),
            event_id: report.event_id.clone(),
            payload: report.payload.clone(),
            error_message: report.error_message.clone(),
            error_stack: report.error_stack.clone(),
            retry_count: 0,
            last_retry_at: None,
            resolved_at: None,
            created_at: report.at,
        };
        state.failures.push(failure.clone());
        Ok(failure)
    }

    async fn record_retry(
        &self,
        id: Uuid,
        record: &RetryRecord,
    ) -> Result<WebhookFailure, StoreError> {
        let mut state = self.state.lock().await;
        let failure = state
            .failures
            .iter_mut()
            .find(|f| f.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("webhook failure {id}")))?;
        failure.retry_count += 1;
        match record {
            RetryRecord::Succeeded { at } => {
                failure.last_retry_at = Some(*at);
                failure.resolved_at = Some(*at);
            }
            RetryRecord::Failed {
                at,
                error_message,
                error_stack,
            } => {
                failure.last_retry_at = Some(*at);
                failure.error_message = error_message.clone();
                failure.error_stack = error_stack.clone();
            }
        }
        Ok(failure.clone())
    }
}

/// A transaction over [`MemoryLedgerStore`].
pub struct MemoryTx {
    guard: OwnedMutexGuard<State>,
    working: State,
    store: MemoryLedgerStore,
}

#[async_trait]
impl LedgerTx for MemoryTx {
    async fn chain_head(
        &mut self,
        org: &OrgId,
        chain: &ChainKey,
    ) -> Result<Option<ChainHead>, StoreError> {
        Ok(self
            .working
            .audit
            .iter()
            .filter(|e| &e.org_id == org && &e.chain == chain)
            .max_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)))
            .map(|e| ChainHead {
                hash: e.hash,
                created_at: e.created_at,
            }))
    }

    async fn insert_audit_event(&mut self, event: &AuditEvent) -> Result<(), StoreError> {
        if self.working.audit.iter().any(|e| e.id == event.id) {
            return Err(StoreError::Backend(format!("duplicate audit id {}", event.id)));
        }
        self.working.audit.push(event.clone());
        Ok(())
    }

    async fn claim_envelope(&mut self, envelope: &WebhookEnvelope) -> Result<bool, StoreError> {
        let key = (envelope.provider.clone(), envelope.event_id.clone());
        if self.working.envelopes.contains_key(&key) {
            return Ok(false);
        }
        self.working.envelopes.insert(key, envelope.clone());
        Ok(true)
    }

    async fn resolve_failure(
        &mut self,
        provider: &str,
        event_id: &str,
        at: Timestamp,
    ) -> Result<bool, StoreError> {
        match self.working.failures.iter_mut().find(|f| {
            f.provider == provider && f.event_id == event_id && f.resolved_at.is_none()
        }) {
            Some(failure) => {
                failure.resolved_at = Some(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn upsert_payment(&mut self, candidate: &Payment) -> Result<Payment, StoreError> {
        if let Some(existing) = self.working.payments.values().find(|p| {
            p.org_id == candidate.org_id && p.provider_payment_id == candidate.provider_payment_id
        }) {
            return Ok(existing.clone());
        }
        self.working
            .payments
            .insert(candidate.id, candidate.clone());
        Ok(candidate.clone())
    }

    async fn mark_payment_succeeded(
        &mut self,
        payment_id: Uuid,
        received_at: Timestamp,
    ) -> Result<bool, StoreError> {
        let payment = self
            .working
            .payments
            .get_mut(&payment_id)
            .ok_or_else(|| StoreError::NotFound(format!("payment {payment_id}")))?;
        if payment.status != PaymentStatus::Pending {
            return Ok(false);
        }
        payment.status = PaymentStatus::Succeeded;
        payment.received_at = Some(received_at);
        Ok(true)
    }

    async fn lock_outstanding_charges(
        &mut self,
        org: &OrgId,
        tenant_id: Uuid,
    ) -> Result<Vec<OutstandingCharge>, StoreError> {
        let mut outstanding = Vec::new();
        for charge in self.working.charges.values() {
            if &charge.org_id != org
                || charge.tenant_id != tenant_id
                || !charge.status.is_outstanding()
            {
                continue;
            }
            let allocated = keystone_core::Cents::checked_sum(
                self.working
                    .allocations
                    .iter()
                    .filter(|a| a.charge_id == charge.id)
                    .map(|a| a.amount),
            )
            .map_err(|e| StoreError::Corrupt(format!("charge {}: {e}", charge.id)))?;
            outstanding.push(OutstandingCharge {
                charge: charge.clone(),
                allocated,
            });
        }
        outstanding.sort_by(|a, b| {
            (a.charge.due_date, a.charge.created_at, a.charge.id).cmp(&(
                b.charge.due_date,
                b.charge.created_at,
                b.charge.id,
            ))
        });
        Ok(outstanding)
    }

    async fn insert_allocation(&mut self, allocation: &Allocation) -> Result<(), StoreError> {
        if !self.working.charges.contains_key(&allocation.charge_id) {
            return Err(StoreError::NotFound(format!("charge {}", allocation.charge_id)));
        }
        self.working.allocations.push(allocation.clone());
        Ok(())
    }

    async fn update_charge_status(
        &mut self,
        charge_id: Uuid,
        status: ChargeStatus,
    ) -> Result<(), StoreError> {
        let charge = self
            .working
            .charges
            .get_mut(&charge_id)
            .ok_or_else(|| StoreError::NotFound(format!("charge {charge_id}")))?;
        charge.status = status;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTx {
            mut guard,
            working,
            store,
        } = *self;
        if store.take_injected_conflict() {
            return Err(StoreError::Conflict("injected serialization failure".into()));
        }
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}
