//! # Storage Ports
//!
//! The ledger is written against two traits:
//!
//! - [`LedgerStore`]: a pooled store. Opens transactions and serves
//!   read-only queries and the dead-letter bookkeeping, each of which runs
//!   in its own short transaction.
//! - [`LedgerTx`]: one open transaction. Every business mutation and the
//!   audit events documenting it go through the same `LedgerTx`, so they
//!   commit or roll back together.
//!
//! Dropping a `LedgerTx` without calling [`LedgerTx::commit`] rolls it back.
//!
//! ## Locking contract
//!
//! Implementations must make the following reads exclusive for the rest of
//! the transaction:
//!
//! - [`LedgerTx::chain_head`] locks the chain it reads, so two transactions
//!   can never append to the same chain from the same head.
//! - [`LedgerTx::lock_outstanding_charges`] locks the returned charge rows,
//!   so two payments for one tenant allocate one after the other.
//! - [`LedgerTx::mark_payment_succeeded`] is a compare-and-set on the
//!   payment status.
//! - [`LedgerTx::claim_envelope`] blocks on a concurrent uncommitted claim of
//!   the same `(provider, event_id)` and then reports the conflict.

use async_trait::async_trait;
use uuid::Uuid;

use keystone_core::{ChainKey, ContentDigest, OrgId, Timestamp};

use crate::audit::AuditEvent;
use crate::error::StoreError;
use crate::model::{
    Allocation, ChargeStatus, FailureReport, OutstandingCharge, Payment, RetryRecord,
    WebhookEnvelope, WebhookFailure,
};

/// The latest event of a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainHead {
    pub hash: ContentDigest,
    pub created_at: Timestamp,
}

/// A pooled, transactional ledger store.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Open a transaction.
    async fn begin(&self) -> Result<Box<dyn LedgerTx>, StoreError>;

    /// All audit events of an organization, ordered by
    /// `(entity_type, entity_id, created_at, id)`.
    async fn audit_events(&self, org: &OrgId) -> Result<Vec<AuditEvent>, StoreError>;

    /// Events of one chain in chronological `(created_at, id)` order.
    async fn audit_trail(&self, org: &OrgId, chain: &ChainKey)
        -> Result<Vec<AuditEvent>, StoreError>;

    async fn webhook_failure(&self, id: Uuid) -> Result<Option<WebhookFailure>, StoreError>;

    /// Unresolved failures, newest first.
    async fn unresolved_failures(&self, limit: usize) -> Result<Vec<WebhookFailure>, StoreError>;

    /// Insert or bump the failure row for `(provider, event_id)`.
    async fn record_failure(&self, report: &FailureReport) -> Result<WebhookFailure, StoreError>;

    /// Record the result of an explicit retry: increments `retry_count`,
    /// sets `last_retry_at`, and either sets `resolved_at` or refreshes the
    /// error fields.
    async fn record_retry(&self, id: Uuid, record: &RetryRecord)
        -> Result<WebhookFailure, StoreError>;
}

/// One open ledger transaction.
#[async_trait]
pub trait LedgerTx: Send {
    /// Lock the chain and return its latest event, if any.
    async fn chain_head(
        &mut self,
        org: &OrgId,
        chain: &ChainKey,
    ) -> Result<Option<ChainHead>, StoreError>;

    async fn insert_audit_event(&mut self, event: &AuditEvent) -> Result<(), StoreError>;

    /// Store the envelope unless `(provider, event_id)` already exists.
    /// Returns `false` for a duplicate.
    async fn claim_envelope(&mut self, envelope: &WebhookEnvelope) -> Result<bool, StoreError>;

    /// Mark the open failure of `(provider, event_id)`, if any, as resolved.
    /// Returns whether a failure was resolved.
    async fn resolve_failure(
        &mut self,
        provider: &str,
        event_id: &str,
        at: Timestamp,
    ) -> Result<bool, StoreError>;

    /// Insert `candidate` unless a payment with the same
    /// `(org_id, provider_payment_id)` exists; return the stored payment.
    async fn upsert_payment(&mut self, candidate: &Payment) -> Result<Payment, StoreError>;

    /// Atomically move a payment from `pending` to `succeeded`.
    /// Returns `false` if it was not pending.
    async fn mark_payment_succeeded(
        &mut self,
        payment_id: Uuid,
        received_at: Timestamp,
    ) -> Result<bool, StoreError>;

    /// Lock and return the tenant's `unpaid`/`partially_paid` charges,
    /// oldest first by `(due_date, created_at, id)`.
    async fn lock_outstanding_charges(
        &mut self,
        org: &OrgId,
        tenant_id: Uuid,
    ) -> Result<Vec<OutstandingCharge>, StoreError>;

    async fn insert_allocation(&mut self, allocation: &Allocation) -> Result<(), StoreError>;

    async fn update_charge_status(
        &mut self,
        charge_id: Uuid,
        status: ChargeStatus,
    ) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
