//! PostgreSQL implementation of the ledger storage ports.
//!
//! [`PgLedgerTx`] owns one `sqlx::Transaction`; every write the ledger makes
//! while handling a webhook goes through it. Dropping it without commit
//! rolls the transaction back.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use keystone_core::{ChainKey, OrgId, Timestamp};
use keystone_ledger::model::{FailureReport, RetryRecord};
use keystone_ledger::store::ChainHead;
use keystone_ledger::{
    Allocation, AuditEvent, ChargeStatus, LedgerStore, LedgerTx, OutstandingCharge, Payment,
    StoreError, WebhookEnvelope, WebhookFailure,
};

use super::{audit, payments, store_error, webhooks};

#[derive(Debug, Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>, StoreError> {
        let tx = self.pool.begin().await.map_err(store_error)?;
        Ok(Box::new(PgLedgerTx { tx }))
    }

    async fn audit_events(&self, org: &OrgId) -> Result<Vec<AuditEvent>, StoreError> {
        audit::events_for_org(&self.pool, org).await
    }

    async fn audit_trail(
        &self,
        org: &OrgId,
        chain: &ChainKey,
    ) -> Result<Vec<AuditEvent>, StoreError> {
        audit::events_for_chain(&self.pool, org, chain).await
    }

    async fn webhook_failure(&self, id: Uuid) -> Result<Option<WebhookFailure>, StoreError> {
        webhooks::failure_by_id(&self.pool, id).await
    }

    async fn unresolved_failures(&self, limit: usize) -> Result<Vec<WebhookFailure>, StoreError> {
        webhooks::unresolved(&self.pool, limit).await
    }

    async fn record_failure(&self, report: &FailureReport) -> Result<WebhookFailure, StoreError> {
        webhooks::record_failure(&self.pool, report).await
    }

    async fn record_retry(
        &self,
        id: Uuid,
        record: &RetryRecord,
    ) -> Result<WebhookFailure, StoreError> {
        webhooks::record_retry(&self.pool, id, record).await
    }
}

/// One open PostgreSQL transaction.
pub struct PgLedgerTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTx for PgLedgerTx {
    async fn chain_head(
        &mut self,
        org: &OrgId,
        chain: &ChainKey,
    ) -> Result<Option<ChainHead>, StoreError> {
        audit::lock_chain(&mut *self.tx, org, chain).await?;
        audit::chain_head(&mut *self.tx, org, chain).await
    }

    async fn insert_audit_event(&mut self, event: &AuditEvent) -> Result<(), StoreError> {
        audit::insert(&mut *self.tx, event).await
    }

    async fn claim_envelope(&mut self, envelope: &WebhookEnvelope) -> Result<bool, StoreError> {
        webhooks::claim_envelope(&mut *self.tx, envelope).await
    }

    async fn resolve_failure(
        &mut self,
        provider: &str,
        event_id: &str,
        at: Timestamp,
    ) -> Result<bool, StoreError> {
        webhooks::resolve_failure(&mut *self.tx, provider, event_id, at).await
    }

    async fn upsert_payment(&mut self, candidate: &Payment) -> Result<Payment, StoreError> {
        payments::upsert_payment(&mut *self.tx, candidate).await
    }

    async fn mark_payment_succeeded(
        &mut self,
        payment_id: Uuid,
        received_at: Timestamp,
    ) -> Result<bool, StoreError> {
        payments::mark_succeeded(&mut *self.tx, payment_id, received_at).await
    }

    async fn lock_outstanding_charges(
        &mut self,
        org: &OrgId,
        tenant_id: Uuid,
    ) -> Result<Vec<OutstandingCharge>, StoreError> {
        payments::lock_outstanding_charges(&mut *self.tx, org, tenant_id).await
    }

    async fn insert_allocation(&mut self, allocation: &Allocation) -> Result<(), StoreError> {
        payments::insert_allocation(&mut *self.tx, allocation).await
    }

    async fn update_charge_status(
        &mut self,
        charge_id: Uuid,
        status: ChargeStatus,
    ) -> Result<(), StoreError> {
        payments::update_charge_status(&mut *self.tx, charge_id, status).await
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(store_error)
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await.map_err(store_error)
    }
}
