//! Idempotent webhook ingestion with dead-letter retry.
//!
//! ```text
//! receive(body, sig)
//!   ├─ signature check ─ fail ─▶ Signature error (nothing stored)
//!   ├─ parse envelope ── fail ─▶ Envelope error (nothing stored)
//!   └─ tx: claim (provider, event_id)
//!          ├─ already claimed ─▶ Duplicate
//!          └─ dispatch by type ─ ok ──▶ close open dead letter ─▶ commit ─▶ Processed
//!                               └ err ─▶ rollback ─▶ record failure ─▶ Processing error
//! ```
//!
//! Claim and handler share one transaction, so a failed event leaves no
//! envelope behind and a redelivery runs the handler again.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use keystone_core::{Cents, Timestamp};

use crate::allocation::{AllocationOutcome, PaymentAllocator};
use crate::error::{LedgerError, StoreError};
use crate::model::{FailureReport, Payment, RetryRecord, WebhookEnvelope, WebhookFailure};
use crate::store::{LedgerStore, LedgerTx};
use crate::tenant::TenantDataProvider;

use super::envelope::{self, EnvelopeError, ParsedEvent, ProviderEvent, PAYMENT_INTENT_SUCCEEDED};
use super::signature::{SignatureError, SignatureVerifier};

/// Attempts per delivery when the store reports a transaction conflict.
pub const MAX_TX_ATTEMPTS: u32 = 3;

/// How incoming signatures are treated.
#[derive(Debug, Clone)]
pub enum SignaturePolicy {
    Verify(SignatureVerifier),
    /// Accept bodies without checking signatures. Test deployments only.
    AllowUnsigned,
    /// No secret and no explicit opt-in: every delivery is rejected.
    RejectAll,
}

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Provider name stored with every envelope and failure.
    pub provider: String,
    pub signatures: SignaturePolicy,
}

#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("invalid signature: {0}")]
    Signature(#[from] SignatureError),

    #[error("invalid envelope: {0}")]
    Envelope(#[from] EnvelopeError),

    /// The handler failed and the event was dead-lettered.
    #[error("webhook processing failed: {message}")]
    Processing { failure_id: Uuid, message: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl WebhookError {
    /// Rejected before deduplication; the sender must fix the request.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Signature(_) | Self::Envelope(_))
    }
}

/// Result of a delivery that did not fail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReceiveOutcome {
    Processed {
        event_id: String,
        event_type: String,
        /// Present when the event triggered allocation.
        allocation: Option<AllocationOutcome>,
    },
    Duplicate { event_id: String },
}

impl ReceiveOutcome {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate { .. })
    }
}

/// Result of an explicit retry.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome {
    NotFound,
    AlreadyResolved(WebhookFailure),
    Succeeded(WebhookFailure),
    Failed(WebhookFailure),
}

impl RetryOutcome {
    pub fn success(&self) -> bool {
        matches!(self, Self::AlreadyResolved(_) | Self::Succeeded(_))
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::NotFound => "Webhook failure not found",
            Self::AlreadyResolved(_) => "Webhook already processed",
            Self::Succeeded(_) => "Webhook retried successfully",
            Self::Failed(_) => "Webhook retry failed",
        }
    }

    pub fn failure(&self) -> Option<&WebhookFailure> {
        match self {
            Self::NotFound => None,
            Self::AlreadyResolved(f) | Self::Succeeded(f) | Self::Failed(f) => Some(f),
        }
    }
}

/// What a committed dispatch did.
#[derive(Debug)]
enum Dispatch {
    Duplicate,
    Ignored,
    Allocated(AllocationOutcome),
}

/// Receives provider events and routes them to ledger handlers.
pub struct WebhookIngestor {
    store: Arc<dyn LedgerStore>,
    tenants: Arc<dyn TenantDataProvider>,
    allocator: PaymentAllocator,
    config: WebhookConfig,
}

impl WebhookIngestor {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        tenants: Arc<dyn TenantDataProvider>,
        config: WebhookConfig,
    ) -> Self {
        Self {
            store,
            tenants,
            allocator: PaymentAllocator::new(),
            config,
        }
    }

    pub fn provider(&self) -> &str {
        &self.config.provider
    }

    /// Handle one delivery of a raw provider body.
    pub async fn receive(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<ReceiveOutcome, WebhookError> {
        match &self.config.signatures {
            SignaturePolicy::Verify(verifier) => {
                let header = signature.ok_or(SignatureError::Missing)?;
                verifier.verify(body, header)?;
            }
            SignaturePolicy::AllowUnsigned => {
                tracing::warn!(provider = %self.config.provider, "accepting webhook without signature check");
            }
            SignaturePolicy::RejectAll => return Err(SignatureError::NotConfigured.into()),
        }

        let ParsedEvent { event, raw } = envelope::parse(body)?;
        let envelope = WebhookEnvelope {
            provider: self.config.provider.clone(),
            event_id: event.id.clone(),
            received_at: Timestamp::now(),
            raw_payload: raw,
        };

        match self.process(&event, &envelope).await {
            Ok(Dispatch::Duplicate) => {
                tracing::info!(
                    provider = %envelope.provider,
                    event_id = %envelope.event_id,
                    "duplicate webhook ignored"
                );
                Ok(ReceiveOutcome::Duplicate { event_id: event.id })
            }
            Ok(dispatch) => Ok(ReceiveOutcome::Processed {
                event_id: event.id,
                event_type: event.event_type,
                allocation: match dispatch {
                    Dispatch::Allocated(outcome) => Some(outcome),
                    _ => None,
                },
            }),
            Err(err) => {
                let failure = self
                    .store
                    .record_failure(&FailureReport {
                        provider: envelope.provider.clone(),
                        event_id: envelope.event_id.clone(),
                        payload: envelope.raw_payload.clone(),
                        error_message: err.to_string(),
                        error_stack: Some(format!("{err:?}")),
                        at: Timestamp::now(),
                    })
                    .await
                    .map_err(|store_err| {
                        tracing::error!(
                            provider = %envelope.provider,
                            event_id = %envelope.event_id,
                            error = %err,
                            store_error = %store_err,
                            "webhook failed and could not be dead-lettered"
                        );
                        store_err
                    })?;
                tracing::error!(
                    provider = %failure.provider,
                    event_id = %failure.event_id,
                    failure_id = %failure.id,
                    retry_count = failure.retry_count,
                    error = %err,
                    "webhook dead-lettered"
                );
                Err(WebhookError::Processing {
                    failure_id: failure.id,
                    message: failure.error_message,
                })
            }
        }
    }

    /// Re-run a dead-lettered event through the same claim and dispatch path.
    ///
    /// The stored payload was authenticated on first receipt and is not
    /// re-checked. Resolved failures are never re-executed.
    pub async fn retry(&self, failure_id: Uuid) -> Result<RetryOutcome, WebhookError> {
        let Some(failure) = self.store.webhook_failure(failure_id).await? else {
            return Ok(RetryOutcome::NotFound);
        };
        if failure.resolved_at.is_some() {
            return Ok(RetryOutcome::AlreadyResolved(failure));
        }

        let result = match envelope::parse_value(failure.payload.clone()) {
            Ok(ParsedEvent { event, raw }) => {
                let envelope = WebhookEnvelope {
                    provider: failure.provider.clone(),
                    event_id: event.id.clone(),
                    received_at: Timestamp::now(),
                    raw_payload: raw,
                };
                self.process(&event, &envelope).await
            }
            Err(e) => Err(LedgerError::MalformedEvent(e.to_string())),
        };

        let at = Timestamp::now();
        match result {
            Ok(_) => {
                let failure = self
                    .store
                    .record_retry(failure_id, &RetryRecord::Succeeded { at })
                    .await?;
                tracing::info!(
                    failure_id = %failure.id,
                    event_id = %failure.event_id,
                    retry_count = failure.retry_count,
                    "dead-lettered webhook resolved"
                );
                Ok(RetryOutcome::Succeeded(failure))
            }
            Err(err) => {
                let failure = self
                    .store
                    .record_retry(
                        failure_id,
                        &RetryRecord::Failed {
                            at,
                            error_message: err.to_string(),
                            error_stack: Some(format!("{err:?}")),
                        },
                    )
                    .await?;
                tracing::warn!(
                    failure_id = %failure.id,
                    event_id = %failure.event_id,
                    retry_count = failure.retry_count,
                    error = %err,
                    "webhook retry failed"
                );
                Ok(RetryOutcome::Failed(failure))
            }
        }
    }

    /// Unresolved failures, newest first.
    pub async fn failures(&self, limit: usize) -> Result<Vec<WebhookFailure>, WebhookError> {
        Ok(self.store.unresolved_failures(limit).await?)
    }

    /// Run claim + dispatch, retrying the transaction on conflicts.
    async fn process(
        &self,
        event: &ProviderEvent,
        envelope: &WebhookEnvelope,
    ) -> Result<Dispatch, LedgerError> {
        let mut attempt = 1;
        loop {
            match self.process_once(event, envelope).await {
                Err(err) if err.is_conflict() && attempt < MAX_TX_ATTEMPTS => {
                    tracing::warn!(
                        event_id = %envelope.event_id,
                        attempt,
                        error = %err,
                        "transaction conflict; retrying"
                    );
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn process_once(
        &self,
        event: &ProviderEvent,
        envelope: &WebhookEnvelope,
    ) -> Result<Dispatch, LedgerError> {
        let mut tx = self.store.begin().await?;
        match self.claim_and_dispatch(tx.as_mut(), event, envelope).await {
            Ok(Dispatch::Duplicate) => {
                tx.rollback().await?;
                Ok(Dispatch::Duplicate)
            }
            Ok(dispatch) => {
                tx.commit().await?;
                Ok(dispatch)
            }
            Err(err) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!(error = %rollback, "rollback after handler failure failed");
                }
                Err(err)
            }
        }
    }

    async fn claim_and_dispatch(
        &self,
        tx: &mut dyn LedgerTx,
        event: &ProviderEvent,
        envelope: &WebhookEnvelope,
    ) -> Result<Dispatch, LedgerError> {
        if !tx.claim_envelope(envelope).await? {
            return Ok(Dispatch::Duplicate);
        }
        let dispatch = match event.event_type.as_str() {
            PAYMENT_INTENT_SUCCEEDED => {
                let outcome = self.on_payment_intent_succeeded(tx, event).await?;
                Dispatch::Allocated(outcome)
            }
            other => {
                tracing::debug!(
                    event_id = %event.id,
                    event_type = other,
                    "no handler for event type; acknowledged"
                );
                Dispatch::Ignored
            }
        };
        // A redelivery that succeeds closes the event's dead letter.
        if tx
            .resolve_failure(&envelope.provider, &envelope.event_id, Timestamp::now())
            .await?
        {
            tracing::info!(
                provider = %envelope.provider,
                event_id = %envelope.event_id,
                "dead-lettered webhook resolved by redelivery"
            );
        }
        Ok(dispatch)
    }

    async fn on_payment_intent_succeeded(
        &self,
        tx: &mut dyn LedgerTx,
        event: &ProviderEvent,
    ) -> Result<AllocationOutcome, LedgerError> {
        let object = &event.data.object;
        let tenant_key = object
            .metadata_str("tenantId")
            .ok_or_else(|| LedgerError::MalformedEvent("metadata.tenantId missing".into()))?;
        let tenant_id = Uuid::parse_str(tenant_key).map_err(|_| {
            LedgerError::MalformedEvent(format!("metadata.tenantId {tenant_key:?} is not a UUID"))
        })?;
        let tenant = self
            .tenants
            .resolve_tenant(tenant_id)
            .await?
            .ok_or_else(|| LedgerError::UnknownTenant(tenant_id.to_string()))?;

        let cents = object
            .received_cents()
            .ok_or_else(|| LedgerError::MalformedEvent("amount missing".into()))?;
        let amount = Cents::new(cents)?;

        let candidate = Payment::pending(tenant.org_id, tenant.tenant_id, &object.id, amount);
        let payment = tx.upsert_payment(&candidate).await?;
        if payment.tenant_id != candidate.tenant_id || payment.amount != candidate.amount {
            return Err(LedgerError::Inconsistent(format!(
                "payment {} already registered with different tenant or amount",
                object.id
            )));
        }

        self.allocator.on_payment_succeeded(tx, &payment, None).await
    }
}
