//! # Ledger Records
//!
//! Charges, payments, allocations, and webhook bookkeeping rows. These are
//! the values the storage ports read and write; derived quantities
//! (a charge's allocated and remaining balance) are computed from
//! allocations and never stored.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use keystone_core::{Cents, MoneyError, OrgId, Timestamp};

use crate::error::StoreError;

// ── Charges ──────────────────────────────────────────────────────────

/// Settlement status of a charge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeStatus {
    Unpaid,
    PartiallyPaid,
    Paid,
}

impl ChargeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unpaid => "unpaid",
            Self::PartiallyPaid => "partially_paid",
            Self::Paid => "paid",
        }
    }

    /// Parse the stored column value.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "unpaid" => Ok(Self::Unpaid),
            "partially_paid" => Ok(Self::PartiallyPaid),
            "paid" => Ok(Self::Paid),
            other => Err(StoreError::Corrupt(format!("unknown charge status {other:?}"))),
        }
    }

    /// Whether the charge still accepts allocations.
    pub fn is_outstanding(&self) -> bool {
        !matches!(self, Self::Paid)
    }
}

impl std::fmt::Display for ChargeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An amount billed to a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Charge {
    pub id: Uuid,
    pub org_id: OrgId,
    pub tenant_id: Uuid,
    pub amount: Cents,
    pub due_date: NaiveDate,
    pub status: ChargeStatus,
    pub created_at: Timestamp,
}

/// A charge locked for allocation, with its allocated total computed from
/// existing allocations in the same transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutstandingCharge {
    pub charge: Charge,
    pub allocated: Cents,
}

impl OutstandingCharge {
    /// Cents still owed on the charge.
    pub fn remaining(&self) -> Result<Cents, MoneyError> {
        self.charge.amount.checked_sub(self.allocated)
    }
}

// ── Payments ─────────────────────────────────────────────────────────

/// Payment lifecycle. `Pending → Succeeded` happens exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Succeeded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Succeeded => "succeeded",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "pending" => Ok(Self::Pending),
            "succeeded" => Ok(Self::Succeeded),
            other => Err(StoreError::Corrupt(format!("unknown payment status {other:?}"))),
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Funds received (or about to be received) from a payment provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub org_id: OrgId,
    pub tenant_id: Uuid,
    pub provider_payment_id: String,
    pub amount: Cents,
    pub status: PaymentStatus,
    pub received_at: Option<Timestamp>,
    pub created_at: Timestamp,
}

impl Payment {
    /// A new pending payment.
    pub fn pending(
        org_id: OrgId,
        tenant_id: Uuid,
        provider_payment_id: impl Into<String>,
        amount: Cents,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            org_id,
            tenant_id,
            provider_payment_id: provider_payment_id.into(),
            amount,
            status: PaymentStatus::Pending,
            received_at: None,
            created_at: Timestamp::now(),
        }
    }
}

/// A slice of a payment applied to a charge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub id: Uuid,
    pub org_id: OrgId,
    pub payment_id: Uuid,
    pub charge_id: Uuid,
    pub amount: Cents,
    pub created_at: Timestamp,
}

// ── Webhooks ─────────────────────────────────────────────────────────

/// One distinct external event, stored exactly once per `(provider, event_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEnvelope {
    pub provider: String,
    pub event_id: String,
    pub received_at: Timestamp,
    pub raw_payload: Value,
}

/// Dead-letter record for an event whose handler failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookFailure {
    pub id: Uuid,
    pub provider: String,
    pub event_id: String,
    pub payload: Value,
    pub error_message: String,
    pub error_stack: Option<String>,
    pub retry_count: i32,
    pub last_retry_at: Option<Timestamp>,
    /// Set when a retry succeeds. Resolved failures are never re-executed.
    pub resolved_at: Option<Timestamp>,
    pub created_at: Timestamp,
}

/// Input for recording a handler failure.
///
/// The first failure of an event inserts a row with `retry_count = 0`;
/// every later failure of the same `(provider, event_id)` increments
/// `retry_count` and refreshes `last_retry_at` and the error fields.
#[derive(Debug, Clone, PartialEq)]
pub struct FailureReport {
    pub provider: String,
    pub event_id: String,
    pub payload: Value,
    pub error_message: String,
    pub error_stack: Option<String>,
    pub at: Timestamp,
}

/// Result of one explicit retry attempt, as recorded on the failure row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryRecord {
    Succeeded {
        at: Timestamp,
    },
    Failed {
        at: Timestamp,
        error_message: String,
        error_stack: Option<String>,
    },
}
