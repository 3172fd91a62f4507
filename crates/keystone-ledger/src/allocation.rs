//! # Payment Allocation — Oldest-First Waterfall
//!
//! A succeeded payment is applied to the tenant's outstanding charges in
//! `(due_date, created_at, id)` order until funds run out:
//!
//! ```text
//! for charge in oldest_first(outstanding):
//!     take = min(payment_remaining, charge_remaining)
//!     allocate(take); payment_remaining -= take
//! ```
//!
//! [`plan_waterfall`] is the pure planning step. [`PaymentAllocator`] runs it
//! against locked charge rows inside one transaction and writes the
//! allocations, status changes, and audit events.
//!
//! ## Invariants
//!
//! - Every allocated amount is `> 0` and `<=` both the charge's and the
//!   payment's remaining balance at the time it is taken.
//! - `Σ allocations(charge) <= charge.amount` and
//!   `Σ allocations(payment) <= payment.amount`.
//! - Funds left after every charge is satisfied stay unallocated.

use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use keystone_core::{Cents, ChainKey, MoneyError, Timestamp};

use crate::audit::{self, NewAuditEvent};
use crate::error::LedgerError;
use crate::model::{Allocation, ChargeStatus, OutstandingCharge, Payment};
use crate::store::LedgerTx;

/// Audit action recorded on a charge's chain for each allocation.
pub const ALLOCATION_CREATED: &str = "allocation_created";
/// Audit action recorded on a payment's chain once it has been applied.
pub const PAYMENT_RECEIVED: &str = "payment_received";

/// One planned allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationLine {
    pub charge_id: Uuid,
    pub amount: Cents,
    /// Balance left on the charge after this allocation.
    pub charge_remaining: Cents,
    pub charge_status: ChargeStatus,
}

/// Result of planning a payment against a set of charges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationPlan {
    pub lines: Vec<AllocationLine>,
    pub allocated: Cents,
    pub unallocated: Cents,
}

/// Plan an oldest-first allocation of `amount` across `charges`.
///
/// Charges are sorted by `(due_date, created_at, id)` before planning, so the
/// result does not depend on input order. Settled charges and charges with
/// nothing left to pay are skipped.
pub fn plan_waterfall(
    amount: Cents,
    charges: &[OutstandingCharge],
) -> Result<AllocationPlan, MoneyError> {
    let mut ordered: Vec<&OutstandingCharge> = charges.iter().collect();
    ordered.sort_by(|a, b| {
        (a.charge.due_date, a.charge.created_at, a.charge.id).cmp(&(
            b.charge.due_date,
            b.charge.created_at,
            b.charge.id,
        ))
    });

    let mut remaining = amount;
    let mut lines = Vec::new();
    for outstanding in ordered {
        if remaining.is_zero() {
            break;
        }
        if !outstanding.charge.status.is_outstanding() {
            continue;
        }
        let owed = outstanding.remaining()?;
        if owed.is_zero() {
            continue;
        }
        let take = remaining.min(owed);
        remaining = remaining.checked_sub(take)?;
        let charge_remaining = owed.checked_sub(take)?;
        lines.push(AllocationLine {
            charge_id: outstanding.charge.id,
            amount: take,
            charge_remaining,
            charge_status: if charge_remaining.is_zero() {
                ChargeStatus::Paid
            } else {
                ChargeStatus::PartiallyPaid
            },
        });
    }

    Ok(AllocationPlan {
        allocated: amount.checked_sub(remaining)?,
        unallocated: remaining,
        lines,
    })
}

/// What `on_payment_succeeded` did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AllocationOutcome {
    /// The payment transitioned to `succeeded` and was allocated.
    Applied {
        payment_id: Uuid,
        allocations: Vec<Allocation>,
        allocated: Cents,
        remaining_unallocated: Cents,
    },
    /// The payment had already succeeded; nothing was written.
    AlreadySucceeded { payment_id: Uuid },
}

/// Applies succeeded payments to outstanding charges.
#[derive(Debug, Clone, Default)]
pub struct PaymentAllocator;

impl PaymentAllocator {
    pub fn new() -> Self {
        Self
    }

    /// Transition `payment` to `succeeded` and allocate it, all within `tx`.
    ///
    /// Returns [`AllocationOutcome::AlreadySucceeded`] without writing
    /// anything if the payment was not pending. Any error leaves the
    /// transaction to be rolled back by the caller; no partial allocation
    /// can commit.
    pub async fn on_payment_succeeded(
        &self,
        tx: &mut dyn LedgerTx,
        payment: &Payment,
        actor_id: Option<&str>,
    ) -> Result<AllocationOutcome, LedgerError> {
        let received_at = Timestamp::now();
        if !tx.mark_payment_succeeded(payment.id, received_at).await? {
            tracing::info!(
                payment_id = %payment.id,
                "payment already succeeded; allocation skipped"
            );
            return Ok(AllocationOutcome::AlreadySucceeded {
                payment_id: payment.id,
            });
        }

        let charges = tx
            .lock_outstanding_charges(&payment.org_id, payment.tenant_id)
            .await?;
        let plan = plan_waterfall(payment.amount, &charges)?;

        let mut allocations = Vec::with_capacity(plan.lines.len());
        for line in &plan.lines {
            let allocation = Allocation {
                id: Uuid::new_v4(),
                org_id: payment.org_id.clone(),
                payment_id: payment.id,
                charge_id: line.charge_id,
                amount: line.amount,
                created_at: received_at,
            };
            tx.insert_allocation(&allocation).await?;
            tx.update_charge_status(line.charge_id, line.charge_status)
                .await?;

            let mut event = NewAuditEvent::new(
                payment.org_id.clone(),
                ALLOCATION_CREATED,
                ChainKey::new("charge", line.charge_id.to_string())?,
                json!({
                    "paymentId": payment.id.to_string(),
                    "allocationId": allocation.id.to_string(),
                    "amountCents": line.amount.get(),
                    "chargeRemainingCents": line.charge_remaining.get(),
                    "chargeStatus": line.charge_status.as_str(),
                }),
            );
            if let Some(actor) = actor_id {
                event = event.with_actor(actor);
            }
            audit::append(tx, event).await?;
            allocations.push(allocation);
        }

        if !plan.unallocated.is_zero() {
            tracing::info!(
                payment_id = %payment.id,
                tenant_id = %payment.tenant_id,
                unallocated_cents = plan.unallocated.get(),
                "payment exceeds outstanding charges; remainder left unallocated"
            );
        }

        let mut event = NewAuditEvent::new(
            payment.org_id.clone(),
            PAYMENT_RECEIVED,
            ChainKey::new("payment", payment.id.to_string())?,
            json!({
                "providerPaymentId": payment.provider_payment_id,
                "amountCents": payment.amount.get(),
                "allocatedCents": plan.allocated.get(),
                "unallocatedCents": plan.unallocated.get(),
                "allocationCount": plan.lines.len(),
            }),
        );
        if let Some(actor) = actor_id {
            event = event.with_actor(actor);
        }
        audit::append(tx, event).await?;

        tracing::info!(
            payment_id = %payment.id,
            org_id = %payment.org_id,
            allocations = allocations.len(),
            allocated_cents = plan.allocated.get(),
            "payment allocated"
        );

        Ok(AllocationOutcome::Applied {
            payment_id: payment.id,
            allocations,
            allocated: plan.allocated,
            remaining_unallocated: plan.unallocated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use keystone_core::OrgId;
    use proptest::prelude::*;

    use crate::model::Charge;

    fn cents(c: i64) -> Cents {
        Cents::new(c).unwrap()
    }

    fn charge(due: (i32, u32, u32), amount: i64, allocated: i64) -> OutstandingCharge {
        OutstandingCharge {
            charge: Charge {
                id: Uuid::new_v4(),
                org_id: OrgId::new("org-1").unwrap(),
                tenant_id: Uuid::nil(),
                amount: cents(amount),
                due_date: NaiveDate::from_ymd_opt(due.0, due.1, due.2).unwrap(),
                status: if allocated == 0 {
                    ChargeStatus::Unpaid
                } else {
                    ChargeStatus::PartiallyPaid
                },
                created_at: Timestamp::parse("2023-12-01T00:00:00Z").unwrap(),
            },
            allocated: cents(allocated),
        }
    }

    #[test]
    fn oldest_charge_is_paid_first() {
        let a = charge((2024, 1, 1), 5000, 0);
        let b = charge((2024, 2, 1), 12000, 0);
        // Input order reversed: planning sorts by due date.
        let plan = plan_waterfall(cents(7500), &[b.clone(), a.clone()]).unwrap();
        assert_eq!(plan.lines.len(), 2);
        assert_eq!(plan.lines[0].charge_id, a.charge.id);
        assert_eq!(plan.lines[0].amount, cents(5000));
        assert_eq!(plan.lines[0].charge_status, ChargeStatus::Paid);
        assert_eq!(plan.lines[1].charge_id, b.charge.id);
        assert_eq!(plan.lines[1].amount, cents(2500));
        assert_eq!(plan.lines[1].charge_status, ChargeStatus::PartiallyPaid);
        assert_eq!(plan.lines[1].charge_remaining, cents(9500));
        assert_eq!(plan.unallocated, Cents::ZERO);
        assert_eq!(plan.allocated, cents(7500));
    }

    #[test]
    fn partially_paid_charge_only_takes_its_remainder() {
        let a = charge((2024, 1, 1), 5000, 4000);
        let plan = plan_waterfall(cents(3000), &[a]).unwrap();
        assert_eq!(plan.lines[0].amount, cents(1000));
        assert_eq!(plan.unallocated, cents(2000));
    }

    #[test]
    fn surplus_stays_unallocated() {
        let plan = plan_waterfall(cents(900), &[]).unwrap();
        assert!(plan.lines.is_empty());
        assert_eq!(plan.unallocated, cents(900));
    }

    #[test]
    fn zero_payment_allocates_nothing() {
        let plan = plan_waterfall(Cents::ZERO, &[charge((2024, 1, 1), 100, 0)]).unwrap();
        assert!(plan.lines.is_empty());
    }

    #[test]
    fn same_due_date_breaks_tie_on_created_at() {
        let mut early = charge((2024, 3, 1), 100, 0);
        let mut late = charge((2024, 3, 1), 100, 0);
        early.charge.created_at = Timestamp::parse("2024-01-01T00:00:00Z").unwrap();
        late.charge.created_at = Timestamp::parse("2024-01-02T00:00:00Z").unwrap();
        let plan = plan_waterfall(cents(100), &[late, early.clone()]).unwrap();
        assert_eq!(plan.lines.len(), 1);
        assert_eq!(plan.lines[0].charge_id, early.charge.id);
    }

    #[test]
    fn over_allocated_charge_is_an_error_not_a_negative() {
        let corrupt = charge((2024, 1, 1), 100, 150);
        assert!(plan_waterfall(cents(50), &[corrupt]).is_err());
    }

    proptest! {
        #[test]
        fn plan_never_overdraws_payment_or_charges(
            payment in 0i64..100_000,
            specs in proptest::collection::vec((1i64..20_000, 0i64..100, 1u32..28), 0..12),
        ) {
            let charges: Vec<OutstandingCharge> = specs
                .iter()
                .map(|(amount, pct, day)| {
                    let allocated = amount * pct / 100;
                    let mut c = charge((2024, 1, *day), *amount, allocated);
                    if allocated == *amount {
                        c.charge.status = ChargeStatus::Paid;
                    }
                    c
                })
                .collect();
            let plan = plan_waterfall(cents(payment), &charges).unwrap();

            let total: i64 = plan.lines.iter().map(|l| l.amount.get()).sum();
            prop_assert_eq!(total, plan.allocated.get());
            prop_assert_eq!(total + plan.unallocated.get(), payment);

            for line in &plan.lines {
                prop_assert!(line.amount.get() > 0);
                let c = charges.iter().find(|c| c.charge.id == line.charge_id).unwrap();
                prop_assert!(c.allocated.get() + line.amount.get() <= c.charge.amount.get());
            }

            // Funds remain only if every charge is settled.
            if !plan.unallocated.is_zero() {
                let owed: i64 = charges
                    .iter()
                    .filter(|c| c.charge.status.is_outstanding())
                    .map(|c| c.charge.amount.get() - c.allocated.get())
                    .sum();
                prop_assert_eq!(total, owed);
            }
        }
    }
}
