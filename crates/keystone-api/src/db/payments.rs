//! Charges, payments, and allocations.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

use keystone_core::{Cents, OrgId, Timestamp};
use keystone_ledger::{
    Allocation, Charge, ChargeStatus, OutstandingCharge, Payment, PaymentStatus, StoreError,
};

use super::store_error;

#[derive(sqlx::FromRow)]
pub struct ChargeRow {
    pub id: Uuid,
    pub org_id: String,
    pub tenant_id: Uuid,
    pub amount_cents: i64,
    pub due_date: NaiveDate,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<ChargeRow> for Charge {
    type Error = StoreError;

    fn try_from(row: ChargeRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            org_id: OrgId::new(row.org_id)
                .map_err(|e| StoreError::Corrupt(format!("charge {}: {e}", row.id)))?,
            tenant_id: row.tenant_id,
            amount: Cents::new(row.amount_cents)
                .map_err(|e| StoreError::Corrupt(format!("charge {}: {e}", row.id)))?,
            due_date: row.due_date,
            status: ChargeStatus::parse(&row.status)?,
            created_at: Timestamp::from_utc(row.created_at),
        })
    }
}

#[derive(sqlx::FromRow)]
pub struct PaymentRow {
    pub id: Uuid,
    pub org_id: String,
    pub tenant_id: Uuid,
    pub provider_payment_id: String,
    pub amount_cents: i64,
    pub status: String,
    pub received_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = StoreError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            org_id: OrgId::new(row.org_id)
                .map_err(|e| StoreError::Corrupt(format!("payment {}: {e}", row.id)))?,
            tenant_id: row.tenant_id,
            provider_payment_id: row.provider_payment_id,
            amount: Cents::new(row.amount_cents)
                .map_err(|e| StoreError::Corrupt(format!("payment {}: {e}", row.id)))?,
            status: PaymentStatus::parse(&row.status)?,
            received_at: row.received_at.map(Timestamp::from_utc),
            created_at: Timestamp::from_utc(row.created_at),
        })
    }
}

/// Insert the candidate unless `(org_id, provider_payment_id)` exists, then
/// return whichever row is stored.
pub async fn upsert_payment(
    conn: &mut PgConnection,
    candidate: &Payment,
) -> Result<Payment, StoreError> {
    sqlx::query(
        "INSERT INTO payments (id, org_id, tenant_id, provider_payment_id, amount_cents,
         status, received_at, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
         ON CONFLICT (org_id, provider_payment_id) DO NOTHING",
    )
    .bind(candidate.id)
    .bind(candidate.org_id.as_str())
    .bind(candidate.tenant_id)
    .bind(&candidate.provider_payment_id)
    .bind(candidate.amount.get())
    .bind(candidate.status.as_str())
    .bind(candidate.received_at.map(|t| *t.as_datetime()))
    .bind(*candidate.created_at.as_datetime())
    .execute(&mut *conn)
    .await
    .map_err(store_error)?;

    let row = sqlx::query_as::<_, PaymentRow>(
        "SELECT id, org_id, tenant_id, provider_payment_id, amount_cents, status,
                received_at, created_at
         FROM payments
         WHERE org_id = $1 AND provider_payment_id = $2",
    )
    .bind(candidate.org_id.as_str())
    .bind(&candidate.provider_payment_id)
    .fetch_one(&mut *conn)
    .await
    .map_err(store_error)?;
    row.try_into()
}

/// Compare-and-set `pending → succeeded`.
pub async fn mark_succeeded(
    conn: &mut PgConnection,
    payment_id: Uuid,
    received_at: Timestamp,
) -> Result<bool, StoreError> {
    let result = sqlx::query(
        "UPDATE payments SET status = 'succeeded', received_at = $2
         WHERE id = $1 AND status = 'pending'",
    )
    .bind(payment_id)
    .bind(*received_at.as_datetime())
    .execute(conn)
    .await
    .map_err(store_error)?;
    Ok(result.rows_affected() == 1)
}

/// Lock the tenant's outstanding charges, oldest first, and attach the sum
/// of what is already allocated to each.
pub async fn lock_outstanding_charges(
    conn: &mut PgConnection,
    org: &OrgId,
    tenant_id: Uuid,
) -> Result<Vec<OutstandingCharge>, StoreError> {
    let rows = sqlx::query_as::<_, ChargeRow>(
        "SELECT id, org_id, tenant_id, amount_cents, due_date, status, created_at
         FROM charges
         WHERE org_id = $1 AND tenant_id = $2 AND status IN ('unpaid', 'partially_paid')
         ORDER BY due_date, created_at, id
         FOR UPDATE",
    )
    .bind(org.as_str())
    .bind(tenant_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(store_error)?;

    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
    let sums: Vec<(Uuid, i64)> = sqlx::query_as(
        "SELECT charge_id, SUM(amount_cents)::BIGINT
         FROM allocations
         WHERE charge_id = ANY($1)
         GROUP BY charge_id",
    )
    .bind(&ids[..])
    .fetch_all(&mut *conn)
    .await
    .map_err(store_error)?;
    let sums: HashMap<Uuid, i64> = sums.into_iter().collect();

    rows.into_iter()
        .map(|row| -> Result<OutstandingCharge, StoreError> {
            let sum = sums.get(&row.id).copied().unwrap_or(0);
            let allocated = Cents::new(sum)
                .map_err(|e| StoreError::Corrupt(format!("allocations of {}: {e}", row.id)))?;
            Ok(OutstandingCharge {
                charge: row.try_into()?,
                allocated,
            })
        })
        .collect()
}

pub async fn insert_allocation(
    conn: &mut PgConnection,
    allocation: &Allocation,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO allocations (id, org_id, payment_id, charge_id, amount_cents, created_at)
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(allocation.id)
    .bind(allocation.org_id.as_str())
    .bind(allocation.payment_id)
    .bind(allocation.charge_id)
    .bind(allocation.amount.get())
    .bind(*allocation.created_at.as_datetime())
    .execute(conn)
    .await
    .map_err(store_error)?;
    Ok(())
}

pub async fn update_charge_status(
    conn: &mut PgConnection,
    charge_id: Uuid,
    status: ChargeStatus,
) -> Result<(), StoreError> {
    let result = sqlx::query("UPDATE charges SET status = $2 WHERE id = $1")
        .bind(charge_id)
        .bind(status.as_str())
        .execute(conn)
        .await
        .map_err(store_error)?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound(format!("charge {charge_id}")));
    }
    Ok(())
}
