//! Webhook envelopes and the dead-letter table.

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use keystone_core::Timestamp;
use keystone_ledger::model::{FailureReport, RetryRecord};
use keystone_ledger::{StoreError, WebhookEnvelope, WebhookFailure};

use super::store_error;

const FAILURE_COLUMNS: &str = "id, provider, event_id, payload, error_message, error_stack, \
     retry_count, last_retry_at, resolved_at, created_at";

/// Database row for `webhook_failures`.
#[derive(sqlx::FromRow)]
pub struct FailureRow {
    pub id: Uuid,
    pub provider: String,
    pub event_id: String,
    pub payload: serde_json::Value,
    pub error_message: String,
    pub error_stack: Option<String>,
    pub retry_count: i32,
    pub last_retry_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<FailureRow> for WebhookFailure {
    fn from(row: FailureRow) -> Self {
        Self {
            id: row.id,
            provider: row.provider,
            event_id: row.event_id,
            payload: row.payload,
            error_message: row.error_message,
            error_stack: row.error_stack,
            retry_count: row.retry_count,
            last_retry_at: row.last_retry_at.map(Timestamp::from_utc),
            resolved_at: row.resolved_at.map(Timestamp::from_utc),
            created_at: Timestamp::from_utc(row.created_at),
        }
    }
}

/// Insert the envelope unless `(provider, event_id)` is already stored.
///
/// A concurrent uncommitted insert of the same key blocks here until that
/// transaction finishes, then reports a duplicate.
pub async fn claim_envelope(
    conn: &mut PgConnection,
    envelope: &WebhookEnvelope,
) -> Result<bool, StoreError> {
    let claimed: Option<(String,)> = sqlx::query_as(
        "INSERT INTO webhook_events (provider, event_id, received_at, payload)
         VALUES ($1, $2, $3, $4)
         ON CONFLICT (provider, event_id) DO NOTHING
         RETURNING event_id",
    )
    .bind(&envelope.provider)
    .bind(&envelope.event_id)
    .bind(*envelope.received_at.as_datetime())
    .bind(&envelope.raw_payload)
    .fetch_optional(conn)
    .await
    .map_err(store_error)?;
    Ok(claimed.is_some())
}

/// Close the open failure of an event that has now been handled.
pub async fn resolve_failure(
    conn: &mut PgConnection,
    provider: &str,
    event_id: &str,
    at: Timestamp,
) -> Result<bool, StoreError> {
    let result = sqlx::query(
        "UPDATE webhook_failures SET resolved_at = $3
         WHERE provider = $1 AND event_id = $2 AND resolved_at IS NULL",
    )
    .bind(provider)
    .bind(event_id)
    .bind(*at.as_datetime())
    .execute(conn)
    .await
    .map_err(store_error)?;
    Ok(result.rows_affected() > 0)
}

pub async fn failure_by_id(pool: &PgPool, id: Uuid) -> Result<Option<WebhookFailure>, StoreError> {
    let row = sqlx::query_as::<_, FailureRow>(&format!(
        "SELECT {FAILURE_COLUMNS} FROM webhook_failures WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
    .map_err(store_error)?;
    Ok(row.map(WebhookFailure::from))
}

/// Unresolved failures, newest first.
pub async fn unresolved(pool: &PgPool, limit: usize) -> Result<Vec<WebhookFailure>, StoreError> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let rows = sqlx::query_as::<_, FailureRow>(&format!(
        "SELECT {FAILURE_COLUMNS} FROM webhook_failures
         WHERE resolved_at IS NULL
         ORDER BY created_at DESC, id DESC
         LIMIT $1"
    ))
    .bind(limit)
    .fetch_all(pool)
    .await
    .map_err(store_error)?;
    Ok(rows.into_iter().map(WebhookFailure::from).collect())
}

/// Insert the first failure of an event, or bump the existing row.
pub async fn record_failure(
    pool: &PgPool,
    report: &FailureReport,
) -> Result<WebhookFailure, StoreError> {
    let row = sqlx::query_as::<_, FailureRow>(&format!(
        "INSERT INTO webhook_failures
             (id, provider, event_id, payload, error_message, error_stack, retry_count, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, 0, $7)
         ON CONFLICT (provider, event_id) DO UPDATE SET
             retry_count = webhook_failures.retry_count + 1,
             last_retry_at = EXCLUDED.created_at,
             error_message = EXCLUDED.error_message,
             error_stack = EXCLUDED.error_stack
         RETURNING {FAILURE_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(&report.provider)
    .bind(&report.event_id)
    .bind(&report.payload)
    .bind(&report.error_message)
    .bind(&report.error_stack)
    .bind(*report.at.as_datetime())
    .fetch_one(pool)
    .await
    .map_err(store_error)?;
    Ok(row.into())
}

pub async fn record_retry(
    pool: &PgPool,
    id: Uuid,
    record: &RetryRecord,
) -> Result<WebhookFailure, StoreError> {
    let query = match record {
        RetryRecord::Succeeded { at } => sqlx::query_as::<_, FailureRow>(&format!(
            "UPDATE webhook_failures SET
                 retry_count = retry_count + 1,
                 last_retry_at = $2,
                 resolved_at = $2
             WHERE id = $1
             RETURNING {FAILURE_COLUMNS}"
        ))
        .bind(id)
        .bind(*at.as_datetime())
        .fetch_optional(pool)
        .await,
        RetryRecord::Failed {
            at,
            error_message,
            error_stack,
        } => sqlx::query_as::<_, FailureRow>(&format!(
            "UPDATE webhook_failures SET
                 retry_count = retry_count + 1,
                 last_retry_at = $2,
                 error_message = $3,
                 error_stack = $4
             WHERE id = $1
             RETURNING {FAILURE_COLUMNS}"
        ))
        .bind(id)
        .bind(*at.as_datetime())
        .bind(error_message)
        .bind(error_stack)
        .fetch_optional(pool)
        .await,
    };

    query
        .map_err(store_error)?
        .map(WebhookFailure::from)
        .ok_or_else(|| StoreError::NotFound(format!("webhook failure {id}")))
}
