//! Audit log persistence.
//!
//! Hashes are stored as raw 32-byte `BYTEA`. Rows are only ever inserted;
//! the service role holds no UPDATE or DELETE grant on `audit_log`.

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use keystone_core::{ChainKey, ContentDigest, OrgId, Timestamp};
use keystone_ledger::store::ChainHead;
use keystone_ledger::{AuditEvent, StoreError};

use super::store_error;

const COLUMNS: &str =
    "id, org_id, entity, entity_id, action, actor_id, metadata, prev_hash, hash, created_at";

/// Database row for `audit_log`.
#[derive(sqlx::FromRow)]
pub struct AuditRow {
    pub id: Uuid,
    pub org_id: String,
    pub entity: String,
    pub entity_id: String,
    pub action: String,
    pub actor_id: Option<String>,
    pub metadata: serde_json::Value,
    pub prev_hash: Option<Vec<u8>>,
    pub hash: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<AuditRow> for AuditEvent {
    type Error = StoreError;

    fn try_from(row: AuditRow) -> Result<Self, Self::Error> {
        let corrupt = |e: keystone_core::ValidationError| {
            StoreError::Corrupt(format!("audit row {}: {e}", row.id))
        };
        let prev_hash = match &row.prev_hash {
            Some(bytes) => Some(ContentDigest::from_slice(bytes).map_err(corrupt)?),
            None => None,
        };
        Ok(AuditEvent {
            id: row.id,
            org_id: OrgId::new(row.org_id.clone()).map_err(corrupt)?,
            actor_id: row.actor_id.clone(),
            action: row.action.clone(),
            chain: ChainKey::new(row.entity.clone(), row.entity_id.clone()).map_err(corrupt)?,
            metadata: row.metadata.clone(),
            prev_hash,
            hash: ContentDigest::from_slice(&row.hash).map_err(corrupt)?,
            created_at: Timestamp::from_utc(row.created_at),
        })
    }
}

fn into_events(rows: Vec<AuditRow>) -> Result<Vec<AuditEvent>, StoreError> {
    rows.into_iter().map(AuditEvent::try_from).collect()
}

/// Serialize appends to one chain for the rest of the transaction.
pub async fn lock_chain(
    conn: &mut PgConnection,
    org: &OrgId,
    chain: &ChainKey,
) -> Result<(), StoreError> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
        .bind(format!("audit\u{1f}{org}\u{1f}{}\u{1f}{}", chain.entity_type, chain.entity_id))
        .execute(conn)
        .await
        .map_err(store_error)?;
    Ok(())
}

/// Latest event of a chain by `(created_at, id)`.
pub async fn chain_head(
    conn: &mut PgConnection,
    org: &OrgId,
    chain: &ChainKey,
) -> Result<Option<ChainHead>, StoreError> {
    let row: Option<(Vec<u8>, DateTime<Utc>)> = sqlx::query_as(
        "SELECT hash, created_at FROM audit_log
         WHERE org_id = $1 AND entity = $2 AND entity_id = $3
         ORDER BY created_at DESC, id DESC
         LIMIT 1",
    )
    .bind(org.as_str())
    .bind(&chain.entity_type)
    .bind(&chain.entity_id)
    .fetch_optional(conn)
    .await
    .map_err(store_error)?;

    let Some((hash, created_at)) = row else {
        return Ok(None);
    };
    let hash = ContentDigest::from_slice(&hash)
        .map_err(|e| StoreError::Corrupt(format!("chain head of {chain}: {e}")))?;
    Ok(Some(ChainHead {
        hash,
        created_at: Timestamp::from_utc(created_at),
    }))
}

pub async fn insert(conn: &mut PgConnection, event: &AuditEvent) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO audit_log (id, org_id, entity, entity_id, action, actor_id,
         metadata, prev_hash, hash, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
    )
    .bind(event.id)
    .bind(event.org_id.as_str())
    .bind(&event.chain.entity_type)
    .bind(&event.chain.entity_id)
    .bind(&event.action)
    .bind(&event.actor_id)
    .bind(&event.metadata)
    .bind(event.prev_hash.map(|h| h.as_bytes().to_vec()))
    .bind(event.hash.as_bytes().to_vec())
    .bind(*event.created_at.as_datetime())
    .execute(conn)
    .await
    .map_err(store_error)?;
    Ok(())
}

/// All events of an organization in chain order.
pub async fn events_for_org(pool: &PgPool, org: &OrgId) -> Result<Vec<AuditEvent>, StoreError> {
    let rows = sqlx::query_as::<_, AuditRow>(&format!(
        "SELECT {COLUMNS} FROM audit_log
         WHERE org_id = $1
         ORDER BY entity, entity_id, created_at, id"
    ))
    .bind(org.as_str())
    .fetch_all(pool)
    .await
    .map_err(store_error)?;
    into_events(rows)
}

/// Events of one chain in chronological order.
pub async fn events_for_chain(
    pool: &PgPool,
    org: &OrgId,
    chain: &ChainKey,
) -> Result<Vec<AuditEvent>, StoreError> {
    let rows = sqlx::query_as::<_, AuditRow>(&format!(
        "SELECT {COLUMNS} FROM audit_log
         WHERE org_id = $1 AND entity = $2 AND entity_id = $3
         ORDER BY created_at, id"
    ))
    .bind(org.as_str())
    .bind(&chain.entity_type)
    .bind(&chain.entity_id)
    .fetch_all(pool)
    .await
    .map_err(store_error)?;
    into_events(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> AuditRow {
        AuditRow {
            id: Uuid::new_v4(),
            org_id: "org-1".into(),
            entity: "charge".into(),
            entity_id: "c-1".into(),
            action: "allocation_created".into(),
            actor_id: None,
            metadata: serde_json::json!({"amountCents": 5}),
            prev_hash: None,
            hash: vec![7u8; 32],
            created_at: Utc::now(),
        }
    }

    #[test]
    fn row_decodes_into_event() {
        let event = AuditEvent::try_from(row()).unwrap();
        assert_eq!(event.chain.to_string(), "charge:c-1");
        assert!(event.prev_hash.is_none());
        assert_eq!(event.hash.as_bytes(), &[7u8; 32]);
    }

    #[test]
    fn short_hash_is_corrupt() {
        let mut bad = row();
        bad.hash = vec![1, 2, 3];
        assert!(matches!(
            AuditEvent::try_from(bad),
            Err(StoreError::Corrupt(_))
        ));
    }
}
