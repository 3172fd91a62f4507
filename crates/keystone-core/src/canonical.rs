//! # Canonical Audit Payload — Fixed Field Order
//!
//! This module defines `CanonicalBytes`, the sole construction path for bytes
//! that feed an audit chain hash.
//!
//! ## Layout
//!
//! The payload is a compact JSON object with its keys in exactly this order:
//!
//! ```text
//! {"orgId":…,"actorId":…,"action":…,"entityType":…,"entityId":…,"metadata":…,"createdAt":…}
//! ```
//!
//! - `actorId` is a string or `null`.
//! - `metadata` is emitted in RFC 8785 (JCS) form through `serde_jcs`:
//!   sorted keys, compact separators. JSONB storage reorders object keys, so
//!   metadata must not depend on insertion order.
//! - `createdAt` is `YYYY-MM-DDTHH:MM:SS.mmmZ` (see [`Timestamp`]).
//!
//! The field order is part of the hash format. Reordering it invalidates
//! every stored chain.
//!
//! ## Float rejection
//!
//! Metadata containing a non-integer number is rejected before
//! serialization. Money is integer cents everywhere; a float in metadata is
//! a bug upstream and must not be sealed into the ledger.

use serde_json::Value;

use crate::error::CanonicalizationError;
use crate::identity::{ChainKey, OrgId};
use crate::temporal::Timestamp;

/// Bytes produced exclusively by [`canonicalize`].
///
/// The inner buffer is private: any function that hashes a payload must
/// accept `&CanonicalBytes`, and the only way to produce one is through the
/// fixed-order encoder below.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalBytes(Vec<u8>);

impl CanonicalBytes {
    /// Access the canonical bytes for digest computation.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl AsRef<[u8]> for CanonicalBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// The hashed subset of an audit event.
#[derive(Debug, Clone, Copy)]
pub struct AuditPayload<'a> {
    pub org_id: &'a OrgId,
    pub actor_id: Option<&'a str>,
    pub action: &'a str,
    pub chain: &'a ChainKey,
    pub metadata: &'a Value,
    pub created_at: Timestamp,
}

/// Encode an audit payload in the fixed field order documented above.
pub fn canonicalize(payload: &AuditPayload<'_>) -> Result<CanonicalBytes, CanonicalizationError> {
    reject_floats(payload.metadata)?;

    let mut out = String::with_capacity(256);
    out.push('{');
    push_field(&mut out, "orgId", &serde_json::to_string(payload.org_id.as_str())?);
    out.push(',');
    let actor = match payload.actor_id {
        Some(actor) => serde_json::to_string(actor)?,
        None => "null".to_string(),
    };
    push_field(&mut out, "actorId", &actor);
    out.push(',');
    push_field(&mut out, "action", &serde_json::to_string(payload.action)?);
    out.push(',');
    push_field(
        &mut out,
        "entityType",
        &serde_json::to_string(&payload.chain.entity_type)?,
    );
    out.push(',');
    push_field(
        &mut out,
        "entityId",
        &serde_json::to_string(&payload.chain.entity_id)?,
    );
    out.push(',');
    push_field(&mut out, "metadata", &serde_jcs::to_string(payload.metadata)?);
    out.push(',');
    push_field(
        &mut out,
        "createdAt",
        &serde_json::to_string(&payload.created_at.to_rfc3339_millis())?,
    );
    out.push('}');

    Ok(CanonicalBytes(out.into_bytes()))
}

fn push_field(out: &mut String, key: &str, encoded_value: &str) {
    out.push('"');
    out.push_str(key);
    out.push_str("\":");
    out.push_str(encoded_value);
}

/// Recursively reject non-integer numbers.
fn reject_floats(value: &Value) -> Result<(), CanonicalizationError> {
    match value {
        Value::Null | Value::Bool(_) | Value::String(_) => Ok(()),
        Value::Number(n) => {
            if !n.is_i64() && !n.is_u64() {
                if let Some(f) = n.as_f64() {
                    return Err(CanonicalizationError::FloatRejected(f));
                }
            }
            Ok(())
        }
        Value::Array(items) => items.iter().try_for_each(reject_floats),
        Value::Object(map) => map.values().try_for_each(reject_floats),
    }
}
