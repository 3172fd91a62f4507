//! # Scope and Chain Identifiers
//!
//! `OrgId` is the isolation boundary every ledger row is scoped to. The
//! organization is supplied by the caller's tenant context and is trusted
//! here; construction only rejects values that could never be a real id.
//!
//! `ChainKey` names one hash chain inside an organization.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Maximum length accepted for any identifier component.
const MAX_ID_LEN: usize = 255;

/// Organization (tenant) identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OrgId(String);

impl OrgId {
    /// Wrap an organization id, rejecting empty or oversized values.
    pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() || trimmed.len() > MAX_ID_LEN {
            return Err(ValidationError::InvalidOrgId(id));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for OrgId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        OrgId::new(value)
    }
}

impl From<OrgId> for String {
    fn from(id: OrgId) -> String {
        id.0
    }
}

impl std::fmt::Display for OrgId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// `(entity_type, entity_id)` pair identifying one audit chain within an org.
///
/// Ordering is lexicographic on `(entity_type, entity_id)`, the same order
/// chain verification walks chains in.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChainKey {
    pub entity_type: String,
    pub entity_id: String,
}

impl ChainKey {
    pub fn new(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let entity_type = entity_type.into();
        let entity_id = entity_id.into();
        if entity_type.is_empty() || entity_type.len() > MAX_ID_LEN {
            return Err(ValidationError::InvalidChainKey(format!(
                "entity type {entity_type:?}"
            )));
        }
        if entity_id.is_empty() || entity_id.len() > MAX_ID_LEN {
            return Err(ValidationError::InvalidChainKey(format!(
                "entity id {entity_id:?}"
            )));
        }
        Ok(Self {
            entity_type,
            entity_id,
        })
    }
}

impl std::fmt::Display for ChainKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.entity_id)
    }
}
