//! # Tenant Resolution
//!
//! External payment events name a tenant, not an organization. The ingestor
//! asks a [`TenantDataProvider`] which organization owns that tenant before
//! touching any ledger state. Implementations are chosen by configuration:
//! `keystone-api` ships a Postgres directory, and [`FixtureTenantDirectory`]
//! serves tests and fixture deployments.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use keystone_core::OrgId;

use crate::error::LedgerError;

/// A tenant and the organization it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantRef {
    pub org_id: OrgId,
    pub tenant_id: Uuid,
}

/// Looks up the owning organization of a tenant.
#[async_trait]
pub trait TenantDataProvider: Send + Sync {
    /// `Ok(None)` when the tenant is unknown.
    async fn resolve_tenant(&self, tenant_id: Uuid) -> Result<Option<TenantRef>, LedgerError>;
}

/// In-memory tenant directory.
#[derive(Debug, Default)]
pub struct FixtureTenantDirectory {
    tenants: RwLock<HashMap<Uuid, OrgId>>,
}

impl FixtureTenantDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style registration.
    pub fn with_tenant(self, tenant_id: Uuid, org_id: OrgId) -> Self {
        self.insert(tenant_id, org_id);
        self
    }

    pub fn insert(&self, tenant_id: Uuid, org_id: OrgId) {
        self.tenants.write().insert(tenant_id, org_id);
    }

    pub fn len(&self) -> usize {
        self.tenants.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tenants.read().is_empty()
    }
}

#[async_trait]
impl TenantDataProvider for FixtureTenantDirectory {
    async fn resolve_tenant(&self, tenant_id: Uuid) -> Result<Option<TenantRef>, LedgerError> {
        Ok(self.tenants.read().get(&tenant_id).map(|org_id| TenantRef {
            org_id: org_id.clone(),
            tenant_id,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_registered_tenant_only() {
        let known = Uuid::new_v4();
        let dir = FixtureTenantDirectory::new().with_tenant(known, OrgId::new("org-a").unwrap());

        let found = dir.resolve_tenant(known).await.unwrap().unwrap();
        assert_eq!(found.org_id.as_str(), "org-a");
        assert_eq!(found.tenant_id, known);

        assert!(dir.resolve_tenant(Uuid::new_v4()).await.unwrap().is_none());
        assert_eq!(dir.len(), 1);
    }
}
