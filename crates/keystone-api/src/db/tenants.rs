//! Tenant directory backed by the `tenants` table.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use keystone_core::OrgId;
use keystone_ledger::{LedgerError, StoreError, TenantDataProvider, TenantRef};

use super::store_error;

#[derive(Debug, Clone)]
pub struct PgTenantDirectory {
    pool: PgPool,
}

impl PgTenantDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TenantDataProvider for PgTenantDirectory {
    async fn resolve_tenant(&self, tenant_id: Uuid) -> Result<Option<TenantRef>, LedgerError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT org_id FROM tenants WHERE id = $1")
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_error)?;

        let Some((org_id,)) = row else {
            return Ok(None);
        };
        let org_id = OrgId::new(org_id)
            .map_err(|e| StoreError::Corrupt(format!("tenant {tenant_id}: {e}")))?;
        Ok(Some(TenantRef { org_id, tenant_id }))
    }
}
