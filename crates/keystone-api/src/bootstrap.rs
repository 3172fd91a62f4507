//! # Service Bootstrap
//!
//! Turns an [`AppConfig`] into a ready [`AppState`].
//!
//! ## Bootstrap Sequence
//!
//! 1. **Select data source.** `postgres` connects the pool and applies
//!    migrations; `fixture` builds an in-memory store.
//! 2. **Build the tenant directory** for the same data source.
//! 3. **Log the startup banner**, warning loudly when webhooks are accepted
//!    without signatures.
//!
//! Both the HTTP server and the operator CLI start here. With `postgres`
//! they share the database; a `fixture` store lives only inside the process
//! that built it.

use std::sync::Arc;

use keystone_ledger::{
    FixtureTenantDirectory, LedgerStore, MemoryLedgerStore, TenantDataProvider,
};

use crate::config::{AppConfig, ConfigError, DataSource};
use crate::db::{self, PgLedgerStore, PgTenantDirectory};
use crate::state::AppState;

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Connecting or applying migrations failed.
    #[error("database initialization failed: {0}")]
    Database(#[from] sqlx::Error),
}

/// Build application state for the configured data source.
pub async fn bootstrap(config: AppConfig) -> Result<AppState, BootstrapError> {
    config.validate()?;
    log_banner(&config);

    match config.data_source {
        DataSource::Postgres => {
            let url = config
                .database_url
                .clone()
                .ok_or(ConfigError::Missing("DATABASE_URL"))?;
            let pool = db::connect(&url).await?;
            let store: Arc<dyn LedgerStore> = Arc::new(PgLedgerStore::new(pool.clone()));
            let tenants: Arc<dyn TenantDataProvider> =
                Arc::new(PgTenantDirectory::new(pool.clone()));
            Ok(AppState::new(config, store, tenants).with_pool(pool))
        }
        DataSource::Fixture => {
            let (store, tenants) = fixture_backends(&config);
            tracing::warn!(
                tenants = tenants.len(),
                "running on the in-memory fixture store; ledger state is not durable"
            );
            Ok(AppState::new(config, Arc::new(store), Arc::new(tenants)))
        }
    }
}

/// In-memory store and a tenant directory seeded from `FIXTURE_TENANTS`.
pub fn fixture_backends(config: &AppConfig) -> (MemoryLedgerStore, FixtureTenantDirectory) {
    let tenants = FixtureTenantDirectory::new();
    for (tenant_id, org_id) in &config.fixture_tenants {
        tenants.insert(*tenant_id, org_id.clone());
    }
    (MemoryLedgerStore::new(), tenants)
}

fn log_banner(config: &AppConfig) {
    tracing::info!(
        data_source = ?config.data_source,
        provider = %config.webhook_provider,
        port = config.port,
        "keystone starting"
    );
    if config.webhook_secret.is_none() && config.webhook_allow_unsigned {
        tracing::warn!(
            provider = %config.webhook_provider,
            "WEBHOOK_ALLOW_UNSIGNED is set and no WEBHOOK_SECRET is configured; \
             webhook signatures will NOT be verified"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_core::OrgId;
    use uuid::Uuid;

    #[tokio::test]
    async fn fixture_bootstrap_needs_no_database() {
        let state = bootstrap(AppConfig::default()).await.unwrap();
        assert!(state.db_pool.is_none());
        assert_eq!(state.ingestor.provider(), "stripe");
    }

    #[tokio::test]
    async fn missing_secret_without_opt_in_fails_bootstrap() {
        let config = AppConfig {
            webhook_allow_unsigned: false,
            ..AppConfig::default()
        };
        let err = bootstrap(config).await.unwrap_err();
        assert!(matches!(
            err,
            BootstrapError::Config(ConfigError::Missing("WEBHOOK_SECRET"))
        ));
    }

    #[test]
    fn fixture_tenants_are_loaded() {
        let tenant = Uuid::new_v4();
        let config = AppConfig {
            fixture_tenants: vec![(tenant, OrgId::new("org-1").unwrap())],
            ..AppConfig::default()
        };
        let (_, tenants) = fixture_backends(&config);
        assert_eq!(tenants.len(), 1);
    }
}
