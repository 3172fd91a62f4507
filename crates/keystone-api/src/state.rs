//! # Application State
//!
//! Shared state for the Axum application: configuration, the audit ledger,
//! the webhook ingestor, and the optional database pool and metrics handle.
//! Cloning is cheap; every field is reference-counted.

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::PgPool;

use keystone_ledger::{AuditLedger, LedgerStore, TenantDataProvider, WebhookIngestor};

use crate::config::AppConfig;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub ledger: AuditLedger,
    pub ingestor: Arc<WebhookIngestor>,
    /// Prometheus recorder handle. `None` when no recorder is installed.
    pub metrics: Option<PrometheusHandle>,
    /// Set when running against PostgreSQL; checked by the readiness probe.
    pub db_pool: Option<PgPool>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("provider", &self.ingestor.provider())
            .field("metrics", &self.metrics.is_some())
            .field("db_pool", &self.db_pool.is_some())
            .finish()
    }
}

impl AppState {
    /// Wire the ledger services over one store and tenant directory.
    pub fn new(
        config: AppConfig,
        store: Arc<dyn LedgerStore>,
        tenants: Arc<dyn TenantDataProvider>,
    ) -> Self {
        let ingestor = WebhookIngestor::new(store.clone(), tenants, config.webhook());
        Self {
            config: Arc::new(config),
            ledger: AuditLedger::new(store),
            ingestor: Arc::new(ingestor),
            metrics: None,
            db_pool: None,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    pub fn with_pool(mut self, pool: PgPool) -> Self {
        self.db_pool = Some(pool);
        self
    }
}
