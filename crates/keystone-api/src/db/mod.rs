//! # Database Persistence Layer
//!
//! PostgreSQL implementations of the ledger's storage and tenant ports via
//! SQLx. Selected when `DATA_SOURCE=postgres`; otherwise the service runs on
//! the in-memory fixture store.
//!
//! ## Layout
//!
//! - [`audit`]: `audit_log` rows, chain heads, per-chain advisory locks.
//! - [`webhooks`]: envelope claims and the dead-letter table.
//! - [`payments`]: charges, payments, and allocations.
//! - [`tenants`]: [`tenants::PgTenantDirectory`].
//! - [`store`]: [`store::PgLedgerStore`] / [`store::PgLedgerTx`] tying them
//!   together behind the ledger's storage ports.
//!
//! Serialization failures (`40001`) and deadlocks (`40P01`) surface as
//! [`StoreError::Conflict`] so the ingestor retries the whole transaction.

pub mod audit;
pub mod payments;
pub mod store;
pub mod tenants;
pub mod webhooks;

use sqlx::postgres::{PgPool, PgPoolOptions};

use keystone_ledger::StoreError;

pub use store::{PgLedgerStore, PgLedgerTx};
pub use tenants::PgTenantDirectory;

/// SQLSTATE codes after which the transaction may be retried.
const RETRYABLE_SQLSTATES: [&str; 2] = ["40001", "40P01"];

/// Connect to PostgreSQL and apply embedded migrations.
pub async fn connect(url: &str) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect(url)
        .await?;

    tracing::info!("Connected to PostgreSQL");

    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("Database migrations applied");

    Ok(pool)
}

/// Map a driver error onto the backend-agnostic [`StoreError`].
pub fn store_error(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db)
            if db
                .code()
                .is_some_and(|code| RETRYABLE_SQLSTATES.contains(&&*code)) =>
        {
            StoreError::Conflict(db.message().to_string())
        }
        sqlx::Error::RowNotFound => StoreError::NotFound(err.to_string()),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Corrupt(err.to_string())
        }
        _ => StoreError::Backend(err.to_string()),
    }
}
