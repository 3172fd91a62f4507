//! # keystone-ledger — Financial Integrity Pipeline
//!
//! Three tightly coupled services over transactional storage ports:
//!
//! - [`audit::AuditLedger`]: append-only, per-entity hash chains with
//!   verification that reports the first offending event.
//! - [`allocation::PaymentAllocator`]: applies a succeeded payment to the
//!   tenant's outstanding charges, oldest due date first.
//! - [`webhook::WebhookIngestor`]: verifies, deduplicates, and dispatches
//!   provider events; dead-letters handler failures for explicit retry.
//!
//! A webhook delivery, the allocation it triggers, and every audit event
//! documenting the allocation run inside one [`store::LedgerTx`] and commit
//! or roll back together.
//!
//! ## Ports
//!
//! - [`store::LedgerStore`] / [`store::LedgerTx`]: persistence. Postgres
//!   lives in `keystone-api`; [`memory::MemoryLedgerStore`] is the fixture.
//! - [`tenant::TenantDataProvider`]: maps a tenant to its organization.

pub mod allocation;
pub mod audit;
pub mod error;
pub mod memory;
pub mod model;
pub mod store;
pub mod tenant;
pub mod webhook;

pub use allocation::{plan_waterfall, AllocationOutcome, AllocationPlan, PaymentAllocator};
pub use audit::{
    verify_events, AuditEvent, AuditLedger, BadEvent, ChainVerification, IntegrityFault,
    NewAuditEvent,
};
pub use error::{LedgerError, StoreError};
pub use memory::MemoryLedgerStore;
pub use model::{
    Allocation, Charge, ChargeStatus, OutstandingCharge, Payment, PaymentStatus, WebhookEnvelope,
    WebhookFailure,
};
pub use store::{LedgerStore, LedgerTx};
pub use tenant::{FixtureTenantDirectory, TenantDataProvider, TenantRef};
pub use webhook::{
    ReceiveOutcome, RetryOutcome, SignaturePolicy, SignatureVerifier, WebhookConfig, WebhookError,
    WebhookIngestor,
};
