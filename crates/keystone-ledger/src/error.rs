//! # Ledger Error Types
//!
//! `StoreError` is what storage ports return; it is backend-agnostic so the
//! domain crate never depends on a database driver. `LedgerError` is what
//! the audit ledger, allocator, and webhook handlers return.

use thiserror::Error;

use keystone_core::{CanonicalizationError, MoneyError, ValidationError};

/// Storage-port failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Transaction-level conflict (serialization failure or deadlock).
    /// The whole transaction may be retried.
    #[error("transaction conflict: {0}")]
    Conflict(String),

    /// A stored row could not be decoded into a domain value.
    #[error("corrupt stored record: {0}")]
    Corrupt(String),

    /// A referenced row does not exist.
    #[error("record not found: {0}")]
    NotFound(String),

    /// Any other backend failure.
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Whether retrying the enclosing transaction can succeed.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

/// Failure of a ledger operation.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Canonicalization(#[from] CanonicalizationError),

    #[error(transparent)]
    Money(#[from] MoneyError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The tenant named by an external event is not known to any organization.
    #[error("unknown tenant: {0}")]
    UnknownTenant(String),

    /// An external event lacks a field its handler needs.
    #[error("malformed event: {0}")]
    MalformedEvent(String),

    /// An external event contradicts stored state.
    #[error("event conflicts with stored state: {0}")]
    Inconsistent(String),
}

impl LedgerError {
    /// Whether the error is a retryable transaction conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_conflict())
    }
}
