//! # Error Types
//!
//! Leaf-level errors shared by every Keystone crate. All errors use
//! `thiserror` for derive-based `Display` and `Error` implementations.

use thiserror::Error;

/// Top-level error type for `keystone-core`.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Canonicalization failed.
    #[error("canonicalization error: {0}")]
    Canonicalization(#[from] CanonicalizationError),

    /// Money arithmetic or construction failed.
    #[error("money error: {0}")]
    Money(#[from] MoneyError),

    /// A domain value failed validation.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),
}

/// Error during canonical payload serialization.
#[derive(Error, Debug)]
pub enum CanonicalizationError {
    /// Float values are not permitted in canonical payloads.
    /// Amounts must be integer cents.
    #[error("float values are not permitted in audit metadata; use integer cents: {0}")]
    FloatRejected(f64),

    /// JSON serialization failed.
    #[error("serialization failed: {0}")]
    SerializationFailed(#[from] serde_json::Error),
}

/// Error in integer-cent arithmetic.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MoneyError {
    /// Amounts are never negative.
    #[error("negative amount: {0} cents")]
    Negative(i64),

    /// Checked arithmetic overflowed.
    #[error("amount overflow")]
    Overflow,

    /// Subtraction would go below zero.
    #[error("insufficient amount: {available} cents available, {requested} requested")]
    Insufficient {
        /// Cents available.
        available: i64,
        /// Cents requested.
        requested: i64,
    },
}

/// Validation failure for identifier or digest values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Organization identifiers must be non-empty.
    #[error("invalid organization id: {0:?}")]
    InvalidOrgId(String),

    /// Entity type or entity id of a chain key is empty or too long.
    #[error("invalid chain key: {0}")]
    InvalidChainKey(String),

    /// Hex digest could not be decoded into 32 bytes.
    #[error("invalid digest: {0}")]
    InvalidDigest(String),

    /// Timestamp could not be parsed.
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
}
