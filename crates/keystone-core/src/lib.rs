//! # keystone-core — Foundational Types for the Keystone Financial Core
//!
//! Leaf crate of the workspace. It defines the value types whose exact
//! behavior the audit ledger and payment allocator depend on:
//!
//! 1. **`CanonicalBytes`.** Every audit hash is computed over bytes produced by
//!    [`canonicalize`], which writes a fixed field order. No other path can
//!    construct canonical bytes.
//!
//! 2. **`ContentDigest` and [`chain_digest`].** The link formula
//!    `SHA256(prev_hex + ":" + payload)` lives in one place.
//!
//! 3. **`Cents`.** Non-negative integer cents with checked arithmetic. There is
//!    no floating-point money type anywhere in the workspace.
//!
//! 4. **`Timestamp`.** UTC truncated to milliseconds so hashed timestamps
//!    survive a Postgres round-trip byte-for-byte.
//!
//! ## Crate Policy
//!
//! - No dependencies on other `keystone-*` crates.
//! - No `unsafe` code.
//! - No `panic!()` or `.unwrap()` outside tests.

pub mod canonical;
pub mod digest;
pub mod error;
pub mod identity;
pub mod money;
pub mod temporal;

pub use canonical::{canonicalize, AuditPayload, CanonicalBytes};
pub use digest::{chain_digest, hex_or_null, sha256, ContentDigest};
pub use error::{CanonicalizationError, CoreError, MoneyError, ValidationError};
pub use identity::{ChainKey, OrgId};
pub use money::Cents;
pub use temporal::Timestamp;
