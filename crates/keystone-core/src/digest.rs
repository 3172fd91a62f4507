//! # Chain Digests
//!
//! SHA-256 digests that link audit events into per-entity chains.
//!
//! ## Link formula
//!
//! ```text
//! hash = SHA256( prev_hex + ":" + canonical_payload )
//! ```
//!
//! `prev_hex` is the lowercase hex of the previous event's hash, or the
//! empty string for the first event of a chain (whose `prev_hash` is null).

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::canonical::CanonicalBytes;
use crate::error::ValidationError;

/// A 32-byte SHA-256 digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentDigest([u8; 32]);

impl ContentDigest {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Build from a byte slice read back from storage.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ValidationError> {
        let arr: [u8; 32] = bytes.try_into().map_err(|_| {
            ValidationError::InvalidDigest(format!("expected 32 bytes, got {}", bytes.len()))
        })?;
        Ok(Self(arr))
    }

    /// Parse a 64-character lowercase or uppercase hex string.
    pub fn from_hex(s: &str) -> Result<Self, ValidationError> {
        let bytes = hex::decode(s).map_err(|e| ValidationError::InvalidDigest(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Render the digest as a lowercase hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ContentDigest({})", self.to_hex())
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ContentDigest::from_hex(&value)
    }
}

impl From<ContentDigest> for String {
    fn from(d: ContentDigest) -> String {
        d.to_hex()
    }
}

/// Plain SHA-256 over a byte string.
pub fn sha256(bytes: &[u8]) -> ContentDigest {
    let hash = Sha256::digest(bytes);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hash);
    ContentDigest(out)
}

/// Compute the chain hash of an event given its predecessor's hash.
pub fn chain_digest(prev: Option<&ContentDigest>, payload: &CanonicalBytes) -> ContentDigest {
    let prev_hex = prev.map(ContentDigest::to_hex).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(prev_hex.as_bytes());
    hasher.update(b":");
    hasher.update(payload.as_bytes());
    let hash = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&hash);
    ContentDigest(out)
}

/// Hex rendering of an optional digest, using the literal `"null"` for `None`.
///
/// This is the form verification reports expected/actual `prev_hash` values in.
pub fn hex_or_null(digest: Option<&ContentDigest>) -> String {
    digest
        .map(ContentDigest::to_hex)
        .unwrap_or_else(|| "null".to_string())
}
