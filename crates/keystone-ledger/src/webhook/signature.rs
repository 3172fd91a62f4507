//! Stripe-compatible webhook signatures.
//!
//! The provider sends `Stripe-Signature: t=<unix-seconds>,v1=<hex>[,v1=<hex>...]`
//! where each `v1` is `HMAC-SHA256(secret, "<t>.<raw body>")`. Several `v1`
//! entries appear while a secret is being rotated; any match is accepted.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the signature.
pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

/// Maximum accepted distance between the signed timestamp and now.
pub const DEFAULT_TOLERANCE_SECS: u64 = 300;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature header missing")]
    Missing,

    #[error("malformed signature header: {0}")]
    Malformed(&'static str),

    #[error("signature timestamp outside tolerance ({age_secs}s > {tolerance_secs}s)")]
    Expired { age_secs: u64, tolerance_secs: u64 },

    #[error("no signature matched")]
    Mismatch,

    #[error("webhook secret unusable")]
    InvalidSecret,

    /// No secret is configured and unsigned mode was not enabled.
    #[error("no webhook secret configured")]
    NotConfigured,
}

/// Verifies provider signatures against a shared secret.
#[derive(Clone)]
pub struct SignatureVerifier {
    secret: Vec<u8>,
    tolerance_secs: u64,
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("secret", &"[REDACTED]")
            .field("tolerance_secs", &self.tolerance_secs)
            .finish()
    }
}

impl SignatureVerifier {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
            tolerance_secs: DEFAULT_TOLERANCE_SECS,
        }
    }

    pub fn with_tolerance(mut self, tolerance_secs: u64) -> Self {
        self.tolerance_secs = tolerance_secs;
        self
    }

    pub fn tolerance_secs(&self) -> u64 {
        self.tolerance_secs
    }

    /// Verify `header` for `payload` against the current clock.
    pub fn verify(&self, payload: &[u8], header: &str) -> Result<(), SignatureError> {
        self.verify_at(payload, header, chrono::Utc::now().timestamp())
    }

    /// Verify `header` for `payload` as of `now` (unix seconds).
    pub fn verify_at(&self, payload: &[u8], header: &str, now: i64) -> Result<(), SignatureError> {
        let mut timestamp: Option<i64> = None;
        let mut candidates: Vec<Vec<u8>> = Vec::new();

        for part in header.split(',') {
            let Some((key, value)) = part.trim().split_once('=') else {
                continue;
            };
            match key {
                "t" => {
                    timestamp = Some(
                        value
                            .parse()
                            .map_err(|_| SignatureError::Malformed("timestamp is not an integer"))?,
                    );
                }
                // Undecodable entries can never match; skip them like unknown schemes.
                "v1" => {
                    if let Ok(bytes) = hex::decode(value) {
                        candidates.push(bytes);
                    }
                }
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or(SignatureError::Malformed("missing t="))?;
        if candidates.is_empty() {
            return Err(SignatureError::Malformed("missing v1="));
        }

        let age_secs = now.abs_diff(timestamp);
        if age_secs > self.tolerance_secs {
            return Err(SignatureError::Expired {
                age_secs,
                tolerance_secs: self.tolerance_secs,
            });
        }

        let expected = self.mac(timestamp, payload)?;
        let matched = candidates
            .iter()
            .any(|candidate| bool::from(expected.as_slice().ct_eq(candidate.as_slice())));
        if matched {
            Ok(())
        } else {
            Err(SignatureError::Mismatch)
        }
    }

    /// Produce a header value signing `payload` at `timestamp`.
    pub fn sign(&self, payload: &[u8], timestamp: i64) -> Result<String, SignatureError> {
        let mac = self.mac(timestamp, payload)?;
        Ok(format!("t={timestamp},v1={}", hex::encode(mac)))
    }

    fn mac(&self, timestamp: i64, payload: &[u8]) -> Result<Vec<u8>, SignatureError> {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).map_err(|_| SignatureError::InvalidSecret)?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}
