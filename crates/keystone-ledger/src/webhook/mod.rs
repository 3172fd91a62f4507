//! # Webhook Ingestion
//!
//! - [`signature`]: provider signature verification.
//! - [`envelope`]: typed view of provider event bodies.
//! - [`ingestor`]: deduplication, dispatch, dead-lettering, and explicit retry.
//!
//! Retries of dead-lettered events are operator-triggered only; nothing in
//! this crate rescans `webhook_failures` on a schedule.

pub mod envelope;
pub mod ingestor;
pub mod signature;

pub use envelope::{EnvelopeError, ProviderEvent, PAYMENT_INTENT_SUCCEEDED};
pub use ingestor::{
    ReceiveOutcome, RetryOutcome, SignaturePolicy, WebhookConfig, WebhookError, WebhookIngestor,
    MAX_TX_ATTEMPTS,
};
pub use signature::{SignatureError, SignatureVerifier, DEFAULT_TOLERANCE_SECS, SIGNATURE_HEADER};
