//! # Middleware Stack
//!
//! Tower middleware for the API layer:
//! - [`metrics`]: request counters and latency histograms, plus the webhook
//!   outcome counters recorded by the webhook routes.
//!
//! Request tracing is `tower_http::trace::TraceLayer`, applied in `app()`.

pub mod metrics;
