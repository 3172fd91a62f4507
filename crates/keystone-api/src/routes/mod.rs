//! # Route Modules
//!
//! Each module defines an Axum router for one API surface area. Routers are
//! assembled in [`crate::app`].

pub mod audit;
pub mod webhook;
