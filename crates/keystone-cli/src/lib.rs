//! # keystone-cli — Operator Tool for the Keystone Financial Core
//!
//! Provides the `keystone` command-line interface. It bootstraps the same
//! backends as the HTTP service (configured from the environment) and runs
//! one operation against them. Only the `postgres` data source is accepted.
//!
//! ## Subcommands
//!
//! - `keystone audit verify --org <ORG>`: verify every audit chain.
//! - `keystone audit trail --org <ORG> --entity <TYPE> --entity-id <ID>`
//! - `keystone webhook failures [--limit N]`
//! - `keystone webhook retry <FAILURE_ID>`
//!
//! ```bash
//! DATABASE_URL=postgres://localhost/keystone keystone audit verify --org org-1
//! ```

pub mod audit;
pub mod webhook;
