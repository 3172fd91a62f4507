//! # Audit Subcommand
//!
//! - `verify --org <ORG>`: verify every chain of an organization. Exits 2
//!   when a chain is broken.
//! - `trail --org <ORG> --entity <TYPE> --entity-id <ID>`: print one chain.
//!
//! Output is JSON in the same shape as the HTTP API.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use keystone_api::routes::audit::{TrailEntry, VerifyResponse};
use keystone_api::AppState;
use keystone_core::{ChainKey, OrgId};

/// Arguments for the `keystone audit` subcommand.
#[derive(Args, Debug)]
pub struct AuditArgs {
    #[command(subcommand)]
    pub command: AuditCommand,
}

#[derive(Subcommand, Debug)]
pub enum AuditCommand {
    /// Verify all audit chains of an organization.
    Verify {
        /// Organization ID.
        #[arg(long)]
        org: String,
    },

    /// Print the audit trail of one entity in append order.
    Trail {
        /// Organization ID.
        #[arg(long)]
        org: String,
        /// Entity type (e.g. "charge", "payment").
        #[arg(long)]
        entity: String,
        /// Entity ID.
        #[arg(long)]
        entity_id: String,
    },
}

/// Exit code when verification finds a broken chain.
pub const EXIT_CHAIN_BROKEN: u8 = 2;

pub async fn run_audit(args: &AuditArgs, state: &AppState) -> Result<u8> {
    match &args.command {
        AuditCommand::Verify { org } => {
            let org = OrgId::new(org.as_str()).context("invalid --org")?;
            let verification = state
                .ledger
                .verify_chain(&org)
                .await
                .with_context(|| format!("verifying audit chains of {org}"))?;
            let valid = verification.valid;
            print_json(&VerifyResponse::from(verification))?;
            if valid {
                Ok(0)
            } else {
                Ok(EXIT_CHAIN_BROKEN)
            }
        }
        AuditCommand::Trail {
            org,
            entity,
            entity_id,
        } => {
            let org = OrgId::new(org.as_str()).context("invalid --org")?;
            let chain = ChainKey::new(entity.as_str(), entity_id.as_str())
                .context("invalid --entity/--entity-id")?;
            let events = state
                .ledger
                .trail(&org, &chain)
                .await
                .with_context(|| format!("reading audit trail of {chain}"))?;
            let trail: Vec<TrailEntry> = events.into_iter().map(TrailEntry::from).collect();
            print_json(&trail)?;
            Ok(0)
        }
    }
}

pub(crate) fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("serializing output")?;
    println!("{rendered}");
    Ok(())
}
