//! # Webhook Subcommand
//!
//! Operator tooling for dead-lettered webhook events.
//!
//! - `failures [--limit N]`: list unresolved failures, newest first,
//!   including the recorded error stack.
//! - `retry <FAILURE_ID>`: re-run one failure. Exits 1 unless the retry
//!   succeeded or the failure was already resolved.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use uuid::Uuid;

use keystone_api::routes::webhook::RetryResponse;
use keystone_api::AppState;

use crate::audit::print_json;

/// Arguments for the `keystone webhook` subcommand.
#[derive(Args, Debug)]
pub struct WebhookArgs {
    #[command(subcommand)]
    pub command: WebhookCommand,
}

#[derive(Subcommand, Debug)]
pub enum WebhookCommand {
    /// List unresolved webhook failures.
    Failures {
        /// Maximum number of failures to print.
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },

    /// Retry one dead-lettered webhook event.
    Retry {
        /// Webhook failure ID.
        failure_id: Uuid,
    },
}

pub async fn run_webhook(args: &WebhookArgs, state: &AppState) -> Result<u8> {
    match &args.command {
        WebhookCommand::Failures { limit } => {
            let failures = state
                .ingestor
                .failures(*limit)
                .await
                .context("listing webhook failures")?;
            print_json(&failures)?;
            Ok(0)
        }
        WebhookCommand::Retry { failure_id } => {
            let outcome = state
                .ingestor
                .retry(*failure_id)
                .await
                .with_context(|| format!("retrying webhook failure {failure_id}"))?;
            tracing::info!(%failure_id, success = outcome.success(), "{}", outcome.message());
            print_json(&RetryResponse::from(&outcome))?;
            Ok(if outcome.success() { 0 } else { 1 })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_api::AppConfig;

    #[tokio::test]
    async fn retry_of_unknown_failure_exits_nonzero() {
        let state = keystone_api::bootstrap::bootstrap(AppConfig::default())
            .await
            .unwrap();
        let args = WebhookArgs {
            command: WebhookCommand::Retry {
                failure_id: Uuid::new_v4(),
            },
        };
        assert_eq!(run_webhook(&args, &state).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn failures_on_empty_store() {
        let state = keystone_api::bootstrap::bootstrap(AppConfig::default())
            .await
            .unwrap();
        let args = WebhookArgs {
            command: WebhookCommand::Failures { limit: 10 },
        };
        assert_eq!(run_webhook(&args, &state).await.unwrap(), 0);
    }
}
