//! # keystone CLI entry point
//!
//! Parses command-line arguments, bootstraps the ledger backends from the
//! environment and dispatches to subcommand handlers.

use std::process::ExitCode;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use keystone_api::config::DataSource;
use keystone_api::AppConfig;
use keystone_cli::audit::{run_audit, AuditArgs};
use keystone_cli::webhook::{run_webhook, WebhookArgs};

/// Keystone operator CLI.
///
/// Verifies audit chains, prints entity trails, and inspects or retries
/// dead-lettered webhook events.
#[derive(Parser, Debug)]
#[command(name = "keystone", version, about, long_about = None)]
struct Cli {
    /// Enable verbose output. Repeat for more verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Verify audit chains or print an entity's audit trail.
    Audit(AuditArgs),

    /// Inspect and retry dead-lettered webhook events.
    Webhook(WebhookArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<u8> {
    let config = AppConfig::from_env().context("reading configuration")?;
    require_shared_store(&config)?;
    let state = keystone_api::bootstrap::bootstrap(config)
        .await
        .context("bootstrapping ledger backends")?;

    match &cli.command {
        Commands::Audit(args) => run_audit(args, &state).await,
        Commands::Webhook(args) => run_webhook(args, &state).await,
    }
}

/// The CLI inspects state written by the server, which only a database
/// can share with it.
fn require_shared_store(config: &AppConfig) -> anyhow::Result<()> {
    if config.data_source == DataSource::Fixture {
        bail!(
            "the fixture data source is in-memory and private to the server process; \
             set DATABASE_URL to inspect the ledger"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_cli::audit::AuditCommand;
    use keystone_cli::webhook::WebhookCommand;

    #[test]
    fn cli_parse_audit_verify() {
        let cli = Cli::try_parse_from(["keystone", "audit", "verify", "--org", "org-1"]).unwrap();
        match cli.command {
            Commands::Audit(AuditArgs {
                command: AuditCommand::Verify { org },
            }) => assert_eq!(org, "org-1"),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn cli_parse_audit_trail() {
        let cli = Cli::try_parse_from([
            "keystone",
            "audit",
            "trail",
            "--org",
            "org-1",
            "--entity",
            "charge",
            "--entity-id",
            "c-42",
        ])
        .unwrap();
        match cli.command {
            Commands::Audit(AuditArgs {
                command:
                    AuditCommand::Trail {
                        org,
                        entity,
                        entity_id,
                    },
            }) => {
                assert_eq!(org, "org-1");
                assert_eq!(entity, "charge");
                assert_eq!(entity_id, "c-42");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn cli_parse_webhook_failures_default_limit() {
        let cli = Cli::try_parse_from(["keystone", "webhook", "failures"]).unwrap();
        match cli.command {
            Commands::Webhook(WebhookArgs {
                command: WebhookCommand::Failures { limit },
            }) => assert_eq!(limit, 50),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn cli_parse_webhook_retry_requires_uuid() {
        assert!(Cli::try_parse_from(["keystone", "webhook", "retry", "not-a-uuid"]).is_err());
        let cli = Cli::try_parse_from([
            "keystone",
            "-vv",
            "webhook",
            "retry",
            "6f1c2a52-3f43-4a8e-9c51-0d5d0b1c9e7a",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(matches!(
            cli.command,
            Commands::Webhook(WebhookArgs {
                command: WebhookCommand::Retry { .. }
            })
        ));
    }

    #[test]
    fn fixture_data_source_is_rejected() {
        let err = require_shared_store(&AppConfig::default()).unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));

        let config = AppConfig {
            data_source: DataSource::Postgres,
            database_url: Some("postgres://localhost/keystone".into()),
            ..AppConfig::default()
        };
        assert!(require_shared_store(&config).is_ok());
    }

    #[test]
    fn cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["keystone"]).is_err());
    }
}
