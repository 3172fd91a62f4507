//! # Configuration
//!
//! Typed configuration read from environment variables at startup. Invalid
//! values fail startup with a [`ConfigError`] instead of falling back
//! silently.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `PORT` | `8080` |
//! | `DATABASE_URL` | unset |
//! | `DATA_SOURCE` | `postgres` when `DATABASE_URL` is set, else `fixture` |
//! | `WEBHOOK_PROVIDER` | `stripe` |
//! | `WEBHOOK_SECRET` | unset (required unless unsigned mode) |
//! | `WEBHOOK_ALLOW_UNSIGNED` | `false` |
//! | `WEBHOOK_TOLERANCE_SECS` | `300` |
//! | `FIXTURE_TENANTS` | empty; `tenant-uuid=org-id` pairs, comma separated |
//! | `LOG_FORMAT` | `text` (`json` for structured output) |

use thiserror::Error;
use uuid::Uuid;

use keystone_core::OrgId;
use keystone_ledger::webhook::DEFAULT_TOLERANCE_SECS;
use keystone_ledger::{SignaturePolicy, SignatureVerifier, WebhookConfig};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} has invalid value {value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("{0} is required")]
    Missing(&'static str),
}

/// Where ledger state and tenant mappings live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    Postgres,
    /// In-memory store and tenant directory. Not durable.
    Fixture,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Clone)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: Option<String>,
    pub data_source: DataSource,
    pub webhook_provider: String,
    pub webhook_secret: Option<String>,
    pub webhook_allow_unsigned: bool,
    pub webhook_tolerance_secs: u64,
    pub fixture_tenants: Vec<(Uuid, OrgId)>,
    pub log_format: LogFormat,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("port", &self.port)
            .field("database_url", &self.database_url.as_ref().map(|_| "[REDACTED]"))
            .field("data_source", &self.data_source)
            .field("webhook_provider", &self.webhook_provider)
            .field("webhook_secret", &self.webhook_secret.as_ref().map(|_| "[REDACTED]"))
            .field("webhook_allow_unsigned", &self.webhook_allow_unsigned)
            .field("webhook_tolerance_secs", &self.webhook_tolerance_secs)
            .field("fixture_tenants", &self.fixture_tenants.len())
            .field("log_format", &self.log_format)
            .finish()
    }
}

impl Default for AppConfig {
    /// Fixture data, unsigned webhooks. Used by tests.
    fn default() -> Self {
        Self {
            port: 8080,
            database_url: None,
            data_source: DataSource::Fixture,
            webhook_provider: "stripe".to_string(),
            webhook_secret: None,
            webhook_allow_unsigned: true,
            webhook_tolerance_secs: DEFAULT_TOLERANCE_SECS,
            fixture_tenants: Vec::new(),
            log_format: LogFormat::Text,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup<F>(get: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| get(key).filter(|v| !v.trim().is_empty());

        let port = match get("PORT") {
            Some(v) => parse("PORT", &v)?,
            None => 8080,
        };

        let database_url = get("DATABASE_URL");
        let data_source = match get("DATA_SOURCE").as_deref() {
            Some("postgres") => DataSource::Postgres,
            Some("fixture") => DataSource::Fixture,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "DATA_SOURCE",
                    value: other.to_string(),
                    reason: "expected postgres or fixture".into(),
                })
            }
            None if database_url.is_some() => DataSource::Postgres,
            None => DataSource::Fixture,
        };
        if data_source == DataSource::Postgres && database_url.is_none() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }

        let webhook_allow_unsigned = match get("WEBHOOK_ALLOW_UNSIGNED") {
            Some(v) => parse_bool("WEBHOOK_ALLOW_UNSIGNED", &v)?,
            None => false,
        };
        let webhook_secret = get("WEBHOOK_SECRET");

        let webhook_tolerance_secs = match get("WEBHOOK_TOLERANCE_SECS") {
            Some(v) => parse("WEBHOOK_TOLERANCE_SECS", &v)?,
            None => DEFAULT_TOLERANCE_SECS,
        };

        let fixture_tenants = match get("FIXTURE_TENANTS") {
            Some(v) => parse_tenants(&v)?,
            None => Vec::new(),
        };

        let log_format = match get("LOG_FORMAT").as_deref() {
            None | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "LOG_FORMAT",
                    value: other.to_string(),
                    reason: "expected text or json".into(),
                })
            }
        };

        let config = Self {
            port,
            database_url,
            data_source,
            webhook_provider: get("WEBHOOK_PROVIDER").unwrap_or_else(|| "stripe".to_string()),
            webhook_secret,
            webhook_allow_unsigned,
            webhook_tolerance_secs,
            fixture_tenants,
            log_format,
        };
        config.validate()?;
        Ok(config)
    }

    /// Cross-field checks. Webhooks need a secret unless unsigned mode was
    /// enabled explicitly.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.webhook_secret.is_none() && !self.webhook_allow_unsigned {
            return Err(ConfigError::Missing("WEBHOOK_SECRET"));
        }
        Ok(())
    }

    /// Webhook ingestion settings. A configured secret is always enforced.
    /// Without one, deliveries are accepted unsigned only when
    /// `webhook_allow_unsigned` is set and rejected otherwise.
    pub fn webhook(&self) -> WebhookConfig {
        let signatures = match &self.webhook_secret {
            Some(secret) => SignaturePolicy::Verify(
                SignatureVerifier::new(secret.as_bytes())
                    .with_tolerance(self.webhook_tolerance_secs),
            ),
            None if self.webhook_allow_unsigned => SignaturePolicy::AllowUnsigned,
            None => SignaturePolicy::RejectAll,
        };
        WebhookConfig {
            provider: self.webhook_provider.clone(),
            signatures,
        }
    }
}

fn parse<T: std::str::FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        _ => Err(ConfigError::Invalid {
            var,
            value: value.to_string(),
            reason: "expected true or false".into(),
        }),
    }
}

fn parse_tenants(value: &str) -> Result<Vec<(Uuid, OrgId)>, ConfigError> {
    let invalid = |reason: String| ConfigError::Invalid {
        var: "FIXTURE_TENANTS",
        value: value.to_string(),
        reason,
    };
    value
        .split(',')
        .filter(|pair| !pair.trim().is_empty())
        .map(|pair| {
            let (tenant, org) = pair
                .split_once('=')
                .ok_or_else(|| invalid(format!("{pair:?} is not tenant=org")))?;
            let tenant = Uuid::parse_str(tenant.trim()).map_err(|e| invalid(e.to_string()))?;
            let org = OrgId::new(org.trim()).map_err(|e| invalid(e.to_string()))?;
            Ok((tenant, org))
        })
        .collect()
}
