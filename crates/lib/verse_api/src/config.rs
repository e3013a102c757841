//! API server configuration.

use std::time::Duration;

use thiserror::Error;
use url::Url;
use verse_core::migration::MigrationConfig;
use verse_core::store::{OwnerTable, StoreError};

/// Configuration errors. Raised at startup only.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{key} is invalid: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Configuration for the API server.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    /// Address to bind the HTTP listener (e.g. "127.0.0.1:3100").
    pub bind_addr: String,
    /// PostgreSQL connection URL.
    pub pg_connection_url: String,
    /// HS256 secret shared with the legacy token issuer.
    pub legacy_jwt_secret: String,
    /// Base URL of the managed identity provider.
    pub provider_url: Url,
    /// Public (anon) API key of the provider.
    pub provider_anon_key: String,
    /// Service-role key for admin lookups; without it deferred migrations
    /// cannot observe email confirmation.
    pub provider_service_key: Option<String>,
    pub provider_timeout: Duration,
    pub owner_tables: Vec<OwnerTable>,
    pub reconcile_interval: Duration,
    pub claim_timeout: Duration,
}

impl ApiConfig {
    /// Reads configuration from environment variables.
    ///
    /// | Variable                        | Default                           |
    /// |---------------------------------|-----------------------------------|
    /// | `BIND_ADDR`                     | `127.0.0.1:3100`                  |
    /// | `DATABASE_URL`                  | `postgres://localhost:5432/verse` |
    /// | `LEGACY_JWT_SECRET`             | required                          |
    /// | `IDENTITY_PROVIDER_URL`         | `http://localhost:9999`           |
    /// | `IDENTITY_PROVIDER_ANON_KEY`    | empty                             |
    /// | `IDENTITY_PROVIDER_SERVICE_KEY` | unset                             |
    /// | `PROVIDER_TIMEOUT_MS`           | `5000`                            |
    /// | `OWNER_TABLES`                  | `articles,comments`               |
    /// | `RECONCILE_INTERVAL_SECS`       | `300`                             |
    /// | `MIGRATION_CLAIM_TIMEOUT_SECS`  | `600`                             |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ApiConfig::from_env`] with an arbitrary source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let legacy_jwt_secret =
            var("LEGACY_JWT_SECRET").ok_or(ConfigError::Missing("LEGACY_JWT_SECRET"))?;

        let provider_url = var("IDENTITY_PROVIDER_URL")
            .unwrap_or_else(|| "http://localhost:9999".into());
        let provider_url = Url::parse(&provider_url).map_err(|e| ConfigError::Invalid {
            key: "IDENTITY_PROVIDER_URL",
            reason: e.to_string(),
        })?;

        let owner_tables = match var("OWNER_TABLES") {
            Some(list) => OwnerTable::parse_list(&list).map_err(|e: StoreError| {
                ConfigError::Invalid {
                    key: "OWNER_TABLES",
                    reason: e.to_string(),
                }
            })?,
            None => OwnerTable::defaults(),
        };

        Ok(Self {
            bind_addr: var("BIND_ADDR").unwrap_or_else(|| "127.0.0.1:3100".into()),
            pg_connection_url: var("DATABASE_URL")
                .unwrap_or_else(|| "postgres://localhost:5432/verse".into()),
            legacy_jwt_secret,
            provider_url,
            provider_anon_key: var("IDENTITY_PROVIDER_ANON_KEY").unwrap_or_default(),
            provider_service_key: var("IDENTITY_PROVIDER_SERVICE_KEY"),
            provider_timeout: Duration::from_millis(parse_number(
                var("PROVIDER_TIMEOUT_MS"),
                "PROVIDER_TIMEOUT_MS",
                5000,
            )?),
            owner_tables,
            reconcile_interval: Duration::from_secs(parse_number(
                var("RECONCILE_INTERVAL_SECS"),
                "RECONCILE_INTERVAL_SECS",
                300,
            )?),
            claim_timeout: Duration::from_secs(parse_number(
                var("MIGRATION_CLAIM_TIMEOUT_SECS"),
                "MIGRATION_CLAIM_TIMEOUT_SECS",
                600,
            )?),
        })
    }

    /// Coordinator settings derived from this configuration.
    pub fn migration_config(&self) -> MigrationConfig {
        MigrationConfig {
            owner_tables: self.owner_tables.clone(),
            provider_timeout: self.provider_timeout,
            claim_timeout: self.claim_timeout,
        }
    }
}

fn parse_number(value: Option<String>, key: &'static str, default: u64) -> Result<u64, ConfigError> {
    match value {
        None => Ok(default),
        Some(v) => v.trim().parse().map_err(|_| ConfigError::Invalid {
            key,
            reason: format!("'{v}' is not a non-negative integer"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<ApiConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ApiConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_only_secret_is_set() {
        let config = config(&[("LEGACY_JWT_SECRET", "s3cret")]).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:3100");
        assert_eq!(config.provider_timeout, Duration::from_millis(5000));
        assert_eq!(config.owner_tables, OwnerTable::defaults());
        assert_eq!(config.reconcile_interval, Duration::from_secs(300));
        assert_eq!(config.claim_timeout, Duration::from_secs(600));
        assert!(config.provider_service_key.is_none());
    }

    #[test]
    fn legacy_secret_is_required() {
        assert!(matches!(
            config(&[]),
            Err(ConfigError::Missing("LEGACY_JWT_SECRET"))
        ));
        assert!(matches!(
            config(&[("LEGACY_JWT_SECRET", "  ")]),
            Err(ConfigError::Missing(_))
        ));
    }

    #[test]
    fn bad_values_are_reported_by_key() {
        let err = config(&[
            ("LEGACY_JWT_SECRET", "s3cret"),
            ("OWNER_TABLES", "articles;drop"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "OWNER_TABLES", .. }));

        let err = config(&[
            ("LEGACY_JWT_SECRET", "s3cret"),
            ("PROVIDER_TIMEOUT_MS", "soon"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "PROVIDER_TIMEOUT_MS", .. }));
    }

    #[test]
    fn owner_tables_are_configurable() {
        let config = config(&[
            ("LEGACY_JWT_SECRET", "s3cret"),
            ("OWNER_TABLES", "articles,comments,likes"),
        ])
        .unwrap();
        assert_eq!(config.migration_config().owner_tables.len(), 3);
    }
}
