//! Database configuration.
//!
//! Loaded with figment from `MCDB_*` environment variables, `__` separating
//! nested keys:
//!
//! ```text
//! MCDB_DSN=postgres://app:secret@db:5432/market
//! MCDB_URL_SECRET=postgres-url
//! MCDB_SECRETS__PASSWORD=prod-postgres-password
//! MCDB_POOL__MAX_CONNS=20
//! MCDB_POOL__ACQUIRE_TIMEOUT=5s
//! ```

use std::time::Duration;

use figment::Figment;
use figment::providers::Env;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::{ConnectOpts, DbError, Result, secrets};

pub const ENV_PREFIX: &str = "MCDB_";

/// Pool configuration; unset fields keep the [`ConnectOpts`] defaults.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolCfg {
    pub max_conns: Option<u32>,
    pub min_conns: Option<u32>,
    #[serde(with = "humantime_serde")]
    pub acquire_timeout: Option<Duration>,
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Option<Duration>,
    #[serde(with = "humantime_serde")]
    pub max_lifetime: Option<Duration>,
    pub test_before_acquire: Option<bool>,
}

impl PoolCfg {
    #[must_use]
    pub fn connect_opts(&self) -> ConnectOpts {
        let defaults = ConnectOpts::default();
        ConnectOpts {
            max_conns: self.max_conns.or(defaults.max_conns),
            min_conns: self.min_conns.or(defaults.min_conns),
            acquire_timeout: self.acquire_timeout.or(defaults.acquire_timeout),
            idle_timeout: self.idle_timeout.or(defaults.idle_timeout),
            max_lifetime: self.max_lifetime.or(defaults.max_lifetime),
            test_before_acquire: self
                .test_before_acquire
                .unwrap_or(defaults.test_before_acquire),
        }
    }
}

/// Names of the secrets holding the `PostgreSQL` URL components.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PostgresSecretNames {
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: String,
    pub database: String,
}

impl Default for PostgresSecretNames {
    fn default() -> Self {
        Self {
            user: "postgres-user".to_owned(),
            password: "postgres-password".to_owned(),
            host: "postgres-host".to_owned(),
            port: "postgres-port".to_owned(),
            database: "postgres-database".to_owned(),
        }
    }
}

fn default_url_secret() -> String {
    "postgres-url".to_owned()
}

/// Production database configuration.
///
/// Unknown keys are ignored since other components share the `MCDB_` prefix.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Explicit DSN, used when the URL secret is not set.
    pub dsn: Option<SecretString>,
    /// Secret holding the full database URL.
    #[serde(default = "default_url_secret")]
    pub url_secret: String,
    pub secrets: PostgresSecretNames,
    pub pool: PoolCfg,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            dsn: None,
            url_secret: default_url_secret(),
            secrets: PostgresSecretNames::default(),
            pool: PoolCfg::default(),
        }
    }
}

impl DatabaseConfig {
    /// Load from `MCDB_*` environment variables.
    ///
    /// # Errors
    /// Returns `DbError::Config` when a variable cannot be parsed.
    pub fn load() -> Result<Self> {
        Self::from_figment(&Figment::new().merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Extract from an arbitrary figment.
    ///
    /// # Errors
    /// Returns `DbError::Config` when extraction fails.
    pub fn from_figment(figment: &Figment) -> Result<Self> {
        Ok(figment.extract()?)
    }

    /// Resolve the DSN: URL secret first, then `dsn`, then the component secrets.
    ///
    /// # Errors
    /// Returns `DbError::InvalidConfig` when none of the sources is available.
    pub fn resolve_dsn(&self) -> Result<SecretString> {
        if let Some(url) = secrets::load_secret(&self.url_secret) {
            tracing::debug!(secret = %self.url_secret, "database URL resolved from secret");
            return Ok(url);
        }
        if let Some(dsn) = &self.dsn {
            tracing::debug!("database URL resolved from configuration");
            return Ok(SecretString::from(dsn.expose_secret().to_owned()));
        }
        secrets::get_postgres_url(&self.secrets).map_err(|e| {
            DbError::InvalidConfig(format!(
                "no database URL: secret '{}' and MCDB_DSN are unset and {e}",
                self.url_secret
            ))
        })
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use figment::providers::Serialized;
    use serial_test::serial;

    #[test]
    fn defaults_use_conventional_secret_names() {
        let cfg = DatabaseConfig::default();
        assert_eq!(cfg.url_secret, "postgres-url");
        assert_eq!(cfg.secrets.password, "postgres-password");
        assert!(cfg.dsn.is_none());
        assert_eq!(cfg.pool, PoolCfg::default());
    }

    #[test]
    fn pool_cfg_parses_humantime_durations() {
        let figment = Figment::new().merge(Serialized::defaults(serde_json::json!({
            "pool": {
                "max_conns": 4,
                "acquire_timeout": "1500ms",
                "idle_timeout": "2m"
            }
        })));
        let cfg = DatabaseConfig::from_figment(&figment).unwrap();
        let opts = cfg.pool.connect_opts();
        assert_eq!(opts.max_conns, Some(4));
        assert_eq!(opts.acquire_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(opts.idle_timeout, Some(Duration::from_secs(120)));
        assert!(opts.max_lifetime.is_none());
    }

    #[test]
    fn unknown_pool_keys_are_rejected() {
        let figment = Figment::new().merge(Serialized::defaults(serde_json::json!({
            "pool": { "max_connections": 4 }
        })));
        assert!(matches!(
            DatabaseConfig::from_figment(&figment),
            Err(DbError::Config(_))
        ));
    }

    #[test]
    #[serial]
    fn env_variables_are_nested_with_double_underscore() {
        temp_env::with_vars(
            [
                ("MCDB_DSN", Some("postgres://app:pw@db/market")),
                ("MCDB_POOL__MAX_CONNS", Some("7")),
                ("MCDB_SECRETS__HOST", Some("prod-host")),
            ],
            || {
                let cfg = DatabaseConfig::load().unwrap();
                assert_eq!(
                    cfg.dsn.as_ref().map(|dsn| dsn.expose_secret()),
                    Some("postgres://app:pw@db/market")
                );
                assert_eq!(cfg.pool.max_conns, Some(7));
                assert_eq!(cfg.secrets.host, "prod-host");
                assert_eq!(cfg.secrets.user, "postgres-user");
            },
        );
    }

    #[test]
    #[serial]
    fn url_secret_wins_over_configured_dsn() {
        let _scope = secrets::SecretScope::enter();
        secrets::save_secret("postgres-url", "sqlite:///tmp/from-secret.db");
        let cfg = DatabaseConfig {
            dsn: Some(SecretString::from("postgres://configured/db")),
            ..Default::default()
        };
        assert_eq!(
            cfg.resolve_dsn().unwrap().expose_secret(),
            "sqlite:///tmp/from-secret.db"
        );
    }

    #[test]
    #[serial]
    fn missing_sources_are_reported() {
        let _scope = secrets::SecretScope::enter();
        let err = DatabaseConfig::default().resolve_dsn().unwrap_err();
        assert!(matches!(err, DbError::InvalidConfig(_)));
        assert!(err.to_string().contains("postgres-url"));
    }
}
