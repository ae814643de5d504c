#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Database access layer for the market-data services.
//!
//! Production code never opens connections itself. It asks the process-wide
//! resolver registry for an [`Engine`] through [`get_engine`] (sync) or
//! [`get_engine_async`] (async). By default the registry resolves a
//! `PostgreSQL` engine from [`config::DatabaseConfig`] and the [`secrets`]
//! store; tests push an override frame that redirects both entry points to a
//! disposable `SQLite` database (see the `mcdb-testing` crate).
//!
//! # Modules
//! - [`engine`]: pooled engine handle over `SeaORM`/`SQLx`
//! - [`config`]: figment-backed configuration
//! - [`secrets`]: scoped secret store
//! - [`resolver`]: resolver registry and override stack
//! - [`dialect`]: schema translation and DDL helpers
//!
//! # Example
//! ```rust,no_run
//! use mcdb::{ConnectionTrait, Statement};
//!
//! # async fn run() -> mcdb::Result<()> {
//! let engine = mcdb::get_engine_async().await?;
//! let conn = engine.conn();
//! conn.execute(Statement::from_string(
//!     engine.backend(),
//!     "DELETE FROM provider_asset_order",
//! ))
//! .await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dialect;
pub mod engine;
pub mod resolver;
pub mod secrets;

mod pool_opts;

pub use config::{DatabaseConfig, PoolCfg, PostgresSecretNames};
pub use engine::{ConnectOpts, DbPool, Engine, redact_credentials_in_dsn};
pub use resolver::{
    AlreadyInstalledError, ConfiguredResolver, EngineResolver, Nesting, OverrideKey,
    OverrideToken, ResolverBindings, RestoreError, active_override, current_bindings, get_engine,
    get_engine_async, install_override, override_depth, restore_override,
};

pub use sea_orm::{ConnectionTrait, DatabaseConnection, DbBackend, Statement};

use thiserror::Error;

/// Library-local result type.
pub type Result<T> = std::result::Result<T, DbError>;

/// Typed error for engine resolution and the helpers around it.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Unknown DSN: {0}")]
    UnknownDsn(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Missing secret: {0}")]
    MissingSecret(String),

    #[error("Engine is closed: {0}")]
    Closed(String),

    #[error("No Tokio runtime available to build a lazy pool")]
    NoRuntime,

    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error(transparent)]
    Config(#[from] Box<figment::Error>),

    #[error(transparent)]
    Sqlx(#[from] sea_orm::sqlx::Error),

    #[error(transparent)]
    Sea(#[from] sea_orm::DbErr),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<figment::Error> for DbError {
    fn from(e: figment::Error) -> Self {
        Self::Config(Box::new(e))
    }
}

/// Supported engines.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DbEngine {
    Postgres,
    Sqlite,
}

impl DbEngine {
    /// Detect engine by DSN scheme.
    ///
    /// Only the scheme prefix is inspected; credentials in the tail are left alone.
    ///
    /// # Errors
    /// Returns `DbError::UnknownDsn` if the DSN scheme is not recognized.
    pub fn detect(dsn: &str) -> Result<Self> {
        // Forgiving with env files.
        let s = dsn.trim_start();

        if s.starts_with("postgres://") || s.starts_with("postgresql://") {
            Ok(Self::Postgres)
        } else if s.starts_with("sqlite:") {
            Ok(Self::Sqlite)
        } else {
            Err(DbError::UnknownDsn(redact_credentials_in_dsn(Some(dsn))))
        }
    }

    #[must_use]
    pub fn backend(self) -> DbBackend {
        match self {
            Self::Postgres => DbBackend::Postgres,
            Self::Sqlite => DbBackend::Sqlite,
        }
    }
}

impl std::fmt::Display for DbEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Postgres => f.write_str("postgres"),
            Self::Sqlite => f.write_str("sqlite"),
        }
    }
}
