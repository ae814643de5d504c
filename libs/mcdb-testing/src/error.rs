use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use mcdb::dialect::SchemaTranslationError;
use mcdb::{AlreadyInstalledError, DbEngine, DbError};
use thiserror::Error;

/// Umbrella error for harness setup and teardown.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    SchemaTranslation(#[from] SchemaTranslationError),

    #[error(transparent)]
    DatabaseInit(#[from] DatabaseInitError),

    #[error(transparent)]
    AlreadyInstalled(#[from] AlreadyInstalledError),

    #[error(transparent)]
    CompositionTimeout(#[from] CompositionTimeoutError),

    #[error("orchestration harness '{harness}' failed to start")]
    Composition {
        harness: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error(transparent)]
    Teardown(#[from] TeardownError),

    #[error(transparent)]
    Config(#[from] Box<figment::Error>),

    #[error("cannot build a runtime for the blocking scope")]
    Runtime(#[source] std::io::Error),
}

/// The ephemeral database could not be brought up. Nothing is left on disk.
#[derive(Debug, Error)]
pub enum DatabaseInitError {
    #[error("ephemeral databases are SQLite only; got a {0} schema")]
    UnsupportedEngine(DbEngine),

    #[error("cannot create database file in {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot open ephemeral database")]
    Connect(#[source] DbError),

    #[error("cannot apply schema to ephemeral database")]
    Schema(#[source] DbError),
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("orchestration harness '{harness}' was not ready within {timeout:?}")]
pub struct CompositionTimeoutError {
    pub harness: String,
    pub timeout: Duration,
}

/// Teardown step that failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TeardownStep {
    Orchestration,
    Restore,
    Destroy,
}

impl fmt::Display for TeardownStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Orchestration => "orchestration stop",
            Self::Restore => "resolver restore",
            Self::Destroy => "database destroy",
        })
    }
}

#[derive(Debug)]
pub struct TeardownFailure {
    pub step: TeardownStep,
    pub error: Box<dyn std::error::Error + Send + Sync>,
}

/// Every teardown step ran; these are the ones that failed.
#[derive(Debug, Default)]
pub struct TeardownError {
    pub failures: Vec<TeardownFailure>,
}

impl TeardownError {
    pub(crate) fn push(
        &mut self,
        step: TeardownStep,
        error: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) {
        self.failures.push(TeardownFailure {
            step,
            error: error.into(),
        });
    }

    pub(crate) fn into_result(self) -> Result<(), Self> {
        if self.failures.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }

    #[must_use]
    pub fn failed(&self, step: TeardownStep) -> bool {
        self.failures.iter().any(|f| f.step == step)
    }
}

impl fmt::Display for TeardownError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("harness teardown failed")?;
        for (i, failure) in self.failures.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{sep}{}: {}", failure.step, failure.error)?;
        }
        Ok(())
    }
}

impl std::error::Error for TeardownError {}
