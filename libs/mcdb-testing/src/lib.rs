#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Run code written against the production `PostgreSQL` database on a
//! disposable `SQLite` file.
//!
//! A [`TestHarness`] translates the schema for `SQLite`, creates a uniquely
//! named database file, and points both [`mcdb::get_engine`] and
//! [`mcdb::get_engine_async`] at it. Leaving the scope restores the exact
//! previous resolvers and deletes the file, also when the body panics.
//!
//! Tests using the harness must not run concurrently with each other; mark
//! them `#[serial]`. A second top-level harness fails fast with
//! [`mcdb::AlreadyInstalledError`].
//!
//! ```rust,no_run
//! use mcdb::{ConnectionTrait, Statement};
//! use mcdb_testing::TestHarness;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let rows = TestHarness::builder()
//!     .scoped(|_scope| async {
//!         let engine = mcdb::get_engine_async().await?;
//!         engine
//!             .conn()
//!             .query_all(Statement::from_string(
//!                 engine.backend(),
//!                 "SELECT id FROM asset_type",
//!             ))
//!             .await
//!             .map_err(mcdb::DbError::from)
//!     })
//!     .await??;
//! assert!(rows.is_empty());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod ephemeral;
pub mod error;
pub mod harness;
pub mod orchestration;
pub mod patch;

pub use config::HarnessConfig;
pub use ephemeral::{ConnectionFactory, EphemeralDatabase, EphemeralOptions};
pub use error::{
    CompositionTimeoutError, DatabaseInitError, HarnessError, TeardownError, TeardownFailure,
    TeardownStep,
};
pub use harness::{BlockingScope, HarnessScope, TestHarness, TestHarnessBuilder};
pub use orchestration::{IsolatedSecretsHarness, OrchestrationHarness};
pub use patch::EngineResolverPatchSet;
