//! Scoped acquisition of an ephemeral database with patched resolvers.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use mcdb::dialect::{DialectAdapter, NativeType};
use mcdb::{DbEngine, DbError, Engine, Nesting};
use mcdb_schema::SchemaMetadata;
use tokio::runtime::Runtime;

use crate::config::HarnessConfig;
use crate::ephemeral::{EphemeralDatabase, EphemeralOptions};
use crate::error::{
    CompositionTimeoutError, DatabaseInitError, HarnessError, TeardownError, TeardownStep,
};
use crate::orchestration::{IsolatedSecretsHarness, OrchestrationHarness};
use crate::patch::EngineResolverPatchSet;

/// A running harness: the ephemeral database plus the override frame that
/// routes [`mcdb::get_engine`] and [`mcdb::get_engine_async`] to it.
///
/// Prefer [`TestHarnessBuilder::scoped`] or [`TestHarnessBuilder::run_blocking`].
/// With [`TestHarnessBuilder::start`], call [`TestHarness::close`] to observe
/// teardown errors; dropping the harness tears down synchronously and only
/// logs them.
pub struct TestHarness {
    database: Arc<EphemeralDatabase>,
    owner: bool,
    patch: EngineResolverPatchSet,
    orchestration: Option<Box<dyn OrchestrationHarness>>,
    closed: bool,
}

impl std::fmt::Debug for TestHarness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestHarness")
            .field("database", &self.database)
            .field("owner", &self.owner)
            .field("patch", &self.patch)
            .field(
                "orchestration",
                &self.orchestration.as_ref().map(|o| o.name().to_owned()),
            )
            .finish_non_exhaustive()
    }
}

impl TestHarness {
    #[must_use]
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::default()
    }

    #[must_use]
    pub fn engine(&self) -> &Engine {
        self.database.engine()
    }

    #[must_use]
    pub fn database(&self) -> &Arc<EphemeralDatabase> {
        &self.database
    }

    /// True when this harness reuses an outer harness's database.
    #[must_use]
    pub fn is_nested(&self) -> bool {
        !self.owner
    }

    #[must_use]
    pub fn scope(&self) -> HarnessScope {
        HarnessScope {
            database: Arc::clone(&self.database),
        }
    }

    /// Builder for a harness nested in this one.
    #[must_use]
    pub fn nested(&self) -> TestHarnessBuilder {
        TestHarness::builder().nest_within(self)
    }

    /// Stop the orchestration harness, restore the resolvers, then destroy
    /// the database if this harness owns it.
    ///
    /// # Errors
    /// [`TeardownError`] listing every step that failed. All steps run.
    pub async fn close(mut self) -> Result<(), TeardownError> {
        let mut errors = TeardownError::default();
        self.stop_and_restore(&mut errors);
        if self.owner {
            if let Err(e) = self.database.destroy().await {
                errors.push(TeardownStep::Destroy, e);
            }
        }
        self.finish(errors)
    }

    fn close_now(&mut self) -> Result<(), TeardownError> {
        let mut errors = TeardownError::default();
        self.stop_and_restore(&mut errors);
        if self.owner {
            if let Err(e) = self.database.destroy_now() {
                errors.push(TeardownStep::Destroy, e);
            }
        }
        self.finish(errors)
    }

    fn stop_and_restore(&mut self, errors: &mut TeardownError) {
        self.closed = true;
        if let Some(mut orchestration) = self.orchestration.take() {
            if let Err(e) = orchestration.stop() {
                errors.push(TeardownStep::Orchestration, e);
            }
        }
        if let Err(e) = self.patch.restore() {
            errors.push(TeardownStep::Restore, e);
        }
    }

    fn finish(&self, errors: TeardownError) -> Result<(), TeardownError> {
        if errors.failures.is_empty() {
            tracing::info!(
                database = %self.database.id(),
                nested = !self.owner,
                "test harness closed"
            );
        }
        errors.into_result()
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        tracing::warn!(database = %self.database.id(), "test harness dropped without close");
        if let Err(e) = self.close_now() {
            tracing::error!(error = %e, "test harness teardown on drop failed");
        }
    }
}

/// Cheap handle passed into scoped bodies.
#[derive(Clone, Debug)]
pub struct HarnessScope {
    database: Arc<EphemeralDatabase>,
}

impl HarnessScope {
    #[must_use]
    pub fn engine(&self) -> &Engine {
        self.database.engine()
    }

    #[must_use]
    pub fn database(&self) -> &Arc<EphemeralDatabase> {
        &self.database
    }

    #[must_use]
    pub fn nested(&self) -> TestHarnessBuilder {
        TestHarnessBuilder {
            outer: Some(Arc::clone(&self.database)),
            ..TestHarnessBuilder::default()
        }
    }
}

/// Scope handed to [`TestHarnessBuilder::run_blocking`] bodies.
pub struct BlockingScope<'a> {
    runtime: &'a Runtime,
    scope: HarnessScope,
}

impl BlockingScope<'_> {
    #[must_use]
    pub fn engine(&self) -> &Engine {
        self.scope.engine()
    }

    #[must_use]
    pub fn scope(&self) -> &HarnessScope {
        &self.scope
    }

    /// Drive a future on the harness runtime.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }
}

/// Options for a [`TestHarness`]. Explicit options win over [`HarnessConfig`].
#[derive(Default)]
#[must_use]
pub struct TestHarnessBuilder {
    location_hint: Option<PathBuf>,
    schema: Option<Arc<SchemaMetadata>>,
    compose_with_orchestration: Option<bool>,
    orchestration_startup_timeout: Option<Duration>,
    orchestration: Option<Box<dyn OrchestrationHarness>>,
    outer: Option<Arc<EphemeralDatabase>>,
    fallbacks: Vec<(String, NativeType)>,
    config: Option<HarnessConfig>,
}

impl TestHarnessBuilder {
    /// Directory for the database file.
    pub fn location_hint(mut self, dir: impl Into<PathBuf>) -> Self {
        self.location_hint = Some(dir.into());
        self
    }

    /// Use `schema` instead of the production catalog.
    pub fn schema(mut self, schema: impl Into<Arc<SchemaMetadata>>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn compose_with_orchestration(mut self, compose: bool) -> Self {
        self.compose_with_orchestration = Some(compose);
        self
    }

    pub fn orchestration_startup_timeout(mut self, timeout: Duration) -> Self {
        self.orchestration_startup_timeout = Some(timeout);
        self
    }

    /// Compose with `harness` instead of [`IsolatedSecretsHarness`].
    pub fn orchestration(mut self, harness: impl OrchestrationHarness + 'static) -> Self {
        self.orchestration = Some(Box::new(harness));
        self.compose_with_orchestration = Some(true);
        self
    }

    /// Reuse the database of `outer` and stack on its override frame.
    pub fn nest_within(mut self, outer: &TestHarness) -> Self {
        self.outer = Some(Arc::clone(&outer.database));
        self
    }

    /// Map a custom column type (by its type name) for the `SQLite` translation.
    pub fn type_fallback(mut self, type_name: impl Into<String>, native: NativeType) -> Self {
        self.fallbacks.push((type_name.into(), native));
        self
    }

    pub fn config(mut self, config: HarnessConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Load [`HarnessConfig`] from `MCDB_HARNESS_*` variables.
    ///
    /// # Errors
    /// Returns an error when a variable does not deserialize.
    pub fn config_from_env(self) -> Result<Self, HarnessError> {
        Ok(self.config(HarnessConfig::load()?))
    }

    /// Create (or reuse) the database, patch the resolvers and start the
    /// orchestration harness if requested.
    ///
    /// # Errors
    /// Whatever setup step failed. Everything already set up is unwound
    /// first; unwinding failures are logged.
    pub async fn start(self) -> Result<TestHarness, HarnessError> {
        let config = self.config.unwrap_or_default();
        let compose = self
            .compose_with_orchestration
            .unwrap_or(config.compose_with_orchestration);
        let timeout = self
            .orchestration_startup_timeout
            .unwrap_or(config.orchestration_startup_timeout);

        let (database, owner) = if let Some(outer) = self.outer {
            if self.schema.is_some() {
                tracing::warn!("schema option ignored by a nested harness");
            }
            if outer.is_destroyed() {
                return Err(DatabaseInitError::Connect(DbError::Closed(format!(
                    "ephemeral database {}",
                    outer.id()
                )))
                .into());
            }
            (outer, false)
        } else {
            let schema = self
                .schema
                .unwrap_or_else(|| Arc::new(mcdb_schema::catalog::schema()));
            let mut adapter = DialectAdapter::new(DbEngine::Sqlite);
            for (name, native) in self.fallbacks {
                adapter.register_fallback(name, native);
            }
            let spec = adapter.translate(&schema)?;
            let location = self.location_hint.or_else(|| config.location_hint.clone());
            let db = EphemeralDatabase::create_with(
                Arc::new(spec),
                location.as_deref(),
                &EphemeralOptions::from(&config),
            )
            .await?;
            (Arc::new(db), true)
        };

        let nesting = if owner {
            Nesting::Exclusive
        } else {
            Nesting::Compose
        };
        let patch = match EngineResolverPatchSet::install(&database, nesting) {
            Ok(patch) => patch,
            Err(e) => {
                if owner {
                    if let Err(cleanup) = database.destroy().await {
                        tracing::error!(
                            error = %cleanup,
                            "cannot destroy database after refused override"
                        );
                    }
                }
                return Err(e.into());
            }
        };

        let mut harness = TestHarness {
            database,
            owner,
            patch,
            orchestration: None,
            closed: false,
        };
        tracing::info!(
            database = %harness.database.id(),
            nested = !owner,
            "test harness started"
        );

        if compose {
            let mut orchestration = self
                .orchestration
                .unwrap_or_else(|| Box::new(IsolatedSecretsHarness::default()));
            let name = orchestration.name().to_owned();
            let url = harness.database.url();
            let failure = match tokio::time::timeout(timeout, orchestration.start(&url)).await {
                Ok(Ok(())) => None,
                Ok(Err(source)) => Some(HarnessError::Composition {
                    harness: name,
                    source: source.into(),
                }),
                Err(_) => Some(HarnessError::from(CompositionTimeoutError {
                    harness: name,
                    timeout,
                })),
            };
            harness.orchestration = Some(orchestration);
            if let Some(err) = failure {
                if let Err(unwind) = harness.close().await {
                    tracing::error!(error = %unwind, "unwinding after failed orchestration start");
                }
                return Err(err);
            }
            tracing::debug!("orchestration harness ready");
        }

        Ok(harness)
    }

    /// Run an async body inside a harness. Teardown runs on every exit,
    /// including a panic in `body`, which is resumed afterwards.
    ///
    /// # Errors
    /// Setup errors, or the [`TeardownError`] of a body that returned
    /// normally.
    pub async fn scoped<F, Fut, T>(self, body: F) -> Result<T, HarnessError>
    where
        F: FnOnce(HarnessScope) -> Fut,
        Fut: Future<Output = T>,
    {
        let harness = self.start().await?;
        let scope = harness.scope();
        let outcome = AssertUnwindSafe(async move { body(scope).await })
            .catch_unwind()
            .await;
        let teardown = harness.close().await;
        match outcome {
            Ok(value) => {
                teardown?;
                Ok(value)
            }
            Err(panic) => {
                if let Err(e) = teardown {
                    tracing::error!(error = %e, "teardown after panic in harness scope failed");
                }
                std::panic::resume_unwind(panic)
            }
        }
    }

    /// Synchronous counterpart of [`scoped`](Self::scoped) on a private runtime.
    ///
    /// # Errors
    /// Same as [`scoped`](Self::scoped), plus [`HarnessError::Runtime`].
    ///
    /// # Panics
    /// Resumes a panic raised by `body`. Panics when called from inside an
    /// async context.
    pub fn run_blocking<F, T>(self, body: F) -> Result<T, HarnessError>
    where
        F: FnOnce(&BlockingScope<'_>) -> T,
    {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .map_err(HarnessError::Runtime)?;
        let harness = runtime.block_on(self.start())?;

        let outcome = {
            let _entered = runtime.enter();
            let scope = BlockingScope {
                runtime: &runtime,
                scope: harness.scope(),
            };
            std::panic::catch_unwind(AssertUnwindSafe(|| body(&scope)))
        };
        let teardown = runtime.block_on(harness.close());
        match outcome {
            Ok(value) => {
                teardown?;
                Ok(value)
            }
            Err(panic) => {
                if let Err(e) = teardown {
                    tracing::error!(
                        error = %e,
                        "teardown after panic in blocking harness scope failed"
                    );
                }
                std::panic::resume_unwind(panic)
            }
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use mcdb_schema::{Column, ColumnType, Table};
    use serial_test::serial;
    use tracing_test::traced_test;

    fn schema() -> SchemaMetadata {
        SchemaMetadata::builder()
            .table(Table::new("tick").column(Column::new("id", ColumnType::BigInt).primary_key()))
            .build()
            .unwrap()
    }

    #[tokio::test]
    #[serial]
    #[traced_test]
    async fn drop_without_close_tears_down_and_warns() {
        let dir = tempfile::tempdir().unwrap();
        let harness = TestHarness::builder()
            .schema(schema())
            .location_hint(dir.path())
            .start()
            .await
            .unwrap();
        assert!(logs_contain("test harness started"));

        drop(harness);
        assert!(logs_contain("test harness dropped without close"));
        assert!(logs_contain("ephemeral database destroyed"));
        assert_eq!(mcdb::override_depth(), 0);
    }

    #[tokio::test]
    #[serial]
    async fn nested_harness_on_destroyed_database_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let outer = TestHarness::builder()
            .schema(schema())
            .location_hint(dir.path())
            .start()
            .await
            .unwrap();
        let scope = outer.scope();
        outer.close().await.unwrap();

        let err = scope.nested().start().await.unwrap_err();
        assert!(
            matches!(
                err,
                HarnessError::DatabaseInit(DatabaseInitError::Connect(DbError::Closed(_)))
            ),
            "{err}"
        );
        assert_eq!(mcdb::override_depth(), 0);
    }

    struct StuckOnStop;

    #[async_trait::async_trait]
    impl OrchestrationHarness for StuckOnStop {
        fn name(&self) -> &str {
            "stuck"
        }

        async fn start(&mut self, _database_url: &str) -> anyhow::Result<()> {
            Ok(())
        }

        fn stop(&mut self) -> anyhow::Result<()> {
            anyhow::bail!("worker did not exit")
        }
    }

    #[tokio::test]
    #[serial]
    async fn failed_teardown_step_does_not_skip_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let before = mcdb::current_bindings();
        let harness = TestHarness::builder()
            .schema(schema())
            .location_hint(dir.path())
            .orchestration(StuckOnStop)
            .start()
            .await
            .unwrap();
        let database = Arc::clone(harness.database());

        let err = harness.close().await.unwrap_err();
        assert!(err.failed(TeardownStep::Orchestration));
        assert!(!err.failed(TeardownStep::Restore));
        assert!(err.to_string().contains("worker did not exit"), "{err}");
        assert!(database.is_destroyed());
        assert!(mcdb::current_bindings().same_as(&before));
    }
}
