use std::sync::Arc;

use mcdb::{
    AlreadyInstalledError, Nesting, OverrideKey, OverrideToken, ResolverBindings, RestoreError,
};

use crate::ephemeral::EphemeralDatabase;

/// One installed override frame pointing both resolvers at an ephemeral
/// database.
#[derive(Debug)]
pub struct EngineResolverPatchSet {
    token: Option<OverrideToken>,
}

impl EngineResolverPatchSet {
    /// Redirect `get_engine` and `get_engine_async` to `database`.
    ///
    /// # Errors
    /// [`AlreadyInstalledError`] when an override is active, unless `nesting`
    /// is [`Nesting::Compose`] and the active frame targets the same database.
    pub fn install(
        database: &EphemeralDatabase,
        nesting: Nesting,
    ) -> Result<Self, AlreadyInstalledError> {
        let factory = Arc::new(database.connection_factory());
        let token = mcdb::install_override(
            OverrideKey(database.id()),
            ResolverBindings::single(factory),
            nesting,
        )?;
        Ok(Self { token: Some(token) })
    }

    #[must_use]
    pub fn is_installed(&self) -> bool {
        self.token.is_some()
    }

    /// Reinstate the bindings captured at install. A second call is a no-op.
    ///
    /// # Errors
    /// [`RestoreError::OutOfOrder`] when a nested patch is still installed on
    /// top of this one. The frame is released anyway and the bindings return
    /// to their state before this patch once the nested ones are restored.
    pub fn restore(&mut self) -> Result<(), RestoreError> {
        let Some(token) = self.token.take() else {
            return Ok(());
        };
        mcdb::restore_override(&token)
    }
}

impl Drop for EngineResolverPatchSet {
    fn drop(&mut self) {
        if let Err(e) = self.restore() {
            tracing::error!(error = %e, "engine resolver patch could not be restored on drop");
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use mcdb::DbEngine;
    use mcdb::dialect::DialectAdapter;
    use mcdb_schema::{Column, ColumnType, SchemaMetadata, Table};
    use serial_test::serial;

    async fn database(dir: &std::path::Path) -> EphemeralDatabase {
        let metadata = SchemaMetadata::builder()
            .table(Table::new("t").column(Column::new("id", ColumnType::Integer).primary_key()))
            .build()
            .unwrap();
        let spec = DialectAdapter::new(DbEngine::Sqlite).translate(&metadata).unwrap();
        EphemeralDatabase::create(Arc::new(spec), Some(dir)).await.unwrap()
    }

    #[tokio::test]
    #[serial]
    async fn install_redirects_and_restore_reinstates_bindings() {
        let dir = tempfile::tempdir().unwrap();
        let db = database(dir.path()).await;
        let before = mcdb::current_bindings();

        let mut patch = EngineResolverPatchSet::install(&db, Nesting::Exclusive).unwrap();
        assert_eq!(mcdb::active_override(), Some(OverrideKey(db.id())));
        assert_eq!(mcdb::get_engine().unwrap().dsn(), db.engine().dsn());
        assert_eq!(mcdb::get_engine_async().await.unwrap().dsn(), db.engine().dsn());

        patch.restore().unwrap();
        assert!(!patch.is_installed());
        assert!(mcdb::current_bindings().same_as(&before));
        patch.restore().unwrap();

        db.destroy().await.unwrap();
    }

    #[tokio::test]
    #[serial]
    async fn compose_only_on_the_same_database() {
        let dir = tempfile::tempdir().unwrap();
        let outer = database(dir.path()).await;
        let other = database(dir.path()).await;

        let mut first = EngineResolverPatchSet::install(&outer, Nesting::Exclusive).unwrap();
        let err = EngineResolverPatchSet::install(&other, Nesting::Compose).unwrap_err();
        assert_eq!(err.active, OverrideKey(outer.id()));
        assert!(EngineResolverPatchSet::install(&outer, Nesting::Exclusive).is_err());

        let mut second = EngineResolverPatchSet::install(&outer, Nesting::Compose).unwrap();
        assert_eq!(mcdb::override_depth(), 2);

        assert_eq!(mcdb::get_engine().unwrap().dsn(), outer.engine().dsn());
        second.restore().unwrap();
        first.restore().unwrap();
        assert_eq!(mcdb::override_depth(), 0);

        outer.destroy().await.unwrap();
        other.destroy().await.unwrap();
    }

    #[tokio::test]
    #[serial]
    async fn outer_restored_first_is_released_by_the_inner_restore() {
        let dir = tempfile::tempdir().unwrap();
        let db = database(dir.path()).await;
        let before = mcdb::current_bindings();

        let mut outer = EngineResolverPatchSet::install(&db, Nesting::Exclusive).unwrap();
        let mut inner = EngineResolverPatchSet::install(&db, Nesting::Compose).unwrap();

        assert!(matches!(outer.restore(), Err(RestoreError::OutOfOrder { .. })));
        assert!(!outer.is_installed());
        outer.restore().unwrap();
        assert_eq!(mcdb::override_depth(), 2);

        drop(outer);
        assert_eq!(mcdb::override_depth(), 2);
        inner.restore().unwrap();
        assert_eq!(mcdb::override_depth(), 0);
        assert!(mcdb::current_bindings().same_as(&before));

        db.destroy().await.unwrap();
    }

    #[tokio::test]
    #[serial]
    async fn drop_restores() {
        let dir = tempfile::tempdir().unwrap();
        let db = database(dir.path()).await;
        let before = mcdb::current_bindings();
        {
            let _patch = EngineResolverPatchSet::install(&db, Nesting::Exclusive).unwrap();
            assert!(!mcdb::current_bindings().same_as(&before));
        }
        assert!(mcdb::current_bindings().same_as(&before));
        db.destroy().await.unwrap();
    }
}
