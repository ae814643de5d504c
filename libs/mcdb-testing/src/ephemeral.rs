//! Disposable file-backed `SQLite` databases.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mcdb::dialect::{self, SchemaSpec};
use mcdb::{ConnectOpts, DbEngine, DbError, Engine, EngineResolver};
use parking_lot::Mutex;
use sea_orm::sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
use tempfile::TempPath;
use uuid::Uuid;

use crate::config::HarnessConfig;
use crate::error::DatabaseInitError;

const SIDECAR_SUFFIXES: [&str; 3] = ["-wal", "-shm", "-journal"];
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Pool and locking settings of an ephemeral database.
#[derive(Clone, Debug)]
pub struct EphemeralOptions {
    pub max_connections: u32,
    pub busy_timeout: Duration,
}

impl Default for EphemeralOptions {
    fn default() -> Self {
        Self::from(&HarnessConfig::default())
    }
}

impl From<&HarnessConfig> for EphemeralOptions {
    fn from(cfg: &HarnessConfig) -> Self {
        Self {
            max_connections: cfg.max_connections,
            busy_timeout: cfg.busy_timeout,
        }
    }
}

/// A uniquely named `SQLite` file with the schema applied and a pool open on it.
pub struct EphemeralDatabase {
    id: Uuid,
    path: PathBuf,
    created_at: DateTime<Utc>,
    engine: Engine,
    spec: Arc<SchemaSpec>,
    file: Mutex<Option<TempPath>>,
}

impl fmt::Debug for EphemeralDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EphemeralDatabase")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("created_at", &self.created_at)
            .field("destroyed", &self.is_destroyed())
            .finish_non_exhaustive()
    }
}

impl EphemeralDatabase {
    /// Create a database with default pool settings.
    ///
    /// # Errors
    /// See [`EphemeralDatabase::create_with`].
    pub async fn create(
        spec: Arc<SchemaSpec>,
        location_hint: Option<&Path>,
    ) -> Result<Self, DatabaseInitError> {
        Self::create_with(spec, location_hint, &EphemeralOptions::default()).await
    }

    /// Create a fresh database file inside `location_hint` (or the system
    /// temp dir) and apply `spec` to it.
    ///
    /// # Errors
    /// [`DatabaseInitError`] when `spec` does not target `SQLite`, the file
    /// cannot be created, or opening or schema application fails. The file
    /// and its sidecars are removed before the error is returned.
    pub async fn create_with(
        spec: Arc<SchemaSpec>,
        location_hint: Option<&Path>,
        options: &EphemeralOptions,
    ) -> Result<Self, DatabaseInitError> {
        if spec.engine != DbEngine::Sqlite {
            return Err(DatabaseInitError::UnsupportedEngine(spec.engine));
        }

        let dir = location_hint.map_or_else(std::env::temp_dir, Path::to_path_buf);
        let io_err = |source| DatabaseInitError::Io {
            path: dir.clone(),
            source,
        };
        let created_root = missing_ancestor(&dir);
        std::fs::create_dir_all(&dir).map_err(io_err)?;
        let file = match tempfile::Builder::new()
            .prefix("mcdb-")
            .suffix(".db")
            .tempfile_in(&dir)
        {
            Ok(file) => file.into_temp_path(),
            Err(e) => {
                remove_created_dirs(&dir, created_root.as_deref());
                return Err(io_err(e));
            }
        };
        let path = file.to_path_buf();

        let engine = match open(&path, &spec, options).await {
            Ok(engine) => engine,
            Err(e) => {
                if let Err(cleanup) = remove_files(&path, file) {
                    tracing::error!(
                        path = %path.display(),
                        error = %cleanup,
                        "cannot remove partially created database"
                    );
                }
                remove_created_dirs(&dir, created_root.as_deref());
                return Err(e);
            }
        };

        let db = Self {
            id: Uuid::new_v4(),
            path,
            created_at: Utc::now(),
            engine,
            spec,
            file: Mutex::new(Some(file)),
        };
        tracing::info!(
            database = %db.id,
            path = %db.path.display(),
            tables = db.spec.tables.len(),
            "ephemeral database created"
        );
        Ok(db)
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub fn spec(&self) -> &Arc<SchemaSpec> {
        &self.spec
    }

    #[must_use]
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// `sqlite://` URL of the storage file.
    #[must_use]
    pub fn url(&self) -> String {
        format!("sqlite://{}", self.path.display())
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.file.lock().is_none()
    }

    #[must_use]
    pub fn connection_factory(&self) -> ConnectionFactory {
        ConnectionFactory {
            id: self.id,
            engine: self.engine.clone(),
        }
    }

    /// Drop every table and recreate it empty.
    ///
    /// # Errors
    /// Returns an error if the database is destroyed or a statement fails.
    pub async fn clear(&self) -> mcdb::Result<()> {
        if self.engine.is_closed() {
            return Err(DbError::Closed(self.engine.dsn().to_owned()));
        }
        dialect::clear_database(&self.engine, &self.spec).await
    }

    /// Close the pool and delete the storage file with its sidecars.
    /// Calling it again is a no-op.
    ///
    /// # Errors
    /// Returns the first file removal error; the remaining files are still
    /// attempted.
    pub async fn destroy(&self) -> io::Result<()> {
        let Some(file) = self.file.lock().take() else {
            return Ok(());
        };
        if tokio::time::timeout(CLOSE_GRACE, self.engine.close())
            .await
            .is_err()
        {
            tracing::warn!(database = %self.id, "connections still checked out at destroy");
        }
        self.finish_destroy(file)
    }

    /// Synchronous [`destroy`](Self::destroy) for contexts that cannot await.
    /// Checked-out connections are not waited for.
    ///
    /// The files are unlinked right away. Idle connections are closed in the
    /// background when a Tokio runtime is running (see [`Engine::close_now`]);
    /// otherwise they are released with the last clone of the engine, which
    /// may be a [`ConnectionFactory`] still held by an override frame.
    ///
    /// # Errors
    /// Same as [`destroy`](Self::destroy).
    pub fn destroy_now(&self) -> io::Result<()> {
        let Some(file) = self.file.lock().take() else {
            return Ok(());
        };
        self.engine.close_now();
        self.finish_destroy(file)
    }

    fn finish_destroy(&self, file: TempPath) -> io::Result<()> {
        let result = remove_files(&self.path, file);
        match &result {
            Ok(()) => tracing::info!(database = %self.id, "ephemeral database destroyed"),
            Err(e) => tracing::warn!(
                database = %self.id,
                error = %e,
                "ephemeral database left files behind"
            ),
        }
        result
    }
}

impl Drop for EphemeralDatabase {
    fn drop(&mut self) {
        if self.file.get_mut().is_some() {
            tracing::warn!(database = %self.id, "ephemeral database dropped without destroy");
            if let Err(e) = self.destroy_now() {
                tracing::error!(
                    database = %self.id,
                    error = %e,
                    "cannot destroy ephemeral database on drop"
                );
            }
        }
    }
}

async fn open(
    path: &Path,
    spec: &SchemaSpec,
    options: &EphemeralOptions,
) -> Result<Engine, DatabaseInitError> {
    let connect = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(options.busy_timeout);
    let opts = ConnectOpts {
        max_conns: Some(options.max_connections),
        ..ConnectOpts::default()
    };
    let engine = Engine::connect_sqlite_with(connect, &opts)
        .await
        .map_err(DatabaseInitError::Connect)?;

    if let Err(e) = dialect::create_all(&engine, spec).await {
        engine.close().await;
        return Err(DatabaseInitError::Schema(e));
    }
    Ok(engine)
}

/// Outermost ancestor of `dir` that does not exist yet.
fn missing_ancestor(dir: &Path) -> Option<PathBuf> {
    dir.ancestors()
        .take_while(|level| !level.as_os_str().is_empty() && !level.exists())
        .last()
        .map(Path::to_path_buf)
}

/// Remove the empty directories `create_with` made, from `dir` up to `root`.
fn remove_created_dirs(dir: &Path, root: Option<&Path>) {
    let Some(root) = root else {
        return;
    };
    for level in dir.ancestors() {
        if let Err(e) = std::fs::remove_dir(level) {
            tracing::warn!(path = %level.display(), error = %e, "cannot remove created directory");
            return;
        }
        if level == root {
            return;
        }
    }
}

fn sidecar(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn remove_files(path: &Path, file: TempPath) -> io::Result<()> {
    let mut first = None;
    for suffix in SIDECAR_SUFFIXES {
        match std::fs::remove_file(sidecar(path, suffix)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => {
                first.get_or_insert(e);
            }
            _ => {}
        }
    }
    match file.close() {
        Err(e) if e.kind() != io::ErrorKind::NotFound => {
            first.get_or_insert(e);
        }
        _ => {}
    }
    first.map_or(Ok(()), Err)
}

/// Resolver bound to one [`EphemeralDatabase`]; hands out its engine until
/// the database is destroyed.
#[derive(Clone, Debug)]
pub struct ConnectionFactory {
    id: Uuid,
    engine: Engine,
}

impl ConnectionFactory {
    #[must_use]
    pub fn database_id(&self) -> Uuid {
        self.id
    }

    /// # Errors
    /// [`DbError::Closed`] once the database is destroyed.
    pub fn connect(&self) -> mcdb::Result<Engine> {
        if self.engine.is_closed() {
            return Err(DbError::Closed(format!("ephemeral database {}", self.id)));
        }
        Ok(self.engine.clone())
    }
}

#[async_trait]
impl EngineResolver for ConnectionFactory {
    fn describe(&self) -> String {
        format!("ephemeral:{}", self.id)
    }

    fn resolve(&self) -> mcdb::Result<Engine> {
        self.connect()
    }

    async fn resolve_async(&self) -> mcdb::Result<Engine> {
        self.connect()
    }
}
