//! Process-wide engine resolver registry.
//!
//! Production code obtains its [`Engine`] from [`get_engine`] or
//! [`get_engine_async`]; both consult the registry's current
//! [`ResolverBindings`]. Tests redirect them by pushing an override frame:
//!
//! - Frames form a strict stack. Each frame remembers the bindings that were
//!   current before it and restores exactly those `Arc`s when popped.
//! - A frame may only be pushed on top of another one when the caller asks for
//!   [`Nesting::Compose`] and targets the same [`OverrideKey`]. Anything else
//!   fails with [`AlreadyInstalledError`].
//! - Only the top frame is popped on restore. Restoring a frame further down
//!   releases it instead; it is popped together with the frames above it once
//!   they are restored, so the bindings end up where they were before it.
//!
//! The lock is never held while a resolver runs: bindings are cloned out
//! under a read lock first.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::{Engine, Result};

/// Resolves a live [`Engine`].
#[async_trait]
pub trait EngineResolver: Send + Sync {
    /// Short human readable description, used in logs.
    fn describe(&self) -> String;

    /// Resolve without awaiting. May require an ambient Tokio runtime.
    ///
    /// # Errors
    /// Implementation specific.
    fn resolve(&self) -> Result<Engine>;

    /// Resolve on the async path.
    ///
    /// # Errors
    /// Implementation specific.
    async fn resolve_async(&self) -> Result<Engine>;
}

/// The pair of resolvers behind [`get_engine`] and [`get_engine_async`].
#[derive(Clone)]
pub struct ResolverBindings {
    pub sync_resolver: Arc<dyn EngineResolver>,
    pub async_resolver: Arc<dyn EngineResolver>,
}

impl ResolverBindings {
    /// Bind one resolver to both entry points.
    #[must_use]
    pub fn single(resolver: Arc<dyn EngineResolver>) -> Self {
        Self {
            sync_resolver: Arc::clone(&resolver),
            async_resolver: resolver,
        }
    }

    /// Pointer identity of both bindings.
    #[must_use]
    pub fn same_as(&self, other: &ResolverBindings) -> bool {
        same_resolver(&self.sync_resolver, &other.sync_resolver)
            && same_resolver(&self.async_resolver, &other.async_resolver)
    }
}

fn same_resolver(a: &Arc<dyn EngineResolver>, b: &Arc<dyn EngineResolver>) -> bool {
    // Compare data pointers only; vtable pointers may differ across codegen units.
    std::ptr::eq(Arc::as_ptr(a).cast::<()>(), Arc::as_ptr(b).cast::<()>())
}

impl fmt::Debug for ResolverBindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolverBindings")
            .field("sync", &self.sync_resolver.describe())
            .field("async", &self.async_resolver.describe())
            .finish()
    }
}

/// Identity of the target an override frame redirects to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OverrideKey(pub Uuid);

impl fmt::Display for OverrideKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether a new frame may stack on an active one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Nesting {
    /// Fail if any override is active.
    #[default]
    Exclusive,
    /// Allow stacking on an active frame with the same key.
    Compose,
}

/// Handle of an installed frame, presented to [`restore_override`].
#[derive(Debug, PartialEq, Eq)]
#[must_use = "an override stays installed until its token is restored"]
pub struct OverrideToken {
    id: u64,
    key: OverrideKey,
}

impl OverrideToken {
    #[must_use]
    pub fn key(&self) -> OverrideKey {
        self.key
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("engine resolvers are already overridden for database {active}; refusing override for {requested} ({nesting:?})")]
pub struct AlreadyInstalledError {
    pub active: OverrideKey,
    pub requested: OverrideKey,
    pub nesting: Nesting,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RestoreError {
    #[error("override frame {token} is not on top of the stack (top is {top})")]
    OutOfOrder { token: u64, top: u64 },

    #[error("override frame {token} is not installed")]
    NotInstalled { token: u64 },
}

struct Frame {
    id: u64,
    key: OverrideKey,
    previous: ResolverBindings,
    released: bool,
}

struct Registry {
    current: ResolverBindings,
    stack: Vec<Frame>,
}

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);
static REGISTRY: LazyLock<RwLock<Registry>> = LazyLock::new(|| {
    RwLock::new(Registry {
        current: ResolverBindings::single(Arc::new(ConfiguredResolver::from_env())),
        stack: Vec::new(),
    })
});

/// Resolve an engine through the current sync binding.
///
/// # Errors
/// Whatever the bound resolver returns.
pub fn get_engine() -> Result<Engine> {
    let resolver = Arc::clone(&REGISTRY.read().current.sync_resolver);
    resolver.resolve()
}

/// Resolve an engine through the current async binding.
///
/// # Errors
/// Whatever the bound resolver returns.
pub async fn get_engine_async() -> Result<Engine> {
    let resolver = Arc::clone(&REGISTRY.read().current.async_resolver);
    resolver.resolve_async().await
}

/// Snapshot of the current bindings.
#[must_use]
pub fn current_bindings() -> ResolverBindings {
    REGISTRY.read().current.clone()
}

/// Key of the top frame, if any override is active.
#[must_use]
pub fn active_override() -> Option<OverrideKey> {
    REGISTRY.read().stack.last().map(|f| f.key)
}

#[must_use]
pub fn override_depth() -> usize {
    REGISTRY.read().stack.len()
}

/// Push an override frame redirecting both entry points to `bindings`.
///
/// # Errors
/// [`AlreadyInstalledError`] when an override is active and the request is
/// not a composition on the same key.
pub fn install_override(
    key: OverrideKey,
    bindings: ResolverBindings,
    nesting: Nesting,
) -> std::result::Result<OverrideToken, AlreadyInstalledError> {
    let mut registry = REGISTRY.write();
    if let Some(top) = registry.stack.last() {
        if nesting != Nesting::Compose || top.key != key {
            return Err(AlreadyInstalledError {
                active: top.key,
                requested: key,
                nesting,
            });
        }
    }

    let id = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
    let previous = std::mem::replace(&mut registry.current, bindings);
    registry.stack.push(Frame {
        id,
        key,
        previous,
        released: false,
    });
    tracing::info!(
        frame = id,
        database = %key,
        depth = registry.stack.len(),
        "engine resolvers overridden"
    );
    Ok(OverrideToken { id, key })
}

/// Pop the frame identified by `token` and reinstate the bindings it captured.
///
/// A frame that is not on top is marked released and stays on the stack until
/// every frame above it has been restored. Popping the frame above then pops
/// the released ones as well, reinstating the bindings captured by the lowest.
///
/// # Errors
/// [`RestoreError::OutOfOrder`] when another frame sits on top of it. The
/// frame is released all the same and the token must not be presented again.
/// [`RestoreError::NotInstalled`] when the frame is gone.
pub fn restore_override(token: &OverrideToken) -> std::result::Result<(), RestoreError> {
    let mut registry = REGISTRY.write();
    let Some(top) = registry.stack.last().map(|f| f.id) else {
        return Err(RestoreError::NotInstalled { token: token.id });
    };
    if top != token.id {
        let Some(frame) = registry.stack.iter_mut().find(|f| f.id == token.id) else {
            return Err(RestoreError::NotInstalled { token: token.id });
        };
        frame.released = true;
        tracing::warn!(
            frame = token.id,
            top,
            "override frame released below the top; it is popped once the frames above it are"
        );
        return Err(RestoreError::OutOfOrder {
            token: token.id,
            top,
        });
    }

    let mut popped = 0usize;
    while let Some(frame) = registry.stack.pop() {
        registry.current = frame.previous;
        popped += 1;
        if !registry.stack.last().is_some_and(|f| f.released) {
            break;
        }
    }
    tracing::info!(
        frame = token.id,
        popped,
        depth = registry.stack.len(),
        "engine resolvers restored"
    );
    Ok(())
}

/// Default resolver: builds a pooled engine from [`DatabaseConfig`] and the
/// secret store, reusing it while the resolved DSN stays the same.
pub struct ConfiguredResolver {
    config: Option<DatabaseConfig>,
    cached: Mutex<Option<(SecretString, Engine)>>,
}

impl ConfiguredResolver {
    /// Resolver that reloads `MCDB_*` configuration on every call.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            config: None,
            cached: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn new(config: DatabaseConfig) -> Self {
        Self {
            config: Some(config),
            cached: Mutex::new(None),
        }
    }

    fn with_config<T>(&self, f: impl FnOnce(&DatabaseConfig) -> Result<T>) -> Result<T> {
        match &self.config {
            Some(cfg) => f(cfg),
            None => f(&DatabaseConfig::load()?),
        }
    }

    fn settings(&self) -> Result<(SecretString, crate::ConnectOpts)> {
        self.with_config(|cfg| Ok((cfg.resolve_dsn()?, cfg.pool.connect_opts())))
    }

    fn cached(&self, dsn: &SecretString) -> Option<Engine> {
        let cached = self.cached.lock();
        cached
            .as_ref()
            .filter(|(key, engine)| {
                key.expose_secret() == dsn.expose_secret() && !engine.is_closed()
            })
            .map(|(_, engine)| engine.clone())
    }

    fn store(&self, dsn: SecretString, engine: &Engine) {
        *self.cached.lock() = Some((dsn, engine.clone()));
    }
}

#[async_trait]
impl EngineResolver for ConfiguredResolver {
    fn describe(&self) -> String {
        "configured".to_owned()
    }

    fn resolve(&self) -> Result<Engine> {
        let (dsn, opts) = self.settings()?;
        if let Some(engine) = self.cached(&dsn) {
            return Ok(engine);
        }
        let engine = Engine::connect_lazy(dsn.expose_secret(), &opts)?;
        tracing::info!(dsn = %engine.dsn(), "resolved database engine");
        self.store(dsn, &engine);
        Ok(engine)
    }

    async fn resolve_async(&self) -> Result<Engine> {
        let (dsn, opts) = self.settings()?;
        if let Some(engine) = self.cached(&dsn) {
            return Ok(engine);
        }
        let engine = Engine::connect(dsn.expose_secret(), &opts).await?;
        tracing::info!(dsn = %engine.dsn(), "resolved database engine");
        self.store(dsn, &engine);
        Ok(engine)
    }
}
