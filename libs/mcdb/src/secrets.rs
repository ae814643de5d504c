//! Process-wide secret store with isolated scopes.
//!
//! Secrets are looked up in the innermost scope only. [`SecretScope::enter`]
//! pushes an empty scope that hides every secret saved outside of it, and
//! dropping the guard discards everything saved inside. This lets a test
//! point `postgres-url` at a throwaway database without touching the values
//! the rest of the process sees.

use std::collections::HashMap;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use secrecy::{ExposeSecret, SecretString};
use url::Url;

use crate::config::PostgresSecretNames;
use crate::{DbError, Result};

struct Scope {
    id: u64,
    values: HashMap<String, SecretString>,
}

impl Scope {
    fn new(id: u64) -> Self {
        Self {
            id,
            values: HashMap::new(),
        }
    }
}

const ROOT_SCOPE: u64 = 0;

static NEXT_SCOPE: AtomicU64 = AtomicU64::new(ROOT_SCOPE + 1);
static STORE: LazyLock<RwLock<Vec<Scope>>> =
    LazyLock::new(|| RwLock::new(vec![Scope::new(ROOT_SCOPE)]));

/// Save (or replace) a secret in the innermost scope.
pub fn save_secret(name: &str, value: impl Into<String>) {
    let mut store = STORE.write();
    if let Some(scope) = store.last_mut() {
        scope
            .values
            .insert(name.to_owned(), SecretString::from(value.into()));
    }
}

/// Load a secret from the innermost scope.
#[must_use]
pub fn load_secret(name: &str) -> Option<SecretString> {
    let store = STORE.read();
    store
        .last()
        .and_then(|scope| scope.values.get(name))
        .map(|s| SecretString::from(s.expose_secret().to_owned()))
}

/// Remove a secret from the innermost scope; returns whether it existed.
pub fn remove_secret(name: &str) -> bool {
    let mut store = STORE.write();
    store
        .last_mut()
        .is_some_and(|scope| scope.values.remove(name).is_some())
}

/// Number of scopes above the root one.
#[must_use]
pub fn scope_depth() -> usize {
    STORE.read().len() - 1
}

/// Guard for an isolated secret scope.
#[must_use = "the scope is left as soon as the guard is dropped"]
#[derive(Debug)]
pub struct SecretScope {
    id: u64,
}

impl SecretScope {
    pub fn enter() -> Self {
        let id = NEXT_SCOPE.fetch_add(1, Ordering::Relaxed);
        STORE.write().push(Scope::new(id));
        tracing::debug!(scope = id, "entered secret scope");
        Self { id }
    }
}

impl Drop for SecretScope {
    fn drop(&mut self) {
        let mut store = STORE.write();
        match store.iter().rposition(|s| s.id == self.id) {
            Some(pos) if pos + 1 == store.len() => {
                store.pop();
                tracing::debug!(scope = self.id, "left secret scope");
            }
            Some(pos) => {
                // Inner scopes stay active; only this one is discarded.
                store.remove(pos);
                tracing::warn!(scope = self.id, "secret scope left out of order");
            }
            None => tracing::warn!(scope = self.id, "secret scope already gone"),
        }
    }
}

/// Assemble a `postgresql://` URL from the five component secrets.
///
/// The user and password are percent-encoded.
///
/// # Errors
/// Returns `DbError::MissingSecret` naming the first absent component, or
/// `DbError::InvalidConfig` when the components do not form a valid URL.
pub fn get_postgres_url(names: &PostgresSecretNames) -> Result<SecretString> {
    let load =
        |name: &str| load_secret(name).ok_or_else(|| DbError::MissingSecret(name.to_owned()));
    let user = load(&names.user)?;
    let password = load(&names.password)?;
    let host = load(&names.host)?;
    let port = load(&names.port)?;
    let database = load(&names.database)?;

    let port: u16 = port
        .expose_secret()
        .trim()
        .parse()
        .map_err(|_| DbError::InvalidConfig(format!("secret '{}' is not a port", names.port)))?;

    let mut url = Url::parse(&format!("postgresql://{}", host.expose_secret().trim()))?;
    let invalid = |what: &str| DbError::InvalidConfig(format!("cannot set {what} on database URL"));
    url.set_port(Some(port)).map_err(|()| invalid("port"))?;
    url.set_username(user.expose_secret())
        .map_err(|()| invalid("user"))?;
    url.set_password(Some(password.expose_secret()))
        .map_err(|()| invalid("password"))?;
    url.set_path(database.expose_secret().trim());

    Ok(SecretString::from(String::from(url)))
}
