//! Second isolation layer started after the resolvers are patched.

use async_trait::async_trait;
use mcdb::secrets::{self, SecretScope};

/// An external isolation harness composed with a [`TestHarness`](crate::TestHarness).
///
/// `start` is bounded by the harness startup timeout; its future may be
/// dropped before completion, after which `stop` is still called.
#[async_trait]
pub trait OrchestrationHarness: Send {
    fn name(&self) -> &str;

    /// Resolve once the harness is ready to serve `database_url`.
    ///
    /// # Errors
    /// Any failure of the external collaborator.
    async fn start(&mut self, database_url: &str) -> anyhow::Result<()>;

    /// Tear down. Called once, also after a failed or timed out `start`.
    ///
    /// # Errors
    /// Any failure of the external collaborator.
    fn stop(&mut self) -> anyhow::Result<()>;
}

/// Default orchestration: an isolated secret scope in which the database URL
/// secret points at the ephemeral database.
#[derive(Debug)]
pub struct IsolatedSecretsHarness {
    url_secret: String,
    scope: Option<SecretScope>,
}

impl Default for IsolatedSecretsHarness {
    fn default() -> Self {
        Self::new("postgres-url")
    }
}

impl IsolatedSecretsHarness {
    #[must_use]
    pub fn new(url_secret: impl Into<String>) -> Self {
        Self {
            url_secret: url_secret.into(),
            scope: None,
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.scope.is_some()
    }
}

#[async_trait]
impl OrchestrationHarness for IsolatedSecretsHarness {
    fn name(&self) -> &str {
        "isolated-secrets"
    }

    async fn start(&mut self, database_url: &str) -> anyhow::Result<()> {
        if self.scope.is_some() {
            anyhow::bail!("secret scope already entered");
        }
        self.scope = Some(SecretScope::enter());
        secrets::save_secret(&self.url_secret, database_url);
        tracing::debug!(secret = %self.url_secret, "database url secret redirected");
        Ok(())
    }

    fn stop(&mut self) -> anyhow::Result<()> {
        self.scope.take();
        Ok(())
    }
}
