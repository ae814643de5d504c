use std::path::PathBuf;
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Serialized};
use serde::{Deserialize, Serialize};

/// Environment prefix for harness settings.
pub const ENV_PREFIX: &str = "MCDB_HARNESS_";

/// Harness defaults, usually loaded from `MCDB_HARNESS_*` variables.
///
/// Builder options always win over values loaded here.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarnessConfig {
    /// Directory that receives the database files. System temp dir if unset.
    pub location_hint: Option<PathBuf>,
    pub compose_with_orchestration: bool,
    #[serde(with = "humantime_serde")]
    pub orchestration_startup_timeout: Duration,
    pub max_connections: u32,
    #[serde(with = "humantime_serde")]
    pub busy_timeout: Duration,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            location_hint: None,
            compose_with_orchestration: false,
            orchestration_startup_timeout: Duration::from_secs(30),
            max_connections: 5,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

impl HarnessConfig {
    /// Load from the process environment on top of the defaults.
    ///
    /// # Errors
    /// Returns an error when a variable does not deserialize into its field.
    pub fn load() -> Result<Self, Box<figment::Error>> {
        Self::from_figment(
            &Figment::from(Serialized::defaults(Self::default()))
                .merge(Env::prefixed(ENV_PREFIX)),
        )
    }

    /// Extract from an arbitrary figment.
    ///
    /// # Errors
    /// Returns an error when the figment does not deserialize.
    pub fn from_figment(figment: &Figment) -> Result<Self, Box<figment::Error>> {
        figment.extract().map_err(Box::new)
    }
}
