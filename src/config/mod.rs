//! Configuration management for the connection tracker.
//!
//! Provides hierarchical configuration loading and validation with:
//! - Default values as code base
//! - Configuration file support
//! - Environment variable overrides
//! - Component-wise validation
mod monitor;
mod registry;
mod resolver;
pub use monitor::*;
pub use registry::*;
pub use resolver::*;


use std::env;
use std::fmt::Debug;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::constants::CONFIG_ENV_PREFIX;
use crate::Result;

/// Root settings for the connection tracker
///
/// Sources are merged in the following order (later sources override earlier):
/// 1. Default values from code
/// 2. Configuration file named by `CONFIG_PATH` (if set)
/// 3. Environment variables with `CONNWATCH__` prefix (highest priority)
#[derive(Serialize, Deserialize, Clone, Default)]
pub struct ConnwatchConfig {
    /// Record lifecycle and event buffering
    #[serde(default)]
    pub registry: RegistryConfig,
    /// Owner and hostname resolution hardening
    #[serde(default)]
    pub resolver: ResolverConfig,
    /// Polling cadence
    #[serde(default)]
    pub monitor: MonitorConfig,
}

impl Debug for ConnwatchConfig {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ConnwatchConfig")
            .field("registry", &self.registry)
            .field("resolver", &self.resolver)
            .field("monitor", &self.monitor)
            .finish()
    }
}

impl ConnwatchConfig {
    /// Loads configuration from hierarchical sources without validation.
    ///
    /// # Note
    /// Validation is deferred so that further overrides can be layered with
    /// [`with_override_config`](Self::with_override_config). Callers must call
    /// [`validate`](Self::validate) before use.
    ///
    /// # Examples
    /// ```ignore
    /// std::env::set_var("CONNWATCH__REGISTRY__GRACE_CYCLES", "3");
    /// let cfg = ConnwatchConfig::new()?.validate()?;
    /// ```
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var("CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        builder = builder.add_source(env_source());

        let config: Self = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Applies additional overrides from a file, then the environment again.
    ///
    /// No validation happens here; call [`validate`](Self::validate) after all
    /// overrides are applied.
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(env_source())
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Validates every section and returns the validated instance.
    pub fn validate(self) -> Result<Self> {
        self.registry.validate()?;
        self.resolver.validate()?;
        self.monitor.validate()?;
        Ok(self)
    }
}

fn env_source() -> Environment {
    Environment::with_prefix(CONFIG_ENV_PREFIX)
        .separator("__")
        .ignore_empty(true)
        .try_parsing(true)
}
