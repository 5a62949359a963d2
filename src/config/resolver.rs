use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Hardening knobs for background resolution. The defaults keep resolved
/// hostnames forever and never time a lookup out.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ResolverConfig {
    /// Lifetime of a resolved hostname in seconds (0 = cache indefinitely)
    #[serde(default)]
    pub hostname_ttl_secs: u64,

    /// Upper bound on one reverse lookup in milliseconds (0 = no timeout)
    #[serde(default)]
    pub hostname_timeout_ms: u64,
}

impl ResolverConfig {
    pub fn hostname_ttl(&self) -> Option<Duration> {
        (self.hostname_ttl_secs > 0).then(|| Duration::from_secs(self.hostname_ttl_secs))
    }

    pub fn hostname_timeout(&self) -> Option<Duration> {
        (self.hostname_timeout_ms > 0).then(|| Duration::from_millis(self.hostname_timeout_ms))
    }

    pub fn validate(&self) -> Result<()> {
        // A TTL shorter than a timeout would expire entries that are still being resolved
        if let (Some(ttl), Some(timeout)) = (self.hostname_ttl(), self.hostname_timeout()) {
            if ttl < timeout {
                return Err(Error::Config(ConfigError::Message(format!(
                    "hostname_ttl_secs {}s must not be shorter than hostname_timeout_ms {}ms",
                    self.hostname_ttl_secs, self.hostname_timeout_ms
                ))));
            }
        }
        Ok(())
    }
}
