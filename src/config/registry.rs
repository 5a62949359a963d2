use std::fmt::Debug;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::constants::DEFAULT_EVENT_BUFFER_SIZE;
use crate::constants::DEFAULT_GRACE_CYCLES;
use crate::Error;
use crate::Result;

/// Connection registry parameters
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RegistryConfig {
    /// Number of cycles a Dead record stays registered before removal.
    /// Must be at least 1 so consumers observe the Dead state.
    #[serde(default = "default_grace_cycles")]
    pub grace_cycles: u64,

    /// Capacity of the change event broadcast channel. Subscribers that fall
    /// further behind than this lose the oldest events.
    #[serde(default = "default_event_buffer_size")]
    pub event_buffer_size: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            grace_cycles: default_grace_cycles(),
            event_buffer_size: default_event_buffer_size(),
        }
    }
}

impl RegistryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.grace_cycles == 0 {
            return Err(Error::Config(ConfigError::Message(
                "grace_cycles must be at least 1".into(),
            )));
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(ConfigError::Message(
                "event_buffer_size must be > 0".into(),
            )));
        }

        Ok(())
    }
}

fn default_grace_cycles() -> u64 {
    DEFAULT_GRACE_CYCLES
}
fn default_event_buffer_size() -> usize {
    DEFAULT_EVENT_BUFFER_SIZE
}
