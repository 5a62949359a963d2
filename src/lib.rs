//! Live, continuously refreshed view of a host's network connections.
//!
//! Successive snapshots of the OS connection table are reconciled into a set
//! of connection records. Each record walks the lifecycle
//! `New -> Active -> Dying -> Dead -> removed` and is enriched in the
//! background with its owning process and the reverse-DNS names of its
//! endpoints. Every observable mutation is published as a [`RegistryEvent`].

mod config;
mod connection;
mod constants;
mod errors;
pub mod metrics;
mod monitor;
mod notifier;
mod registry;
mod resolver;

pub use config::*;
pub use connection::*;
pub use constants::*;
pub use errors::*;
pub use monitor::*;
pub use notifier::*;
pub use registry::*;
pub use resolver::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub(crate) mod test_utils;
