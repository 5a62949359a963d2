//! Connection tracking error hierarchy
//!
//! Errors are grouped by the stage that raises them: parsing raw table
//! entries, talking to external resolvers, and driving the record lifecycle.
//! None of them is fatal to a reconciliation cycle; the registry logs and
//! counts per-entry failures and keeps going.

use std::net::IpAddr;
use std::time::Duration;

use config::ConfigError;

use crate::LifecycleState;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Settings could not be loaded or failed validation
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A raw connection table entry could not be interpreted
    #[error(transparent)]
    Entry(#[from] EntryError),

    /// An external resolver failed
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    /// Connection record lifecycle violations
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// The connection table provider could not produce a snapshot
    #[error("Connection table provider failed: {0}")]
    Provider(String),

    /// No async runtime to schedule background resolutions on
    #[error("Tokio runtime unavailable: {0}")]
    Runtime(String),

    /// Metrics could not be encoded
    #[error("Metrics error: {0}")]
    Metrics(String),
}

#[derive(Debug, thiserror::Error)]
pub enum EntryError {
    /// Address text that does not parse as an IPv4/IPv6 address
    #[error("Invalid {field} address: {value:?}")]
    InvalidAddress { field: &'static str, value: String },

    /// Protocol text other than TCP/UDP
    #[error("Unsupported protocol: {0:?}")]
    UnsupportedProtocol(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ResolutionError {
    /// Process metadata lookup failed (process gone, access denied, ...)
    #[error("Process lookup for pid {pid} failed: {reason}")]
    ProcessLookup { pid: u32, reason: String },

    /// Reverse DNS lookup failed
    #[error("Hostname lookup for {addr} failed: {reason}")]
    HostnameLookup { addr: IpAddr, reason: String },

    /// Reverse DNS lookup exceeded the configured timeout
    #[error("Hostname lookup for {addr} timed out after {duration:?}")]
    HostnameTimeout { addr: IpAddr, duration: Duration },
}

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// Transition not on the New -> Active -> Dying -> Dead path
    #[error("Invalid lifecycle transition from {from} to {to}")]
    InvalidTransition { from: LifecycleState, to: LifecycleState },
}

impl From<prometheus::Error> for Error {
    fn from(e: prometheus::Error) -> Self {
        Error::Metrics(e.to_string())
    }
}
