//! Background enrichment of connection records.
//!
//! The operating system facing lookups are collaborator traits implemented
//! outside this crate. Two caches sit in front of them:
//!
//! - [`OwnerCache`]: pid -> owner, valid for one polling batch only because
//!   the OS recycles process ids.
//! - [`HostnameCache`]: address -> reverse-DNS name, kept across batches, with
//!   at most one outstanding lookup per address.

mod hostname_cache;
mod owner_cache;

pub use hostname_cache::*;
pub use owner_cache::*;

#[cfg(test)]
mod owner_cache_test;

use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::IconHandle;
use crate::Result;

/// Process metadata as reported by the OS. Either field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessInfo {
    pub name: Option<String>,
    pub path: Option<String>,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ProcessResolver: Send + Sync + 'static {
    /// Look up the name and executable path of `pid`.
    ///
    /// # Errors
    /// Any error is treated as "unresolvable" and replaced by a sentinel owner.
    async fn process_info(
        &self,
        pid: u32,
    ) -> Result<ProcessInfo>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait HostnameResolver: Send + Sync + 'static {
    /// Reverse-resolve `addr`. An empty string counts as "no name".
    async fn reverse_lookup(
        &self,
        addr: IpAddr,
    ) -> Result<String>;
}

#[cfg_attr(test, automock)]
pub trait IconProvider: Send + Sync + 'static {
    /// Icon for an executable path or one of the well-known keys
    /// ([`crate::SYSTEM_ICON_KEY`], [`crate::UNKNOWN_ICON_KEY`]).
    fn icon(
        &self,
        path: &str,
        is_system: bool,
    ) -> IconHandle;
}

/// Receiver of completed hostname lookups.
pub trait HostnameSink: Send + Sync + 'static {
    /// Write `name` into every registered record holding `addr` as its local
    /// or remote address. Returns the number of records that changed.
    fn apply_hostname(
        &self,
        addr: IpAddr,
        name: &str,
    ) -> usize;
}

/// The external collaborators a registry needs.
#[derive(Clone)]
pub struct ResolverSet {
    pub process: Arc<dyn ProcessResolver>,
    pub hostname: Arc<dyn HostnameResolver>,
    pub icons: Arc<dyn IconProvider>,
}

impl ResolverSet {
    pub fn new(
        process: impl ProcessResolver,
        hostname: impl HostnameResolver,
        icons: impl IconProvider,
    ) -> Self {
        Self {
            process: Arc::new(process),
            hostname: Arc::new(hostname),
            icons: Arc::new(icons),
        }
    }
}

impl std::fmt::Debug for ResolverSet {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ResolverSet").finish_non_exhaustive()
    }
}
