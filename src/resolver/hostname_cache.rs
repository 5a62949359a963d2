use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;
use tracing::trace;

use super::HostnameResolver;
use super::HostnameSink;
use crate::metrics::HOSTNAME_LOOKUPS;
use crate::ResolutionError;
use crate::ResolverConfig;
use crate::Result;

#[derive(Debug, Clone)]
enum Slot {
    Pending,
    Resolved { name: String, at: Instant },
}

/// Outcome of [`HostnameCache::request`].
#[derive(Debug)]
pub enum HostnameLookup {
    /// Already resolved; the caller applies the name itself
    Cached(String),
    /// A lookup for this address is outstanding; its completion covers the caller
    InFlight,
    /// A new lookup was spawned
    Scheduled(JoinHandle<()>),
}

/// Address -> hostname cache shared by all records and all cycles.
///
/// Requests never block. Concurrent requests for one address collapse into a
/// single resolver call whose result is written to every record holding the
/// address through the [`HostnameSink`]. Failed or empty lookups are not
/// cached, so the address is retried the next time it is requested.
pub struct HostnameCache {
    resolver: Arc<dyn HostnameResolver>,
    sink: Arc<dyn HostnameSink>,
    runtime: Handle,
    entries: Arc<DashMap<IpAddr, Slot>>,
    ttl: Option<Duration>,
    timeout: Option<Duration>,
}

impl HostnameCache {
    pub fn new(
        resolver: Arc<dyn HostnameResolver>,
        sink: Arc<dyn HostnameSink>,
        runtime: Handle,
        config: &ResolverConfig,
    ) -> Self {
        Self {
            resolver,
            sink,
            runtime,
            entries: Arc::new(DashMap::new()),
            ttl: config.hostname_ttl(),
            timeout: config.hostname_timeout(),
        }
    }

    /// Request the hostname of `addr`.
    pub fn request(
        &self,
        addr: IpAddr,
    ) -> HostnameLookup {
        match self.entries.entry(addr) {
            Entry::Occupied(mut entry) => {
                let hit = match entry.get() {
                    Slot::Pending => Some(HostnameLookup::InFlight),
                    Slot::Resolved { name, at } if !self.is_expired(*at) => Some(HostnameLookup::Cached(name.clone())),
                    Slot::Resolved { .. } => None,
                };
                if let Some(hit) = hit {
                    trace!(%addr, ?hit, "hostname cache hit");
                    return hit;
                }
                trace!(%addr, "hostname expired");
                entry.insert(Slot::Pending);
            }
            Entry::Vacant(entry) => {
                entry.insert(Slot::Pending);
            }
        }

        HostnameLookup::Scheduled(self.spawn_lookup(addr))
    }

    /// Resolved name of `addr`, if cached and not expired.
    pub fn get(
        &self,
        addr: &IpAddr,
    ) -> Option<String> {
        match self.entries.get(addr).as_deref() {
            Some(Slot::Resolved { name, at }) if !self.is_expired(*at) => Some(name.clone()),
            _ => None,
        }
    }

    pub fn is_pending(
        &self,
        addr: &IpAddr,
    ) -> bool {
        matches!(self.entries.get(addr).as_deref(), Some(Slot::Pending))
    }

    /// Number of addresses resolved or being resolved.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn is_expired(
        &self,
        at: Instant,
    ) -> bool {
        self.ttl.is_some_and(|ttl| at.elapsed() >= ttl)
    }

    fn spawn_lookup(
        &self,
        addr: IpAddr,
    ) -> JoinHandle<()> {
        let resolver = self.resolver.clone();
        let sink = self.sink.clone();
        let entries = self.entries.clone();
        let timeout = self.timeout;

        self.runtime.spawn(async move {
            match lookup(resolver.as_ref(), addr, timeout).await {
                Ok(name) if !name.trim().is_empty() => {
                    HOSTNAME_LOOKUPS.with_label_values(&["resolved"]).inc();
                    entries.insert(
                        addr,
                        Slot::Resolved {
                            name: name.clone(),
                            at: Instant::now(),
                        },
                    );
                    let updated = sink.apply_hostname(addr, &name);
                    trace!(%addr, %name, updated, "hostname resolved");
                }
                Ok(_) => {
                    HOSTNAME_LOOKUPS.with_label_values(&["empty"]).inc();
                    entries.remove(&addr);
                    trace!(%addr, "hostname lookup returned no name");
                }
                Err(e) => {
                    HOSTNAME_LOOKUPS.with_label_values(&["failed"]).inc();
                    entries.remove(&addr);
                    debug!(%addr, error = %e, "hostname lookup failed");
                }
            }
        })
    }
}

async fn lookup(
    resolver: &dyn HostnameResolver,
    addr: IpAddr,
    timeout: Option<Duration>,
) -> Result<String> {
    match timeout {
        None => resolver.reverse_lookup(addr).await,
        Some(duration) => tokio::time::timeout(duration, resolver.reverse_lookup(addr))
            .await
            .map_err(|_| ResolutionError::HostnameTimeout { addr, duration })?,
    }
}

impl std::fmt::Debug for HostnameCache {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("HostnameCache")
            .field("entries", &self.entries.len())
            .field("ttl", &self.ttl)
            .field("timeout", &self.timeout)
            .finish()
    }
}
