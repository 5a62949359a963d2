use std::sync::Arc;

use dashmap::DashMap;
use futures::future;
use futures::future::BoxFuture;
use futures::future::Shared;
use futures::FutureExt;
use tracing::debug;
use tracing::trace;

use super::ProcessInfo;
use super::ProcessResolver;
use crate::metrics::OWNER_LOOKUPS;
use crate::SYSTEM_OWNER;
use crate::SYSTEM_PID;
use crate::UNKNOWN_OWNER;
use crate::UNRESOLVED_PROCESS_NAME;
use crate::UNRESOLVED_PROCESS_PATH;

/// Resolved owner of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerInfo {
    pub process_name: String,
    pub executable_path: String,
}

impl OwnerInfo {
    pub fn new(
        process_name: impl Into<String>,
        executable_path: impl Into<String>,
    ) -> Self {
        Self {
            process_name: process_name.into(),
            executable_path: executable_path.into(),
        }
    }

    /// Fixed owner of pid 0.
    pub fn system() -> Self {
        Self::new(SYSTEM_OWNER, SYSTEM_OWNER)
    }

    /// Sentinel for a failed lookup.
    pub fn unresolved() -> Self {
        Self::new(UNRESOLVED_PROCESS_NAME, UNRESOLVED_PROCESS_PATH)
    }

    pub fn is_unresolved(&self) -> bool {
        self.process_name == UNRESOLVED_PROCESS_NAME && self.executable_path == UNRESOLVED_PROCESS_PATH
    }
}

impl From<ProcessInfo> for OwnerInfo {
    fn from(info: ProcessInfo) -> Self {
        Self::new(
            info.name.filter(|n| !n.is_empty()).unwrap_or_else(|| UNKNOWN_OWNER.to_string()),
            info.path.filter(|p| !p.is_empty()).unwrap_or_else(|| UNKNOWN_OWNER.to_string()),
        )
    }
}

/// A lookup every record of the same pid shares.
pub type OwnerLookup = Shared<BoxFuture<'static, OwnerInfo>>;

/// Batch-scoped pid -> owner cache.
///
/// Obtain a fresh one per polling batch from
/// [`ConnectionRegistry::begin_batch`](crate::ConnectionRegistry::begin_batch)
/// and drop it when the batch ends. Within a batch each pid costs at most one
/// resolver call; failures are cached as [`OwnerInfo::unresolved`] and not
/// retried.
pub struct OwnerCache {
    resolver: Arc<dyn ProcessResolver>,
    entries: DashMap<u32, OwnerLookup>,
}

impl OwnerCache {
    pub fn new(resolver: Arc<dyn ProcessResolver>) -> Self {
        Self {
            resolver,
            entries: DashMap::new(),
        }
    }

    /// Shared lookup for `pid`. The first call for a pid creates the lookup;
    /// it runs when first awaited.
    pub fn lookup(
        &self,
        pid: u32,
    ) -> OwnerLookup {
        if pid == SYSTEM_PID {
            return future::ready(OwnerInfo::system()).boxed().shared();
        }

        self.entries
            .entry(pid)
            .or_insert_with(|| {
                trace!(pid, "owner cache miss");
                let resolver = self.resolver.clone();
                async move {
                    match resolver.process_info(pid).await {
                        Ok(info) => {
                            OWNER_LOOKUPS.with_label_values(&["resolved"]).inc();
                            OwnerInfo::from(info)
                        }
                        Err(e) => {
                            debug!(pid, error = %e, "process lookup failed");
                            OWNER_LOOKUPS.with_label_values(&["failed"]).inc();
                            OwnerInfo::unresolved()
                        }
                    }
                }
                .boxed()
                .shared()
            })
            .clone()
    }

    /// Owner of `pid` if it is already known without waiting.
    pub fn peek(
        &self,
        pid: u32,
    ) -> Option<OwnerInfo> {
        if pid == SYSTEM_PID {
            return Some(OwnerInfo::system());
        }
        self.entries.get(&pid).and_then(|lookup| lookup.peek().cloned())
    }

    pub async fn resolve_owner(
        &self,
        pid: u32,
    ) -> OwnerInfo {
        self.lookup(pid).await
    }

    /// Number of pids looked up in this batch (pid 0 is never cached).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forget every entry, for callers that reuse one cache across batches.
    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl std::fmt::Debug for OwnerCache {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("OwnerCache").field("entries", &self.entries.len()).finish()
    }
}
