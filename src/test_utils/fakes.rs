use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::HostnameResolver;
use crate::HostnameSink;
use crate::IconHandle;
use crate::IconProvider;
use crate::ProcessInfo;
use crate::ProcessResolver;
use crate::ResolutionError;
use crate::ResolverSet;
use crate::Result;

/// Process resolver backed by a fixed table; unknown pids fail.
#[derive(Clone, Default)]
pub(crate) struct FakeProcessResolver {
    table: Arc<HashMap<u32, ProcessInfo>>,
    calls: Arc<Mutex<Vec<u32>>>,
    gate: Option<CancellationToken>,
}

impl FakeProcessResolver {
    pub(crate) fn new(entries: &[(u32, &str, &str)]) -> Self {
        let table = entries
            .iter()
            .map(|(pid, name, path)| {
                (
                    *pid,
                    ProcessInfo {
                        name: Some(name.to_string()),
                        path: Some(path.to_string()),
                    },
                )
            })
            .collect();
        Self {
            table: Arc::new(table),
            ..Default::default()
        }
    }

    /// Hold every lookup until `gate` is cancelled.
    pub(crate) fn gated(
        mut self,
        gate: CancellationToken,
    ) -> Self {
        self.gate = Some(gate);
        self
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub(crate) fn calls_for(
        &self,
        pid: u32,
    ) -> usize {
        self.calls.lock().iter().filter(|p| **p == pid).count()
    }
}

#[async_trait]
impl ProcessResolver for FakeProcessResolver {
    async fn process_info(
        &self,
        pid: u32,
    ) -> Result<ProcessInfo> {
        self.calls.lock().push(pid);
        if let Some(gate) = &self.gate {
            gate.cancelled().await;
        }
        self.table.get(&pid).cloned().ok_or_else(|| {
            ResolutionError::ProcessLookup {
                pid,
                reason: "no such process".to_string(),
            }
            .into()
        })
    }
}

/// Hostname resolver backed by a fixed table; unknown addresses fail.
#[derive(Clone, Default)]
pub(crate) struct FakeHostnameResolver {
    table: Arc<HashMap<IpAddr, String>>,
    calls: Arc<Mutex<Vec<IpAddr>>>,
    gate: Option<CancellationToken>,
}

impl FakeHostnameResolver {
    pub(crate) fn new(entries: &[(&str, &str)]) -> Self {
        let table = entries
            .iter()
            .map(|(addr, name)| (super::ip(addr), name.to_string()))
            .collect();
        Self {
            table: Arc::new(table),
            ..Default::default()
        }
    }

    pub(crate) fn gated(
        mut self,
        gate: CancellationToken,
    ) -> Self {
        self.gate = Some(gate);
        self
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub(crate) fn calls_for(
        &self,
        addr: &str,
    ) -> usize {
        let addr = super::ip(addr);
        self.calls.lock().iter().filter(|a| **a == addr).count()
    }
}

#[async_trait]
impl HostnameResolver for FakeHostnameResolver {
    async fn reverse_lookup(
        &self,
        addr: IpAddr,
    ) -> Result<String> {
        self.calls.lock().push(addr);
        if let Some(gate) = &self.gate {
            gate.cancelled().await;
        }
        self.table.get(&addr).cloned().ok_or_else(|| {
            ResolutionError::HostnameLookup {
                addr,
                reason: "NXDOMAIN".to_string(),
            }
            .into()
        })
    }
}

/// Icon provider whose handles spell out their inputs.
#[derive(Clone, Default)]
pub(crate) struct FakeIcons;

impl IconProvider for FakeIcons {
    fn icon(
        &self,
        path: &str,
        is_system: bool,
    ) -> IconHandle {
        IconHandle::new(format!("{path}|{is_system}"))
    }
}

/// Hostname sink that records every completion.
#[derive(Default)]
pub(crate) struct RecordingSink {
    pub(crate) applied: Mutex<Vec<(IpAddr, String)>>,
}

impl HostnameSink for RecordingSink {
    fn apply_hostname(
        &self,
        addr: IpAddr,
        name: &str,
    ) -> usize {
        self.applied.lock().push((addr, name.to_string()));
        1
    }
}

pub(crate) fn resolver_set(
    process: &FakeProcessResolver,
    hostname: &FakeHostnameResolver,
) -> ResolverSet {
    ResolverSet::new(process.clone(), hostname.clone(), FakeIcons)
}
