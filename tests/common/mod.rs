use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use connwatch::ConnectionRegistry;
use connwatch::Error;
use connwatch::HostnameResolver;
use connwatch::IconHandle;
use connwatch::IconProvider;
use connwatch::ProcessInfo;
use connwatch::ProcessResolver;
use connwatch::Protocol;
use connwatch::RawConnection;
use connwatch::RegistryConfig;
use connwatch::ResolutionError;
use connwatch::ResolverConfig;
use connwatch::ResolverSet;
use connwatch::Result;
use connwatch::TcpState;
use parking_lot::Mutex;

#[derive(Clone, Default)]
pub struct TableProcesses {
    pub table: HashMap<u32, (&'static str, &'static str)>,
    pub calls: Arc<Mutex<Vec<u32>>>,
}

#[async_trait]
impl ProcessResolver for TableProcesses {
    async fn process_info(
        &self,
        pid: u32,
    ) -> Result<ProcessInfo> {
        self.calls.lock().push(pid);
        match self.table.get(&pid) {
            Some((name, path)) => Ok(ProcessInfo {
                name: Some(name.to_string()),
                path: Some(path.to_string()),
            }),
            None => Err(Error::Resolution(ResolutionError::ProcessLookup {
                pid,
                reason: "process exited".to_string(),
            })),
        }
    }
}

#[derive(Clone, Default)]
pub struct TableHostnames {
    pub table: HashMap<IpAddr, &'static str>,
    pub calls: Arc<Mutex<Vec<IpAddr>>>,
}

#[async_trait]
impl HostnameResolver for TableHostnames {
    async fn reverse_lookup(
        &self,
        addr: IpAddr,
    ) -> Result<String> {
        self.calls.lock().push(addr);
        // yield so concurrent requests overlap
        tokio::task::yield_now().await;
        Ok(self.table.get(&addr).map(|n| n.to_string()).unwrap_or_default())
    }
}

pub struct PathIcons;

impl IconProvider for PathIcons {
    fn icon(
        &self,
        path: &str,
        _is_system: bool,
    ) -> IconHandle {
        IconHandle::new(path)
    }
}

pub fn setup() -> (ConnectionRegistry, TableProcesses, TableHostnames) {
    let processes = TableProcesses {
        table: HashMap::from([(4, ("chrome.exe", "C:\\Program Files\\chrome.exe"))]),
        ..Default::default()
    };
    let hostnames = TableHostnames {
        table: HashMap::from([("93.184.216.34".parse().unwrap(), "example.com")]),
        ..Default::default()
    };
    let registry = ConnectionRegistry::new(
        ResolverSet::new(processes.clone(), hostnames.clone(), PathIcons),
        RegistryConfig::default(),
        ResolverConfig::default(),
    )
    .unwrap();
    (registry, processes, hostnames)
}

pub fn entry(state: TcpState) -> RawConnection {
    RawConnection::new(4, Protocol::Tcp, "10.0.0.5", 50000)
        .with_remote("93.184.216.34", 443)
        .with_state_code(state.code())
}
