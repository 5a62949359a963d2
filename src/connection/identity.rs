//! Raw connection table entries and the identity key derived from them.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::SystemTime;

use crate::EntryError;
use crate::Result;

/// Transport protocol of a connection table row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "TCP"),
            Protocol::Udp => write!(f, "UDP"),
        }
    }
}

impl FromStr for Protocol {
    type Err = EntryError;

    /// Accepts the spellings OS tables use, including the `6` suffixed IPv6 variants.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TCP" | "TCP6" => Ok(Protocol::Tcp),
            "UDP" | "UDP6" => Ok(Protocol::Udp),
            _ => Err(EntryError::UnsupportedProtocol(s.to_string())),
        }
    }
}

/// Opaque icon handle handed out by the icon provider and passed through untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IconHandle(Arc<str>);

impl IconHandle {
    pub fn new(reference: impl Into<Arc<str>>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Owner module information some OS tables attach to a connection
/// (e.g. the service hosting the socket inside a shared process).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerModule {
    pub module_name: String,
    pub icon: Option<IconHandle>,
}

/// One row of the OS connection table, as delivered by the table provider.
#[derive(Debug, Clone)]
pub struct RawConnection {
    pub pid: u32,
    pub protocol: Protocol,
    pub local_address: String,
    pub local_port: u16,
    /// `None` for sockets without a peer (UDP, listeners on some platforms)
    pub remote_address: Option<String>,
    pub remote_port: Option<u16>,
    /// MIB TCP state code; `None` for UDP
    pub state_code: Option<u32>,
    pub creation_time: Option<SystemTime>,
    pub owner_module: Option<OwnerModule>,
    /// The provider could not read this row's extended information
    pub access_denied: bool,
    pub last_error: Option<String>,
}

impl RawConnection {
    pub fn new(
        pid: u32,
        protocol: Protocol,
        local_address: impl Into<String>,
        local_port: u16,
    ) -> Self {
        Self {
            pid,
            protocol,
            local_address: local_address.into(),
            local_port,
            remote_address: None,
            remote_port: None,
            state_code: None,
            creation_time: None,
            owner_module: None,
            access_denied: false,
            last_error: None,
        }
    }

    pub fn with_remote(
        mut self,
        address: impl Into<String>,
        port: u16,
    ) -> Self {
        self.remote_address = Some(address.into());
        self.remote_port = Some(port);
        self
    }

    pub fn with_state_code(
        mut self,
        code: u32,
    ) -> Self {
        self.state_code = Some(code);
        self
    }

    pub fn with_creation_time(
        mut self,
        time: SystemTime,
    ) -> Self {
        self.creation_time = Some(time);
        self
    }

    pub fn with_owner_module(
        mut self,
        module: OwnerModule,
    ) -> Self {
        self.owner_module = Some(module);
        self
    }

    /// Flags the row as only partially readable.
    pub fn with_access_error(
        mut self,
        error: impl Into<String>,
    ) -> Self {
        self.access_denied = true;
        self.last_error = Some(error.into());
        self
    }
}

/// Parsed endpoint addresses of a raw entry, exactly as reported.
///
/// IPv6 zone suffixes (`fe80::1%12`, `fe80::1%eth0`) are split off the
/// address and kept next to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Endpoints {
    pub(crate) local: IpAddr,
    pub(crate) local_scope: Option<String>,
    pub(crate) remote: Option<IpAddr>,
    pub(crate) remote_scope: Option<String>,
}

impl Endpoints {
    pub(crate) fn parse(raw: &RawConnection) -> Result<Self> {
        let (local, local_scope) = parse_address("local", &raw.local_address)?;
        let (remote, remote_scope) = match raw.remote_address.as_deref().map(str::trim) {
            None | Some("") => (None, None),
            Some(text) => {
                let (addr, scope) = parse_address("remote", text)?;
                (Some(addr), scope)
            }
        };
        Ok(Self {
            local,
            local_scope,
            remote,
            remote_scope,
        })
    }
}

fn parse_address(
    field: &'static str,
    text: &str,
) -> Result<(IpAddr, Option<String>)> {
    let invalid = || EntryError::InvalidAddress {
        field,
        value: text.to_string(),
    };
    let trimmed = text.trim();
    let (addr, scope) = match trimmed.split_once('%') {
        Some((addr, scope)) => (addr, Some(scope)),
        None => (trimmed, None),
    };
    let addr = addr.parse::<IpAddr>().map_err(|_| invalid())?;
    match scope {
        None => Ok((addr, None)),
        // zones only exist on IPv6 and are never empty
        Some(scope) if addr.is_ipv6() && !scope.is_empty() => Ok((addr, Some(scope.to_string()))),
        Some(_) => Err(invalid().into()),
    }
}

/// Stable identity of a connection across snapshots.
///
/// Addresses are stored in canonical form (IPv4-mapped IPv6 folded to IPv4),
/// so one socket reported in either notation keeps its key. IPv6 zones are
/// part of the key: the same link-local address on two interfaces is two
/// connections.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub pid: u32,
    pub protocol: Protocol,
    pub local_addr: IpAddr,
    pub local_scope: Option<String>,
    pub local_port: u16,
    pub remote_addr: Option<IpAddr>,
    pub remote_scope: Option<String>,
    pub remote_port: Option<u16>,
}

impl ConnectionKey {
    /// Derive the key of a raw entry.
    ///
    /// # Errors
    /// [`EntryError::InvalidAddress`] when an address does not parse.
    pub fn from_raw(raw: &RawConnection) -> Result<Self> {
        let endpoints = Endpoints::parse(raw)?;
        Ok(Self::from_parts(raw, &endpoints))
    }

    pub(crate) fn from_parts(
        raw: &RawConnection,
        endpoints: &Endpoints,
    ) -> Self {
        Self {
            pid: raw.pid,
            protocol: raw.protocol,
            local_addr: endpoints.local.to_canonical(),
            local_scope: endpoints.local_scope.clone(),
            local_port: raw.local_port,
            remote_addr: endpoints.remote.map(|a| a.to_canonical()),
            remote_scope: endpoints.remote_scope.clone(),
            remote_port: raw.remote_port,
        }
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{} {}", self.protocol, self.local_addr)?;
        if let Some(scope) = &self.local_scope {
            write!(f, "%{scope}")?;
        }
        write!(f, ":{}", self.local_port)?;
        if let Some(addr) = self.remote_addr {
            write!(f, " -> {addr}")?;
            if let Some(scope) = &self.remote_scope {
                write!(f, "%{scope}")?;
            }
            if let Some(port) = self.remote_port {
                write!(f, ":{port}")?;
            }
        }
        write!(f, " [pid {}]", self.pid)
    }
}

/// Registry-unique record number, assigned in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(pub u64);

impl fmt::Display for RecordId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
