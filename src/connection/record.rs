use std::fmt;
use std::net::IpAddr;
use std::time::Duration;
use std::time::SystemTime;

use tracing::trace;

use super::Endpoints;
use crate::ConnectionKey;
use crate::FieldValue;
use crate::IconHandle;
use crate::LifecycleError;
use crate::OwnerInfo;
use crate::Protocol;
use crate::RawConnection;
use crate::RecordField;
use crate::RecordId;
use crate::Result;
use crate::TcpState;

/// Observed presence of a connection over consecutive snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// First cycle the connection was seen
    New,
    /// Seen again in a later cycle
    Active,
    /// Missing from the latest snapshot
    Dying,
    /// Missing again; removed once the grace interval elapses
    Dead,
}

impl LifecycleState {
    /// Whether `self -> to` is a step of `New -> Active -> Dying -> Dead`.
    pub fn can_transition_to(
        self,
        to: LifecycleState,
    ) -> bool {
        matches!(
            (self, to),
            (LifecycleState::New, LifecycleState::Active)
                | (LifecycleState::Active, LifecycleState::Dying)
                | (LifecycleState::Dying, LifecycleState::Dead)
        )
    }

    /// New and Active records are matched against snapshots; the others are retiring.
    pub fn is_live(self) -> bool {
        matches!(self, LifecycleState::New | LifecycleState::Active)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            LifecycleState::New => write!(f, "New"),
            LifecycleState::Active => write!(f, "Active"),
            LifecycleState::Dying => write!(f, "Dying"),
            LifecycleState::Dead => write!(f, "Dead"),
        }
    }
}

/// A field write that actually changed the record.
pub(crate) type FieldWrite = (RecordField, FieldValue);

/// One tracked connection.
///
/// Identity and lifecycle fields are written by the reconciliation cycle only;
/// owner and hostname fields are written by the background resolvers.
#[derive(Debug, Clone)]
pub struct ConnectionRecord {
    id: RecordId,
    key: ConnectionKey,
    state: LifecycleState,

    // endpoint values as last reported (the key holds the canonical form)
    local_address: IpAddr,
    remote_address: Option<IpAddr>,
    remote_port: Option<u16>,
    tcp_state: Option<TcpState>,

    creation_time: Option<SystemTime>,
    first_seen: SystemTime,
    last_seen: SystemTime,
    last_seen_cycle: u64,
    dead_since_cycle: Option<u64>,

    owner: String,
    icon: Option<IconHandle>,
    process_name: Option<String>,
    executable_path: Option<String>,
    group_key: Option<String>,

    local_host_name: String,
    remote_host_name: String,

    access_denied: bool,
    last_error: Option<String>,
}

impl ConnectionRecord {
    pub(crate) fn new(
        id: RecordId,
        key: ConnectionKey,
        raw: &RawConnection,
        endpoints: &Endpoints,
        cycle: u64,
        owner: String,
        icon: Option<IconHandle>,
    ) -> Self {
        let now = SystemTime::now();
        Self {
            id,
            key,
            state: LifecycleState::New,
            local_address: endpoints.local,
            remote_address: endpoints.remote,
            remote_port: raw.remote_port,
            tcp_state: raw.state_code.and_then(TcpState::from_code),
            creation_time: raw.creation_time,
            first_seen: now,
            last_seen: now,
            last_seen_cycle: cycle,
            dead_since_cycle: None,
            owner,
            icon,
            process_name: None,
            executable_path: None,
            group_key: None,
            local_host_name: String::new(),
            remote_host_name: String::new(),
            access_denied: raw.access_denied,
            last_error: raw.last_error.clone(),
        }
    }

    pub fn id(&self) -> RecordId {
        self.id
    }

    pub fn key(&self) -> &ConnectionKey {
        &self.key
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// True only during the cycle the record was created in.
    pub fn is_new(&self) -> bool {
        self.state == LifecycleState::New
    }

    pub fn is_dying(&self) -> bool {
        self.state == LifecycleState::Dying
    }

    pub fn is_dead(&self) -> bool {
        self.state == LifecycleState::Dead
    }

    pub fn pid(&self) -> u32 {
        self.key.pid
    }

    pub fn protocol(&self) -> Protocol {
        self.key.protocol
    }

    pub fn local_address(&self) -> IpAddr {
        self.local_address
    }

    pub fn local_port(&self) -> u16 {
        self.key.local_port
    }

    pub fn remote_address(&self) -> Option<IpAddr> {
        self.remote_address
    }

    pub fn remote_port(&self) -> Option<u16> {
        self.remote_port
    }

    pub fn tcp_state(&self) -> Option<TcpState> {
        self.tcp_state
    }

    pub fn creation_time(&self) -> Option<SystemTime> {
        self.creation_time
    }

    pub fn first_seen(&self) -> SystemTime {
        self.first_seen
    }

    pub fn last_seen(&self) -> SystemTime {
        self.last_seen
    }

    pub fn last_seen_cycle(&self) -> u64 {
        self.last_seen_cycle
    }

    pub fn dead_since_cycle(&self) -> Option<u64> {
        self.dead_since_cycle
    }

    /// Owner module name, "System" or "Unknown"; fixed at creation.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn icon(&self) -> Option<&IconHandle> {
        self.icon.as_ref()
    }

    pub fn process_name(&self) -> Option<&str> {
        self.process_name.as_deref()
    }

    pub fn executable_path(&self) -> Option<&str> {
        self.executable_path.as_deref()
    }

    /// Display grouping label, available once the owner is resolved.
    pub fn group_key(&self) -> Option<&str> {
        self.group_key.as_deref()
    }

    pub fn local_host_name(&self) -> &str {
        &self.local_host_name
    }

    pub fn remote_host_name(&self) -> &str {
        &self.remote_host_name
    }

    pub fn access_denied(&self) -> bool {
        self.access_denied
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn owner_resolved(&self) -> bool {
        self.group_key.is_some()
    }

    //-----------------------------------------------------------
    // Reconciliation-side writes

    /// Step the lifecycle state machine. Returns the previous state.
    pub(crate) fn transition(
        &mut self,
        to: LifecycleState,
        cycle: u64,
    ) -> Result<LifecycleState> {
        let from = self.state;
        if !from.can_transition_to(to) {
            return Err(LifecycleError::InvalidTransition { from, to }.into());
        }
        self.state = to;
        if to == LifecycleState::Dead {
            self.dead_since_cycle = Some(cycle);
        }
        trace!(id = %self.id, %from, %to, cycle, "lifecycle transition");
        Ok(from)
    }

    /// Advance `last_seen`. Only live records are touched, and the value
    /// strictly increases even if the wall clock does not.
    pub(crate) fn touch(
        &mut self,
        now: SystemTime,
        cycle: u64,
    ) -> Option<FieldWrite> {
        if !self.state.is_live() || cycle <= self.last_seen_cycle {
            return None;
        }
        self.last_seen = if now > self.last_seen {
            now
        } else {
            self.last_seen + Duration::from_micros(1)
        };
        self.last_seen_cycle = cycle;
        Some((RecordField::LastSeen, FieldValue::Time(self.last_seen)))
    }

    pub(crate) fn set_local_address(
        &mut self,
        address: IpAddr,
    ) -> Option<FieldWrite> {
        replace(&mut self.local_address, address)
            .then_some((RecordField::LocalAddress, FieldValue::Address(Some(address))))
    }

    pub(crate) fn set_remote_address(
        &mut self,
        address: Option<IpAddr>,
    ) -> Option<FieldWrite> {
        replace(&mut self.remote_address, address)
            .then_some((RecordField::RemoteAddress, FieldValue::Address(address)))
    }

    pub(crate) fn set_remote_port(
        &mut self,
        port: Option<u16>,
    ) -> Option<FieldWrite> {
        replace(&mut self.remote_port, port).then_some((RecordField::RemotePort, FieldValue::Port(port)))
    }

    pub(crate) fn set_tcp_state(
        &mut self,
        state: Option<TcpState>,
    ) -> Option<FieldWrite> {
        replace(&mut self.tcp_state, state).then_some((RecordField::TcpState, FieldValue::TcpState(state)))
    }

    pub(crate) fn set_access(
        &mut self,
        access_denied: bool,
        last_error: Option<String>,
    ) -> Vec<FieldWrite> {
        let mut writes = Vec::new();
        if replace(&mut self.access_denied, access_denied) {
            writes.push((RecordField::AccessDenied, FieldValue::Flag(access_denied)));
        }
        if replace(&mut self.last_error, last_error.clone()) {
            writes.push((RecordField::LastError, FieldValue::OptionalText(last_error)));
        }
        writes
    }

    //-----------------------------------------------------------
    // Resolver-side writes

    /// Store the resolved owner. The group key is derived on the first call only.
    pub(crate) fn apply_owner(
        &mut self,
        owner: &OwnerInfo,
    ) -> Vec<FieldWrite> {
        let mut writes = Vec::new();
        let name = owner.process_name.clone();
        let path = owner.executable_path.clone();

        if replace(&mut self.process_name, Some(name.clone())) {
            writes.push((RecordField::ProcessName, FieldValue::Text(name)));
        }
        if replace(&mut self.executable_path, Some(path.clone())) {
            writes.push((RecordField::ExecutablePath, FieldValue::Text(path)));
        }
        if self.group_key.is_none() {
            let group_key = format!("{} ({}) - [{}]", owner.process_name, owner.executable_path, self.key.pid);
            self.group_key = Some(group_key.clone());
            writes.push((RecordField::GroupKey, FieldValue::Text(group_key)));
        }
        writes
    }

    pub(crate) fn set_local_host_name(
        &mut self,
        name: &str,
    ) -> Option<FieldWrite> {
        (self.local_host_name != name).then(|| {
            self.local_host_name = name.to_string();
            (RecordField::LocalHostName, FieldValue::Text(self.local_host_name.clone()))
        })
    }

    pub(crate) fn set_remote_host_name(
        &mut self,
        name: &str,
    ) -> Option<FieldWrite> {
        (self.remote_host_name != name).then(|| {
            self.remote_host_name = name.to_string();
            (RecordField::RemoteHostName, FieldValue::Text(self.remote_host_name.clone()))
        })
    }
}

fn replace<T: PartialEq>(
    slot: &mut T,
    value: T,
) -> bool {
    if *slot == value {
        false
    } else {
        *slot = value;
        true
    }
}
