use std::fmt;
use std::net::IpAddr;
use std::time::SystemTime;

use crate::ConnectionKey;
use crate::LifecycleState;
use crate::RecordId;
use crate::TcpState;

/// Observable fields of a connection record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordField {
    LocalAddress,
    RemoteAddress,
    RemotePort,
    TcpState,
    LastSeen,
    ProcessName,
    ExecutablePath,
    GroupKey,
    LocalHostName,
    RemoteHostName,
    AccessDenied,
    LastError,
}

impl RecordField {
    pub fn name(self) -> &'static str {
        match self {
            RecordField::LocalAddress => "local_address",
            RecordField::RemoteAddress => "remote_address",
            RecordField::RemotePort => "remote_port",
            RecordField::TcpState => "tcp_state",
            RecordField::LastSeen => "last_seen",
            RecordField::ProcessName => "process_name",
            RecordField::ExecutablePath => "executable_path",
            RecordField::GroupKey => "group_key",
            RecordField::LocalHostName => "local_host_name",
            RecordField::RemoteHostName => "remote_host_name",
            RecordField::AccessDenied => "access_denied",
            RecordField::LastError => "last_error",
        }
    }
}

impl fmt::Display for RecordField {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// New value carried by a field change.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    OptionalText(Option<String>),
    Address(Option<IpAddr>),
    Port(Option<u16>),
    TcpState(Option<TcpState>),
    Time(SystemTime),
    Flag(bool),
}

/// `{identity, field, value}` for one field write.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange {
    pub id: RecordId,
    pub key: ConnectionKey,
    pub field: RecordField,
    pub value: FieldValue,
}

/// A lifecycle step. `from == None` is creation, `to == None` is removal.
#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleChange {
    pub id: RecordId,
    pub key: ConnectionKey,
    pub from: Option<LifecycleState>,
    pub to: Option<LifecycleState>,
}

impl LifecycleChange {
    pub fn is_creation(&self) -> bool {
        self.from.is_none()
    }

    pub fn is_removal(&self) -> bool {
        self.to.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RegistryEvent {
    Field(FieldChange),
    Lifecycle(LifecycleChange),
}

impl RegistryEvent {
    pub fn id(&self) -> RecordId {
        match self {
            RegistryEvent::Field(change) => change.id,
            RegistryEvent::Lifecycle(change) => change.id,
        }
    }

    pub fn key(&self) -> &ConnectionKey {
        match self {
            RegistryEvent::Field(change) => &change.key,
            RegistryEvent::Lifecycle(change) => &change.key,
        }
    }

    pub fn as_field(&self) -> Option<&FieldChange> {
        match self {
            RegistryEvent::Field(change) => Some(change),
            RegistryEvent::Lifecycle(_) => None,
        }
    }

    pub fn as_lifecycle(&self) -> Option<&LifecycleChange> {
        match self {
            RegistryEvent::Lifecycle(change) => Some(change),
            RegistryEvent::Field(_) => None,
        }
    }
}
