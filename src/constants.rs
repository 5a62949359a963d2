// -
// Owner sentinels

/// Process id of the idle/system pseudo-process
pub const SYSTEM_PID: u32 = 0;

/// Name, path and owner reported for [`SYSTEM_PID`]
pub const SYSTEM_OWNER: &str = "System";

/// Placeholder for a field the process resolver left empty, and for a
/// connection without an owner module
pub const UNKNOWN_OWNER: &str = "Unknown";

/// Process name recorded when the process resolver failed
pub const UNRESOLVED_PROCESS_NAME: &str = "[Unknown or closed process]";

/// Executable path recorded when the process resolver failed
pub const UNRESOLVED_PROCESS_PATH: &str = "Unresolved";

// -
// Icon provider keys

/// Icon key for the system pseudo-process
pub const SYSTEM_ICON_KEY: &str = "System";

/// Icon key used when a connection has no owner module
pub const UNKNOWN_ICON_KEY: &str = "?error";

// -
// Defaults

pub(crate) const DEFAULT_GRACE_CYCLES: u64 = 1;
pub(crate) const DEFAULT_EVENT_BUFFER_SIZE: usize = 1024;
pub(crate) const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Environment variable prefix for configuration overrides
pub(crate) const CONFIG_ENV_PREFIX: &str = "CONNWATCH";
