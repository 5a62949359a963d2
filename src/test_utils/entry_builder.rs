use crate::Protocol;
use crate::RawConnection;
use crate::TcpState;

/// TCP row with a peer.
pub(crate) fn tcp_entry(
    pid: u32,
    local: (&str, u16),
    remote: (&str, u16),
    state: TcpState,
) -> RawConnection {
    RawConnection::new(pid, Protocol::Tcp, local.0, local.1)
        .with_remote(remote.0, remote.1)
        .with_state_code(state.code())
}

/// UDP row without a peer.
pub(crate) fn udp_entry(
    pid: u32,
    local: (&str, u16),
) -> RawConnection {
    RawConnection::new(pid, Protocol::Udp, local.0, local.1)
}

/// The pid 4 connection used throughout the lifecycle tests.
pub(crate) fn example_entry(state: TcpState) -> RawConnection {
    tcp_entry(4, ("10.0.0.5", 50000), ("93.184.216.34", 443), state)
}
