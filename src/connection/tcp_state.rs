use std::fmt;

/// TCP connection state, numbered like the MIB TCP state table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TcpState {
    Closed = 1,
    Listen = 2,
    SynSent = 3,
    SynReceived = 4,
    Established = 5,
    FinWait1 = 6,
    FinWait2 = 7,
    CloseWait = 8,
    Closing = 9,
    LastAck = 10,
    TimeWait = 11,
    DeleteTcb = 12,
}

impl TcpState {
    pub const ALL: [TcpState; 12] = [
        TcpState::Closed,
        TcpState::Listen,
        TcpState::SynSent,
        TcpState::SynReceived,
        TcpState::Established,
        TcpState::FinWait1,
        TcpState::FinWait2,
        TcpState::CloseWait,
        TcpState::Closing,
        TcpState::LastAck,
        TcpState::TimeWait,
        TcpState::DeleteTcb,
    ];

    /// Translate a raw state code. Unknown codes have no state.
    pub const fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(TcpState::Closed),
            2 => Some(TcpState::Listen),
            3 => Some(TcpState::SynSent),
            4 => Some(TcpState::SynReceived),
            5 => Some(TcpState::Established),
            6 => Some(TcpState::FinWait1),
            7 => Some(TcpState::FinWait2),
            8 => Some(TcpState::CloseWait),
            9 => Some(TcpState::Closing),
            10 => Some(TcpState::LastAck),
            11 => Some(TcpState::TimeWait),
            12 => Some(TcpState::DeleteTcb),
            _ => None,
        }
    }

    pub const fn code(self) -> u32 {
        self as u32
    }

    pub const fn name(self) -> &'static str {
        match self {
            TcpState::Closed => "CLOSED",
            TcpState::Listen => "LISTEN",
            TcpState::SynSent => "SYN_SENT",
            TcpState::SynReceived => "SYN_RCVD",
            TcpState::Established => "ESTABLISHED",
            TcpState::FinWait1 => "FIN_WAIT1",
            TcpState::FinWait2 => "FIN_WAIT2",
            TcpState::CloseWait => "CLOSE_WAIT",
            TcpState::Closing => "CLOSING",
            TcpState::LastAck => "LAST_ACK",
            TcpState::TimeWait => "TIME_WAIT",
            TcpState::DeleteTcb => "DELETE_TCB",
        }
    }
}

// Every state must round-trip through its code.
const _: () = {
    let mut i = 0;
    while i < TcpState::ALL.len() {
        let state = TcpState::ALL[i];
        match TcpState::from_code(state.code()) {
            Some(mapped) => assert!(mapped as u8 == state as u8),
            None => panic!("tcp state missing from code table"),
        }
        i += 1;
    }
};

impl fmt::Display for TcpState {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.name())
    }
}
