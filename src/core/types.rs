//! Identifiers shared across layers.

use std::fmt;
use std::net::IpAddr;

/// Identity of one connection: the peer's endpoint and ours.
///
/// Every inbound segment maps to exactly one `ConnectionId`, built from its
/// `(source address, source port, destination address, destination port)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId {
    /// Peer address.
    pub peer_addr: IpAddr,
    /// Peer port.
    pub peer_port: u16,
    /// Local address.
    pub local_addr: IpAddr,
    /// Local port.
    pub local_port: u16,
}

impl ConnectionId {
    /// Create a connection identity.
    pub fn new(peer_addr: IpAddr, peer_port: u16, local_addr: IpAddr, local_port: u16) -> Self {
        Self {
            peer_addr,
            peer_port,
            local_addr,
            local_port,
        }
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{}",
            self.peer_addr, self.peer_port, self.local_addr, self.local_port
        )
    }
}

/// Opaque handle for a scheduled timer.
///
/// Handles are issued by a [`TimerService`](super::TimerService) and never
/// reused, so a stale handle can always be told apart from the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerHandle(u64);

impl TimerHandle {
    /// Wrap a raw handle value.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw handle value.
    pub fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}
