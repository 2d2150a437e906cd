//! Transport layer error types.
//!
//! Inbound-segment errors never travel back to the peer: the segment is
//! dropped and the peer's own retransmission timer recovers.

use thiserror::Error;

use crate::core::{ConnectionId, SegmentError};

/// Transport layer errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Segment header could not be decoded.
    #[error("segment error: {0}")]
    Segment(#[from] SegmentError),

    /// Checksum validation failed.
    #[error("checksum mismatch")]
    ChecksumMismatch,

    /// Segment addressed to a port nobody listens on.
    #[error("no listener on port {port}")]
    PortNotListening {
        /// Destination port of the segment.
        port: u16,
    },

    /// Segment for a connection the dispatcher does not know.
    #[error("segment for unknown connection {0}")]
    UnknownConnection(ConnectionId),

    /// Operation requires an established connection.
    #[error("connection not established")]
    NotEstablished,

    /// The local side has already closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// The pending-send queue would exceed its configured cap.
    #[error("send buffer full: {queued} bytes queued, limit {limit}")]
    SendBufferFull {
        /// Bytes already waiting for window space.
        queued: usize,
        /// Configured cap.
        limit: usize,
    },

    /// Retransmission ceiling reached, connection aborted.
    #[error("max retransmits exceeded after {attempts} attempts")]
    MaxRetransmitsExceeded {
        /// Consecutive timeouts observed.
        attempts: u32,
    },
}

impl TransportError {
    /// Check if this is a routing filter rather than a fault (dropped without logging).
    pub fn is_silent_drop(&self) -> bool {
        matches!(self, TransportError::PortNotListening { .. })
    }

    /// Check if this error rejects an inbound segment.
    pub fn is_drop(&self) -> bool {
        matches!(
            self,
            TransportError::Segment(_)
                | TransportError::ChecksumMismatch
                | TransportError::PortNotListening { .. }
                | TransportError::UnknownConnection(_)
        )
    }

    /// Check if this error is fatal to the connection.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TransportError::ConnectionClosed | TransportError::MaxRetransmitsExceeded { .. }
        )
    }
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn id() -> ConnectionId {
        let addr = IpAddr::V4(Ipv4Addr::LOCALHOST);
        ConnectionId::new(addr, 1234, addr, 80)
    }

    #[test]
    fn test_silent_drop_errors() {
        assert!(TransportError::PortNotListening { port: 9 }.is_silent_drop());

        assert!(!TransportError::ChecksumMismatch.is_silent_drop());
        assert!(!TransportError::UnknownConnection(id()).is_silent_drop());
    }

    #[test]
    fn test_drop_errors() {
        assert!(TransportError::Segment(SegmentError::TooShort { len: 1 }).is_drop());
        assert!(TransportError::ChecksumMismatch.is_drop());
        assert!(TransportError::UnknownConnection(id()).is_drop());

        assert!(!TransportError::SendBufferFull { queued: 1, limit: 1 }.is_drop());
        assert!(!TransportError::NotEstablished.is_drop());
    }

    #[test]
    fn test_fatal_errors() {
        assert!(TransportError::ConnectionClosed.is_fatal());
        assert!(TransportError::MaxRetransmitsExceeded { attempts: 3 }.is_fatal());

        assert!(!TransportError::ChecksumMismatch.is_fatal());
        assert!(!TransportError::SendBufferFull { queued: 1, limit: 1 }.is_fatal());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            TransportError::UnknownConnection(id()).to_string(),
            "segment for unknown connection 127.0.0.1:1234 -> 127.0.0.1:80"
        );
    }
}
