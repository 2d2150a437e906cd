//! Protocol constants.
//!
//! Header layout and flag values follow the TCP wire format (RFC 793); the
//! timing and window defaults are the engine's own.

// =============================================================================
// HEADER LAYOUT (RFC 793 §3.1)
// =============================================================================

/// Size of a TCP header without options.
pub const HEADER_LEN: usize = 20;

/// Data offset (in 32-bit words) of a header without options.
pub const DEFAULT_DATA_OFFSET: u8 = 5;

/// IP protocol number for TCP, used in the checksum pseudo-header.
pub const PROTOCOL_TCP: u8 = 6;

// =============================================================================
// FLAG BITS (RFC 793 §3.1)
// =============================================================================

/// No more data from sender (termination).
pub const FLAG_FIN: u8 = 0x01;

/// Synchronize sequence numbers (connection open).
pub const FLAG_SYN: u8 = 0x02;

/// Reset the connection.
pub const FLAG_RST: u8 = 0x04;

/// Push function.
pub const FLAG_PSH: u8 = 0x08;

/// Acknowledgment field is significant.
pub const FLAG_ACK: u8 = 0x10;

/// Urgent pointer field is significant.
pub const FLAG_URG: u8 = 0x20;

// =============================================================================
// SEGMENTATION AND WINDOWS
// =============================================================================

/// Default maximum segment size (Ethernet MTU minus IPv4 and TCP headers).
pub const DEFAULT_MSS: usize = 1460;

/// Default slow-start threshold before any loss has been observed.
pub const DEFAULT_INITIAL_SSTHRESH: usize = 65_535;

/// Window value written into outgoing headers.
///
/// Receiver-side flow control is not modelled, so this is advisory only.
pub const DEFAULT_WINDOW: u16 = u16::MAX;
