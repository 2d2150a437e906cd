//! mini-tcp - Transport Layer
//!
//! Everything one connection needs to turn a best-effort packet service into
//! a reliable byte stream:
//!
//! - **Segment encoding/decoding**: [`SegmentHeader`], [`SegmentFlags`] and
//!   pseudo-header checksums
//! - **Connection state machine**: [`Connection`] with handshake, ordered
//!   receive, windowed send and termination
//! - **RTT estimation**: [`RttEstimator`] (Jacobson/Karels)
//! - **Congestion control**: [`CongestionController`] (slow start and
//!   congestion avoidance)
//! - **Retransmission**: [`RetransmissionQueue`], [`PendingSendQueue`] and
//!   the per-connection [`RetransmitTimer`]
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │            Application                  │
//! ├─────────────────────────────────────────┤
//! │         Dispatcher (server)             │
//! ├─────────────────────────────────────────┤
//! │         Transport Layer                 │  ← This module
//! │   segments, RTT, cwnd, retransmission   │
//! ├─────────────────────────────────────────┤
//! │      Packet transport (external)        │
//! └─────────────────────────────────────────┘
//! ```

mod congestion;
mod connection;
mod error;
mod queue;
mod segment;
mod seq;
mod timer;
mod timing;

pub use congestion::CongestionController;
pub use connection::{Connection, ConnectionConfig, ConnectionState};
pub use error::{TransportError, TransportResult};
pub use queue::{AckedSegments, InFlightSegment, PendingSendQueue, RetransmissionQueue};
pub use segment::{
    SegmentFlags, SegmentHeader, build_segment, checksum, fix_checksum, verify_checksum,
};
pub use seq::{seq_ge, seq_gt, seq_le, seq_lt};
pub use timer::{ManualClock, RetransmitTimer, SystemClock, TimerQueue};
pub use timing::{RttEstimator, constants as timing_constants};
