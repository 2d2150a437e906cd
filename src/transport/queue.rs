//! Retransmission and pending-send queues.
//!
//! ```text
//!  snd_una                       snd_nxt
//!     │                             │
//! ────┼─────────────────────────────┼──────────────────▶ seq space
//!     │<── RetransmissionQueue ────▶│<── PendingSendQueue (no seq yet)
//! ```
//!
//! Chunks wait in the pending queue until the congestion window has room,
//! are stamped with a sequence number when transmitted, and stay in the
//! retransmission queue until a cumulative ACK covers them.

use std::collections::VecDeque;
use std::net::IpAddr;
use std::time::Instant;

use super::seq::seq_le;

/// A transmitted segment awaiting acknowledgment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InFlightSegment {
    /// When the segment was last transmitted.
    pub sent_at: Instant,
    /// Sequence number of the first payload byte.
    pub seq: u32,
    /// Payload bytes.
    pub payload: Vec<u8>,
    /// Where the segment was sent; retransmissions go to the same address.
    pub destination: IpAddr,
    /// Number of transmissions so far (1 = first send).
    pub transmissions: u32,
}

impl InFlightSegment {
    /// Create a record for a first transmission.
    pub fn new(sent_at: Instant, seq: u32, payload: Vec<u8>, destination: IpAddr) -> Self {
        Self {
            sent_at,
            seq,
            payload,
            destination,
            transmissions: 1,
        }
    }

    /// Sequence number just past the payload.
    pub fn end(&self) -> u32 {
        self.seq.wrapping_add(self.payload.len() as u32)
    }
}

/// What a cumulative ACK removed from the retransmission queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckedSegments {
    /// Number of segments removed.
    pub segments: usize,
    /// Payload bytes removed.
    pub bytes: usize,
    /// Transmission time of the oldest removed segment.
    pub oldest_sent_at: Instant,
}

/// In-flight segments, oldest first.
#[derive(Debug, Clone, Default)]
pub struct RetransmissionQueue {
    segments: VecDeque<InFlightSegment>,
    bytes: usize,
}

impl RetransmissionQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a newly transmitted segment.
    pub fn push(&mut self, segment: InFlightSegment) {
        self.bytes += segment.payload.len();
        self.segments.push_back(segment);
    }

    /// Remove every segment fully covered by the cumulative `ack`.
    ///
    /// Returns `None` when nothing was acknowledged.
    pub fn on_ack(&mut self, ack: u32) -> Option<AckedSegments> {
        let mut acked: Option<AckedSegments> = None;

        while let Some(front) = self.segments.front() {
            if !seq_le(front.end(), ack) {
                break;
            }
            let Some(segment) = self.segments.pop_front() else {
                break;
            };
            let len = segment.payload.len();
            self.bytes -= len;

            match acked.as_mut() {
                Some(summary) => {
                    summary.segments += 1;
                    summary.bytes += len;
                }
                None => {
                    acked = Some(AckedSegments {
                        segments: 1,
                        bytes: len,
                        oldest_sent_at: segment.sent_at,
                    });
                }
            }
        }

        acked
    }

    /// Oldest unacknowledged segment.
    pub fn front(&self) -> Option<&InFlightSegment> {
        self.segments.front()
    }

    /// Oldest unacknowledged segment, mutably (for retransmission bookkeeping).
    pub fn front_mut(&mut self) -> Option<&mut InFlightSegment> {
        self.segments.front_mut()
    }

    /// Iterate oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &InFlightSegment> {
        self.segments.iter()
    }

    /// Total payload bytes in flight.
    pub fn bytes_in_flight(&self) -> usize {
        self.bytes
    }

    /// Number of segments in flight.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Check if nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Drop everything; returns the number of bytes discarded.
    pub fn clear(&mut self) -> usize {
        let bytes = self.bytes;
        self.segments.clear();
        self.bytes = 0;
        bytes
    }
}

/// Segment-sized chunks waiting for congestion-window space, in send order.
#[derive(Debug, Clone, Default)]
pub struct PendingSendQueue {
    chunks: VecDeque<Vec<u8>>,
    bytes: usize,
}

impl PendingSendQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk.
    pub fn push(&mut self, chunk: Vec<u8>) {
        self.bytes += chunk.len();
        self.chunks.push_back(chunk);
    }

    /// Length of the next chunk to drain.
    pub fn front_len(&self) -> Option<usize> {
        self.chunks.front().map(Vec::len)
    }

    /// Take the next chunk.
    pub fn pop(&mut self) -> Option<Vec<u8>> {
        let chunk = self.chunks.pop_front()?;
        self.bytes -= chunk.len();
        Some(chunk)
    }

    /// Total queued bytes.
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    /// Number of queued chunks.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Check if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Drop everything; returns the number of bytes discarded.
    pub fn clear(&mut self) -> usize {
        let bytes = self.bytes;
        self.chunks.clear();
        self.bytes = 0;
        bytes
    }
}
