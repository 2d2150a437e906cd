//! Congestion control (slow start and congestion avoidance).
//!
//! The sender keeps at most `cwnd` bytes unacknowledged. The window opens by
//! one MSS per acknowledgment below `ssthresh` (slow start) and by
//! `MSS * MSS / cwnd` above it (congestion avoidance). A retransmission
//! timeout halves `ssthresh` and restarts slow start from one MSS.

/// Window state for one connection.
#[derive(Debug, Clone)]
pub struct CongestionController {
    /// Congestion window in bytes.
    cwnd: usize,
    /// Slow-start threshold in bytes.
    ssthresh: usize,
    /// Maximum segment size in bytes.
    mss: usize,
}

impl CongestionController {
    /// Create a controller with `cwnd = mss`.
    ///
    /// `initial_ssthresh` is raised to `mss` if smaller.
    pub fn new(mss: usize, initial_ssthresh: usize) -> Self {
        let mss = mss.max(1);
        Self {
            cwnd: mss,
            ssthresh: initial_ssthresh.max(mss),
            mss,
        }
    }

    /// Congestion window in bytes.
    pub fn cwnd(&self) -> usize {
        self.cwnd
    }

    /// Slow-start threshold in bytes.
    pub fn ssthresh(&self) -> usize {
        self.ssthresh
    }

    /// Maximum segment size in bytes.
    pub fn mss(&self) -> usize {
        self.mss
    }

    /// Check if the window is still in slow start.
    pub fn in_slow_start(&self) -> bool {
        self.cwnd < self.ssthresh
    }

    /// Check if `len` more bytes fit next to `in_flight` bytes.
    pub fn can_send(&self, in_flight: usize, len: usize) -> bool {
        in_flight.saturating_add(len) <= self.cwnd
    }

    /// Grow the window for one acknowledgment of new data.
    pub fn on_ack(&mut self) {
        let increment = if self.in_slow_start() {
            self.mss
        } else {
            // Never stall growth completely once cwnd exceeds MSS^2.
            (self.mss * self.mss / self.cwnd).max(1)
        };
        self.cwnd = self.cwnd.saturating_add(increment);
    }

    /// Collapse the window after a retransmission timeout.
    pub fn on_timeout(&mut self) {
        self.ssthresh = (self.cwnd / 2).max(self.mss);
        self.cwnd = self.mss;
    }
}
