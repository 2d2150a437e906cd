//! Per-connection reliability and congestion engine.
//!
//! A [`Connection`] is a sans-IO state machine. The dispatcher feeds it
//! inbound segments ([`Connection::on_segment`]) and timer expiries
//! ([`Connection::on_retransmit_timeout`]); the application drives it with
//! [`Connection::send`] and [`Connection::close`]. Everything it emits goes
//! through the [`Environment`] services.
//!
//! ```text
//! Handshaking ──SYN|ACK sent──▶ Established ──FIN sent or received──▶ Closing
//!                                                                        │
//!                                          both FINs seen, or aborted    ▼
//!                                                                      Closed
//! ```

use std::fmt;
use std::net::IpAddr;

use tracing::{debug, trace, warn};

use super::congestion::CongestionController;
use super::error::{TransportError, TransportResult};
use super::queue::{InFlightSegment, PendingSendQueue, RetransmissionQueue};
use super::segment::{SegmentFlags, SegmentHeader, build_segment};
use super::seq::seq_gt;
use super::timer::RetransmitTimer;
use super::timing::RttEstimator;
use crate::core::constants::{DEFAULT_INITIAL_SSTHRESH, DEFAULT_MSS, DEFAULT_WINDOW};
use crate::core::{ConnectionId, Environment, StreamHandler, TimerHandle};

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Open request received, handshake acknowledgment not sent yet.
    Handshaking,
    /// Data transfer active.
    Established,
    /// One side has signalled termination.
    Closing,
    /// Both directions terminated, or the connection was aborted.
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Handshaking => "handshaking",
            ConnectionState::Established => "established",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Per-connection tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Maximum payload bytes per segment.
    pub mss: usize,
    /// Slow-start threshold before the first loss.
    pub initial_ssthresh: usize,
    /// Window value written into outgoing headers.
    pub window: u16,
    /// Cap on bytes waiting in the pending-send queue (`None` = unbounded).
    pub max_pending_bytes: Option<usize>,
    /// Consecutive timeouts tolerated before aborting (`None` = retry forever).
    pub max_retransmits: Option<u32>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            mss: DEFAULT_MSS,
            initial_ssthresh: DEFAULT_INITIAL_SSTHRESH,
            window: DEFAULT_WINDOW,
            max_pending_bytes: None,
            max_retransmits: None,
        }
    }
}

/// One reliable byte stream with a single peer.
pub struct Connection {
    id: ConnectionId,
    state: ConnectionState,
    config: ConnectionConfig,
    env: Environment,

    /// Our initial sequence number.
    iss: u32,
    /// Next sequence number to assign to outgoing data.
    snd_nxt: u32,
    /// Oldest unacknowledged sequence number.
    snd_una: u32,
    /// Next sequence number expected from the peer.
    rcv_nxt: u32,

    rtt: RttEstimator,
    congestion: CongestionController,
    in_flight: RetransmissionQueue,
    pending: PendingSendQueue,
    timer: RetransmitTimer,
    /// Consecutive timeouts since the last acknowledgment of new data.
    retransmits: u32,

    fin_sent: bool,
    fin_received: bool,

    handler: Option<Box<dyn StreamHandler>>,
}

impl Connection {
    /// Create a connection for an open request carrying `peer_isn`.
    ///
    /// The local initial sequence number is random with the `random-isn`
    /// feature and 0 without it.
    pub fn accept(
        id: ConnectionId,
        peer_isn: u32,
        config: ConnectionConfig,
        env: Environment,
    ) -> Self {
        Self::with_isn(id, peer_isn, generate_isn(), config, env)
    }

    /// Create a connection with an explicit local initial sequence number.
    pub fn with_isn(
        id: ConnectionId,
        peer_isn: u32,
        local_isn: u32,
        config: ConnectionConfig,
        env: Environment,
    ) -> Self {
        let congestion = CongestionController::new(config.mss, config.initial_ssthresh);
        Self {
            id,
            state: ConnectionState::Handshaking,
            config,
            env,
            iss: local_isn,
            snd_nxt: local_isn,
            snd_una: local_isn,
            rcv_nxt: peer_isn.wrapping_add(1),
            rtt: RttEstimator::new(),
            congestion,
            in_flight: RetransmissionQueue::new(),
            pending: PendingSendQueue::new(),
            timer: RetransmitTimer::new(),
            retransmits: 0,
            fin_sent: false,
            fin_received: false,
            handler: None,
        }
    }

    /// Acknowledge the open request and start exchanging data.
    ///
    /// Sends SYN|ACK with our initial sequence number. Does nothing outside
    /// [`ConnectionState::Handshaking`].
    pub fn send_syn_ack(&mut self) {
        if self.state != ConnectionState::Handshaking {
            return;
        }
        self.transmit(
            self.iss,
            self.rcv_nxt,
            SegmentFlags::SYN | SegmentFlags::ACK,
            &[],
        );
        self.snd_nxt = self.iss.wrapping_add(1);
        self.snd_una = self.snd_nxt;
        self.state = ConnectionState::Established;
        debug!(connection = %self.id, iss = self.iss, rcv_nxt = self.rcv_nxt, "handshake acknowledged");
    }

    /// Register the application handler, replacing any previous one.
    pub fn set_handler(&mut self, handler: impl StreamHandler + 'static) {
        self.handler = Some(Box::new(handler));
    }

    /// Remove and return the application handler.
    pub fn take_handler(&mut self) -> Option<Box<dyn StreamHandler>> {
        self.handler.take()
    }

    /// Process one inbound segment.
    pub fn on_segment(&mut self, seq: u32, ack: u32, flags: SegmentFlags, payload: &[u8]) {
        trace!(
            connection = %self.id,
            seq,
            ack,
            flags = %flags,
            len = payload.len(),
            "segment received"
        );

        if flags.is_fin() {
            if flags.is_ack() {
                self.process_ack(ack);
            }
            self.on_fin(seq);
            return;
        }

        if !payload.is_empty() && self.state != ConnectionState::Closed {
            self.receive_data(seq, payload);
        }

        if flags.is_ack() {
            self.process_ack(ack);
        }
    }

    /// Queue `data` for reliable delivery.
    ///
    /// The data is cut into MSS-sized chunks. Chunks that fit in the
    /// congestion window go out immediately, the rest wait in the pending
    /// queue and are released as acknowledgments free window space.
    ///
    /// # Errors
    ///
    /// - [`TransportError::NotEstablished`] before the handshake completes.
    /// - [`TransportError::ConnectionClosed`] once we have sent our FIN.
    /// - [`TransportError::SendBufferFull`] if queueing would exceed
    ///   `max_pending_bytes`; nothing is sent or queued in that case.
    pub fn send(&mut self, data: &[u8]) -> TransportResult<()> {
        match self.state {
            ConnectionState::Handshaking => return Err(TransportError::NotEstablished),
            ConnectionState::Established => {}
            ConnectionState::Closing if !self.fin_sent => {}
            ConnectionState::Closing | ConnectionState::Closed => {
                return Err(TransportError::ConnectionClosed);
            }
        }
        if data.is_empty() {
            return Ok(());
        }

        if let Some(limit) = self.config.max_pending_bytes {
            let queued = self.pending.bytes();
            if queued + self.overflow(data) > limit {
                return Err(TransportError::SendBufferFull { queued, limit });
            }
        }

        for chunk in data.chunks(self.congestion.mss()) {
            if self.pending.is_empty()
                && self
                    .congestion
                    .can_send(self.in_flight.bytes_in_flight(), chunk.len())
            {
                self.transmit_data(chunk.to_vec());
            } else {
                self.pending.push(chunk.to_vec());
            }
        }

        if !self.in_flight.is_empty() {
            let rto = self.rtt.rto();
            self.timer.ensure_armed(&*self.env.timers, self.id, rto);
        }
        Ok(())
    }

    /// Send FIN|ACK and stop sending.
    ///
    /// The FIN carries the current `snd_nxt` and `rcv_nxt` and is emitted on
    /// every call, whatever the state. Unacknowledged and pending data is
    /// discarded and the retransmission timer cancelled.
    pub fn close(&mut self) {
        self.transmit(
            self.snd_nxt,
            self.rcv_nxt,
            SegmentFlags::FIN | SegmentFlags::ACK,
            &[],
        );
        self.fin_sent = true;
        self.timer.cancel(&*self.env.timers);

        let discarded = self.pending.clear() + self.in_flight.clear();
        if discarded > 0 {
            warn!(connection = %self.id, discarded, "close discarded unacknowledged data");
        }

        self.state = if self.fin_received {
            ConnectionState::Closed
        } else {
            ConnectionState::Closing
        };
        debug!(connection = %self.id, seq = self.snd_nxt, state = %self.state, "FIN sent");
    }

    /// Handle expiry of the retransmission timer identified by `handle`.
    ///
    /// Stale handles (re-armed or cancelled since) are ignored. Otherwise the
    /// window collapses, the oldest unacknowledged segment is resent and the
    /// timer is re-armed with the current RTO.
    pub fn on_retransmit_timeout(&mut self, handle: TimerHandle) {
        if !self.timer.fire(handle) {
            trace!(connection = %self.id, %handle, "stale timer ignored");
            return;
        }
        if self.in_flight.is_empty() || self.state == ConnectionState::Closed {
            return;
        }

        self.retransmits += 1;
        if let Some(max) = self.config.max_retransmits {
            if self.retransmits > max {
                self.abort(TransportError::MaxRetransmitsExceeded {
                    attempts: self.retransmits,
                });
                return;
            }
        }

        self.congestion.on_timeout();
        debug!(
            connection = %self.id,
            cwnd = self.congestion.cwnd(),
            ssthresh = self.congestion.ssthresh(),
            rto = ?self.rtt.rto(),
            attempt = self.retransmits,
            "retransmission timeout"
        );

        let now = self.env.clock.now();
        let resend = self.in_flight.front_mut().map(|oldest| {
            oldest.sent_at = now;
            oldest.transmissions += 1;
            (oldest.seq, oldest.payload.clone(), oldest.destination)
        });
        if let Some((seq, payload, destination)) = resend {
            self.transmit_to(destination, seq, self.rcv_nxt, SegmentFlags::ACK, &payload);
        }

        let rto = self.rtt.rto();
        self.timer.arm(&*self.env.timers, self.id, rto);
    }

    /// Connection identity.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Check if data transfer is active.
    pub fn is_established(&self) -> bool {
        self.state == ConnectionState::Established
    }

    /// Check if the connection is finished.
    pub fn is_closed(&self) -> bool {
        self.state == ConnectionState::Closed
    }

    /// Configuration in use.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Next sequence number to assign to outgoing data.
    pub fn snd_nxt(&self) -> u32 {
        self.snd_nxt
    }

    /// Oldest unacknowledged sequence number.
    pub fn snd_una(&self) -> u32 {
        self.snd_una
    }

    /// Next sequence number expected from the peer.
    pub fn rcv_nxt(&self) -> u32 {
        self.rcv_nxt
    }

    /// RTT estimator.
    pub fn rtt(&self) -> &RttEstimator {
        &self.rtt
    }

    /// Congestion window state.
    pub fn congestion(&self) -> &CongestionController {
        &self.congestion
    }

    /// Unacknowledged payload bytes.
    pub fn bytes_in_flight(&self) -> usize {
        self.in_flight.bytes_in_flight()
    }

    /// Unacknowledged segments, oldest first.
    pub fn in_flight(&self) -> &RetransmissionQueue {
        &self.in_flight
    }

    /// Bytes waiting for window space.
    pub fn pending_bytes(&self) -> usize {
        self.pending.bytes()
    }

    /// Chunks waiting for window space.
    pub fn pending_chunks(&self) -> usize {
        self.pending.len()
    }

    /// Handle of the pending retransmission timer.
    pub fn timer_handle(&self) -> Option<TimerHandle> {
        self.timer.handle()
    }

    /// Consecutive timeouts since new data was last acknowledged.
    pub fn retransmits(&self) -> u32 {
        self.retransmits
    }

    /// Check if we have sent our FIN.
    pub fn fin_sent(&self) -> bool {
        self.fin_sent
    }

    /// Check if the peer's FIN has arrived.
    pub fn fin_received(&self) -> bool {
        self.fin_received
    }

    /// Cancel the retransmission timer without changing any other state.
    pub(crate) fn cancel_timer(&mut self) {
        self.timer.cancel(&*self.env.timers);
    }

    fn receive_data(&mut self, seq: u32, payload: &[u8]) {
        if seq != self.rcv_nxt {
            debug!(
                connection = %self.id,
                seq,
                rcv_nxt = self.rcv_nxt,
                "out-of-order segment dropped"
            );
            self.send_ack(self.rcv_nxt);
            return;
        }

        self.rcv_nxt = self.rcv_nxt.wrapping_add(payload.len() as u32);
        self.send_ack(self.rcv_nxt);
        self.notify(|handler, conn| handler.on_data(conn, payload));
    }

    fn on_fin(&mut self, seq: u32) {
        if seq == self.rcv_nxt {
            self.rcv_nxt = seq.wrapping_add(1);
        }
        self.send_ack(seq.wrapping_add(1));

        if self.fin_received {
            return;
        }
        self.fin_received = true;
        self.state = if self.fin_sent {
            self.timer.cancel(&*self.env.timers);
            ConnectionState::Closed
        } else {
            ConnectionState::Closing
        };
        debug!(connection = %self.id, seq, state = %self.state, "FIN received");

        self.notify(|handler, conn| handler.on_close(conn));
    }

    fn process_ack(&mut self, ack: u32) {
        let limit = if self.fin_sent {
            self.snd_nxt.wrapping_add(1)
        } else {
            self.snd_nxt
        };
        if seq_gt(ack, limit) {
            trace!(connection = %self.id, ack, snd_nxt = self.snd_nxt, "ack beyond snd_nxt ignored");
            return;
        }
        if seq_gt(ack, self.snd_una) {
            self.snd_una = ack;
        }

        let Some(acked) = self.in_flight.on_ack(ack) else {
            return;
        };

        let sample = self
            .env
            .clock
            .now()
            .saturating_duration_since(acked.oldest_sent_at);
        self.rtt.update(sample);
        self.timer.cancel(&*self.env.timers);
        self.congestion.on_ack();
        self.retransmits = 0;
        trace!(
            connection = %self.id,
            ack,
            segments = acked.segments,
            bytes = acked.bytes,
            ?sample,
            cwnd = self.congestion.cwnd(),
            "ack processed"
        );

        self.drain_pending();

        if !self.in_flight.is_empty() {
            let rto = self.rtt.rto();
            self.timer.arm(&*self.env.timers, self.id, rto);
        }
    }

    fn drain_pending(&mut self) {
        while let Some(len) = self.pending.front_len() {
            if !self
                .congestion
                .can_send(self.in_flight.bytes_in_flight(), len)
            {
                break;
            }
            let Some(chunk) = self.pending.pop() else {
                break;
            };
            self.transmit_data(chunk);
        }
    }

    fn abort(&mut self, error: TransportError) {
        warn!(connection = %self.id, %error, "connection aborted");
        self.state = ConnectionState::Closed;
        self.timer.cancel(&*self.env.timers);
        self.in_flight.clear();
        self.pending.clear();
        self.notify(|handler, conn| handler.on_error(conn, &error));
    }

    fn transmit_data(&mut self, chunk: Vec<u8>) {
        let seq = self.snd_nxt;
        self.transmit(seq, self.rcv_nxt, SegmentFlags::ACK, &chunk);
        self.snd_nxt = seq.wrapping_add(chunk.len() as u32);

        let now = self.env.clock.now();
        self.in_flight
            .push(InFlightSegment::new(now, seq, chunk, self.id.peer_addr));
    }

    fn send_ack(&self, ack: u32) {
        self.transmit(self.snd_nxt, ack, SegmentFlags::ACK, &[]);
    }

    fn transmit(&self, seq: u32, ack: u32, flags: SegmentFlags, payload: &[u8]) {
        self.transmit_to(self.id.peer_addr, seq, ack, flags, payload);
    }

    fn transmit_to(
        &self,
        destination: IpAddr,
        seq: u32,
        ack: u32,
        flags: SegmentFlags,
        payload: &[u8],
    ) {
        let header = SegmentHeader::new(self.id.local_port, self.id.peer_port, seq, ack, flags)
            .with_window(self.config.window);
        let segment = build_segment(&header, payload, self.id.local_addr, destination);
        trace!(
            connection = %self.id,
            %destination,
            seq,
            ack,
            flags = %flags,
            len = payload.len(),
            "segment sent"
        );
        self.env.transport.send(segment, destination);
    }

    /// Run `f` against the handler, which may call back into `self`.
    ///
    /// The handler is restored afterwards unless `f` installed a new one.
    fn notify(&mut self, f: impl FnOnce(&mut dyn StreamHandler, &mut Connection)) {
        let Some(mut handler) = self.handler.take() else {
            return;
        };
        f(handler.as_mut(), self);
        if self.handler.is_none() {
            self.handler = Some(handler);
        }
    }

    /// Bytes of `data` that `send` would have to queue right now.
    fn overflow(&self, data: &[u8]) -> usize {
        if !self.pending.is_empty() {
            return data.len();
        }
        let mut in_flight = self.in_flight.bytes_in_flight();
        let mut queued = 0;
        for chunk in data.chunks(self.congestion.mss()) {
            if queued == 0 && self.congestion.can_send(in_flight, chunk.len()) {
                in_flight += chunk.len();
            } else {
                queued += chunk.len();
            }
        }
        queued
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("snd_una", &self.snd_una)
            .field("snd_nxt", &self.snd_nxt)
            .field("rcv_nxt", &self.rcv_nxt)
            .field("cwnd", &self.congestion.cwnd())
            .field("ssthresh", &self.congestion.ssthresh())
            .field("in_flight", &self.in_flight.bytes_in_flight())
            .field("pending", &self.pending.bytes())
            .field("rto", &self.rtt.rto())
            .field("has_handler", &self.handler.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(feature = "random-isn")]
fn generate_isn() -> u32 {
    rand::random()
}

#[cfg(not(feature = "random-isn"))]
fn generate_isn() -> u32 {
    0
}
