//! Core traits for mini-tcp.
//!
//! The engine never touches a socket, a clock or a timer directly. It talks
//! to the outside world through the services below, and to the application
//! through the handler traits.
//!
//! Execution is single-threaded: services are shared with `Rc` and take
//! `&self`, implementations use interior mutability where they need it.

use std::net::IpAddr;
use std::rc::Rc;
use std::time::{Duration, Instant};

use super::types::{ConnectionId, TimerHandle};
use crate::transport::{Connection, TransportError};

/// Best-effort packet delivery between addressed peers.
///
/// Sending is a non-blocking hand-off: the segment may be lost, delayed or
/// reordered and the engine is never told.
pub trait PacketTransport {
    /// Hand a fully encoded segment (header, payload, checksum) to the network.
    fn send(&self, segment: Vec<u8>, destination: IpAddr);
}

/// Source of the current time.
pub trait Clock {
    /// The current instant.
    fn now(&self) -> Instant;
}

/// One-shot timers provided by the event loop.
///
/// When a timer expires the event loop delivers `(ConnectionId, TimerHandle)`
/// back to the dispatcher. Cancelled timers must never be delivered.
pub trait TimerService {
    /// Schedule a timer for `connection` that fires after `delay`.
    fn schedule_after(&self, connection: ConnectionId, delay: Duration) -> TimerHandle;

    /// Cancel a pending timer. Cancelling an expired or unknown handle is a no-op.
    fn cancel(&self, handle: TimerHandle);
}

/// The services a connection runs against.
#[derive(Clone)]
pub struct Environment {
    /// Outbound packet delivery.
    pub transport: Rc<dyn PacketTransport>,
    /// Retransmission timers.
    pub timers: Rc<dyn TimerService>,
    /// Time source for RTT samples.
    pub clock: Rc<dyn Clock>,
}

impl Environment {
    /// Bundle the three services.
    pub fn new(
        transport: Rc<dyn PacketTransport>,
        timers: Rc<dyn TimerService>,
        clock: Rc<dyn Clock>,
    ) -> Self {
        Self {
            transport,
            timers,
            clock,
        }
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment").finish_non_exhaustive()
    }
}

/// Application side of one connection.
///
/// Handlers get `&mut Connection` so they can reply with
/// [`Connection::send`] or finish with [`Connection::close`] from inside
/// the callback.
pub trait StreamHandler {
    /// In-order data arrived. `data` is never empty.
    fn on_data(&mut self, conn: &mut Connection, data: &[u8]);

    /// The peer finished sending (its FIN arrived). Called at most once.
    fn on_close(&mut self, conn: &mut Connection);

    /// The connection failed and has been closed locally.
    fn on_error(&mut self, conn: &mut Connection, error: &TransportError) {
        let _ = (conn, error);
    }
}

/// Notified once for every connection the dispatcher accepts.
pub trait AcceptHandler {
    /// A new connection completed its open request and is established.
    fn on_accept(&mut self, conn: &mut Connection);
}

impl<F> AcceptHandler for F
where
    F: FnMut(&mut Connection),
{
    fn on_accept(&mut self, conn: &mut Connection) {
        self(conn)
    }
}
