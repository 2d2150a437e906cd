//! Tokio event loop driving a [`Dispatcher`].
//!
//! Inbound segments and timer expiries are handled on one task, one at a
//! time, so connection state needs no locking. The loop is not `Send`: await
//! [`EventLoop::run`] directly (or inside a `LocalSet`), do not spawn it.

use std::net::IpAddr;
use std::rc::Rc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::dispatcher::{Dispatcher, DispatcherConfig};
use crate::core::{Clock, Environment, PacketTransport};
use crate::transport::{SystemClock, TimerQueue};

/// A segment handed to the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    /// Encoded segment with a valid checksum.
    pub segment: Vec<u8>,
    /// Peer address.
    pub destination: IpAddr,
}

/// A segment received from the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    /// Source address from the packet layer.
    pub src: IpAddr,
    /// Destination address from the packet layer.
    pub dst: IpAddr,
    /// Raw segment bytes.
    pub segment: Vec<u8>,
}

impl Inbound {
    /// Wrap a received segment.
    pub fn new(src: IpAddr, dst: IpAddr, segment: Vec<u8>) -> Self {
        Self { src, dst, segment }
    }
}

/// [`PacketTransport`] that forwards segments into a channel.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ChannelTransport {
    /// Forward into `tx`.
    pub fn new(tx: mpsc::UnboundedSender<Outbound>) -> Self {
        Self { tx }
    }
}

impl PacketTransport for ChannelTransport {
    fn send(&self, segment: Vec<u8>, destination: IpAddr) {
        if self.tx.send(Outbound { segment, destination }).is_err() {
            trace!(%destination, "outbound channel closed, segment lost");
        }
    }
}

/// Single-threaded event loop.
pub struct EventLoop {
    dispatcher: Dispatcher,
    timers: Rc<TimerQueue>,
    inbound: mpsc::UnboundedReceiver<Inbound>,
}

impl EventLoop {
    /// Create a loop whose segments leave through `outbound`.
    ///
    /// Returns the loop and the sender to feed received segments into.
    pub fn new(
        config: DispatcherConfig,
        outbound: mpsc::UnboundedSender<Outbound>,
    ) -> (Self, mpsc::UnboundedSender<Inbound>) {
        let clock: Rc<dyn Clock> = Rc::new(SystemClock);
        let timers = Rc::new(TimerQueue::new(clock.clone()));
        let env = Environment::new(
            Rc::new(ChannelTransport::new(outbound)),
            timers.clone(),
            clock,
        );

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let event_loop = Self {
            dispatcher: Dispatcher::new(config, env),
            timers,
            inbound: inbound_rx,
        };
        (event_loop, inbound_tx)
    }

    /// The dispatcher, e.g. to register an accept handler before running.
    pub fn dispatcher_mut(&mut self) -> &mut Dispatcher {
        &mut self.dispatcher
    }

    /// The dispatcher.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Process events until every inbound sender is dropped.
    ///
    /// Returns the dispatcher with whatever connections are still live.
    pub async fn run(mut self) -> Dispatcher {
        loop {
            let deadline = self.timers.next_deadline();
            let sleep = tokio::time::sleep_until(tokio::time::Instant::from_std(
                deadline.unwrap_or_else(Instant::now),
            ));

            tokio::select! {
                inbound = self.inbound.recv() => match inbound {
                    Some(Inbound { src, dst, segment }) => self.deliver(src, dst, &segment),
                    None => break,
                },
                _ = sleep, if deadline.is_some() => self.fire_timers(),
            }
        }

        debug!(
            connections = self.dispatcher.connection_count(),
            "inbound channel closed, event loop stopped"
        );
        self.dispatcher
    }

    fn deliver(&mut self, src: IpAddr, dst: IpAddr, segment: &[u8]) {
        if let Err(error) = self.dispatcher.on_segment_arrived(src, dst, segment) {
            if !error.is_silent_drop() {
                trace!(%src, %error, "segment dropped");
            }
        }
    }

    fn fire_timers(&mut self) {
        for (id, handle) in self.timers.pop_expired(Instant::now()) {
            self.dispatcher.on_timer_expired(id, handle);
        }
    }
}

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoop")
            .field("dispatcher", &self.dispatcher)
            .field("timers", &self.timers)
            .finish()
    }
}
