//! Deterministic services for unit tests.

use std::cell::RefCell;
use std::net::{IpAddr, Ipv4Addr};
use std::rc::Rc;
use std::time::Duration;

use crate::core::{
    Clock, ConnectionId, Environment, PacketTransport, StreamHandler, TimerHandle,
};
use crate::transport::{
    Connection, ManualClock, SegmentFlags, SegmentHeader, TimerQueue, TransportError,
    build_segment, verify_checksum,
};

/// Peer address used throughout the tests.
pub(crate) const PEER: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));
/// Local address used throughout the tests.
pub(crate) const LOCAL: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
/// Peer port used throughout the tests.
pub(crate) const PEER_PORT: u16 = 40_000;
/// Listening port used throughout the tests.
pub(crate) const LOCAL_PORT: u16 = 7_000;

pub(crate) fn conn_id() -> ConnectionId {
    ConnectionId::new(PEER, PEER_PORT, LOCAL, LOCAL_PORT)
}

/// A segment captured by [`RecordingTransport`], already decoded.
#[derive(Debug, Clone)]
pub(crate) struct Sent {
    pub header: SegmentHeader,
    pub payload: Vec<u8>,
    pub destination: IpAddr,
    pub checksum_ok: bool,
}

impl Sent {
    pub fn flags(&self) -> SegmentFlags {
        self.header.flags
    }
}

/// Packet transport that keeps everything it is asked to send.
#[derive(Debug, Default)]
pub(crate) struct RecordingTransport {
    sent: RefCell<Vec<(Vec<u8>, IpAddr)>>,
}

impl RecordingTransport {
    /// Drain and decode everything sent so far.
    pub fn take(&self) -> Vec<Sent> {
        self.sent
            .borrow_mut()
            .drain(..)
            .map(|(segment, destination)| {
                let header = SegmentHeader::decode(&segment).expect("engine sent a bad header");
                Sent {
                    payload: header.payload(&segment).to_vec(),
                    checksum_ok: verify_checksum(&segment, LOCAL, destination),
                    header,
                    destination,
                }
            })
            .collect()
    }

    /// Drain the raw bytes sent so far.
    pub fn take_raw(&self) -> Vec<(Vec<u8>, IpAddr)> {
        self.sent.borrow_mut().drain(..).collect()
    }
}

impl PacketTransport for RecordingTransport {
    fn send(&self, segment: Vec<u8>, destination: IpAddr) {
        self.sent.borrow_mut().push((segment, destination));
    }
}

/// Recording transport, manual clock and timer queue wired together.
pub(crate) struct TestEnv {
    pub transport: Rc<RecordingTransport>,
    pub clock: Rc<ManualClock>,
    pub timers: Rc<TimerQueue>,
}

impl TestEnv {
    pub fn new() -> Self {
        let clock = Rc::new(ManualClock::new());
        let timers = Rc::new(TimerQueue::new(clock.clone()));
        Self {
            transport: Rc::new(RecordingTransport::default()),
            clock,
            timers,
        }
    }

    pub fn env(&self) -> Environment {
        Environment::new(
            self.transport.clone(),
            self.timers.clone(),
            self.clock.clone(),
        )
    }

    /// Move time forward and return the timers that expired on the way.
    pub fn advance(&self, by: Duration) -> Vec<(ConnectionId, TimerHandle)> {
        self.clock.advance(by);
        self.timers.pop_expired(self.clock.now())
    }
}

/// Build a checksummed segment as the peer would send it.
pub(crate) fn peer_segment(seq: u32, ack: u32, flags: SegmentFlags, payload: &[u8]) -> Vec<u8> {
    let header = SegmentHeader::new(PEER_PORT, LOCAL_PORT, seq, ack, flags);
    build_segment(&header, payload, PEER, LOCAL)
}

/// What a [`Recorder`] saw.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Event {
    Data(Vec<u8>),
    Close,
    Error(TransportError),
}

/// Stream handler that records every callback.
#[derive(Debug, Default, Clone)]
pub(crate) struct Recorder(Rc<RefCell<Vec<Event>>>);

impl Recorder {
    pub fn events(&self) -> Vec<Event> {
        self.0.borrow().clone()
    }
}

impl StreamHandler for Recorder {
    fn on_data(&mut self, _conn: &mut Connection, data: &[u8]) {
        self.0.borrow_mut().push(Event::Data(data.to_vec()));
    }

    fn on_close(&mut self, _conn: &mut Connection) {
        self.0.borrow_mut().push(Event::Close);
    }

    fn on_error(&mut self, _conn: &mut Connection, error: &TransportError) {
        self.0.borrow_mut().push(Event::Error(error.clone()));
    }
}

/// Stream handler that sends every payload back and closes when the peer does.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Echo;

impl StreamHandler for Echo {
    fn on_data(&mut self, conn: &mut Connection, data: &[u8]) {
        conn.send(data).expect("echo send failed");
    }

    fn on_close(&mut self, conn: &mut Connection) {
        conn.close();
    }
}
