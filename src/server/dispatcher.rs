//! Connection dispatcher.
//!
//! Owns the connection table and routes every inbound segment to the
//! connection it belongs to, creating connections on open requests and
//! removing them once they reach [`ConnectionState::Closed`].
//!
//! [`ConnectionState::Closed`]: crate::transport::ConnectionState::Closed

use std::collections::HashMap;
use std::net::IpAddr;

use tracing::{debug, info, trace, warn};

use crate::core::{AcceptHandler, ConnectionId, Environment, Error, TimerHandle};
use crate::transport::{
    Connection, ConnectionConfig, SegmentHeader, TransportError, TransportResult,
    verify_checksum,
};

/// Dispatcher configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Port accepted as destination; everything else is filtered out.
    pub listen_port: u16,

    /// Skip checksum validation (testing over a path that rewrites headers).
    pub ignore_checksum: bool,

    /// Settings applied to every accepted connection.
    pub connection: ConnectionConfig,
}

impl DispatcherConfig {
    /// Default settings listening on `listen_port`.
    pub fn new(listen_port: u16) -> Self {
        Self {
            listen_port,
            ignore_checksum: false,
            connection: ConnectionConfig::default(),
        }
    }
}

/// Builder for a validated [`DispatcherConfig`].
#[derive(Debug)]
pub struct DispatcherBuilder {
    config: DispatcherConfig,
}

impl DispatcherBuilder {
    /// Start from defaults, listening on `listen_port`.
    pub fn new(listen_port: u16) -> Self {
        Self {
            config: DispatcherConfig::new(listen_port),
        }
    }

    /// Set the listening port.
    pub fn listen_port(mut self, port: u16) -> Self {
        self.config.listen_port = port;
        self
    }

    /// Enable or disable checksum validation bypass.
    pub fn ignore_checksum(mut self, ignore: bool) -> Self {
        self.config.ignore_checksum = ignore;
        self
    }

    /// Set the maximum segment size.
    pub fn mss(mut self, mss: usize) -> Self {
        self.config.connection.mss = mss;
        self
    }

    /// Set the initial slow-start threshold.
    pub fn initial_ssthresh(mut self, ssthresh: usize) -> Self {
        self.config.connection.initial_ssthresh = ssthresh;
        self
    }

    /// Set the window advertised in outgoing headers.
    pub fn window(mut self, window: u16) -> Self {
        self.config.connection.window = window;
        self
    }

    /// Cap the per-connection pending-send queue.
    pub fn max_pending_bytes(mut self, limit: usize) -> Self {
        self.config.connection.max_pending_bytes = Some(limit);
        self
    }

    /// Abort connections after this many consecutive timeouts.
    pub fn max_retransmits(mut self, limit: u32) -> Self {
        self.config.connection.max_retransmits = Some(limit);
        self
    }

    /// Replace the per-connection settings wholesale.
    pub fn connection(mut self, config: ConnectionConfig) -> Self {
        self.config.connection = config;
        self
    }

    /// Validate and build the configuration.
    pub fn build(self) -> Result<DispatcherConfig, Error> {
        let connection = &self.config.connection;
        if connection.mss == 0 {
            return Err(Error::Config("mss must be at least 1 byte".into()));
        }
        if connection.initial_ssthresh < connection.mss {
            return Err(Error::Config(format!(
                "initial ssthresh {} is below mss {}",
                connection.initial_ssthresh, connection.mss
            )));
        }
        Ok(self.config)
    }
}

/// Demultiplexes inbound segments onto connections.
pub struct Dispatcher {
    config: DispatcherConfig,
    env: Environment,
    connections: HashMap<ConnectionId, Connection>,
    accept_handler: Option<Box<dyn AcceptHandler>>,
}

impl Dispatcher {
    /// Create a dispatcher with an empty connection table.
    pub fn new(config: DispatcherConfig, env: Environment) -> Self {
        Self {
            config,
            env,
            connections: HashMap::new(),
            accept_handler: None,
        }
    }

    /// Register the hook called once per accepted connection.
    pub fn register_accept_handler(&mut self, handler: impl AcceptHandler + 'static) {
        self.accept_handler = Some(Box::new(handler));
    }

    /// Route one inbound segment.
    ///
    /// Every error means the segment was dropped; none of them is reported
    /// to the peer.
    ///
    /// # Errors
    ///
    /// - [`TransportError::Segment`] if the header cannot be decoded.
    /// - [`TransportError::PortNotListening`] for other destination ports.
    /// - [`TransportError::ChecksumMismatch`] if validation is on and fails.
    /// - [`TransportError::UnknownConnection`] for non-SYN segments of an
    ///   identity not in the table.
    pub fn on_segment_arrived(
        &mut self,
        src: IpAddr,
        dst: IpAddr,
        segment: &[u8],
    ) -> TransportResult<()> {
        let header = SegmentHeader::decode(segment).inspect_err(|error| {
            debug!(%src, %error, "malformed segment dropped");
        })?;

        if header.dst_port != self.config.listen_port {
            return Err(TransportError::PortNotListening {
                port: header.dst_port,
            });
        }

        if !self.config.ignore_checksum && !verify_checksum(segment, src, dst) {
            warn!(
                %src,
                src_port = header.src_port,
                checksum = header.checksum,
                "dropping segment with bad checksum"
            );
            return Err(TransportError::ChecksumMismatch);
        }

        let id = ConnectionId::new(src, header.src_port, dst, header.dst_port);

        if header.flags.is_syn() {
            self.accept(id, header.seq);
            return Ok(());
        }

        let Some(conn) = self.connections.get_mut(&id) else {
            debug!(connection = %id, flags = %header.flags, "segment for unknown connection");
            return Err(TransportError::UnknownConnection(id));
        };
        conn.on_segment(
            header.seq,
            header.ack,
            header.flags,
            header.payload(segment),
        );
        self.reap(id);
        Ok(())
    }

    /// Deliver a retransmission timer expiry.
    pub fn on_timer_expired(&mut self, id: ConnectionId, handle: TimerHandle) {
        let Some(conn) = self.connections.get_mut(&id) else {
            trace!(connection = %id, %handle, "timer for reaped connection");
            return;
        };
        conn.on_retransmit_timeout(handle);
        self.reap(id);
    }

    /// Send on connection `id`.
    ///
    /// # Errors
    ///
    /// [`TransportError::UnknownConnection`] if `id` is not in the table,
    /// otherwise whatever [`Connection::send`] returns.
    pub fn send(&mut self, id: ConnectionId, data: &[u8]) -> TransportResult<()> {
        self.with_connection(id, |conn| conn.send(data))
            .ok_or(TransportError::UnknownConnection(id))?
    }

    /// Close connection `id`.
    ///
    /// # Errors
    ///
    /// [`TransportError::UnknownConnection`] if `id` is not in the table.
    pub fn close(&mut self, id: ConnectionId) -> TransportResult<()> {
        self.with_connection(id, Connection::close)
            .ok_or(TransportError::UnknownConnection(id))
    }

    /// Run `f` against connection `id`, then reap it if it closed.
    pub fn with_connection<R>(
        &mut self,
        id: ConnectionId,
        f: impl FnOnce(&mut Connection) -> R,
    ) -> Option<R> {
        let result = f(self.connections.get_mut(&id)?);
        self.reap(id);
        Some(result)
    }

    /// Look up a live connection.
    pub fn connection(&self, id: &ConnectionId) -> Option<&Connection> {
        self.connections.get(id)
    }

    /// Identities of all live connections.
    pub fn connection_ids(&self) -> impl Iterator<Item = &ConnectionId> {
        self.connections.keys()
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Configuration in use.
    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    fn accept(&mut self, id: ConnectionId, peer_isn: u32) {
        if let Some(mut previous) = self.connections.remove(&id) {
            warn!(
                connection = %id,
                state = %previous.state(),
                "open request replaces live connection"
            );
            previous.cancel_timer();
        }

        let mut conn = Connection::accept(
            id,
            peer_isn,
            self.config.connection.clone(),
            self.env.clone(),
        );
        conn.send_syn_ack();
        info!(connection = %id, peer_isn, "connection accepted");

        if let Some(handler) = self.accept_handler.as_mut() {
            handler.on_accept(&mut conn);
        }

        if conn.is_closed() {
            info!(connection = %id, "connection closed during accept");
        } else {
            self.connections.insert(id, conn);
        }
    }

    fn reap(&mut self, id: ConnectionId) {
        if self.connections.get(&id).is_some_and(Connection::is_closed) {
            if let Some(mut conn) = self.connections.remove(&id) {
                conn.cancel_timer();
            }
            info!(connection = %id, "connection reaped");
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.config)
            .field("connections", &self.connections.len())
            .field("has_accept_handler", &self.accept_handler.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{
        Echo, Event, LOCAL, LOCAL_PORT, PEER, PEER_PORT, Recorder, TestEnv, conn_id,
        peer_segment,
    };
    use crate::transport::{ConnectionState, SegmentFlags};
    use std::cell::Cell;
    use std::rc::Rc;
    use std::time::Duration;

    const PEER_ISN: u32 = 100;

    fn dispatcher(test: &TestEnv) -> Dispatcher {
        let config = DispatcherBuilder::new(LOCAL_PORT)
            .mss(4)
            .initial_ssthresh(1000)
            .build()
            .unwrap();
        Dispatcher::new(config, test.env())
    }

    /// Open a connection and return our initial sequence number + 1.
    fn open(test: &TestEnv, dispatcher: &mut Dispatcher) -> u32 {
        let syn = peer_segment(PEER_ISN, 0, SegmentFlags::SYN, &[]);
        dispatcher.on_segment_arrived(PEER, LOCAL, &syn).unwrap();
        let sent = test.transport.take();
        assert_eq!(sent.len(), 1);
        sent[0].header.seq.wrapping_add(1)
    }

    #[test]
    fn test_syn_creates_connection_and_notifies() {
        let test = TestEnv::new();
        let mut dispatcher = dispatcher(&test);
        let accepted = Rc::new(Cell::new(0));
        let counter = accepted.clone();
        dispatcher.register_accept_handler(move |conn: &mut Connection| {
            assert!(conn.is_established());
            counter.set(counter.get() + 1);
        });

        let syn = peer_segment(PEER_ISN, 0, SegmentFlags::SYN, &[]);
        dispatcher.on_segment_arrived(PEER, LOCAL, &syn).unwrap();

        let sent = test.transport.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].flags(), SegmentFlags::SYN | SegmentFlags::ACK);
        assert_eq!(sent[0].header.ack, PEER_ISN + 1);
        assert_eq!(sent[0].header.src_port, LOCAL_PORT);
        assert_eq!(sent[0].header.dst_port, PEER_PORT);
        assert!(sent[0].checksum_ok);

        assert_eq!(accepted.get(), 1);
        assert_eq!(dispatcher.connection_count(), 1);
        let conn = dispatcher.connection(&conn_id()).unwrap();
        assert_eq!(conn.state(), ConnectionState::Established);
        assert_eq!(conn.rcv_nxt(), PEER_ISN + 1);
    }

    #[test]
    fn test_other_port_filtered() {
        let test = TestEnv::new();
        let mut dispatcher = dispatcher(&test);

        let header = SegmentHeader::new(PEER_PORT, LOCAL_PORT + 1, 0, 0, SegmentFlags::SYN);
        let syn = crate::transport::build_segment(&header, &[], PEER, LOCAL);
        let err = dispatcher.on_segment_arrived(PEER, LOCAL, &syn).unwrap_err();

        assert!(err.is_silent_drop());
        assert_eq!(dispatcher.connection_count(), 0);
        assert!(test.transport.take().is_empty());
    }

    #[test]
    fn test_bad_checksum_dropped() {
        let test = TestEnv::new();
        let mut dispatcher = dispatcher(&test);

        let mut syn = peer_segment(PEER_ISN, 0, SegmentFlags::SYN, &[]);
        syn[16] ^= 0xff;

        assert_eq!(
            dispatcher.on_segment_arrived(PEER, LOCAL, &syn),
            Err(TransportError::ChecksumMismatch)
        );
        assert_eq!(dispatcher.connection_count(), 0);
        assert!(test.transport.take_raw().is_empty());
    }

    #[test]
    fn test_ignore_checksum_accepts_bad_segment() {
        let test = TestEnv::new();
        let config = DispatcherBuilder::new(LOCAL_PORT)
            .ignore_checksum(true)
            .build()
            .unwrap();
        let mut dispatcher = Dispatcher::new(config, test.env());

        let mut syn = peer_segment(PEER_ISN, 0, SegmentFlags::SYN, &[]);
        syn[16] ^= 0xff;

        dispatcher.on_segment_arrived(PEER, LOCAL, &syn).unwrap();
        assert_eq!(dispatcher.connection_count(), 1);
    }

    #[test]
    fn test_malformed_segment_dropped() {
        let test = TestEnv::new();
        let mut dispatcher = dispatcher(&test);

        let err = dispatcher
            .on_segment_arrived(PEER, LOCAL, &[0u8; 7])
            .unwrap_err();
        assert!(matches!(err, TransportError::Segment(_)));
        assert!(err.is_drop());
    }

    #[test]
    fn test_unknown_connection_dropped() {
        let test = TestEnv::new();
        let mut dispatcher = dispatcher(&test);

        let data = peer_segment(101, 0, SegmentFlags::ACK, b"hi");
        assert_eq!(
            dispatcher.on_segment_arrived(PEER, LOCAL, &data),
            Err(TransportError::UnknownConnection(conn_id()))
        );
        assert!(test.transport.take().is_empty());
    }

    #[test]
    fn test_data_routed_to_handler() {
        let test = TestEnv::new();
        let mut dispatcher = dispatcher(&test);
        let recorder = Recorder::default();
        let handler = recorder.clone();
        dispatcher.register_accept_handler(move |conn: &mut Connection| {
            conn.set_handler(handler.clone());
        });
        let snd_nxt = open(&test, &mut dispatcher);

        let data = peer_segment(PEER_ISN + 1, snd_nxt, SegmentFlags::ACK, b"hey");
        dispatcher.on_segment_arrived(PEER, LOCAL, &data).unwrap();

        assert_eq!(recorder.events(), vec![Event::Data(b"hey".to_vec())]);
        assert_eq!(test.transport.take()[0].header.ack, PEER_ISN + 4);
    }

    #[test]
    fn test_echo_and_teardown() {
        let test = TestEnv::new();
        let mut dispatcher = dispatcher(&test);
        dispatcher.register_accept_handler(|conn: &mut Connection| conn.set_handler(Echo));
        let snd_nxt = open(&test, &mut dispatcher);

        let data = peer_segment(PEER_ISN + 1, snd_nxt, SegmentFlags::ACK, b"abcdef");
        dispatcher.on_segment_arrived(PEER, LOCAL, &data).unwrap();

        // Pure ack, then as much echo as the 4-byte window allows.
        let sent = test.transport.take();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].payload, b"abcd");

        let ack = peer_segment(PEER_ISN + 7, snd_nxt.wrapping_add(4), SegmentFlags::ACK, &[]);
        dispatcher.on_segment_arrived(PEER, LOCAL, &ack).unwrap();
        assert_eq!(test.transport.take()[0].payload, b"ef");

        let fin = peer_segment(
            PEER_ISN + 7,
            snd_nxt.wrapping_add(6),
            SegmentFlags::FIN | SegmentFlags::ACK,
            &[],
        );
        dispatcher.on_segment_arrived(PEER, LOCAL, &fin).unwrap();

        let sent = test.transport.take();
        assert_eq!(sent[0].header.ack, PEER_ISN + 8);
        assert!(sent[1].flags().is_fin());
        assert_eq!(dispatcher.connection_count(), 0);
        assert!(test.timers.is_empty());
    }

    #[test]
    fn test_duplicate_syn_replaces_connection() {
        let test = TestEnv::new();
        let mut dispatcher = dispatcher(&test);
        open(&test, &mut dispatcher);
        dispatcher.send(conn_id(), b"data").unwrap();
        assert_eq!(test.timers.len(), 1);

        let syn = peer_segment(900, 0, SegmentFlags::SYN, &[]);
        dispatcher.on_segment_arrived(PEER, LOCAL, &syn).unwrap();

        assert_eq!(dispatcher.connection_count(), 1);
        assert!(test.timers.is_empty());
        let conn = dispatcher.connection(&conn_id()).unwrap();
        assert_eq!(conn.rcv_nxt(), 901);
        assert_eq!(conn.bytes_in_flight(), 0);
    }

    #[test]
    fn test_timer_routed_to_connection() {
        let test = TestEnv::new();
        let mut dispatcher = dispatcher(&test);
        let snd_nxt = open(&test, &mut dispatcher);
        dispatcher.send(conn_id(), b"lost").unwrap();
        test.transport.take();

        for (id, handle) in test.advance(Duration::from_secs(1)) {
            dispatcher.on_timer_expired(id, handle);
        }

        let sent = test.transport.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].header.seq, snd_nxt);
        assert_eq!(sent[0].payload, b"lost");
    }

    #[test]
    fn test_retransmit_ceiling_reaps() {
        let test = TestEnv::new();
        let config = DispatcherBuilder::new(LOCAL_PORT)
            .max_retransmits(0)
            .build()
            .unwrap();
        let mut dispatcher = Dispatcher::new(config, test.env());
        open(&test, &mut dispatcher);
        dispatcher.send(conn_id(), b"x").unwrap();

        for (id, handle) in test.advance(Duration::from_secs(1)) {
            dispatcher.on_timer_expired(id, handle);
        }
        assert_eq!(dispatcher.connection_count(), 0);
    }

    #[test]
    fn test_application_close_then_peer_fin_reaps() {
        let test = TestEnv::new();
        let mut dispatcher = dispatcher(&test);
        let snd_nxt = open(&test, &mut dispatcher);

        dispatcher.close(conn_id()).unwrap();
        assert_eq!(dispatcher.connection_count(), 1);
        assert!(test.transport.take()[0].flags().is_fin());

        let fin = peer_segment(
            PEER_ISN + 1,
            snd_nxt.wrapping_add(1),
            SegmentFlags::FIN | SegmentFlags::ACK,
            &[],
        );
        dispatcher.on_segment_arrived(PEER, LOCAL, &fin).unwrap();
        assert_eq!(dispatcher.connection_count(), 0);

        assert_eq!(
            dispatcher.close(conn_id()),
            Err(TransportError::UnknownConnection(conn_id()))
        );
    }

    #[test]
    fn test_builder_validation() {
        assert!(matches!(
            DispatcherBuilder::new(80).mss(0).build(),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            DispatcherBuilder::new(80).mss(1000).initial_ssthresh(999).build(),
            Err(Error::Config(_))
        ));

        let config = DispatcherBuilder::new(80)
            .mss(536)
            .window(1024)
            .max_pending_bytes(1 << 20)
            .build()
            .unwrap();
        assert_eq!(config.listen_port, 80);
        assert_eq!(config.connection.mss, 536);
        assert_eq!(config.connection.window, 1024);
        assert_eq!(config.connection.max_pending_bytes, Some(1 << 20));
        assert!(!config.ignore_checksum);
    }
}
