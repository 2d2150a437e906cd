//! # mini-tcp
//!
//! A simplified TCP: reliable, ordered byte streams on top of a best-effort
//! packet service. It provides:
//!
//! - **Establishment**: open request answered with SYN|ACK
//! - **Ordered receive**: cumulative acknowledgments, duplicate acks for
//!   out-of-order segments
//! - **Adaptive retransmission**: Jacobson/Karels RTT estimation
//! - **Congestion control**: slow start and congestion avoidance
//! - **Termination**: FIN exchange with half-close
//!
//! The engine is sans-IO: it sends through a [`PacketTransport`], schedules
//! through a [`TimerService`] and reads time from a [`Clock`]. The `runtime`
//! feature supplies a tokio event loop wiring all three to channels.
//!
//! ## Feature Flags
//!
//! - `runtime` (default): tokio event loop ([`server::EventLoop`])
//! - `random-isn` (default): random initial sequence numbers
//!
//! ## Modules
//!
//! - [`core`]: Core traits, constants, and error types (always included)
//! - [`transport`]: Segment codec, RTT, congestion control, connection engine
//! - [`server`]: Dispatcher and event loop
//!
//! ## Example Usage
//!
//! ```rust
//! use std::rc::Rc;
//! use mini_tcp::prelude::*;
//!
//! struct Echo;
//!
//! impl StreamHandler for Echo {
//!     fn on_data(&mut self, conn: &mut Connection, data: &[u8]) {
//!         let _ = conn.send(data);
//!     }
//!
//!     fn on_close(&mut self, conn: &mut Connection) {
//!         conn.close();
//!     }
//! }
//!
//! struct Discard;
//!
//! impl PacketTransport for Discard {
//!     fn send(&self, _segment: Vec<u8>, _destination: std::net::IpAddr) {}
//! }
//!
//! let clock: Rc<dyn Clock> = Rc::new(SystemClock);
//! let timers = Rc::new(TimerQueue::new(clock.clone()));
//! let env = Environment::new(Rc::new(Discard), timers, clock);
//!
//! let config = DispatcherBuilder::new(7000).mss(536).build().unwrap();
//! let mut dispatcher = Dispatcher::new(config, env);
//! dispatcher.register_accept_handler(|conn: &mut Connection| conn.set_handler(Echo));
//! ```
//!
//! [`PacketTransport`]: crate::core::PacketTransport
//! [`TimerService`]: crate::core::TimerService
//! [`Clock`]: crate::core::Clock

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Core module (always included)
pub mod core;

// Transport layer
pub mod transport;

// Dispatcher and runtime
pub mod server;

#[cfg(test)]
mod test_util;

/// Prelude module for convenient imports.
pub mod prelude {
    // Core traits and types
    pub use crate::core::*;

    pub use crate::transport::{
        Connection, ConnectionConfig, ConnectionState, ManualClock, SegmentFlags,
        SegmentHeader, SystemClock, TimerQueue, TransportError, TransportResult,
    };

    pub use crate::server::{Dispatcher, DispatcherBuilder, DispatcherConfig};

    #[cfg(feature = "runtime")]
    pub use crate::server::{EventLoop, Inbound, Outbound};
}

// Re-export commonly used items at crate root
pub use crate::core::{ConnectionId, Error};

pub use server::{Dispatcher, DispatcherBuilder, DispatcherConfig};
pub use transport::{Connection, ConnectionConfig, ConnectionState, TransportError};
