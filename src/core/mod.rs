//! Core traits, types, constants and error types (always included).

pub mod constants;
mod error;
mod traits;
mod types;

pub use error::{Error, SegmentError};
pub use traits::{AcceptHandler, Clock, Environment, PacketTransport, StreamHandler, TimerService};
pub use types::{ConnectionId, TimerHandle};
