//! mini-tcp - Server Library
//!
//! Connection dispatcher and the event loop that drives it.

mod dispatcher;
#[cfg(feature = "runtime")]
#[cfg_attr(docsrs, doc(cfg(feature = "runtime")))]
mod runtime;

pub use dispatcher::*;
#[cfg(feature = "runtime")]
pub use runtime::*;
