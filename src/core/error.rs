//! Error types for mini-tcp.

use thiserror::Error;

use crate::transport::TransportError;

/// Errors that can occur when decoding a segment header.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SegmentError {
    /// Segment shorter than a minimal header.
    #[error("segment too short: {len} bytes")]
    TooShort {
        /// Length of the rejected segment.
        len: usize,
    },

    /// Data offset points before the end of the fixed header or past the segment.
    #[error("invalid data offset: {offset} words")]
    InvalidDataOffset {
        /// The offending data offset, in 32-bit words.
        offset: u8,
    },
}

/// Top-level mini-tcp errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Segment codec error.
    #[error("segment error: {0}")]
    Segment(#[from] SegmentError),

    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}
