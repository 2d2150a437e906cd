//! Segment header encoding, decoding and checksums.
//!
//! # Wire format (RFC 793 §3.1)
//!
//! All multi-byte integers are big-endian.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |          Source Port          |       Destination Port        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Sequence Number                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                    Acknowledgment Number                      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |  Data |       |   Flags   |                                   |
//! | Offset|       |U|A|P|R|S|F|            Window                 |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |           Checksum            |         Urgent Pointer        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use std::net::IpAddr;

use crate::core::SegmentError;
use crate::core::constants::{
    DEFAULT_DATA_OFFSET, DEFAULT_WINDOW, FLAG_ACK, FLAG_FIN, FLAG_PSH, FLAG_RST, FLAG_SYN,
    FLAG_URG, HEADER_LEN, PROTOCOL_TCP,
};

// Byte offsets of each field within the header.
const OFF_SRC_PORT: usize = 0;
const OFF_DST_PORT: usize = 2;
const OFF_SEQ: usize = 4;
const OFF_ACK: usize = 8;
const OFF_DATA_OFFSET: usize = 12;
const OFF_FLAGS: usize = 13;
const OFF_WINDOW: usize = 14;
const OFF_CHECKSUM: usize = 16;
const OFF_URGENT: usize = 18;

/// Segment flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct SegmentFlags(u8);

impl SegmentFlags {
    /// No flags set.
    pub const NONE: Self = Self(0);
    /// Termination.
    pub const FIN: Self = Self(FLAG_FIN);
    /// Connection open.
    pub const SYN: Self = Self(FLAG_SYN);
    /// Reset.
    pub const RST: Self = Self(FLAG_RST);
    /// Push.
    pub const PSH: Self = Self(FLAG_PSH);
    /// Acknowledgment.
    pub const ACK: Self = Self(FLAG_ACK);
    /// Urgent.
    pub const URG: Self = Self(FLAG_URG);

    /// Create flags from a raw byte.
    pub fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    /// Get the raw byte value.
    pub fn as_byte(self) -> u8 {
        self.0
    }

    /// Check whether every bit of `other` is set.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Check for the connection-open flag.
    pub fn is_syn(self) -> bool {
        self.contains(Self::SYN)
    }

    /// Check for the acknowledgment flag.
    pub fn is_ack(self) -> bool {
        self.contains(Self::ACK)
    }

    /// Check for the termination flag.
    pub fn is_fin(self) -> bool {
        self.contains(Self::FIN)
    }
}

impl std::ops::BitOr for SegmentFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for SegmentFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl std::fmt::Display for SegmentFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        const NAMES: [(SegmentFlags, &str); 6] = [
            (SegmentFlags::SYN, "SYN"),
            (SegmentFlags::ACK, "ACK"),
            (SegmentFlags::FIN, "FIN"),
            (SegmentFlags::RST, "RST"),
            (SegmentFlags::PSH, "PSH"),
            (SegmentFlags::URG, "URG"),
        ];
        let mut first = true;
        for (flag, name) in NAMES {
            if self.contains(flag) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        if first {
            f.write_str("-")?;
        }
        Ok(())
    }
}

/// Decoded segment header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    /// Source port.
    pub src_port: u16,
    /// Destination port.
    pub dst_port: u16,
    /// Sequence number of the first payload byte.
    pub seq: u32,
    /// Next sequence number the sender expects from us.
    pub ack: u32,
    /// Header length in 32-bit words.
    pub data_offset: u8,
    /// Flag bits.
    pub flags: SegmentFlags,
    /// Advertised window.
    pub window: u16,
    /// Checksum as found on the wire.
    pub checksum: u16,
    /// Urgent pointer.
    pub urgent_pointer: u16,
}

impl SegmentHeader {
    /// Build a header without options.
    pub fn new(src_port: u16, dst_port: u16, seq: u32, ack: u32, flags: SegmentFlags) -> Self {
        Self {
            src_port,
            dst_port,
            seq,
            ack,
            data_offset: DEFAULT_DATA_OFFSET,
            flags,
            window: DEFAULT_WINDOW,
            checksum: 0,
            urgent_pointer: 0,
        }
    }

    /// Set the advertised window.
    pub fn with_window(mut self, window: u16) -> Self {
        self.window = window;
        self
    }

    /// Header length in bytes.
    pub fn header_len(&self) -> usize {
        usize::from(self.data_offset) * 4
    }

    /// Serialise the fixed 20-byte header.
    ///
    /// The data offset is always written as 5 (no options) and the checksum
    /// as zero; call [`fix_checksum`] once the payload is appended.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_LEN];
        buf[OFF_SRC_PORT..OFF_SRC_PORT + 2].copy_from_slice(&self.src_port.to_be_bytes());
        buf[OFF_DST_PORT..OFF_DST_PORT + 2].copy_from_slice(&self.dst_port.to_be_bytes());
        buf[OFF_SEQ..OFF_SEQ + 4].copy_from_slice(&self.seq.to_be_bytes());
        buf[OFF_ACK..OFF_ACK + 4].copy_from_slice(&self.ack.to_be_bytes());
        buf[OFF_DATA_OFFSET] = DEFAULT_DATA_OFFSET << 4;
        buf[OFF_FLAGS] = self.flags.as_byte();
        buf[OFF_WINDOW..OFF_WINDOW + 2].copy_from_slice(&self.window.to_be_bytes());
        buf[OFF_URGENT..OFF_URGENT + 2].copy_from_slice(&self.urgent_pointer.to_be_bytes());
        buf
    }

    /// Parse the header at the start of `segment`.
    pub fn decode(segment: &[u8]) -> Result<Self, SegmentError> {
        if segment.len() < HEADER_LEN {
            return Err(SegmentError::TooShort { len: segment.len() });
        }

        let data_offset = segment[OFF_DATA_OFFSET] >> 4;
        let header_len = usize::from(data_offset) * 4;
        if data_offset < DEFAULT_DATA_OFFSET || header_len > segment.len() {
            return Err(SegmentError::InvalidDataOffset {
                offset: data_offset,
            });
        }

        Ok(Self {
            src_port: read_u16(segment, OFF_SRC_PORT),
            dst_port: read_u16(segment, OFF_DST_PORT),
            seq: read_u32(segment, OFF_SEQ),
            ack: read_u32(segment, OFF_ACK),
            data_offset,
            flags: SegmentFlags::from_byte(segment[OFF_FLAGS] & 0x3f),
            window: read_u16(segment, OFF_WINDOW),
            checksum: read_u16(segment, OFF_CHECKSUM),
            urgent_pointer: read_u16(segment, OFF_URGENT),
        })
    }

    /// Slice the payload out of a segment this header was decoded from.
    pub fn payload<'a>(&self, segment: &'a [u8]) -> &'a [u8] {
        segment.get(self.header_len()..).unwrap_or(&[])
    }
}

fn read_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_be_bytes([buf[off], buf[off + 1]])
}

fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_be_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

/// Build a complete segment: header, payload and a valid checksum.
pub fn build_segment(header: &SegmentHeader, payload: &[u8], src: IpAddr, dst: IpAddr) -> Vec<u8> {
    let mut segment = header.encode();
    segment.extend_from_slice(payload);
    fix_checksum(&mut segment, src, dst);
    segment
}

/// Compute the checksum over the pseudo-header and `segment`.
///
/// The checksum field is included as-is, so a correctly checksummed segment
/// yields 0.
pub fn checksum(segment: &[u8], src: IpAddr, dst: IpAddr) -> u16 {
    let mut sum = pseudo_header_sum(src, dst, segment.len());
    sum = add_words(sum, segment);
    !fold(sum)
}

/// Write a valid checksum into `segment`.
///
/// Segments shorter than a header are left untouched.
pub fn fix_checksum(segment: &mut [u8], src: IpAddr, dst: IpAddr) {
    if segment.len() < HEADER_LEN {
        return;
    }
    segment[OFF_CHECKSUM..OFF_CHECKSUM + 2].copy_from_slice(&[0, 0]);
    let csum = checksum(segment, src, dst);
    segment[OFF_CHECKSUM..OFF_CHECKSUM + 2].copy_from_slice(&csum.to_be_bytes());
}

/// Check that `segment` carries a valid checksum.
pub fn verify_checksum(segment: &[u8], src: IpAddr, dst: IpAddr) -> bool {
    checksum(segment, src, dst) == 0
}

/// Sum of the pseudo-header words.
///
/// Two IPv4 addresses use the RFC 793 layout; anything else uses the
/// RFC 8200 layout with IPv4 addresses mapped into IPv6.
fn pseudo_header_sum(src: IpAddr, dst: IpAddr, len: usize) -> u32 {
    match (src, dst) {
        (IpAddr::V4(s), IpAddr::V4(d)) => {
            let mut sum = add_words(0, &s.octets());
            sum = add_words(sum, &d.octets());
            sum += u32::from(PROTOCOL_TCP);
            sum + (len as u32 & 0xffff)
        }
        _ => {
            let s = match src {
                IpAddr::V4(a) => a.to_ipv6_mapped(),
                IpAddr::V6(a) => a,
            };
            let d = match dst {
                IpAddr::V4(a) => a.to_ipv6_mapped(),
                IpAddr::V6(a) => a,
            };
            let mut sum = add_words(0, &s.octets());
            sum = add_words(sum, &d.octets());
            let len = len as u32;
            sum += (len >> 16) + (len & 0xffff);
            sum + u32::from(PROTOCOL_TCP)
        }
    }
}

/// Add big-endian 16-bit words of `data` to `sum`, padding an odd byte with zero.
fn add_words(mut sum: u32, data: &[u8]) -> u32 {
    let mut chunks = data.chunks_exact(2);
    for word in &mut chunks {
        sum = u32::from(fold(sum + u32::from(u16::from_be_bytes([word[0], word[1]]))));
    }
    if let [last] = chunks.remainder() {
        sum = u32::from(fold(sum + (u32::from(*last) << 8)));
    }
    sum
}

/// Fold carries into the low 16 bits.
fn fold(mut sum: u32) -> u16 {
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    sum as u16
}
