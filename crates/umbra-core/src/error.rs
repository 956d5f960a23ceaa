//! Error types for the umbra core protocol.
//!
//! The data plane itself is error-code free: a packet that cannot be
//! processed is dropped and a send that cannot be scheduled returns `false`.
//! These enums cover the codec layer and construction.

use thiserror::Error;

/// Packet codec errors
#[derive(Debug, Error)]
pub enum PacketError {
    /// Packet shorter than header plus tag
    #[error("packet too short: expected at least {expected}, got {actual}")]
    TooShort {
        /// Minimum size required
        expected: usize,
        /// Size received
        actual: usize,
    },

    /// Declared payload length disagrees with the packet size
    #[error("payload length mismatch")]
    LengthMismatch,

    /// Unknown payload type byte
    #[error("unknown payload type: 0x{0:02X}")]
    UnknownPayloadType(u8),

    /// Sequence number already seen or outside the replay window
    #[error("replayed or stale sequence number")]
    Replayed,

    /// AEAD authentication failed
    #[error("packet failed to authenticate")]
    DecryptFailed,

    /// Destination buffer cannot hold the encoded packet
    #[error("encode buffer too small")]
    BufferTooSmall,
}

/// Peer manager construction errors
#[derive(Debug, Error)]
pub enum MgtError {
    /// Slot counts must be nonzero
    #[error("invalid slot count: peer_slots={peer_slots}, auth_slots={auth_slots}")]
    InvalidSlotCount {
        /// Requested peer slots
        peer_slots: usize,
        /// Requested auth slots
        auth_slots: usize,
    },
}
