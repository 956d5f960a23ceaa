//! Wire codec for overlay datagrams.
//!
//! Layout, all multi-byte integers big-endian:
//!
//! ```text
//! peer_id(4) | seq(8) | pl_type(1) | options(1) | pl_length(2) | ciphertext | tag(16)
//! ```
//!
//! The 16-byte header is authenticated as AEAD associated data; the
//! sequence number doubles as the AEAD nonce counter, so the format carries
//! no separate nonce. `peer_id` is the *receiver's* slot index for the
//! session, readable without decryption so inbound datagrams can be routed
//! to their crypto context.
//!
//! Anonymous packets (`peer_id == 0`) are encoded under the shared group
//! context with a random sequence value and no replay window; everything
//! else threads a [`SeqState`] through [`decode`], which probes before
//! decrypting and commits after.

use crate::error::PacketError;
use crate::seq::SeqState;
use umbra_crypto::{SessionCrypto, TAG_SIZE};

/// Size of the leading PeerID field.
pub const PEERID_SIZE: usize = 4;

/// Size of the trailing authentication tag.
pub const HMAC_SIZE: usize = TAG_SIZE;

/// Size of the cleartext header (which is also the AAD).
pub const HDR_SIZE: usize = 16;

/// Total per-packet overhead.
pub const OVERHEAD: usize = HDR_SIZE + HMAC_SIZE;

/// Payload type tags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PayloadType {
    /// Application payload
    Userdata = 0x01,
    /// One fragment of an oversized application payload
    UserdataFragment = 0x02,
    /// Gossip advertisement of known peers
    Peerinfo = 0x03,
    /// Echo request
    Ping = 0x04,
    /// Echo reply
    Pong = 0x05,
    /// Encapsulated datagram to forward to a third peer
    RelayIn = 0x06,
    /// Forwarded datagram delivered by a relay
    RelayOut = 0x07,
    /// Handshake message (anonymous context only)
    Auth = 0x08,
}

impl TryFrom<u8> for PayloadType {
    type Error = PacketError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::Userdata),
            0x02 => Ok(Self::UserdataFragment),
            0x03 => Ok(Self::Peerinfo),
            0x04 => Ok(Self::Ping),
            0x05 => Ok(Self::Pong),
            0x06 => Ok(Self::RelayIn),
            0x07 => Ok(Self::RelayOut),
            0x08 => Ok(Self::Auth),
            other => Err(PacketError::UnknownPayloadType(other)),
        }
    }
}

/// A decoded packet.
#[derive(Debug)]
pub struct PacketData {
    /// Receiver slot index the sender addressed.
    pub peer_id: u32,
    /// Sequence number (AEAD counter).
    pub seq: u64,
    /// Payload type tag.
    pub pl_type: PayloadType,
    /// Type-specific options byte.
    pub options: u8,
    /// Decrypted payload.
    pub payload: Vec<u8>,
}

/// Read the front-of-packet PeerID without decrypting.
#[must_use]
pub fn peer_id(packet: &[u8]) -> Option<u32> {
    let bytes: [u8; PEERID_SIZE] = packet.get(..PEERID_SIZE)?.try_into().ok()?;
    Some(u32::from_be_bytes(bytes))
}

fn write_header(
    hdr: &mut [u8; HDR_SIZE],
    peer_id: u32,
    seq: u64,
    pl_type: PayloadType,
    options: u8,
    pl_length: u16,
) {
    hdr[0..4].copy_from_slice(&peer_id.to_be_bytes());
    hdr[4..12].copy_from_slice(&seq.to_be_bytes());
    hdr[12] = pl_type as u8;
    hdr[13] = options;
    hdr[14..16].copy_from_slice(&pl_length.to_be_bytes());
}

/// Encode and encrypt a packet into `buf`, returning the total length.
///
/// # Errors
///
/// Returns [`PacketError::BufferTooSmall`] when `buf` cannot hold the
/// packet and [`PacketError::LengthMismatch`] for payloads beyond the
/// 16-bit length field.
pub fn encode(
    buf: &mut [u8],
    peer_id: u32,
    seq: u64,
    pl_type: PayloadType,
    options: u8,
    payload: &[u8],
    ctx: &SessionCrypto,
) -> Result<usize, PacketError> {
    let pl_length = u16::try_from(payload.len()).map_err(|_| PacketError::LengthMismatch)?;
    let total = OVERHEAD + payload.len();
    if buf.len() < total {
        return Err(PacketError::BufferTooSmall);
    }

    let mut hdr = [0u8; HDR_SIZE];
    write_header(&mut hdr, peer_id, seq, pl_type, options, pl_length);

    let sealed = ctx
        .seal(seq, &hdr, payload)
        .map_err(|_| PacketError::LengthMismatch)?;
    buf[..HDR_SIZE].copy_from_slice(&hdr);
    buf[HDR_SIZE..total].copy_from_slice(&sealed);
    Ok(total)
}

/// Decrypt and validate a packet.
///
/// When `seq_state` is `Some`, the sequence number is probed against the
/// replay window before decryption and committed afterwards. Anonymous
/// decode passes `None` and skips the window entirely; this exception is
/// intentional and must not be generalized.
///
/// # Errors
///
/// Returns a [`PacketError`] describing the first check that failed; the
/// replay window is not advanced unless the packet authenticated.
pub fn decode(
    packet: &[u8],
    ctx: &SessionCrypto,
    seq_state: Option<&mut SeqState>,
) -> Result<PacketData, PacketError> {
    if packet.len() < OVERHEAD {
        return Err(PacketError::TooShort {
            expected: OVERHEAD,
            actual: packet.len(),
        });
    }

    let mut hdr = [0u8; HDR_SIZE];
    hdr.copy_from_slice(&packet[..HDR_SIZE]);

    let peer_id = u32::from_be_bytes([hdr[0], hdr[1], hdr[2], hdr[3]]);
    let seq = u64::from_be_bytes([
        hdr[4], hdr[5], hdr[6], hdr[7], hdr[8], hdr[9], hdr[10], hdr[11],
    ]);
    let pl_type = PayloadType::try_from(hdr[12])?;
    let options = hdr[13];
    let pl_length = u16::from_be_bytes([hdr[14], hdr[15]]) as usize;

    if packet.len() != OVERHEAD + pl_length {
        return Err(PacketError::LengthMismatch);
    }

    if let Some(state) = &seq_state {
        if !state.check(seq) {
            return Err(PacketError::Replayed);
        }
    }

    let payload = ctx
        .open(seq, &hdr, &packet[HDR_SIZE..])
        .map_err(|_| PacketError::DecryptFailed)?;

    if let Some(state) = seq_state {
        state.commit(seq);
    }

    Ok(PacketData {
        peer_id,
        seq,
        pl_type,
        options,
        payload,
    })
}
