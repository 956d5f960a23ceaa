//! Peer address abstraction: direct socket addresses and indirect
//! (relayed) encodings.
//!
//! Addresses serialize to a fixed 24-byte tagged form used verbatim in
//! peerinfo gossip records and the status report. An *indirect* address is
//! not a network location at all: it names a relay session
//! `(relay_peer_id, relay_conn_time)` plus the target's slot index on that
//! relay, and tells the outbound scheduler to encapsulate the datagram.
//! The connection time pins the encoding to one session epoch so a relay
//! that has since been replaced is never trusted with traffic.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// Size of the serialized address.
pub const PEERADDR_SIZE: usize = 24;

const TAG_UNSPECIFIED: u8 = 0x00;
const TAG_V4: u8 = 0x01;
const TAG_V6: u8 = 0x02;
const TAG_INDIRECT: u8 = 0xff;

/// A peer's address: direct UDP endpoint, relayed encoding, or unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerAddr {
    /// No address known (freshly reset slots, the local slot).
    Unspecified,
    /// Reachable UDP endpoint.
    Direct(SocketAddr),
    /// Reachable only through an established relay session.
    Indirect {
        /// Local slot index of the relay peer.
        relay_peer_id: u32,
        /// Session epoch of the relay slot when this address was formed.
        relay_conn_time: i64,
        /// Target's slot index in the relay's table.
        peer_id: u32,
    },
}

impl PeerAddr {
    /// Build an indirect address through an established relay session.
    #[must_use]
    pub fn indirect(relay_peer_id: u32, relay_conn_time: i64, peer_id: u32) -> Self {
        Self::Indirect {
            relay_peer_id,
            relay_conn_time,
            peer_id,
        }
    }

    /// Whether this address is not a plain network endpoint.
    #[must_use]
    pub fn is_internal(&self) -> bool {
        !matches!(self, Self::Direct(_))
    }

    /// Decompose an indirect address.
    #[must_use]
    pub fn get_indirect(&self) -> Option<(u32, i64, u32)> {
        match self {
            Self::Indirect {
                relay_peer_id,
                relay_conn_time,
                peer_id,
            } => Some((*relay_peer_id, *relay_conn_time, *peer_id)),
            _ => None,
        }
    }

    /// Serialize to the fixed wire form.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; PEERADDR_SIZE] {
        let mut out = [0u8; PEERADDR_SIZE];
        match self {
            Self::Unspecified => out[0] = TAG_UNSPECIFIED,
            Self::Direct(sa) => {
                out[1..3].copy_from_slice(&sa.port().to_be_bytes());
                match sa.ip() {
                    IpAddr::V4(ip) => {
                        out[0] = TAG_V4;
                        out[3..7].copy_from_slice(&ip.octets());
                    }
                    IpAddr::V6(ip) => {
                        out[0] = TAG_V6;
                        out[3..19].copy_from_slice(&ip.octets());
                    }
                }
            }
            Self::Indirect {
                relay_peer_id,
                relay_conn_time,
                peer_id,
            } => {
                out[0] = TAG_INDIRECT;
                out[1..5].copy_from_slice(&relay_peer_id.to_be_bytes());
                out[5..13].copy_from_slice(&relay_conn_time.to_be_bytes());
                out[13..17].copy_from_slice(&peer_id.to_be_bytes());
            }
        }
        out
    }

    /// Parse the fixed wire form. Unknown tags decode as `Unspecified`.
    #[must_use]
    pub fn from_bytes(bytes: &[u8; PEERADDR_SIZE]) -> Self {
        match bytes[0] {
            TAG_V4 => {
                let port = u16::from_be_bytes([bytes[1], bytes[2]]);
                let ip = Ipv4Addr::new(bytes[3], bytes[4], bytes[5], bytes[6]);
                Self::Direct(SocketAddr::new(IpAddr::V4(ip), port))
            }
            TAG_V6 => {
                let port = u16::from_be_bytes([bytes[1], bytes[2]]);
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&bytes[3..19]);
                Self::Direct(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(octets)), port))
            }
            TAG_INDIRECT => Self::Indirect {
                relay_peer_id: u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]),
                relay_conn_time: i64::from_be_bytes([
                    bytes[5], bytes[6], bytes[7], bytes[8], bytes[9], bytes[10], bytes[11],
                    bytes[12],
                ]),
                peer_id: u32::from_be_bytes([bytes[13], bytes[14], bytes[15], bytes[16]]),
            },
            _ => Self::Unspecified,
        }
    }
}

impl Default for PeerAddr {
    fn default() -> Self {
        Self::Unspecified
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unspecified => write!(f, "unspecified"),
            Self::Direct(sa) => write!(f, "{sa}"),
            Self::Indirect {
                relay_peer_id,
                peer_id,
                ..
            } => write!(f, "relay:{relay_peer_id}->{peer_id}"),
        }
    }
}
