//! # Umbra Core
//!
//! Core protocol implementation for the umbra overlay: an authenticated,
//! encrypted, connectionless peer-to-peer network. This crate provides:
//!
//! - **Peer manager** ([`PeerMgt`]): the session- and packet-oriented hub
//!   that owns the per-peer slot table, the outbound scheduler, and inbound
//!   dispatch with relay decapsulation
//! - **Wire codec** ([`packet`]): fixed big-endian header, AEAD payload
//! - **Handshake driver** ([`authmgt`]): slot-pooled `Noise_XX` attempts
//! - **Replay guard** ([`seq`]), **defragmenter** ([`dfrag`]),
//!   **node directory** ([`nodedb`]), **slot map** ([`peermap`])
//!
//! ## Model
//!
//! The peer manager is a single-threaded, poll-driven state machine. The
//! host drives two entry points: [`PeerMgt::handle_incoming`] for every
//! datagram read off the socket, and [`PeerMgt::take_next_outgoing`]
//! whenever the socket is writable. Both return in bounded time; there are
//! no internal threads and no async suspension points.
//!
//! ```no_run
//! use umbra_core::{PeerMgt, PeerMgtConfig};
//! use umbra_crypto::NodeKey;
//!
//! let config = PeerMgtConfig::new(16, 4, NodeKey::generate());
//! let mut mgt = PeerMgt::new(&config).unwrap();
//! mgt.set_password(b"swordfish");
//! mgt.set_flags(umbra_core::FLAG_USERDATA);
//!
//! let mut buf = [0u8; umbra_core::DGRAM_MAX];
//! if let Some((len, target)) = mgt.take_next_outgoing(&mut buf) {
//!     // write buf[..len] to the socket, addressed to `target`
//!     let _ = (len, target);
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![forbid(unsafe_code)]

pub mod authmgt;
pub mod dfrag;
pub mod error;
pub mod mgt;
pub mod netid;
pub mod nodedb;
pub mod packet;
pub mod peeraddr;
pub mod peermap;
pub mod seq;

pub use error::{MgtError, PacketError};
pub use mgt::{PeerMgt, PeerMgtConfig, RecvMsg};
pub use netid::NetId;
pub use peeraddr::{PeerAddr, PEERADDR_SIZE};

/// Minimum message size supported without fragmentation; also the fragment
/// payload size.
pub const MSG_MIN: usize = 1024;

/// Buffer size the host should hand to [`PeerMgt::take_next_outgoing`]:
/// a maximum-size payload plus codec overhead.
pub const DGRAM_MAX: usize = MSG_MAX + packet::OVERHEAD;

/// Maximum message size supported, with or without fragmentation.
pub const MSG_MAX: usize = 8192;

/// Ping payload size.
pub const PING_SIZE: usize = 64;

/// Number of fragment reassembly buckets.
pub const FRAGBUF_COUNT: usize = 64;

/// Maximum packet decode recursion depth (one level of relay).
pub const DECODE_RECURSION_MAX_DEPTH: usize = 2;

/// Seconds without an accepted inbound packet before a session is deleted.
pub const RECV_TIMEOUT: i64 = 100;

/// Seconds between keepalive packets on an otherwise idle session.
pub const KEEPALIVE_INTERVAL: i64 = 10;

/// Minimum seconds between outbound dial attempts.
pub const NEWCONNECT_INTERVAL: i64 = 1;

/// Maximum age of a directory candidate considered for dialing (7 days).
pub const NEWCONNECT_MAX_AGE: i64 = 604_800;

/// Upper bound on records accepted from a single peerinfo message.
pub const PEERINFO_PER_MSG_MAX: usize = 256;

/// Capability flag: peer accepts userdata.
pub const FLAG_USERDATA: u16 = 0x0001;

/// Capability flag: peer relays traffic for third parties.
pub const FLAG_RELAY: u16 = 0x0002;
