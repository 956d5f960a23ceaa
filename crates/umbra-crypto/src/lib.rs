//! # Umbra Crypto
//!
//! Cryptographic primitives for the umbra overlay:
//!
//! - **Node identity**: static Curve25519 keypairs and BLAKE3-derived node IDs
//! - **Handshake**: `Noise_XX` mutual authentication via the snow library
//! - **Packet contexts**: ChaCha20-Poly1305 session encryption with
//!   counter-derived nonces, including the shared group-password context
//! - **Randomness helpers**: thin wrappers used by the rest of the stack
//!
//! The crate is synchronous and allocation-bounded; it performs no I/O apart
//! from the identity-file helpers on [`NodeKey`].

#![warn(missing_docs)]
#![warn(clippy::all)]
#![forbid(unsafe_code)]

pub mod error;
pub mod nodekey;
pub mod noise;
pub mod random;
pub mod session;

pub use error::CryptoError;
pub use nodekey::{NodeId, NodeKey, NODEID_SIZE};
pub use noise::{Handshake, Role};
pub use session::{SessionCrypto, SessionKeys, TAG_SIZE};
