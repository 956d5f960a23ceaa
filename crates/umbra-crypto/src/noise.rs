//! `Noise_XX` handshake for mutual peer authentication.
//!
//! Pattern: `Noise_XX_25519_ChaChaPoly_BLAKE2s` (BLAKE2s inside the Noise
//! symmetric state for snow compatibility; BLAKE3 for the application-level
//! key derivation below).
//!
//! ```text
//! Message 1: Initiator -> Responder: e
//! Message 2: Responder -> Initiator: e, ee, s, es
//! Message 3: Initiator -> Responder: s, se
//! ```
//!
//! Static keys are encrypted after the first DH, so identities are hidden
//! from passive observers. Once message 3 has been processed, both sides
//! call [`Handshake::into_session_keys`] to derive the directional packet
//! keys from the handshake hash.

use crate::error::CryptoError;
use crate::nodekey::NodeKey;
use crate::session::SessionKeys;
use snow::{Builder, HandshakeState};

/// Noise protocol pattern used by umbra.
const NOISE_PATTERN: &str = "Noise_XX_25519_ChaChaPoly_BLAKE2s";

/// Maximum size of a single handshake message, payload included.
pub const MAX_HANDSHAKE_MSG_SIZE: usize = 512;

/// Role in the handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Sends message 1.
    Initiator,
    /// Receives message 1.
    Responder,
}

/// An in-progress `Noise_XX` handshake.
pub struct Handshake {
    state: HandshakeState,
    role: Role,
}

fn build(local: &NodeKey, initiator: bool) -> Result<HandshakeState, CryptoError> {
    let params = NOISE_PATTERN
        .parse()
        .map_err(|e| CryptoError::HandshakeFailed(format!("pattern: {e:?}")))?;
    let builder = Builder::new(params)
        .local_private_key(local.private_key())
        .map_err(|e| CryptoError::HandshakeFailed(format!("key: {e:?}")))?;
    let state = if initiator {
        builder.build_initiator()
    } else {
        builder.build_responder()
    };
    state.map_err(|e| CryptoError::HandshakeFailed(format!("build: {e:?}")))
}

impl Handshake {
    /// Start a handshake as the initiator.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::HandshakeFailed`] if snow rejects the pattern
    /// or the key material.
    pub fn initiator(local: &NodeKey) -> Result<Self, CryptoError> {
        Ok(Self {
            state: build(local, true)?,
            role: Role::Initiator,
        })
    }

    /// Start a handshake as the responder.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::HandshakeFailed`] if snow rejects the pattern
    /// or the key material.
    pub fn responder(local: &NodeKey) -> Result<Self, CryptoError> {
        Ok(Self {
            state: build(local, false)?,
            role: Role::Responder,
        })
    }

    /// This side's role.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Produce the next handshake message carrying `payload`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidState`] when it is not this side's turn
    /// to write, or [`CryptoError::HandshakeFailed`] on a snow error.
    pub fn write_message(&mut self, payload: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if !self.state.is_my_turn() {
            return Err(CryptoError::InvalidState);
        }
        let mut buf = vec![0u8; MAX_HANDSHAKE_MSG_SIZE];
        let len = self
            .state
            .write_message(payload, &mut buf)
            .map_err(|e| CryptoError::HandshakeFailed(format!("write: {e:?}")))?;
        buf.truncate(len);
        Ok(buf)
    }

    /// Consume a received handshake message, returning its payload.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::DecryptionFailed`] if the message does not
    /// verify against the current handshake state.
    pub fn read_message(&mut self, message: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut buf = vec![0u8; MAX_HANDSHAKE_MSG_SIZE];
        let len = self
            .state
            .read_message(message, &mut buf)
            .map_err(|_| CryptoError::DecryptionFailed)?;
        buf.truncate(len);
        Ok(buf)
    }

    /// The remote static public key, once the handshake has revealed it
    /// (after message 2 for the initiator, message 3 for the responder).
    #[must_use]
    pub fn remote_static(&self) -> Option<[u8; 32]> {
        self.state.get_remote_static().and_then(|s| {
            let mut key = [0u8; 32];
            if s.len() == 32 {
                key.copy_from_slice(s);
                Some(key)
            } else {
                None
            }
        })
    }

    /// Whether all three handshake messages have been processed.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state.is_handshake_finished()
    }

    /// Derive the directional session keys from the handshake hash.
    ///
    /// Both parties derive the same `i2r`/`r2i` keys and the same nonce
    /// salt; send/recv assignment follows the role.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidState`] if the handshake is incomplete.
    pub fn into_session_keys(self) -> Result<SessionKeys, CryptoError> {
        if !self.state.is_handshake_finished() {
            return Err(CryptoError::InvalidState);
        }
        let hash = self.state.get_handshake_hash();

        let i2r = *blake3::Hasher::new_derive_key("umbra v3 i2r key")
            .update(hash)
            .finalize()
            .as_bytes();
        let r2i = *blake3::Hasher::new_derive_key("umbra v3 r2i key")
            .update(hash)
            .finalize()
            .as_bytes();
        let salt_full = blake3::Hasher::new_derive_key("umbra v3 nonce salt")
            .update(hash)
            .finalize();
        let mut salt = [0u8; 4];
        salt.copy_from_slice(&salt_full.as_bytes()[..4]);

        let (send, recv) = match self.role {
            Role::Initiator => (i2r, r2i),
            Role::Responder => (r2i, i2r),
        };
        Ok(SessionKeys { send, recv, salt })
    }
}
