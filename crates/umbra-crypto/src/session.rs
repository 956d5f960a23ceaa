//! Symmetric packet contexts.
//!
//! A [`SessionCrypto`] holds the directional ChaCha20-Poly1305 keys for one
//! peer session. Nonces are `salt(4) || counter(8)`; the packet sequence
//! number is the counter, so the wire format carries no separate nonce.
//! Replay filtering happens above this layer, in the packet codec.
//!
//! Two special contexts exist besides handshake-derived sessions:
//!
//! - the **group context** ([`SessionCrypto::from_password`]) protecting
//!   anonymous authentication packets, where both directions share one key
//!   and senders pick a random counter per datagram to keep nonces unique;
//! - **garbage contexts** ([`SessionCrypto::random`] /
//!   [`SessionCrypto::reseed_random`]) installed on idle slots so that
//!   packets aimed at a dead session can never decrypt.

use crate::error::CryptoError;
use crate::random;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use zeroize::Zeroize;

/// AEAD authentication tag size. Occupies the trailing MAC position of each
/// packet.
pub const TAG_SIZE: usize = 16;

/// Directional key material produced by the handshake.
pub struct SessionKeys {
    /// Key for packets this side sends.
    pub send: [u8; 32],
    /// Key for packets this side receives.
    pub recv: [u8; 32],
    /// Shared nonce salt.
    pub salt: [u8; 4],
}

impl Drop for SessionKeys {
    fn drop(&mut self) {
        self.send.zeroize();
        self.recv.zeroize();
    }
}

/// Symmetric encryption context for one peer session.
pub struct SessionCrypto {
    send: ChaCha20Poly1305,
    recv: ChaCha20Poly1305,
    salt: [u8; 4],
}

fn nonce_for(salt: &[u8; 4], counter: u64) -> Nonce {
    let mut bytes = [0u8; 12];
    bytes[..4].copy_from_slice(salt);
    bytes[4..].copy_from_slice(&counter.to_be_bytes());
    Nonce::from(bytes)
}

impl SessionCrypto {
    /// Build a context from handshake-derived keys.
    #[must_use]
    pub fn from_keys(keys: &SessionKeys) -> Self {
        Self {
            send: ChaCha20Poly1305::new(Key::from_slice(&keys.send)),
            recv: ChaCha20Poly1305::new(Key::from_slice(&keys.recv)),
            salt: keys.salt,
        }
    }

    /// Build a context with random throwaway keys.
    #[must_use]
    pub fn random() -> Self {
        let mut send = [0u8; 32];
        let mut recv = [0u8; 32];
        let mut salt = [0u8; 4];
        random::rand_bytes(&mut send);
        random::rand_bytes(&mut recv);
        random::rand_bytes(&mut salt);
        let ctx = Self {
            send: ChaCha20Poly1305::new(Key::from_slice(&send)),
            recv: ChaCha20Poly1305::new(Key::from_slice(&recv)),
            salt,
        };
        send.zeroize();
        recv.zeroize();
        ctx
    }

    /// Replace the keys with random garbage.
    ///
    /// Installed on a slot when it is reset so stale packets addressed to
    /// the old session fail authentication.
    pub fn reseed_random(&mut self) {
        *self = Self::random();
    }

    /// Derive the shared group context from the network password.
    ///
    /// Both directions use the same key; the network name provides domain
    /// separation between overlays sharing a password.
    #[must_use]
    pub fn from_password(password: &[u8], netname: &str) -> Self {
        let mut hasher = blake3::Hasher::new_derive_key("umbra v3 group key");
        hasher.update(netname.as_bytes());
        hasher.update(&[0]);
        hasher.update(password);
        let key = *hasher.finalize().as_bytes();

        let mut salt_hasher = blake3::Hasher::new_derive_key("umbra v3 group salt");
        salt_hasher.update(netname.as_bytes());
        let mut salt = [0u8; 4];
        salt.copy_from_slice(&salt_hasher.finalize().as_bytes()[..4]);

        Self {
            send: ChaCha20Poly1305::new(Key::from_slice(&key)),
            recv: ChaCha20Poly1305::new(Key::from_slice(&key)),
            salt,
        }
    }

    /// Encrypt `plaintext` under this context's send key.
    ///
    /// Returns `ciphertext || tag`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::EncryptionFailed`] on AEAD failure.
    pub fn seal(&self, counter: u64, aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.send
            .encrypt(
                &nonce_for(&self.salt, counter),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|_| CryptoError::EncryptionFailed)
    }

    /// Decrypt `ciphertext || tag` under this context's receive key.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::DecryptionFailed`] if authentication fails.
    pub fn open(&self, counter: u64, aad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.recv
            .decrypt(
                &nonce_for(&self.salt, counter),
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paired() -> (SessionCrypto, SessionCrypto) {
        let keys_a = SessionKeys {
            send: [1u8; 32],
            recv: [2u8; 32],
            salt: [9u8; 4],
        };
        let keys_b = SessionKeys {
            send: [2u8; 32],
            recv: [1u8; 32],
            salt: [9u8; 4],
        };
        (
            SessionCrypto::from_keys(&keys_a),
            SessionCrypto::from_keys(&keys_b),
        )
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let (a, b) = paired();
        let ct = a.seal(7, b"header", b"the payload").unwrap();
        assert_eq!(ct.len(), 11 + TAG_SIZE);
        let pt = b.open(7, b"header", &ct).unwrap();
        assert_eq!(pt, b"the payload");
    }

    #[test]
    fn test_wrong_counter_fails() {
        let (a, b) = paired();
        let ct = a.seal(7, b"h", b"payload").unwrap();
        assert!(b.open(8, b"h", &ct).is_err());
    }

    #[test]
    fn test_wrong_aad_fails() {
        let (a, b) = paired();
        let ct = a.seal(7, b"h", b"payload").unwrap();
        assert!(b.open(7, b"x", &ct).is_err());
    }

    #[test]
    fn test_directionality() {
        let (a, _b) = paired();
        let ct = a.seal(1, b"", b"to-you").unwrap();
        // A cannot open its own traffic; recv key differs
        assert!(a.open(1, b"", &ct).is_err());
    }

    #[test]
    fn test_password_context_symmetric() {
        let a = SessionCrypto::from_password(b"hunter2", "testnet");
        let b = SessionCrypto::from_password(b"hunter2", "testnet");
        let ct = a.seal(42, b"", b"anon").unwrap();
        assert_eq!(b.open(42, b"", &ct).unwrap(), b"anon");
    }

    #[test]
    fn test_password_context_separated_by_netname() {
        let a = SessionCrypto::from_password(b"hunter2", "net-a");
        let b = SessionCrypto::from_password(b"hunter2", "net-b");
        let ct = a.seal(42, b"", b"anon").unwrap();
        assert!(b.open(42, b"", &ct).is_err());
    }

    #[test]
    fn test_reseed_kills_session() {
        let (a, mut b) = paired();
        let ct = a.seal(3, b"", b"stale").unwrap();
        b.reseed_random();
        assert!(b.open(3, b"", &ct).is_err());
    }

    #[test]
    fn test_random_contexts_disjoint() {
        let a = SessionCrypto::random();
        let b = SessionCrypto::random();
        let ct = a.seal(0, b"", b"x").unwrap();
        assert!(b.open(0, b"", &ct).is_err());
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn seal_open_roundtrip(
                payload in proptest::collection::vec(any::<u8>(), 0..2048),
                counter in any::<u64>(),
                aad in proptest::collection::vec(any::<u8>(), 0..64),
            ) {
                let (a, b) = paired();
                let ct = a.seal(counter, &aad, &payload).unwrap();
                prop_assert_eq!(ct.len(), payload.len() + TAG_SIZE);
                prop_assert_eq!(b.open(counter, &aad, &ct).unwrap(), payload);
            }
        }
    }
}
