//! Node identity: static Curve25519 keypairs and derived node IDs.
//!
//! A node's long-term identity is its static Curve25519 key (the Noise `s`
//! key). The [`NodeId`] that travels on the wire and keys the peer tables is
//! the BLAKE3 hash of the static public key, so learning a peer's identity
//! during the handshake and looking it up later use the same 32-byte handle.

use crate::error::CryptoError;
use std::fmt;
use std::path::Path;
use zeroize::Zeroize;

/// Size of a node ID in bytes.
pub const NODEID_SIZE: usize = 32;

/// Long-term public identity of an overlay participant.
///
/// Derived as `BLAKE3(static public key)`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId([u8; NODEID_SIZE]);

impl NodeId {
    /// Derive the node ID for a static public key.
    #[must_use]
    pub fn from_public_key(public: &[u8; 32]) -> Self {
        Self(*blake3::hash(public).as_bytes())
    }

    /// Construct from raw bytes (e.g. parsed off the wire).
    #[must_use]
    pub fn from_bytes(bytes: [u8; NODEID_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw byte view.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; NODEID_SIZE] {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", &hex::encode(self.0)[..16])
    }
}

/// Static Curve25519 keypair identifying this node.
pub struct NodeKey {
    private: [u8; 32],
    public: [u8; 32],
}

impl NodeKey {
    /// Generate a fresh random identity.
    #[must_use]
    pub fn generate() -> Self {
        let secret = x25519_dalek::StaticSecret::random_from_rng(rand::thread_rng());
        let public = x25519_dalek::PublicKey::from(&secret);
        Self {
            private: secret.to_bytes(),
            public: public.to_bytes(),
        }
    }

    /// Reconstruct an identity from its 32-byte secret.
    #[must_use]
    pub fn from_bytes(private: [u8; 32]) -> Self {
        let secret = x25519_dalek::StaticSecret::from(private);
        let public = x25519_dalek::PublicKey::from(&secret);
        Self {
            private: secret.to_bytes(),
            public: public.to_bytes(),
        }
    }

    /// Load an identity from a hex-encoded key file.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::KeyFile`] on I/O failure and
    /// [`CryptoError::InvalidKeyMaterial`] if the file does not hold a
    /// 32-byte hex string.
    pub fn load(path: &Path) -> Result<Self, CryptoError> {
        let text = std::fs::read_to_string(path)?;
        let bytes = hex::decode(text.trim()).map_err(|_| CryptoError::InvalidKeyMaterial)?;
        let private: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyMaterial)?;
        Ok(Self::from_bytes(private))
    }

    /// Write the identity secret to a hex-encoded key file.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::KeyFile`] on I/O failure.
    pub fn save(&self, path: &Path) -> Result<(), CryptoError> {
        std::fs::write(path, hex::encode(self.private))?;
        Ok(())
    }

    /// The static public key (the Noise `s` key).
    #[must_use]
    pub fn public_key(&self) -> &[u8; 32] {
        &self.public
    }

    /// The static private key. Handle with care.
    #[must_use]
    pub fn private_key(&self) -> &[u8; 32] {
        &self.private
    }

    /// This node's identity handle.
    #[must_use]
    pub fn node_id(&self) -> NodeId {
        NodeId::from_public_key(&self.public)
    }
}

impl Drop for NodeKey {
    fn drop(&mut self) {
        self.private.zeroize();
    }
}

impl Clone for NodeKey {
    fn clone(&self) -> Self {
        Self {
            private: self.private,
            public: self.public,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_distinct() {
        let a = NodeKey::generate();
        let b = NodeKey::generate();
        assert_ne!(a.node_id(), b.node_id());
    }

    #[test]
    fn test_from_bytes_roundtrip() {
        let key = NodeKey::generate();
        let again = NodeKey::from_bytes(*key.private_key());
        assert_eq!(key.public_key(), again.public_key());
        assert_eq!(key.node_id(), again.node_id());
    }

    #[test]
    fn test_node_id_matches_public_key() {
        let key = NodeKey::generate();
        assert_eq!(key.node_id(), NodeId::from_public_key(key.public_key()));
    }

    #[test]
    fn test_display_is_hex() {
        let id = NodeId::from_bytes([0xab; 32]);
        assert_eq!(id.to_string(), "ab".repeat(32));
    }

    #[test]
    fn test_keyfile_roundtrip() {
        let dir = std::env::temp_dir().join("umbra-nodekey-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("identity.key");
        let key = NodeKey::generate();
        key.save(&path).unwrap();
        let loaded = NodeKey::load(&path).unwrap();
        assert_eq!(key.node_id(), loaded.node_id());
        std::fs::remove_file(&path).ok();
    }
}
