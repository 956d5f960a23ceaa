//! Network identity salt.
//!
//! Disjoint overlays sharing infrastructure (or even a password) are kept
//! apart by a 32-byte digest of the network name. The digest rides in the
//! clear in the first handshake message; a responder configured for a
//! different overlay rejects the attempt before any identity is revealed.

/// Digest of the overlay's network name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetId([u8; 32]);

impl NetId {
    /// Derive the identity for a network name.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        let digest = blake3::Hasher::new_derive_key("umbra v3 netid")
            .update(name.as_bytes())
            .finalize();
        Self(*digest.as_bytes())
    }

    /// Raw byte view.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Construct from raw bytes (parsed from a handshake payload).
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl Default for NetId {
    fn default() -> Self {
        Self::from_name("default")
    }
}
