//! Error types for umbra cryptographic operations.

use thiserror::Error;

/// Cryptographic errors
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Noise handshake failed
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// Operation requires a different handshake state
    #[error("invalid handshake state for operation")]
    InvalidState,

    /// AEAD encryption failed
    #[error("encryption failed")]
    EncryptionFailed,

    /// AEAD decryption or authentication failed
    #[error("decryption failed")]
    DecryptionFailed,

    /// Key material has the wrong length or encoding
    #[error("invalid key material")]
    InvalidKeyMaterial,

    /// Identity file could not be read or written
    #[error("key file error: {0}")]
    KeyFile(#[from] std::io::Error),
}
