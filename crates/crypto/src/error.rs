//! Error types for the cryptographic primitives.

use thiserror::Error;

/// Errors raised by cipher and key-exchange primitives.
///
/// `Authentication` is deliberately a unit variant: callers must be able to
/// tell a tag mismatch apart from every other failure, and nothing about
/// the mismatch is worth reporting.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    /// Bad key length or malformed key material, rejected before the operation
    #[error("Validation failed: {0}")]
    Validation(String),

    /// AEAD tag mismatch (tampered data or wrong key)
    #[error("Authentication failed: ciphertext or tag rejected")]
    Authentication,

    /// Key generation or encoding failure inside a primitive
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    /// RSA-OAEP wrap/unwrap failure
    #[error("Key wrap failed: {0}")]
    Wrap(String),

    /// Encoding of a sealed payload is malformed
    #[error("Encoding error: {0}")]
    Encoding(String),
}

impl CryptoError {
    /// Generic message safe to surface to end users.
    pub fn public_message(&self) -> &'static str {
        "message unavailable"
    }

    /// Whether the error is an AEAD tag mismatch.
    pub fn is_authentication(&self) -> bool {
        matches!(self, CryptoError::Authentication)
    }
}

/// Result type for cryptographic primitives.
pub type CryptoResult<T> = Result<T, CryptoError>;
