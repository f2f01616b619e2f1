//! Error types for token signing and secret rotation.

use keywarden_core::ConfigError;
use thiserror::Error;

/// Errors raised by the secret rotation manager and its sources.
#[derive(Debug, Error)]
pub enum TokenError {
    /// The rotated secret could not be persisted. The new secret is already
    /// in use in memory; `retry_scheduled` means the next rotation check
    /// retries the write.
    #[error("Secret rotation failed: {reason}")]
    RotationFailure { reason: String, retry_scheduled: bool },

    #[error("Secret source error: {0}")]
    Source(String),

    #[error("Corrupt secret state: {0}")]
    Corrupt(String),

    #[error("Invalid token payload: {0}")]
    InvalidPayload(String),

    #[error("Signing failed: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TokenError {
    /// Generic message safe to surface to end users.
    pub fn public_message(&self) -> &'static str {
        "invalid credentials"
    }

    /// Rotation failures leave signing and verification working.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, TokenError::RotationFailure { .. })
    }
}

pub type TokenResult<T> = std::result::Result<T, TokenError>;
