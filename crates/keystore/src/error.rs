//! Error types for key storage and lifecycle management.

use keywarden_core::ConfigError;
use keywarden_crypto::CryptoError;
use thiserror::Error;

use crate::model::{KeyScope, KeyType};

/// Errors raised by a [`crate::KeyStore`] backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Duplicate key id: {id}")]
    Duplicate { id: String },

    #[error("Corrupt row {id}: {reason}")]
    Corrupt { id: String, reason: String },

    #[error("Store lock poisoned")]
    Poisoned,
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors raised by [`crate::KeyManager`] and the master key.
///
/// `KeyNotFound` and `KeyRevoked` tell the caller to re-establish keys
/// rather than retry.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("Key not found: {id}")]
    KeyNotFound { id: String },

    #[error("Key revoked: {id}")]
    KeyRevoked { id: String },

    #[error("No current {key_type} key for scope {scope} after provisioning")]
    ProvisioningFailed { key_type: KeyType, scope: KeyScope },

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl KeyError {
    /// Generic message safe to surface to end users.
    pub fn public_message(&self) -> &'static str {
        "key unavailable"
    }
}

pub type KeyResult<T> = std::result::Result<T, KeyError>;
