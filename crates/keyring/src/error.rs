//! Error type for the keyring context.

use keywarden_core::ConfigError;
use keywarden_crypto::SessionError;
use keywarden_keystore::{KeyError, StoreError};
use keywarden_tokens::TokenError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeyringError {
    #[error("Key error: {0}")]
    Key(#[from] KeyError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Token error: {0}")]
    Token(#[from] TokenError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Background tasks already running")]
    AlreadyStarted,
}

impl KeyringError {
    /// Generic message safe to surface to end users.
    pub fn public_message(&self) -> &'static str {
        match self {
            KeyringError::Key(e) => e.public_message(),
            KeyringError::Token(e) => e.public_message(),
            KeyringError::Session(e) => e.public_message(),
            KeyringError::Store(_) | KeyringError::Config(_) | KeyringError::AlreadyStarted => {
                "key unavailable"
            }
        }
    }
}

pub type KeyringResult<T> = std::result::Result<T, KeyringError>;
