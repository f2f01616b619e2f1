//! Cryptographic primitives for the Keywarden key-lifecycle service.
//!
//! # Core Capabilities
//!
//! - **Cipher**: AES-256-GCM with detached tags, PBKDF2-HMAC-SHA512 for password keys
//! - **Key Exchange**: P-256 ECDH with HKDF-SHA256, RSA-OAEP key wrapping
//! - **Session**: per-message ephemeral handshake for forward-secret chat
//!
//! # Security Principles
//!
//! - Never roll custom cryptographic primitives
//! - Raw Diffie-Hellman output is never used as a key without HKDF
//! - Secrets must never be logged or hardcoded
//! - Secret buffers are zeroized on drop

pub mod cipher;
pub mod encoding;
pub mod error;
pub mod exchange;
pub mod session;

pub use cipher::{
    decrypt, derive_key_from_password, encrypt, generate_aes_key, generate_iv, generate_key,
    DerivedKey, Sealed, SecretBytes, IV_LEN, KEY_LEN, TAG_LEN,
};
pub use error::{CryptoError, CryptoResult};
pub use exchange::{
    compute_shared_secret, generate_ecdh_key_pair, generate_rsa_key_pair, rsa_unwrap_key,
    rsa_wrap_key, Curve, KeyPair, SharedSecret,
};
pub use session::{
    open, seal_for, HandshakeState, MessageSink, SecureChannel, SecureMessage, SessionError,
    SessionResult,
};
