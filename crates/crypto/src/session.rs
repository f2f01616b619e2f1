//! Per-message forward-secrecy handshake over P-256 ECDH and AES-256-GCM.
//!
//! Every message gets its own ephemeral key pair. The sender agrees with the
//! recipient's long-term public key, runs HKDF-SHA256 over the result to get a
//! one-time AES key, and ships the ephemeral public point alongside the
//! ciphertext. The recipient repeats the agreement from the other side with
//! its long-term private key.
//!
//! # Protocol
//!
//! 1. **Generate**: fresh ephemeral P-256 key pair
//! 2. **Agree**: ECDH(ephemeral secret, recipient public)
//! 3. **Derive**: HKDF-SHA256 with info `keywarden/fs-message/v1`
//! 4. **Encrypt**: AES-256-GCM, random IV, sender and receiver ids as AAD
//! 5. **Emit**: [`SecureMessage`] to the transport
//! 6. **Discard**: ephemeral secret and derived key are zeroized on drop
//!
//! The handshake holds no state between messages. Replay detection and
//! ordering are the transport's concern; a [`SecureMessage`] carries no
//! sequence number.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::cipher::{self, Sealed, SecretBytes, TAG_LEN};
use crate::encoding::base64_bytes;
use crate::error::CryptoError;
use crate::exchange::ecdh::{self, EphemeralKeyPair};

/// HKDF info label for message keys.
pub const SESSION_INFO: &[u8] = b"keywarden/fs-message/v1";

/// Session protocol errors.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Key exchange failed: {0}")]
    KeyExchange(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    /// Tag mismatch: tampered message, wrong recipient key or wrong ids.
    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Transport rejected message: {0}")]
    Transport(String),
}

impl SessionError {
    /// Generic message safe to surface to end users.
    pub fn public_message(&self) -> &'static str {
        "message unavailable"
    }
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Handshake progress, reported in trace logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Idle,
    HandshakeGenerated,
    KeyDerived,
    Encrypted,
    Received,
    Decrypted,
}

/// Encrypted chat payload handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecureMessage {
    pub sender_id: String,
    pub receiver_id: String,

    /// Uncompressed SEC1 point of the sender's ephemeral key
    #[serde(with = "base64_bytes")]
    pub ephemeral_public_key: Vec<u8>,

    #[serde(with = "base64_bytes")]
    pub iv: Vec<u8>,

    /// AES-GCM ciphertext with the 16-byte tag appended
    #[serde(with = "base64_bytes")]
    pub ciphertext: Vec<u8>,
}

impl SecureMessage {
    /// JSON form for the transport.
    pub fn to_json(&self) -> SessionResult<String> {
        serde_json::to_string(self).map_err(|e| SessionError::InvalidMessage(e.to_string()))
    }

    /// Parse the JSON form produced by [`SecureMessage::to_json`].
    pub fn from_json(text: &str) -> SessionResult<Self> {
        serde_json::from_str(text).map_err(|e| SessionError::InvalidMessage(e.to_string()))
    }
}

/// Length-prefixed ids so `("ab", "c")` and `("a", "bc")` bind differently.
fn session_aad(sender_id: &str, receiver_id: &str) -> SessionResult<Vec<u8>> {
    let mut aad = Vec::with_capacity(8 + sender_id.len() + receiver_id.len());
    aad.extend_from_slice(&length_prefix("sender_id", sender_id.len())?);
    aad.extend_from_slice(sender_id.as_bytes());
    aad.extend_from_slice(&length_prefix("receiver_id", receiver_id.len())?);
    aad.extend_from_slice(receiver_id.as_bytes());
    Ok(aad)
}

fn length_prefix(field: &str, len: usize) -> SessionResult<[u8; 4]> {
    u32::try_from(len)
        .map(u32::to_be_bytes)
        .map_err(|_| SessionError::InvalidMessage(format!("{} is {} bytes, too long", field, len)))
}

/// Encrypt `plaintext` for the holder of `recipient_public_pem`.
pub fn seal_for(
    sender_id: &str,
    receiver_id: &str,
    recipient_public_pem: &str,
    plaintext: &[u8],
) -> SessionResult<SecureMessage> {
    let aad = session_aad(sender_id, receiver_id)?;
    let recipient = ecdh::parse_public_key(recipient_public_pem)
        .map_err(|e| SessionError::KeyExchange(e.to_string()))?;

    let mut ephemeral = EphemeralKeyPair::generate();
    trace!(state = ?HandshakeState::HandshakeGenerated, receiver_id, "Ephemeral key generated");

    let ephemeral_public_key = ephemeral.public_bytes();
    let shared = ephemeral
        .agree(&recipient)
        .map_err(|e| SessionError::KeyExchange(e.to_string()))?;
    drop(ephemeral);

    let key = shared
        .derive_key(SESSION_INFO)
        .map_err(|e| SessionError::KeyExchange(e.to_string()))?;
    drop(shared);
    trace!(state = ?HandshakeState::KeyDerived, receiver_id, "Message key derived");

    let sealed = cipher::encrypt(plaintext, &key, Some(&aad))
        .map_err(|e| SessionError::Encryption(e.to_string()))?;
    trace!(state = ?HandshakeState::Encrypted, receiver_id, "Message sealed");

    let Sealed {
        mut ciphertext,
        iv,
        auth_tag,
    } = sealed;
    ciphertext.extend_from_slice(&auth_tag);

    Ok(SecureMessage {
        sender_id: sender_id.to_string(),
        receiver_id: receiver_id.to_string(),
        ephemeral_public_key,
        iv,
        ciphertext,
    })
}

/// Decrypt a message addressed to the holder of `recipient_private_pem`.
pub fn open(message: &SecureMessage, recipient_private_pem: &str) -> SessionResult<SecretBytes> {
    trace!(state = ?HandshakeState::Received, sender_id = %message.sender_id, "Message received");

    if message.ciphertext.len() < TAG_LEN {
        return Err(SessionError::InvalidMessage(
            "ciphertext shorter than authentication tag".to_string(),
        ));
    }

    let secret = ecdh::parse_private_key(recipient_private_pem)
        .map_err(|e| SessionError::KeyExchange(e.to_string()))?;
    let shared = ecdh::agree_with_point(&secret, &message.ephemeral_public_key)
        .map_err(|e| SessionError::KeyExchange(e.to_string()))?;
    let key = shared
        .derive_key(SESSION_INFO)
        .map_err(|e| SessionError::KeyExchange(e.to_string()))?;
    trace!(state = ?HandshakeState::KeyDerived, sender_id = %message.sender_id, "Message key derived");

    let split = message.ciphertext.len() - TAG_LEN;
    let sealed = Sealed {
        ciphertext: message.ciphertext[..split].to_vec(),
        iv: message.iv.clone(),
        auth_tag: message.ciphertext[split..].to_vec(),
    };

    let aad = session_aad(&message.sender_id, &message.receiver_id)?;
    match cipher::decrypt(&sealed, &key, Some(&aad)) {
        Ok(plaintext) => {
            trace!(state = ?HandshakeState::Decrypted, sender_id = %message.sender_id, "Message opened");
            Ok(plaintext)
        }
        Err(CryptoError::Authentication) => {
            warn!(
                sender_id = %message.sender_id,
                receiver_id = %message.receiver_id,
                "Message failed authentication"
            );
            Err(SessionError::Decryption("authentication tag rejected".to_string()))
        }
        Err(e) => Err(SessionError::InvalidMessage(e.to_string())),
    }
}

/// Outbound seam to the messaging transport.
pub trait MessageSink: Send + Sync {
    fn deliver(&self, message: SecureMessage) -> SessionResult<()>;
}

/// Seals messages from one sender and hands them to a [`MessageSink`].
pub struct SecureChannel<S: MessageSink> {
    sender_id: String,
    sink: S,
}

impl<S: MessageSink> SecureChannel<S> {
    pub fn new(sender_id: impl Into<String>, sink: S) -> Self {
        Self {
            sender_id: sender_id.into(),
            sink,
        }
    }

    pub fn sender_id(&self) -> &str {
        &self.sender_id
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Seal `plaintext` for `receiver_id` and deliver it.
    pub fn send(&self, receiver_id: &str, recipient_public_pem: &str, plaintext: &[u8]) -> SessionResult<()> {
        let message = seal_for(&self.sender_id, receiver_id, recipient_public_pem, plaintext)?;
        debug!(
            sender_id = %self.sender_id,
            receiver_id,
            bytes = message.ciphertext.len(),
            "Delivering secure message"
        );
        self.sink.deliver(message)
    }
}
