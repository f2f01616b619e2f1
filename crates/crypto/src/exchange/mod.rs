//! Key-exchange primitives.
//!
//! - [`ecdh`]: P-256 key pairs and Diffie-Hellman agreement
//! - [`rsa`]: RSA key pairs and OAEP wrapping of short symmetric keys
//!
//! Raw Diffie-Hellman output is held in [`SharedSecret`], which exposes no
//! accessor for the raw bytes: the only way to obtain key material from it
//! is [`SharedSecret::derive_key`], which runs HKDF-SHA256.

pub mod ecdh;
pub mod rsa;

use hkdf::Hkdf;
use p256::elliptic_curve::subtle::ConstantTimeEq;
use sha2::Sha256;
use std::fmt;
use zeroize::Zeroizing;

use crate::cipher::{SecretBytes, KEY_LEN};
use crate::error::{CryptoError, CryptoResult};

pub use self::ecdh::{compute_shared_secret, generate_ecdh_key_pair, Curve};
pub use self::rsa::{generate_rsa_key_pair, rsa_unwrap_key, rsa_wrap_key, MIN_RSA_BITS};

/// PEM-encoded key pair. The private half is wiped on drop.
#[derive(Clone)]
pub struct KeyPair {
    /// SPKI PEM
    pub public_key: String,
    /// PKCS#8 PEM
    pub private_key: Zeroizing<String>,
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Raw key-agreement output.
pub struct SharedSecret {
    bytes: Zeroizing<Vec<u8>>,
}

impl SharedSecret {
    pub(crate) fn from_raw(raw: &[u8]) -> Self {
        Self {
            bytes: Zeroizing::new(raw.to_vec()),
        }
    }

    /// Derive a 256-bit cipher key bound to `info` via HKDF-SHA256.
    pub fn derive_key(&self, info: &[u8]) -> CryptoResult<SecretBytes> {
        self.derive_key_with_salt(None, info)
    }

    /// Derive a 256-bit cipher key with an explicit HKDF salt.
    pub fn derive_key_with_salt(&self, salt: Option<&[u8]>, info: &[u8]) -> CryptoResult<SecretBytes> {
        let hk = Hkdf::<Sha256>::new(salt, &self.bytes);
        let mut okm = Zeroizing::new(vec![0u8; KEY_LEN]);
        hk.expand(info, &mut okm)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        Ok(okm)
    }
}

impl PartialEq for SharedSecret {
    fn eq(&self, other: &Self) -> bool {
        self.bytes[..].ct_eq(&other.bytes[..]).into()
    }
}

impl Eq for SharedSecret {}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedSecret(<redacted>)")
    }
}
