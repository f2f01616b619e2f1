//! RSA key pairs and OAEP key wrapping.

use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use tracing::debug;
use zeroize::Zeroizing;

use super::KeyPair;
use crate::cipher::SecretBytes;
use crate::error::{CryptoError, CryptoResult};

/// Smallest modulus accepted for new key pairs.
pub const MIN_RSA_BITS: usize = 2048;

/// Generate a PEM-encoded RSA key pair with a `bits`-bit modulus.
pub fn generate_rsa_key_pair(bits: usize) -> CryptoResult<KeyPair> {
    if bits < MIN_RSA_BITS {
        return Err(CryptoError::Validation(format!(
            "RSA modulus must be at least {} bits, got {}",
            MIN_RSA_BITS, bits
        )));
    }

    debug!(bits, "Generating RSA key pair");
    let private = RsaPrivateKey::new(&mut OsRng, bits)
        .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
    let public = RsaPublicKey::from(&private);

    let private_key = private
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
    let public_key = public
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;

    Ok(KeyPair {
        public_key,
        private_key,
    })
}

/// Encrypt a short secret (typically a 32-byte cipher key) to an RSA public key.
pub fn rsa_wrap_key(public_pem: &str, key: &[u8]) -> CryptoResult<Vec<u8>> {
    let public = RsaPublicKey::from_public_key_pem(public_pem)
        .map_err(|e| CryptoError::Validation(format!("invalid RSA public key: {}", e)))?;
    public
        .encrypt(&mut OsRng, Oaep::new::<Sha256>(), key)
        .map_err(|e| CryptoError::Wrap(e.to_string()))
}

/// Recover a secret wrapped with [`rsa_wrap_key`].
pub fn rsa_unwrap_key(private_pem: &str, wrapped: &[u8]) -> CryptoResult<SecretBytes> {
    let private = RsaPrivateKey::from_pkcs8_pem(private_pem)
        .map_err(|e| CryptoError::Validation(format!("invalid RSA private key: {}", e)))?;
    private
        .decrypt(Oaep::new::<Sha256>(), wrapped)
        .map(Zeroizing::new)
        .map_err(|e| CryptoError::Wrap(e.to_string()))
}
