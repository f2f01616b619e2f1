//! Cipher primitives: AES-256-GCM sealing and password-based key derivation.
//!
//! Every encryption draws a fresh random 96-bit IV and produces a detached
//! 128-bit authentication tag. A tag mismatch on decryption is reported as
//! [`CryptoError::Authentication`] and never yields partial plaintext.
//!
//! PBKDF2 is reserved for keys derived from human passwords. Keys derived
//! from key agreement go through HKDF in [`crate::exchange`].

use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce, Tag};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha512;
use zeroize::Zeroizing;

use crate::encoding::base64_bytes;
use crate::error::{CryptoError, CryptoResult};

/// AES-256 key length in bytes.
pub const KEY_LEN: usize = 32;

/// GCM nonce length in bytes.
pub const IV_LEN: usize = 12;

/// GCM authentication tag length in bytes.
pub const TAG_LEN: usize = 16;

/// Salt length generated for password-derived keys.
pub const SALT_LEN: usize = 16;

/// PBKDF2-HMAC-SHA512 iteration count.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// Heap secret that is wiped on drop.
pub type SecretBytes = Zeroizing<Vec<u8>>;

/// Output of an AEAD encryption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sealed {
    #[serde(with = "base64_bytes")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub iv: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub auth_tag: Vec<u8>,
}

impl Sealed {
    /// Compact text form `iv.tag.ciphertext`, each part base64url without padding.
    pub fn to_compact(&self) -> String {
        format!(
            "{}.{}.{}",
            URL_SAFE_NO_PAD.encode(&self.iv),
            URL_SAFE_NO_PAD.encode(&self.auth_tag),
            URL_SAFE_NO_PAD.encode(&self.ciphertext)
        )
    }

    /// Parse the compact form produced by [`Sealed::to_compact`].
    pub fn from_compact(text: &str) -> CryptoResult<Self> {
        let mut parts = text.split('.');
        let (Some(iv), Some(tag), Some(ct), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(CryptoError::Encoding(
                "expected three dot-separated segments".to_string(),
            ));
        };

        let decode = |segment: &str| {
            URL_SAFE_NO_PAD
                .decode(segment.as_bytes())
                .map_err(|e| CryptoError::Encoding(e.to_string()))
        };

        Ok(Self {
            iv: decode(iv)?,
            auth_tag: decode(tag)?,
            ciphertext: decode(ct)?,
        })
    }
}

/// Key derived from a password together with the salt that produced it.
#[derive(Debug)]
pub struct DerivedKey {
    pub key: SecretBytes,
    /// Not secret; store it next to whatever the key protects.
    pub salt: Vec<u8>,
}

/// Generate `len` cryptographically secure random bytes for use as a key.
pub fn generate_key(len: usize) -> SecretBytes {
    let mut key = Zeroizing::new(vec![0u8; len]);
    OsRng.fill_bytes(&mut key);
    key
}

/// Generate a 256-bit AES key.
pub fn generate_aes_key() -> SecretBytes {
    generate_key(KEY_LEN)
}

/// Generate `len` random bytes for use as an IV.
pub fn generate_iv(len: usize) -> Vec<u8> {
    let mut iv = vec![0u8; len];
    OsRng.fill_bytes(&mut iv);
    iv
}

fn cipher_for(key: &[u8]) -> CryptoResult<Aes256Gcm> {
    if key.len() != KEY_LEN {
        return Err(CryptoError::Validation(format!(
            "key must be {} bytes, got {}",
            KEY_LEN,
            key.len()
        )));
    }
    Aes256Gcm::new_from_slice(key).map_err(|e| CryptoError::Validation(e.to_string()))
}

/// Encrypt `plaintext` under a 32-byte key with optional associated data.
pub fn encrypt(plaintext: &[u8], key: &[u8], aad: Option<&[u8]>) -> CryptoResult<Sealed> {
    let cipher = cipher_for(key)?;
    let iv = generate_iv(IV_LEN);

    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(&iv), aad.unwrap_or_default(), &mut buffer)
        .map_err(|_| CryptoError::Validation("plaintext too large for AES-GCM".to_string()))?;

    Ok(Sealed {
        ciphertext: buffer,
        iv,
        auth_tag: tag.to_vec(),
    })
}

/// Decrypt a [`Sealed`] payload. Any tag mismatch yields [`CryptoError::Authentication`].
pub fn decrypt(sealed: &Sealed, key: &[u8], aad: Option<&[u8]>) -> CryptoResult<SecretBytes> {
    let cipher = cipher_for(key)?;

    if sealed.iv.len() != IV_LEN {
        return Err(CryptoError::Validation(format!(
            "iv must be {} bytes, got {}",
            IV_LEN,
            sealed.iv.len()
        )));
    }
    if sealed.auth_tag.len() != TAG_LEN {
        return Err(CryptoError::Validation(format!(
            "auth tag must be {} bytes, got {}",
            TAG_LEN,
            sealed.auth_tag.len()
        )));
    }

    let mut buffer = Zeroizing::new(sealed.ciphertext.clone());
    cipher
        .decrypt_in_place_detached(
            Nonce::from_slice(&sealed.iv),
            aad.unwrap_or_default(),
            &mut buffer,
            Tag::from_slice(&sealed.auth_tag),
        )
        .map_err(|_| CryptoError::Authentication)?;

    Ok(buffer)
}

/// Derive a 32-byte key from a password with PBKDF2-HMAC-SHA512.
///
/// A random 16-byte salt is generated when `salt` is `None`.
pub fn derive_key_from_password(password: &str, salt: Option<&[u8]>) -> CryptoResult<DerivedKey> {
    let salt = match salt {
        Some(s) if s.is_empty() => {
            return Err(CryptoError::Validation("salt must not be empty".to_string()))
        }
        Some(s) => s.to_vec(),
        None => generate_iv(SALT_LEN),
    };

    let mut key = Zeroizing::new(vec![0u8; KEY_LEN]);
    pbkdf2::pbkdf2_hmac::<Sha512>(password.as_bytes(), &salt, PBKDF2_ITERATIONS, &mut key);

    Ok(DerivedKey { key, salt })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encrypt_decrypt() {
        let key = generate_aes_key();
        let sealed = encrypt(b"hello", &key, None).unwrap();

        assert_eq!(sealed.iv.len(), IV_LEN);
        assert_eq!(sealed.auth_tag.len(), TAG_LEN);
        assert_ne!(sealed.ciphertext, b"hello");

        let plaintext = decrypt(&sealed, &key, None).unwrap();
        assert_eq!(plaintext.as_slice(), b"hello");
    }

    #[test]
    fn test_empty_plaintext() {
        let key = generate_aes_key();
        let sealed = encrypt(b"", &key, None).unwrap();
        assert!(sealed.ciphertext.is_empty());
        assert!(decrypt(&sealed, &key, None).unwrap().is_empty());
    }

    #[test]
    fn test_fresh_iv_per_encryption() {
        let key = generate_aes_key();
        let a = encrypt(b"same", &key, None).unwrap();
        let b = encrypt(b"same", &key, None).unwrap();
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_key_length_rejected() {
        for len in [0usize, 16, 31, 33, 64] {
            let key = vec![7u8; len];
            assert!(matches!(
                encrypt(b"data", &key, None),
                Err(CryptoError::Validation(_))
            ));

            let sealed = encrypt(b"data", &generate_aes_key(), None).unwrap();
            assert!(matches!(
                decrypt(&sealed, &key, None),
                Err(CryptoError::Validation(_))
            ));
        }
    }

    #[test]
    fn test_wrong_key_is_authentication_error() {
        let sealed = encrypt(b"secret", &generate_aes_key(), None).unwrap();
        let result = decrypt(&sealed, &generate_aes_key(), None);
        assert_eq!(result.unwrap_err(), CryptoError::Authentication);
    }

    #[test]
    fn test_aad_mismatch_is_authentication_error() {
        let key = generate_aes_key();
        let sealed = encrypt(b"secret", &key, Some(b"row-1")).unwrap();

        assert!(decrypt(&sealed, &key, Some(b"row-1")).is_ok());
        assert!(decrypt(&sealed, &key, Some(b"row-2"))
            .unwrap_err()
            .is_authentication());
        assert!(decrypt(&sealed, &key, None).unwrap_err().is_authentication());
    }

    #[test]
    fn test_malformed_iv_and_tag_rejected() {
        let key = generate_aes_key();
        let mut sealed = encrypt(b"secret", &key, None).unwrap();
        sealed.iv.pop();
        assert!(matches!(
            decrypt(&sealed, &key, None),
            Err(CryptoError::Validation(_))
        ));

        let mut sealed = encrypt(b"secret", &key, None).unwrap();
        sealed.auth_tag.truncate(8);
        assert!(matches!(
            decrypt(&sealed, &key, None),
            Err(CryptoError::Validation(_))
        ));
    }

    #[test]
    fn test_compact_form() {
        let key = generate_aes_key();
        let sealed = encrypt(b"compact me", &key, None).unwrap();

        let text = sealed.to_compact();
        assert_eq!(text.matches('.').count(), 2);

        let parsed = Sealed::from_compact(&text).unwrap();
        assert_eq!(parsed, sealed);
        assert!(Sealed::from_compact("only.two").is_err());
        assert!(Sealed::from_compact("a.b.c.d").is_err());
    }

    #[test]
    fn test_password_derivation_is_deterministic_for_salt() {
        let first = derive_key_from_password("correct horse", None).unwrap();
        assert_eq!(first.key.len(), KEY_LEN);
        assert_eq!(first.salt.len(), SALT_LEN);

        let second = derive_key_from_password("correct horse", Some(&first.salt)).unwrap();
        assert_eq!(first.key.as_slice(), second.key.as_slice());

        let other = derive_key_from_password("battery staple", Some(&first.salt)).unwrap();
        assert_ne!(first.key.as_slice(), other.key.as_slice());
    }

    #[test]
    fn test_password_derivation_random_salt() {
        let a = derive_key_from_password("pw", None).unwrap();
        let b = derive_key_from_password("pw", None).unwrap();
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.key.as_slice(), b.key.as_slice());
    }

    #[test]
    fn test_empty_salt_rejected() {
        assert!(matches!(
            derive_key_from_password("pw", Some(&[])),
            Err(CryptoError::Validation(_))
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_round_trip(plaintext in proptest::collection::vec(any::<u8>(), 0..512)) {
            let key = generate_aes_key();
            let sealed = encrypt(&plaintext, &key, None).unwrap();
            let opened = decrypt(&sealed, &key, None).unwrap();
            prop_assert_eq!(opened.as_slice(), plaintext.as_slice());
        }

        #[test]
        fn prop_single_bit_flip_detected(
            plaintext in proptest::collection::vec(any::<u8>(), 1..256),
            bit in 0usize..8,
            pick in any::<prop::sample::Index>(),
            in_tag in any::<bool>(),
        ) {
            let key = generate_aes_key();
            let mut sealed = encrypt(&plaintext, &key, None).unwrap();

            let target = if in_tag { &mut sealed.auth_tag } else { &mut sealed.ciphertext };
            let idx = pick.index(target.len());
            target[idx] ^= 1 << bit;

            prop_assert_eq!(decrypt(&sealed, &key, None).unwrap_err(), CryptoError::Authentication);
        }
    }
}
