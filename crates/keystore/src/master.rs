//! Process master key wrapping every stored key row.
//!
//! Resolution order on startup:
//! 1. hex value in the configured environment variable
//! 2. hex value in the configured secret file
//! 3. a freshly generated key, written to the secret file (0600 on Unix)
//!
//! A value that is present but malformed is a hard error. It is never
//! replaced by a generated key.

use keywarden_core::{ConfigError, MasterKeyConfig};
use keywarden_crypto::{cipher, Sealed, SecretBytes, KEY_LEN};
use std::fmt;
use std::io::Write;
use std::path::Path;
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::error::KeyResult;

/// Where the active master key came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterKeySource {
    Environment,
    File,
    Generated,
    Provided,
}

/// 256-bit master key. Wiped on drop and never logged.
pub struct MasterKey {
    key: SecretBytes,
    source: MasterKeySource,
}

impl MasterKey {
    /// Resolve the master key from the environment, then the secret file.
    pub fn load(config: &MasterKeyConfig) -> KeyResult<Self> {
        let env_value = std::env::var(&config.env_var).ok().map(Zeroizing::new);
        Self::resolve(env_value.as_ref().map(|v| v.as_str()), config)
    }

    /// Same as [`MasterKey::load`] with the environment value supplied directly.
    pub fn resolve(env_value: Option<&str>, config: &MasterKeyConfig) -> KeyResult<Self> {
        if let Some(value) = env_value.filter(|v| !v.trim().is_empty()) {
            let key = parse_hex_key(value, &config.env_var)?;
            let master = Self {
                key,
                source: MasterKeySource::Environment,
            };
            info!(fingerprint = %master.fingerprint(), source = "environment", "Master key loaded");
            return Ok(master);
        }

        let path = &config.secret_file;
        if path.exists() {
            let contents = Zeroizing::new(std::fs::read_to_string(path)?);
            let key = parse_hex_key(&contents, &path.display().to_string())?;
            let master = Self {
                key,
                source: MasterKeySource::File,
            };
            info!(
                fingerprint = %master.fingerprint(),
                path = %path.display(),
                "Master key loaded from secret file"
            );
            return Ok(master);
        }

        let key = cipher::generate_aes_key();
        write_secret_file(path, &key)?;
        let master = Self {
            key,
            source: MasterKeySource::Generated,
        };
        warn!(
            fingerprint = %master.fingerprint(),
            path = %path.display(),
            "No master key configured; generated a new one"
        );
        Ok(master)
    }

    /// Wrap raw key bytes, e.g. from a KMS.
    pub fn from_bytes(bytes: &[u8]) -> KeyResult<Self> {
        if bytes.len() != KEY_LEN {
            return Err(ConfigError::MalformedSecret {
                origin: "master key bytes".to_string(),
                reason: format!("expected {} bytes, got {}", KEY_LEN, bytes.len()),
            }
            .into());
        }
        Ok(Self {
            key: Zeroizing::new(bytes.to_vec()),
            source: MasterKeySource::Provided,
        })
    }

    /// Random master key that is not persisted anywhere.
    pub fn generate() -> Self {
        Self {
            key: cipher::generate_aes_key(),
            source: MasterKeySource::Generated,
        }
    }

    pub fn source(&self) -> MasterKeySource {
        self.source
    }

    /// Seal `plaintext` with `aad` bound into the tag.
    pub fn wrap(&self, plaintext: &[u8], aad: &[u8]) -> KeyResult<Sealed> {
        Ok(cipher::encrypt(plaintext, &self.key, Some(aad))?)
    }

    pub fn unwrap(&self, sealed: &Sealed, aad: &[u8]) -> KeyResult<SecretBytes> {
        Ok(cipher::decrypt(sealed, &self.key, Some(aad))?)
    }

    /// First 16 hex chars of BLAKE3 over the key, for log correlation.
    pub fn fingerprint(&self) -> String {
        let digest = blake3::hash(&self.key[..]);
        hex::encode(&digest.as_bytes()[..8])
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterKey")
            .field("fingerprint", &self.fingerprint())
            .field("source", &self.source)
            .finish()
    }
}

fn parse_hex_key(text: &str, origin: &str) -> KeyResult<SecretBytes> {
    let bytes = Zeroizing::new(hex::decode(text.trim()).map_err(|e| ConfigError::MalformedSecret {
        origin: origin.to_string(),
        reason: format!("not hex: {}", e),
    })?);

    if bytes.len() != KEY_LEN {
        return Err(ConfigError::MalformedSecret {
            origin: origin.to_string(),
            reason: format!("expected {} bytes, got {}", KEY_LEN, bytes.len()),
        }
        .into());
    }

    Ok(bytes)
}

fn write_secret_file(path: &Path, key: &[u8]) -> KeyResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    let encoded = Zeroizing::new(hex::encode(key));
    file.write_all(encoded.as_bytes())?;
    file.write_all(b"\n")?;
    file.sync_all()?;
    Ok(())
}
