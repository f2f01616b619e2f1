//! Key rows, scopes and the material handed back to callers.

use chrono::{DateTime, Utc};
use keywarden_crypto::encoding::base64_bytes;
use keywarden_crypto::SecretBytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Unrecognized text in a stored enum column.
#[derive(Debug, Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseModelError {
    kind: &'static str,
    value: String,
}

impl ParseModelError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Kind of key held in a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyType {
    Symmetric,
    AsymmetricPublic,
    AsymmetricPrivate,
}

impl KeyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyType::Symmetric => "symmetric",
            KeyType::AsymmetricPublic => "asymmetric_public",
            KeyType::AsymmetricPrivate => "asymmetric_private",
        }
    }

    pub fn is_asymmetric(&self) -> bool {
        match self {
            KeyType::Symmetric => false,
            KeyType::AsymmetricPublic | KeyType::AsymmetricPrivate => true,
        }
    }

    /// The other half of an asymmetric pair.
    pub fn counterpart(&self) -> Option<KeyType> {
        match self {
            KeyType::Symmetric => None,
            KeyType::AsymmetricPublic => Some(KeyType::AsymmetricPrivate),
            KeyType::AsymmetricPrivate => Some(KeyType::AsymmetricPublic),
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyType {
    type Err = ParseModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "symmetric" => Ok(KeyType::Symmetric),
            "asymmetric_public" => Ok(KeyType::AsymmetricPublic),
            "asymmetric_private" => Ok(KeyType::AsymmetricPrivate),
            other => Err(ParseModelError::new("key type", other)),
        }
    }
}

/// Algorithm the key material belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Algorithm {
    #[serde(rename = "aes-256-gcm")]
    Aes256Gcm,
    #[serde(rename = "rsa-oaep-2048")]
    RsaOaep2048,
    #[serde(rename = "ecdh-p256")]
    EcdhP256,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Aes256Gcm => "aes-256-gcm",
            Algorithm::RsaOaep2048 => "rsa-oaep-2048",
            Algorithm::EcdhP256 => "ecdh-p256",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = ParseModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "aes-256-gcm" => Ok(Algorithm::Aes256Gcm),
            "rsa-oaep-2048" => Ok(Algorithm::RsaOaep2048),
            "ecdh-p256" => Ok(Algorithm::EcdhP256),
            other => Err(ParseModelError::new("algorithm", other)),
        }
    }
}

/// Who a key belongs to. Stored as `global` or `group:<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum KeyScope {
    #[default]
    Global,
    Group(String),
}

impl KeyScope {
    pub fn group(id: impl Into<String>) -> Self {
        KeyScope::Group(id.into())
    }
}

impl fmt::Display for KeyScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyScope::Global => f.write_str("global"),
            KeyScope::Group(id) => write!(f, "group:{}", id),
        }
    }
}

impl FromStr for KeyScope {
    type Err = ParseModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            None if s == "global" => Ok(KeyScope::Global),
            Some(("group", id)) if !id.is_empty() => Ok(KeyScope::Group(id.to_string())),
            _ => Err(ParseModelError::new("key scope", s)),
        }
    }
}

impl From<KeyScope> for String {
    fn from(scope: KeyScope) -> Self {
        scope.to_string()
    }
}

impl TryFrom<String> for KeyScope {
    type Error = ParseModelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// A persisted key row. Material is always sealed under the master key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredKey {
    pub id: String,
    pub key_type: KeyType,
    pub algorithm: Algorithm,
    #[serde(with = "base64_bytes")]
    pub encrypted_value: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub iv: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub auth_tag: Vec<u8>,
    pub scope: KeyScope,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_revoked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_key_id: Option<String>,
}

impl StoredKey {
    /// Neither revoked nor past `expires_at`.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_revoked && self.expires_at > now
    }

    pub fn metadata(&self) -> KeyMetadata {
        KeyMetadata {
            id: self.id.clone(),
            key_type: self.key_type,
            algorithm: self.algorithm,
            scope: self.scope.clone(),
            created_at: self.created_at,
            expires_at: self.expires_at,
            is_revoked: self.is_revoked,
            related_key_id: self.related_key_id.clone(),
        }
    }
}

/// Row description without any material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyMetadata {
    pub id: String,
    pub key_type: KeyType,
    pub algorithm: Algorithm,
    pub scope: KeyScope,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_revoked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_key_id: Option<String>,
}

/// Decrypted key material. Symmetric keys are raw bytes, asymmetric keys PEM text.
pub struct KeyMaterial(SecretBytes);

impl KeyMaterial {
    pub fn new(bytes: SecretBytes) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// PEM text for asymmetric keys; `None` if the bytes are not UTF-8.
    pub fn as_pem(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyMaterial(<{} bytes redacted>)", self.0.len())
    }
}

/// Current key of a (type, scope) together with its row id.
#[derive(Debug)]
pub struct CurrentKey {
    pub id: String,
    pub value: KeyMaterial,
}

/// Counts over the whole key table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyStats {
    pub total: usize,
    pub active: usize,
    pub expired: usize,
    pub revoked: usize,
}
