//! Signing secrets and their persisted form.

use chrono::{DateTime, Duration, Utc};
use keywarden_crypto::encoding::{from_base64, to_base64};
use keywarden_crypto::{generate_key, SecretBytes};
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{TokenError, TokenResult};

/// Length of generated HS256 secrets in bytes.
pub const SECRET_LEN: usize = 64;

/// Shortest secret accepted from the environment.
pub const MIN_SECRET_LEN: usize = 32;

/// Primary secret plus the retired secrets still accepted for verification.
pub struct SigningSecret {
    pub(crate) primary: SecretBytes,
    /// Newest first
    pub(crate) fallbacks: Vec<SecretBytes>,
    pub key_created_at: DateTime<Utc>,
    pub next_rotation_at: DateTime<Utc>,
}

impl SigningSecret {
    pub fn new(primary: SecretBytes, created_at: DateTime<Utc>, rotation_interval: Duration) -> Self {
        Self {
            primary,
            fallbacks: Vec::new(),
            key_created_at: created_at,
            next_rotation_at: created_at + rotation_interval,
        }
    }

    pub fn generate(created_at: DateTime<Utc>, rotation_interval: Duration) -> Self {
        Self::new(generate_key(SECRET_LEN), created_at, rotation_interval)
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        now >= self.next_rotation_at
    }

    pub fn fallback_count(&self) -> usize {
        self.fallbacks.len()
    }

    /// Demote the primary to the newest fallback and install a fresh primary.
    pub(crate) fn rotate(&mut self, now: DateTime<Utc>, rotation_interval: Duration, max_fallbacks: usize) {
        let previous = std::mem::replace(&mut self.primary, generate_key(SECRET_LEN));
        self.fallbacks.insert(0, previous);
        self.fallbacks.truncate(max_fallbacks);
        self.key_created_at = now;
        self.next_rotation_at = now + rotation_interval;
    }

    /// Primary first, then fallbacks newest first.
    pub(crate) fn candidates(&self) -> impl Iterator<Item = &[u8]> {
        std::iter::once(self.primary.as_slice()).chain(self.fallbacks.iter().map(|s| s.as_slice()))
    }

    pub fn to_record(&self) -> SecretRecord {
        SecretRecord {
            primary_secret: to_base64(&self.primary),
            fallback_secrets: self.fallbacks.iter().map(|s| to_base64(s)).collect(),
            key_created_at: self.key_created_at,
            next_rotation_at: self.next_rotation_at,
        }
    }

    /// Rebuild from a record. `next_rotation_at` is recomputed from the
    /// creation time so a changed rotation interval takes effect on load.
    pub fn from_record(record: &SecretRecord, rotation_interval: Duration, max_fallbacks: usize) -> TokenResult<Self> {
        let decode = |text: &str| -> TokenResult<SecretBytes> {
            from_base64(text)
                .map(SecretBytes::new)
                .map_err(|e| TokenError::Corrupt(e.to_string()))
        };

        let primary = decode(&record.primary_secret)?;
        if primary.len() < MIN_SECRET_LEN {
            return Err(TokenError::Corrupt(format!(
                "primary secret shorter than {} bytes",
                MIN_SECRET_LEN
            )));
        }

        let mut fallbacks = record
            .fallback_secrets
            .iter()
            .map(|s| decode(s))
            .collect::<TokenResult<Vec<_>>>()?;
        fallbacks.truncate(max_fallbacks);

        Ok(Self {
            primary,
            fallbacks,
            key_created_at: record.key_created_at,
            next_rotation_at: record.key_created_at + rotation_interval,
        })
    }
}

impl fmt::Debug for SigningSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningSecret")
            .field("fallbacks", &self.fallbacks.len())
            .field("key_created_at", &self.key_created_at)
            .field("next_rotation_at", &self.next_rotation_at)
            .finish()
    }
}

/// Persisted JSON form of a [`SigningSecret`]. Secrets are base64 text.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct SecretRecord {
    pub primary_secret: String,
    #[serde(default)]
    pub fallback_secrets: Vec<String>,
    #[zeroize(skip)]
    pub key_created_at: DateTime<Utc>,
    #[zeroize(skip)]
    pub next_rotation_at: DateTime<Utc>,
}

impl fmt::Debug for SecretRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretRecord")
            .field("fallback_secrets", &self.fallback_secrets.len())
            .field("key_created_at", &self.key_created_at)
            .field("next_rotation_at", &self.next_rotation_at)
            .finish()
    }
}
