//! Durable key store seam.
//!
//! Backends only move sealed rows around; they never see plaintext
//! material. Lookups of the current key return a tagged [`Lookup`] so that
//! a miss is an ordinary value the manager resolves, not an error.

use chrono::{DateTime, Utc};

use crate::error::StoreResult;
use crate::model::{KeyScope, KeyType, StoredKey};

/// Result of a current-key lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Found(StoredKey),
    Missing,
}

impl Lookup {
    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }
}

/// Row selector shared by update, delete and list. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyFilter {
    pub id: Option<String>,
    pub key_type: Option<KeyType>,
    pub scope: Option<KeyScope>,
    pub exclude_id: Option<String>,
    pub revoked: Option<bool>,
    /// Rows with `expires_at` strictly before this instant
    pub expires_before: Option<DateTime<Utc>>,
    /// Rows with `expires_at` strictly after this instant
    pub expires_after: Option<DateTime<Utc>>,
}

impl KeyFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn of(key_type: KeyType, scope: &KeyScope) -> Self {
        Self {
            key_type: Some(key_type),
            scope: Some(scope.clone()),
            ..Self::default()
        }
    }

    pub fn excluding(mut self, id: impl Into<String>) -> Self {
        self.exclude_id = Some(id.into());
        self
    }

    pub fn revoked(mut self, revoked: bool) -> Self {
        self.revoked = Some(revoked);
        self
    }

    pub fn expires_before(mut self, at: DateTime<Utc>) -> Self {
        self.expires_before = Some(at);
        self
    }

    pub fn expires_after(mut self, at: DateTime<Utc>) -> Self {
        self.expires_after = Some(at);
        self
    }

    pub fn matches(&self, key: &StoredKey) -> bool {
        self.id.as_ref().map_or(true, |id| &key.id == id)
            && self.key_type.map_or(true, |kt| key.key_type == kt)
            && self.scope.as_ref().map_or(true, |s| &key.scope == s)
            && self.exclude_id.as_ref().map_or(true, |id| &key.id != id)
            && self.revoked.map_or(true, |r| key.is_revoked == r)
            && self.expires_before.map_or(true, |at| key.expires_at < at)
            && self.expires_after.map_or(true, |at| key.expires_at > at)
    }
}

/// Fields to overwrite on every matched row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyPatch {
    pub expires_at: Option<DateTime<Utc>>,
    pub is_revoked: Option<bool>,
}

impl KeyPatch {
    pub fn expire_at(at: DateTime<Utc>) -> Self {
        Self {
            expires_at: Some(at),
            ..Self::default()
        }
    }

    pub fn revoke() -> Self {
        Self {
            is_revoked: Some(true),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.expires_at.is_none() && self.is_revoked.is_none()
    }

    pub(crate) fn apply(&self, key: &mut StoredKey) {
        if let Some(at) = self.expires_at {
            key.expires_at = at;
        }
        if let Some(revoked) = self.is_revoked {
            key.is_revoked = revoked;
        }
    }
}

/// Persistence for sealed key rows.
pub trait KeyStore: Send + Sync {
    /// Insert one row. Fails with `Duplicate` if the id exists.
    fn create(&self, key: &StoredKey) -> StoreResult<()>;

    /// Insert several rows as a unit.
    fn create_all(&self, keys: &[StoredKey]) -> StoreResult<()> {
        for key in keys {
            self.create(key)?;
        }
        Ok(())
    }

    /// Newest non-revoked row of (type, scope) with `expires_at > now`.
    fn find_current(&self, key_type: KeyType, scope: &KeyScope, now: DateTime<Utc>) -> StoreResult<Lookup>;

    fn find_by_id(&self, id: &str) -> StoreResult<Option<StoredKey>>;

    /// Apply `patch` to every row matching `filter`; returns the count.
    fn update_many(&self, filter: &KeyFilter, patch: &KeyPatch) -> StoreResult<usize>;

    /// Delete every row matching `filter`; returns the count.
    fn delete_many(&self, filter: &KeyFilter) -> StoreResult<usize>;

    /// Matching rows, newest first.
    fn list(&self, filter: &KeyFilter) -> StoreResult<Vec<StoredKey>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Algorithm;
    use chrono::Duration;

    fn row(id: &str, key_type: KeyType, expires_in_days: i64) -> StoredKey {
        let now = Utc::now();
        StoredKey {
            id: id.to_string(),
            key_type,
            algorithm: Algorithm::Aes256Gcm,
            encrypted_value: vec![],
            iv: vec![],
            auth_tag: vec![],
            scope: KeyScope::Global,
            created_at: now,
            expires_at: now + Duration::days(expires_in_days),
            is_revoked: false,
            related_key_id: None,
        }
    }

    #[test]
    fn test_filter_matches() {
        let now = Utc::now();
        let key = row("a", KeyType::Symmetric, 10);

        assert!(KeyFilter::all().matches(&key));
        assert!(KeyFilter::by_id("a").matches(&key));
        assert!(!KeyFilter::by_id("b").matches(&key));
        assert!(KeyFilter::of(KeyType::Symmetric, &KeyScope::Global).matches(&key));
        assert!(!KeyFilter::of(KeyType::Symmetric, &KeyScope::group("g")).matches(&key));
        assert!(!KeyFilter::all().excluding("a").matches(&key));
        assert!(KeyFilter::all().revoked(false).matches(&key));
        assert!(KeyFilter::all().expires_after(now).matches(&key));
        assert!(!KeyFilter::all().expires_before(now).matches(&key));
    }

    #[test]
    fn test_patch_apply() {
        let mut key = row("a", KeyType::Symmetric, 10);
        let at = Utc::now();

        KeyPatch::expire_at(at).apply(&mut key);
        assert_eq!(key.expires_at, at);
        assert!(!key.is_revoked);

        KeyPatch::revoke().apply(&mut key);
        assert!(key.is_revoked);
        assert!(KeyPatch::default().is_empty());
    }
}
