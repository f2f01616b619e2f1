//! In-memory key store for tests and embedders.

use chrono::{DateTime, Utc};
use std::sync::RwLock;

use crate::error::{StoreError, StoreResult};
use crate::model::{KeyScope, KeyType, StoredKey};
use crate::store::{KeyFilter, KeyPatch, KeyStore, Lookup};

/// Thread-safe store backed by a vector in insertion order.
#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    rows: RwLock<Vec<StoredKey>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.read().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Newest first; later insertion wins a `created_at` tie.
fn newest_first(rows: &[StoredKey], filter: impl Fn(&StoredKey) -> bool) -> Vec<StoredKey> {
    let mut matched: Vec<(usize, &StoredKey)> =
        rows.iter().enumerate().filter(|(_, k)| filter(k)).collect();
    matched.sort_by(|(ia, a), (ib, b)| b.created_at.cmp(&a.created_at).then(ib.cmp(ia)));
    matched.into_iter().map(|(_, k)| k.clone()).collect()
}

impl KeyStore for MemoryKeyStore {
    fn create(&self, key: &StoredKey) -> StoreResult<()> {
        self.create_all(std::slice::from_ref(key))
    }

    fn create_all(&self, keys: &[StoredKey]) -> StoreResult<()> {
        let mut rows = self.rows.write().map_err(|_| StoreError::Poisoned)?;
        for (i, key) in keys.iter().enumerate() {
            let clash = rows.iter().any(|r| r.id == key.id)
                || keys[..i].iter().any(|k| k.id == key.id);
            if clash {
                return Err(StoreError::Duplicate { id: key.id.clone() });
            }
        }
        rows.extend(keys.iter().cloned());
        Ok(())
    }

    fn find_current(&self, key_type: KeyType, scope: &KeyScope, now: DateTime<Utc>) -> StoreResult<Lookup> {
        let rows = self.rows.read().map_err(|_| StoreError::Poisoned)?;
        let current = newest_first(&rows, |k| {
            k.key_type == key_type && &k.scope == scope && k.is_active_at(now)
        })
        .into_iter()
        .next();
        Ok(current.map_or(Lookup::Missing, Lookup::Found))
    }

    fn find_by_id(&self, id: &str) -> StoreResult<Option<StoredKey>> {
        let rows = self.rows.read().map_err(|_| StoreError::Poisoned)?;
        Ok(rows.iter().find(|k| k.id == id).cloned())
    }

    fn update_many(&self, filter: &KeyFilter, patch: &KeyPatch) -> StoreResult<usize> {
        let mut rows = self.rows.write().map_err(|_| StoreError::Poisoned)?;
        let mut count = 0;
        for key in rows.iter_mut().filter(|k| filter.matches(k)) {
            patch.apply(key);
            count += 1;
        }
        Ok(count)
    }

    fn delete_many(&self, filter: &KeyFilter) -> StoreResult<usize> {
        let mut rows = self.rows.write().map_err(|_| StoreError::Poisoned)?;
        let before = rows.len();
        rows.retain(|k| !filter.matches(k));
        Ok(before - rows.len())
    }

    fn list(&self, filter: &KeyFilter) -> StoreResult<Vec<StoredKey>> {
        let rows = self.rows.read().map_err(|_| StoreError::Poisoned)?;
        Ok(newest_first(&rows, |k| filter.matches(k)))
    }
}
