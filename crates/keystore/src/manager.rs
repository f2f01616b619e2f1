//! Key lifecycle: creation, lookup, rotation, revocation and cleanup.
//!
//! # Lifecycle
//!
//! - Rows are created on the first `get_current_key` miss or an explicit `rotate_key`.
//! - Rotation sets `expires_at = now` on superseded rows. They remain
//!   readable through `get_key_by_id` so old ciphertexts stay decryptable.
//! - `revoke_key` denies a key, and its pair half, immediately and independent of expiry.
//! - `cleanup_old_keys` is the only path that deletes rows, and only once
//!   they have been expired for longer than the retention window.
//!
//! Every row is sealed under the master key with `"<id>:<key_type>"` as AAD,
//! so a ciphertext moved to another row fails authentication.

use chrono::{DateTime, Duration, Utc};
use keywarden_core::{AsymmetricAlgorithmSetting, KeysConfig, SharedClock};
use keywarden_crypto::exchange::{generate_ecdh_key_pair, generate_rsa_key_pair, Curve, KeyPair};
use keywarden_crypto::{cipher, Sealed};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{KeyError, KeyResult};
use crate::master::MasterKey;
use crate::model::{
    Algorithm, CurrentKey, KeyMaterial, KeyMetadata, KeyScope, KeyStats, KeyType, StoredKey,
};
use crate::store::{KeyFilter, KeyPatch, KeyStore, Lookup};

/// Rotation and retention windows plus the asymmetric algorithm to mint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyPolicy {
    pub symmetric_rotation: Duration,
    pub asymmetric_rotation: Duration,
    pub retention: Duration,
    pub asymmetric_algorithm: Algorithm,
}

impl KeyPolicy {
    pub fn from_config(config: &KeysConfig) -> Self {
        Self {
            symmetric_rotation: config.symmetric_rotation(),
            asymmetric_rotation: config.asymmetric_rotation(),
            retention: config.retention(),
            asymmetric_algorithm: match config.asymmetric_algorithm {
                AsymmetricAlgorithmSetting::EcdhP256 => Algorithm::EcdhP256,
                AsymmetricAlgorithmSetting::RsaOaep2048 => Algorithm::RsaOaep2048,
            },
        }
    }

    pub fn rotation_interval(&self, key_type: KeyType) -> Duration {
        match key_type {
            KeyType::Symmetric => self.symmetric_rotation,
            KeyType::AsymmetricPublic | KeyType::AsymmetricPrivate => self.asymmetric_rotation,
        }
    }
}

impl Default for KeyPolicy {
    fn default() -> Self {
        Self {
            symmetric_rotation: Duration::days(30),
            asymmetric_rotation: Duration::days(90),
            retention: Duration::days(180),
            asymmetric_algorithm: Algorithm::EcdhP256,
        }
    }
}

/// Both halves of an asymmetric pair share one provisioning gate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum GateKey {
    Symmetric(KeyScope),
    Asymmetric(KeyScope),
}

impl GateKey {
    fn for_key(key_type: KeyType, scope: &KeyScope) -> Self {
        match key_type {
            KeyType::Symmetric => GateKey::Symmetric(scope.clone()),
            KeyType::AsymmetricPublic | KeyType::AsymmetricPrivate => {
                GateKey::Asymmetric(scope.clone())
            }
        }
    }
}

/// Ids of the rows written by one creation.
struct Created {
    requested: String,
    sibling: Option<(KeyType, String)>,
}

/// Manages encrypted key rows in a [`KeyStore`].
pub struct KeyManager {
    store: Arc<dyn KeyStore>,
    master: Arc<MasterKey>,
    clock: SharedClock,
    policy: KeyPolicy,
    gates: Mutex<HashMap<GateKey, Arc<Mutex<()>>>>,
}

impl KeyManager {
    pub fn new(store: Arc<dyn KeyStore>, master: Arc<MasterKey>, clock: SharedClock, policy: KeyPolicy) -> Self {
        Self {
            store,
            master,
            clock,
            policy,
            gates: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> &KeyPolicy {
        &self.policy
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Generate, seal and persist a new key; returns the id of the requested half.
    pub fn create_key(&self, key_type: KeyType, scope: &KeyScope) -> KeyResult<String> {
        Ok(self.create_rows(key_type, scope)?.requested)
    }

    fn create_rows(&self, key_type: KeyType, scope: &KeyScope) -> KeyResult<Created> {
        let now = self.clock.now();

        let created = match key_type {
            KeyType::Symmetric => {
                let material = cipher::generate_aes_key();
                let row = self.seal_row(
                    Uuid::new_v4().to_string(),
                    KeyType::Symmetric,
                    Algorithm::Aes256Gcm,
                    &material,
                    scope,
                    now,
                    None,
                )?;
                self.store.create(&row)?;
                Created {
                    requested: row.id,
                    sibling: None,
                }
            }
            KeyType::AsymmetricPublic | KeyType::AsymmetricPrivate => {
                let algorithm = self.policy.asymmetric_algorithm;
                let pair = generate_pair(algorithm)?;

                let private_id = Uuid::new_v4().to_string();
                let public_id = Uuid::new_v4().to_string();

                let private_row = self.seal_row(
                    private_id.clone(),
                    KeyType::AsymmetricPrivate,
                    algorithm,
                    pair.private_key.as_bytes(),
                    scope,
                    now,
                    Some(public_id.clone()),
                )?;
                let public_row = self.seal_row(
                    public_id.clone(),
                    KeyType::AsymmetricPublic,
                    algorithm,
                    pair.public_key.as_bytes(),
                    scope,
                    now,
                    Some(private_id.clone()),
                )?;
                self.store.create_all(&[private_row, public_row])?;

                if key_type == KeyType::AsymmetricPrivate {
                    Created {
                        requested: private_id,
                        sibling: Some((KeyType::AsymmetricPublic, public_id)),
                    }
                } else {
                    Created {
                        requested: public_id,
                        sibling: Some((KeyType::AsymmetricPrivate, private_id)),
                    }
                }
            }
        };

        info!(
            key_id = %created.requested,
            key_type = %key_type,
            scope = %scope,
            "Key created"
        );

        Ok(created)
    }

    #[allow(clippy::too_many_arguments)]
    fn seal_row(
        &self,
        id: String,
        key_type: KeyType,
        algorithm: Algorithm,
        material: &[u8],
        scope: &KeyScope,
        now: DateTime<Utc>,
        related_key_id: Option<String>,
    ) -> KeyResult<StoredKey> {
        let sealed = self.master.wrap(material, &row_aad(&id, key_type))?;
        Ok(StoredKey {
            id,
            key_type,
            algorithm,
            encrypted_value: sealed.ciphertext,
            iv: sealed.iv,
            auth_tag: sealed.auth_tag,
            scope: scope.clone(),
            created_at: now,
            expires_at: now + self.policy.rotation_interval(key_type),
            is_revoked: false,
            related_key_id,
        })
    }

    fn open_row(&self, row: &StoredKey) -> KeyResult<KeyMaterial> {
        let sealed = Sealed {
            ciphertext: row.encrypted_value.clone(),
            iv: row.iv.clone(),
            auth_tag: row.auth_tag.clone(),
        };
        let material = self.master.unwrap(&sealed, &row_aad(&row.id, row.key_type))?;
        Ok(KeyMaterial::new(material))
    }

    fn lock_gates(&self) -> MutexGuard<'_, HashMap<GateKey, Arc<Mutex<()>>>> {
        self.gates.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run `f` holding the provisioning gate of (type, scope).
    fn with_gate<T>(&self, key_type: KeyType, scope: &KeyScope, f: impl FnOnce() -> KeyResult<T>) -> KeyResult<T> {
        let gate_key = GateKey::for_key(key_type, scope);
        let gate = self.lock_gates().entry(gate_key.clone()).or_default().clone();

        let result = {
            let _guard = gate.lock().unwrap_or_else(|e| e.into_inner());
            f()
        };
        drop(gate);

        // The last holder drops the entry so idle scopes do not accumulate.
        let mut gates = self.lock_gates();
        if gates.get(&gate_key).is_some_and(|g| Arc::strong_count(g) == 1) {
            gates.remove(&gate_key);
        }
        result
    }

    /// Newest active key of (type, scope), created on first use.
    pub fn get_current_key(&self, key_type: KeyType, scope: &KeyScope) -> KeyResult<CurrentKey> {
        if let Lookup::Found(row) = self.store.find_current(key_type, scope, self.clock.now())? {
            return self.current_from(row);
        }

        self.with_gate(key_type, scope, || {
            // Another caller may have provisioned while we waited.
            if let Lookup::Found(row) = self.store.find_current(key_type, scope, self.clock.now())? {
                return self.current_from(row);
            }

            debug!(key_type = %key_type, scope = %scope, "No current key; provisioning");
            self.create_key(key_type, scope)?;

            match self.store.find_current(key_type, scope, self.clock.now())? {
                Lookup::Found(row) => self.current_from(row),
                Lookup::Missing => Err(KeyError::ProvisioningFailed {
                    key_type,
                    scope: scope.clone(),
                }),
            }
        })
    }

    fn current_from(&self, row: StoredKey) -> KeyResult<CurrentKey> {
        let value = self.open_row(&row)?;
        Ok(CurrentKey { id: row.id, value })
    }

    /// Material of a specific key, including rotated-out ones.
    pub fn get_key_by_id(&self, id: &str) -> KeyResult<KeyMaterial> {
        let row = self.active_row(id)?;
        self.open_row(&row)
    }

    fn active_row(&self, id: &str) -> KeyResult<StoredKey> {
        let row = self
            .store
            .find_by_id(id)?
            .ok_or_else(|| KeyError::KeyNotFound { id: id.to_string() })?;
        if row.is_revoked {
            warn!(key_id = %id, "Access to revoked key denied");
            return Err(KeyError::KeyRevoked { id: id.to_string() });
        }
        Ok(row)
    }

    /// Create a replacement and retire every other live key of (type, scope).
    ///
    /// For asymmetric types both halves of superseded pairs are retired.
    pub fn rotate_key(&self, key_type: KeyType, scope: &KeyScope) -> KeyResult<String> {
        self.with_gate(key_type, scope, || {
            let created = self.create_rows(key_type, scope)?;
            let now = self.clock.now();

            let mut retired = self.retire_others(key_type, scope, &created.requested, now)?;
            if let Some((sibling_type, sibling_id)) = &created.sibling {
                retired += self.retire_others(*sibling_type, scope, sibling_id, now)?;
            }

            info!(
                key_id = %created.requested,
                key_type = %key_type,
                scope = %scope,
                retired,
                "Key rotated"
            );

            Ok(created.requested)
        })
    }

    fn retire_others(&self, key_type: KeyType, scope: &KeyScope, keep_id: &str, now: DateTime<Utc>) -> KeyResult<usize> {
        let filter = KeyFilter::of(key_type, scope)
            .excluding(keep_id)
            .revoked(false)
            .expires_after(now);
        Ok(self.store.update_many(&filter, &KeyPatch::expire_at(now))?)
    }

    /// Permanently deny a key. Revoking either half of an asymmetric pair
    /// revokes both, so a disowned identity is never published again.
    pub fn revoke_key(&self, id: &str) -> KeyResult<()> {
        let row = self
            .store
            .find_by_id(id)?
            .ok_or_else(|| KeyError::KeyNotFound { id: id.to_string() })?;

        let changed = self
            .store
            .update_many(&KeyFilter::by_id(id), &KeyPatch::revoke())?;
        if changed == 0 {
            return Err(KeyError::KeyNotFound { id: id.to_string() });
        }
        warn!(key_id = %id, "Key revoked");

        if let Some(paired_id) = &row.related_key_id {
            if self
                .store
                .update_many(&KeyFilter::by_id(paired_id), &KeyPatch::revoke())?
                > 0
            {
                warn!(key_id = %paired_id, pair_of = %id, "Paired key revoked");
            }
        }
        Ok(())
    }

    /// Delete rows that expired more than the retention window ago.
    pub fn cleanup_old_keys(&self) -> KeyResult<usize> {
        let cutoff = self.clock.now() - self.policy.retention;
        let deleted = self
            .store
            .delete_many(&KeyFilter::all().expires_before(cutoff))?;
        if deleted > 0 {
            info!(deleted, cutoff = %cutoff, "Old keys deleted");
        }
        Ok(deleted)
    }

    pub fn key_stats(&self) -> KeyResult<KeyStats> {
        let now = self.clock.now();
        let rows = self.store.list(&KeyFilter::all())?;

        let mut stats = KeyStats {
            total: rows.len(),
            ..KeyStats::default()
        };
        for row in &rows {
            if row.is_revoked {
                stats.revoked += 1;
            } else if row.expires_at <= now {
                stats.expired += 1;
            } else {
                stats.active += 1;
            }
        }
        Ok(stats)
    }

    /// Metadata of every row of (type, scope), newest first.
    pub fn list_keys(&self, key_type: KeyType, scope: &KeyScope) -> KeyResult<Vec<KeyMetadata>> {
        let rows = self.store.list(&KeyFilter::of(key_type, scope))?;
        Ok(rows.iter().map(StoredKey::metadata).collect())
    }

    /// Public half linked to a private key row.
    pub fn get_public_key_for(&self, private_id: &str) -> KeyResult<CurrentKey> {
        let row = self.active_row(private_id)?;
        if row.key_type != KeyType::AsymmetricPrivate {
            return Err(KeyError::Validation(format!(
                "{} is a {} key, not a private key",
                private_id, row.key_type
            )));
        }
        let public_id = row.related_key_id.ok_or_else(|| KeyError::KeyNotFound {
            id: format!("public half of {}", private_id),
        })?;
        let value = self.get_key_by_id(&public_id)?;
        Ok(CurrentKey {
            id: public_id,
            value,
        })
    }
}

fn row_aad(id: &str, key_type: KeyType) -> Vec<u8> {
    format!("{}:{}", id, key_type.as_str()).into_bytes()
}

fn generate_pair(algorithm: Algorithm) -> KeyResult<KeyPair> {
    match algorithm {
        Algorithm::EcdhP256 => Ok(generate_ecdh_key_pair(Curve::P256)?),
        Algorithm::RsaOaep2048 => Ok(generate_rsa_key_pair(2048)?),
        Algorithm::Aes256Gcm => Err(KeyError::Validation(
            "aes-256-gcm is not an asymmetric algorithm".to_string(),
        )),
    }
}
