//! Dependency-injected keyring context.
//!
//! [`KeyringContext`] owns the key manager, the token rotation manager and
//! their background tasks. Applications build one at startup with
//! [`KeyringContext::open`], call [`KeyringContext::start`] inside a tokio
//! runtime, and [`KeyringContext::shutdown`] before exit. Tests assemble one
//! from parts with [`KeyringContext::from_parts`].

pub mod error;
pub mod maintenance;

use keywarden_core::{Config, SharedClock, SystemClock};
use keywarden_crypto::{session, MessageSink, SecretBytes, SecureChannel, SecureMessage, SessionError};
use keywarden_keystore::{
    CurrentKey, KeyManager, KeyPolicy, KeyScope, KeyStore, KeyType, MasterKey, SqliteKeyStore,
};
use keywarden_tokens::{
    FileSecretSource, RotationHandle, RotationScheduler, RotationSettings, SecretRotationManager,
    SecretSource,
};
use std::sync::Arc;
use tracing::{debug, info};

pub use error::{KeyringError, KeyringResult};
pub use maintenance::{spawn_cleanup, CleanupHandle};

/// Shared services plus their background tasks.
pub struct KeyringContext {
    config: Config,
    keys: Arc<KeyManager>,
    tokens: Arc<SecretRotationManager>,
    scheduler: Option<RotationHandle>,
    cleanup: Option<CleanupHandle>,
}

impl KeyringContext {
    /// Open the SQLite store, master key and secret file named in `config`.
    pub fn open(config: Config) -> KeyringResult<Self> {
        Self::open_with_clock(config, SystemClock::shared())
    }

    pub fn open_with_clock(config: Config, clock: SharedClock) -> KeyringResult<Self> {
        config.validate()?;

        let store = Arc::new(SqliteKeyStore::open(&config.storage.db_path)?);
        let master = Arc::new(MasterKey::load(&config.master_key)?);
        let source = Arc::new(FileSecretSource::new(&config.tokens.secret_file));

        Self::from_parts(config, clock, store, master, source)
    }

    /// Assemble from explicit collaborators.
    pub fn from_parts(
        config: Config,
        clock: SharedClock,
        store: Arc<dyn KeyStore>,
        master: Arc<MasterKey>,
        secret_source: Arc<dyn SecretSource>,
    ) -> KeyringResult<Self> {
        info!(master_key = %master.fingerprint(), "Opening keyring");

        let keys = Arc::new(KeyManager::new(
            store,
            master,
            clock.clone(),
            KeyPolicy::from_config(&config.keys),
        ));
        let tokens = Arc::new(SecretRotationManager::initialize(
            secret_source,
            clock,
            RotationSettings::from_config(&config.tokens),
        )?);

        Ok(Self {
            config,
            keys,
            tokens,
            scheduler: None,
            cleanup: None,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn keys(&self) -> &Arc<KeyManager> {
        &self.keys
    }

    pub fn tokens(&self) -> &Arc<SecretRotationManager> {
        &self.tokens
    }

    /// Spawn secret rotation and key cleanup. Must run inside a tokio runtime.
    pub fn start(&mut self) -> KeyringResult<()> {
        if self.scheduler.is_some() || self.cleanup.is_some() {
            return Err(KeyringError::AlreadyStarted);
        }

        let interval = self.config.tokens.check_interval();
        self.scheduler = Some(RotationScheduler::new(self.tokens.clone(), interval).spawn());
        self.cleanup = Some(spawn_cleanup(self.keys.clone(), interval));

        info!(interval_secs = interval.as_secs(), "Keyring background tasks started");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_some()
    }

    /// Stop background tasks. Safe to call when nothing was started.
    pub async fn shutdown(&mut self) {
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.shutdown().await;
        }
        if let Some(cleanup) = self.cleanup.take() {
            cleanup.shutdown().await;
        }
        info!("Keyring shut down");
    }

    /// Long-term public key published for `scope`.
    pub fn identity_public_key(&self, scope: &KeyScope) -> KeyringResult<CurrentKey> {
        Ok(self.keys.get_current_key(KeyType::AsymmetricPublic, scope)?)
    }

    /// Seal a chat message for the identity of `recipient`.
    pub fn seal_message(&self, sender_id: &str, receiver_id: &str, recipient: &KeyScope, plaintext: &[u8]) -> KeyringResult<SecureMessage> {
        let public = self.identity_public_key(recipient)?;
        let pem = public_pem(&public)?;
        Ok(session::seal_for(sender_id, receiver_id, pem, plaintext)?)
    }

    /// Open a message addressed to the identity of `recipient`.
    ///
    /// Tries each non-revoked private key of the scope, newest first, so
    /// messages sealed before an identity rotation still open.
    pub fn open_message(&self, message: &SecureMessage, recipient: &KeyScope) -> KeyringResult<SecretBytes> {
        let candidates = self.keys.list_keys(KeyType::AsymmetricPrivate, recipient)?;
        let mut last_err = None;

        for meta in candidates.iter().filter(|m| !m.is_revoked) {
            let private = self.keys.get_key_by_id(&meta.id)?;
            let pem = private.as_pem().ok_or_else(|| {
                SessionError::KeyExchange("stored private key is not PEM".to_string())
            })?;
            match session::open(message, pem) {
                Ok(plaintext) => return Ok(plaintext),
                Err(e @ SessionError::Decryption(_)) => {
                    debug!(key_id = %meta.id, "Identity key did not open message");
                    last_err = Some(e);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(last_err
            .map(KeyringError::from)
            .unwrap_or_else(|| {
                SessionError::KeyExchange(format!("no identity key for {}", recipient)).into()
            }))
    }

    /// Channel sealing messages from `sender_id` into `sink`.
    pub fn channel<S: MessageSink>(&self, sender_id: impl Into<String>, sink: S) -> SecureChannel<S> {
        SecureChannel::new(sender_id, sink)
    }
}

fn public_pem(key: &CurrentKey) -> KeyringResult<&str> {
    key.value
        .as_pem()
        .ok_or_else(|| SessionError::KeyExchange("stored public key is not PEM".to_string()).into())
}
