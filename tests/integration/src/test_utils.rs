//! Test utilities for end-to-end scenarios

use keywarden_core::{Config, ManualClock};
use keywarden_crypto::{MessageSink, SecureMessage, SessionResult};
use keywarden_keyring::KeyringContext;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Once};

static TRACING: Once = Once::new();

/// Install a test subscriber once per process. `RUST_LOG` controls output.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Scratch directory plus a manual clock shared by every context opened on it.
pub struct TestWorkspace {
    dir: PathBuf,
    pub clock: ManualClock,
}

impl TestWorkspace {
    pub fn new() -> Self {
        init_tracing();

        let dir = std::env::temp_dir().join(format!("keywarden_it_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("create workspace dir");

        Self {
            dir,
            clock: ManualClock::starting_now(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Config rooted in the workspace. Env var names are unique so the
    /// process environment never supplies secrets.
    pub fn config(&self) -> Config {
        let mut config = Config::rooted_at(&self.dir);
        let suffix = self
            .dir
            .file_name()
            .map(|name| name.to_string_lossy().to_uppercase())
            .unwrap_or_default();
        config.master_key.env_var = format!("KEYWARDEN_MASTER_{}", suffix);
        config.tokens.primary_secret_env = format!("KEYWARDEN_JWT_{}", suffix);
        config
    }

    /// Open a keyring over the workspace files.
    pub fn open(&self) -> KeyringContext {
        KeyringContext::open_with_clock(self.config(), Arc::new(self.clock.clone()))
            .expect("open keyring")
    }
}

impl Default for TestWorkspace {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TestWorkspace {
    fn drop(&mut self) {
        std::fs::remove_dir_all(&self.dir).ok();
    }
}

/// Transport stand-in that records every delivered message.
#[derive(Clone, Default)]
pub struct RecordingSink {
    messages: Arc<Mutex<Vec<SecureMessage>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain recorded messages, oldest first.
    pub fn take(&self) -> Vec<SecureMessage> {
        std::mem::take(&mut *self.messages.lock().expect("sink lock"))
    }
}

impl MessageSink for RecordingSink {
    fn deliver(&self, message: SecureMessage) -> SessionResult<()> {
        self.messages.lock().expect("sink lock").push(message);
        Ok(())
    }
}
