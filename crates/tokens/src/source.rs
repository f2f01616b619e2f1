//! Where signing secrets are persisted between restarts.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::debug;

use crate::error::{TokenError, TokenResult};
use crate::secret::SecretRecord;

/// Storage for the secret record.
pub trait SecretSource: Send + Sync {
    /// `Ok(None)` when nothing has been stored yet.
    fn load(&self) -> TokenResult<Option<SecretRecord>>;

    fn store(&self, record: &SecretRecord) -> TokenResult<()>;
}

/// JSON file written atomically via a sibling temp file. Mode 0600 on Unix.
#[derive(Debug, Clone)]
pub struct FileSecretSource {
    path: PathBuf,
}

impl FileSecretSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SecretSource for FileSecretSource {
    fn load(&self) -> TokenResult<Option<SecretRecord>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = zeroize::Zeroizing::new(std::fs::read_to_string(&self.path)?);
        let record = serde_json::from_str(&contents)
            .map_err(|e| TokenError::Corrupt(format!("{}: {}", self.path.display(), e)))?;
        Ok(Some(record))
    }

    fn store(&self, record: &SecretRecord) -> TokenResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let json = zeroize::Zeroizing::new(serde_json::to_vec_pretty(record)?);
        let tmp = self.path.with_extension("tmp");

        // A temp file left by a crashed write may carry looser permissions.
        match std::fs::remove_file(&tmp) {
            Ok(()) => debug!(path = %tmp.display(), "Removed stale temp file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let mut options = std::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(&tmp)?;
        file.write_all(&json)?;
        file.sync_all()?;
        std::fs::rename(&tmp, &self.path)?;

        debug!(path = %self.path.display(), "Signing secrets persisted");
        Ok(())
    }
}

/// In-process source. Writes can be made to fail to exercise retry paths.
#[derive(Debug, Default)]
pub struct MemorySecretSource {
    record: Mutex<Option<SecretRecord>>,
    fail_writes: AtomicBool,
}

impl MemorySecretSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(record: SecretRecord) -> Self {
        Self {
            record: Mutex::new(Some(record)),
            fail_writes: AtomicBool::new(false),
        }
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn stored(&self) -> Option<SecretRecord> {
        self.record
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl SecretSource for MemorySecretSource {
    fn load(&self) -> TokenResult<Option<SecretRecord>> {
        Ok(self.stored())
    }

    fn store(&self, record: &SecretRecord) -> TokenResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(TokenError::Source("secret store unavailable".to_string()));
        }
        *self.record.lock().unwrap_or_else(|e| e.into_inner()) = Some(record.clone());
        Ok(())
    }
}
