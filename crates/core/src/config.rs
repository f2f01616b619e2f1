//! Configuration management for Keywarden.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Environment variable naming the config file used by [`Config::load`].
pub const CONFIG_PATH_ENV: &str = "KEYWARDEN_CONFIG";

/// Upper bound on retained token signing fallbacks.
pub const MAX_TOKEN_FALLBACKS: usize = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub storage: StorageConfig,
    pub master_key: MasterKeyConfig,
    pub keys: KeysConfig,
    pub tokens: TokensConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database holding encrypted key rows
    pub db_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterKeyConfig {
    /// Environment variable holding the hex-encoded master key
    pub env_var: String,
    /// Local secret file used when the env var is absent
    pub secret_file: PathBuf,
}

/// Algorithm minted by the key manager for persisted asymmetric pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AsymmetricAlgorithmSetting {
    #[default]
    EcdhP256,
    RsaOaep2048,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeysConfig {
    pub symmetric_rotation_days: u32,
    pub asymmetric_rotation_days: u32,
    pub retention_days: u32,
    #[serde(default)]
    pub asymmetric_algorithm: AsymmetricAlgorithmSetting,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokensConfig {
    pub issuer: String,
    pub audience: String,
    pub rotation_days: u32,
    pub max_fallbacks: usize,
    /// JSON file persisting primary and fallback secrets
    pub secret_file: PathBuf,
    /// Environment variable that may provide the initial primary secret
    pub primary_secret_env: String,
    /// How often the scheduler checks whether rotation is due
    pub check_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl KeysConfig {
    pub fn symmetric_rotation(&self) -> Duration {
        Duration::days(i64::from(self.symmetric_rotation_days))
    }

    pub fn asymmetric_rotation(&self) -> Duration {
        Duration::days(i64::from(self.asymmetric_rotation_days))
    }

    pub fn retention(&self) -> Duration {
        Duration::days(i64::from(self.retention_days))
    }
}

impl TokensConfig {
    pub fn rotation_interval(&self) -> Duration {
        Duration::days(i64::from(self.rotation_days))
    }

    pub fn check_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.check_interval_secs.max(1))
    }
}

impl Config {
    #[cfg(feature = "toml")]
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the file named by `KEYWARDEN_CONFIG`, or fall back to defaults.
    #[cfg(feature = "toml")]
    pub fn load() -> Result<Self, ConfigError> {
        match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::from_file(path),
            Err(_) => {
                tracing::warn!(
                    env = CONFIG_PATH_ENV,
                    "No config file configured, using built-in defaults"
                );
                Ok(Self::default_config())
            }
        }
    }

    /// Reject settings that would disable rotation or retention.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("keys.symmetric_rotation_days", self.keys.symmetric_rotation_days),
            ("keys.asymmetric_rotation_days", self.keys.asymmetric_rotation_days),
            ("keys.retention_days", self.keys.retention_days),
            ("tokens.rotation_days", self.tokens.rotation_days),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    reason: "must be at least 1".to_string(),
                });
            }
        }

        if self.tokens.max_fallbacks == 0 || self.tokens.max_fallbacks > MAX_TOKEN_FALLBACKS {
            return Err(ConfigError::InvalidValue {
                field: "tokens.max_fallbacks".to_string(),
                reason: format!("must be between 1 and {}", MAX_TOKEN_FALLBACKS),
            });
        }

        if self.tokens.issuer.is_empty() || self.tokens.audience.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "tokens.issuer/audience".to_string(),
                reason: "must not be empty".to_string(),
            });
        }

        Ok(())
    }

    pub fn default_config() -> Self {
        Self {
            storage: StorageConfig {
                db_path: PathBuf::from("data/keys.db"),
            },
            master_key: MasterKeyConfig {
                env_var: "KEYWARDEN_MASTER_KEY".to_string(),
                secret_file: PathBuf::from("data/master.key"),
            },
            keys: KeysConfig {
                symmetric_rotation_days: 30,
                asymmetric_rotation_days: 90,
                retention_days: 180,
                asymmetric_algorithm: AsymmetricAlgorithmSetting::EcdhP256,
            },
            tokens: TokensConfig {
                issuer: "keywarden".to_string(),
                audience: "keywarden-clients".to_string(),
                rotation_days: 90,
                max_fallbacks: MAX_TOKEN_FALLBACKS,
                secret_file: PathBuf::from("data/jwt-secrets.json"),
                primary_secret_env: "KEYWARDEN_JWT_SECRET".to_string(),
                check_interval_secs: 3600,
            },
            logging: LoggingConfig::default(),
        }
    }

    /// Default configuration with every file path placed under `dir`.
    pub fn rooted_at(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        let mut config = Self::default_config();
        config.storage.db_path = dir.join("keys.db");
        config.master_key.secret_file = dir.join("master.key");
        config.tokens.secret_file = dir.join("jwt-secrets.json");
        config
    }
}
