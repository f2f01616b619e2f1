//! Shared foundation for the Keywarden key-lifecycle workspace.
//!
//! This crate provides the configuration model, structured logging setup,
//! the injectable clock used by every time-dependent component, and the
//! base error type reused by the other crates.

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{
    AsymmetricAlgorithmSetting, Config, KeysConfig, LoggingConfig, MasterKeyConfig,
    StorageConfig, TokensConfig, MAX_TOKEN_FALLBACKS,
};
pub use error::{ConfigError, CoreError, Result};
