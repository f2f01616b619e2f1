//! Auth token signing under rotating secrets.
//!
//! - [`SecretRotationManager`]: HS256 sign/verify with primary and fallback secrets
//! - [`SecretSource`]: persistence of the secret set ([`FileSecretSource`], [`MemorySecretSource`])
//! - [`RotationScheduler`]: background task that rotates when due

pub mod error;
pub mod manager;
pub mod scheduler;
pub mod secret;
pub mod source;

pub use error::{TokenError, TokenResult};
pub use manager::{Claims, RotationSettings, SecretRotationManager};
pub use scheduler::{RotationHandle, RotationScheduler};
pub use secret::{SecretRecord, SigningSecret, MIN_SECRET_LEN, SECRET_LEN};
pub use source::{FileSecretSource, MemorySecretSource, SecretSource};
