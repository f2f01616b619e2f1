//! Encrypted key storage and lifecycle management for Keywarden.
//!
//! - [`KeyManager`]: create, look up, rotate, revoke and clean up keys
//! - [`KeyStore`]: persistence seam, with [`SqliteKeyStore`] and [`MemoryKeyStore`]
//! - [`MasterKey`]: process-wide key sealing every stored row
//! - [`distribution`]: RSA-OAEP wrapping of group keys for members

pub mod distribution;
pub mod error;
pub mod manager;
pub mod master;
pub mod memory;
pub mod model;
pub mod sqlite;
pub mod store;

pub use distribution::{unwrap_group_key, wrap_group_key, GroupKeyEnvelope};
pub use error::{KeyError, KeyResult, StoreError, StoreResult};
pub use manager::{KeyManager, KeyPolicy};
pub use master::{MasterKey, MasterKeySource};
pub use memory::MemoryKeyStore;
pub use model::{
    Algorithm, CurrentKey, KeyMaterial, KeyMetadata, KeyScope, KeyStats, KeyType, StoredKey,
};
pub use sqlite::SqliteKeyStore;
pub use store::{KeyFilter, KeyPatch, KeyStore, Lookup};
