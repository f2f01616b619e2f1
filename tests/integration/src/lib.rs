//! End-to-end scenarios across the Keywarden crates
//!
//! This test suite validates:
//! - Key lifecycle against SQLite: provision, rotate, revoke, clean up
//! - Token verification across secret rotations and restarts
//! - Forward-secret chat between identities held by the keyring
//! - Group key distribution to member RSA keys

pub mod test_utils;

#[cfg(test)]
mod key_lifecycle_tests;

#[cfg(test)]
mod token_rotation_tests;

#[cfg(test)]
mod secure_chat_tests;

#[cfg(test)]
mod group_distribution_tests;
