//! Group key distribution.
//!
//! A group's current symmetric key is wrapped with RSA-OAEP for each member
//! under the member's own RSA public key. Members unwrap it locally; the
//! plaintext group key never travels.

use keywarden_crypto::encoding::base64_bytes;
use keywarden_crypto::{rsa_unwrap_key, rsa_wrap_key};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::KeyResult;
use crate::manager::KeyManager;
use crate::model::{KeyMaterial, KeyScope, KeyType};

/// Wrapping scheme recorded on every envelope.
pub const ENVELOPE_ALGORITHM: &str = "RSA-OAEP-256";

/// A group key wrapped for one member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupKeyEnvelope {
    pub group_id: String,
    pub member_id: String,
    /// Id of the symmetric key row that was wrapped
    pub key_id: String,
    pub algorithm: String,
    #[serde(with = "base64_bytes")]
    pub wrapped_key: Vec<u8>,
}

/// Wrap `group_id`'s current symmetric key for one member.
pub fn wrap_group_key(
    manager: &KeyManager,
    group_id: &str,
    member_id: &str,
    member_rsa_public_pem: &str,
) -> KeyResult<GroupKeyEnvelope> {
    let current = manager.get_current_key(KeyType::Symmetric, &KeyScope::group(group_id))?;
    let wrapped_key = rsa_wrap_key(member_rsa_public_pem, current.value.as_bytes())?;

    debug!(
        group_id,
        member_id,
        key_id = %current.id,
        "Group key wrapped for member"
    );

    Ok(GroupKeyEnvelope {
        group_id: group_id.to_string(),
        member_id: member_id.to_string(),
        key_id: current.id,
        algorithm: ENVELOPE_ALGORITHM.to_string(),
        wrapped_key,
    })
}

/// Recover the group key from an envelope with the member's RSA private key.
pub fn unwrap_group_key(envelope: &GroupKeyEnvelope, member_rsa_private_pem: &str) -> KeyResult<KeyMaterial> {
    let key = rsa_unwrap_key(member_rsa_private_pem, &envelope.wrapped_key)?;
    Ok(KeyMaterial::new(key))
}
