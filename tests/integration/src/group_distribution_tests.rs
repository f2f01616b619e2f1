//! Group key distribution to member RSA keys

use crate::test_utils::TestWorkspace;
use chrono::Duration;
use keywarden_crypto::{decrypt, encrypt, generate_rsa_key_pair};
use keywarden_keystore::{unwrap_group_key, wrap_group_key, GroupKeyEnvelope, KeyScope, KeyType};

#[test]
fn test_members_recover_group_key() {
    let ws = TestWorkspace::new();
    let ctx = ws.open();
    let carol = generate_rsa_key_pair(2048).unwrap();
    let dave = generate_rsa_key_pair(2048).unwrap();

    let for_carol = wrap_group_key(ctx.keys(), "team-7", "carol", &carol.public_key).unwrap();
    let for_dave = wrap_group_key(ctx.keys(), "team-7", "dave", &dave.public_key).unwrap();
    assert_eq!(for_carol.key_id, for_dave.key_id);

    // Envelopes travel as JSON
    let wire = serde_json::to_string(&for_carol).unwrap();
    let received: GroupKeyEnvelope = serde_json::from_str(&wire).unwrap();

    let carol_key = unwrap_group_key(&received, &carol.private_key).unwrap();
    let dave_key = unwrap_group_key(&for_dave, &dave.private_key).unwrap();

    // A message sealed by one member opens for the other
    let sealed = encrypt(b"standup moved", carol_key.as_bytes(), None).unwrap();
    let opened = decrypt(&sealed, dave_key.as_bytes(), None).unwrap();
    assert_eq!(opened.as_slice(), b"standup moved");

    assert!(unwrap_group_key(&for_carol, &dave.private_key).is_err());
}

#[test]
fn test_rotation_issues_new_envelopes() {
    let ws = TestWorkspace::new();
    let ctx = ws.open();
    let member = generate_rsa_key_pair(2048).unwrap();

    let before = wrap_group_key(ctx.keys(), "team-7", "carol", &member.public_key).unwrap();
    ws.clock.advance(Duration::seconds(1));
    let rotated_id = ctx
        .keys()
        .rotate_key(KeyType::Symmetric, &KeyScope::group("team-7"))
        .unwrap();
    let after = wrap_group_key(ctx.keys(), "team-7", "carol", &member.public_key).unwrap();

    assert_ne!(before.key_id, after.key_id);
    assert_eq!(after.key_id, rotated_id);

    let old_key = unwrap_group_key(&before, &member.private_key).unwrap();
    let stored = ctx.keys().get_key_by_id(&before.key_id).unwrap();
    assert_eq!(old_key.as_bytes(), stored.as_bytes());
}
