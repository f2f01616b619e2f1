//! Key lifecycle against the SQLite store

use crate::test_utils::TestWorkspace;
use chrono::Duration;
use keywarden_crypto::{decrypt, encrypt};
use keywarden_keystore::{KeyError, KeyScope, KeyType};

#[test]
fn test_rotate_revoke_cleanup_scenario() {
    let ws = TestWorkspace::new();
    let ctx = ws.open();
    let keys = ctx.keys();
    let scope = KeyScope::group("team-7");

    let k1 = keys.get_current_key(KeyType::Symmetric, &scope).unwrap();
    let sealed = encrypt(b"quarterly report", k1.value.as_bytes(), None).unwrap();

    ws.clock.advance(Duration::seconds(1));
    let k2_id = keys.rotate_key(KeyType::Symmetric, &scope).unwrap();
    assert_ne!(k2_id, k1.id);

    let current = keys.get_current_key(KeyType::Symmetric, &scope).unwrap();
    assert_eq!(current.id, k2_id);

    // Retired keys still decrypt what they sealed
    let old = keys.get_key_by_id(&k1.id).unwrap();
    let opened = decrypt(&sealed, old.as_bytes(), None).unwrap();
    assert_eq!(opened.as_slice(), b"quarterly report");

    keys.revoke_key(&k1.id).unwrap();
    let err = keys.get_key_by_id(&k1.id).unwrap_err();
    assert!(matches!(err, KeyError::KeyRevoked { .. }));
    assert_eq!(err.public_message(), "key unavailable");

    ws.clock.advance(Duration::days(181));
    assert_eq!(keys.cleanup_old_keys().unwrap(), 1);
    assert!(matches!(
        keys.get_key_by_id(&k1.id),
        Err(KeyError::KeyNotFound { .. })
    ));
    assert!(keys.get_key_by_id(&k2_id).is_ok());
}

#[test]
fn test_keys_survive_restart() {
    let ws = TestWorkspace::new();
    let scope = KeyScope::Global;

    let (id, bytes) = {
        let ctx = ws.open();
        let key = ctx.keys().get_current_key(KeyType::Symmetric, &scope).unwrap();
        (key.id.clone(), key.value.as_bytes().to_vec())
    };

    assert!(ws.dir().join("master.key").exists());

    let ctx = ws.open();
    let key = ctx.keys().get_current_key(KeyType::Symmetric, &scope).unwrap();
    assert_eq!(key.id, id);
    assert_eq!(key.value.as_bytes(), bytes.as_slice());
}

#[test]
fn test_expired_key_is_replaced_on_lookup() {
    let ws = TestWorkspace::new();
    let ctx = ws.open();
    let scope = KeyScope::group("ops");

    let first = ctx.keys().get_current_key(KeyType::Symmetric, &scope).unwrap();
    ws.clock.advance(Duration::days(31));
    let second = ctx.keys().get_current_key(KeyType::Symmetric, &scope).unwrap();

    assert_ne!(first.id, second.id);
    // The expired key stays readable until cleanup
    assert!(ctx.keys().get_key_by_id(&first.id).is_ok());

    let stats = ctx.keys().key_stats().unwrap();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.active, 1);
    assert_eq!(stats.expired, 1);
}

#[test]
fn test_identity_pair_rotates_together() {
    let ws = TestWorkspace::new();
    let ctx = ws.open();
    let scope = KeyScope::group("user:alice");

    let public = ctx.identity_public_key(&scope).unwrap();
    ws.clock.advance(Duration::seconds(1));
    ctx.keys()
        .rotate_key(KeyType::AsymmetricPrivate, &scope)
        .unwrap();

    let rotated = ctx.identity_public_key(&scope).unwrap();
    assert_ne!(rotated.id, public.id);

    let private = ctx
        .keys()
        .get_current_key(KeyType::AsymmetricPrivate, &scope)
        .unwrap();
    let paired = ctx.keys().get_public_key_for(&private.id).unwrap();
    assert_eq!(paired.id, rotated.id);
}

#[test]
fn test_revoked_identity_is_replaced_for_new_messages() {
    let ws = TestWorkspace::new();
    let ctx = ws.open();
    let scope = KeyScope::group("user:bob");

    let before = ctx.seal_message("alice", "bob", &scope, b"before").unwrap();
    let private = ctx
        .keys()
        .get_current_key(KeyType::AsymmetricPrivate, &scope)
        .unwrap();
    let public = ctx.keys().get_public_key_for(&private.id).unwrap();

    ctx.keys().revoke_key(&private.id).unwrap();
    assert!(matches!(
        ctx.keys().get_key_by_id(&public.id),
        Err(KeyError::KeyRevoked { .. })
    ));

    let after = ctx.seal_message("alice", "bob", &scope, b"after").unwrap();
    assert_eq!(ctx.open_message(&after, &scope).unwrap().as_slice(), b"after");

    // Only the revoked key could open the earlier message
    assert!(ctx.open_message(&before, &scope).is_err());
}
