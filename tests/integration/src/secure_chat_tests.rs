//! Forward-secret chat between keyring identities

use crate::test_utils::{RecordingSink, TestWorkspace};
use keywarden_crypto::{SecureMessage, SessionError};
use keywarden_keyring::KeyringError;
use keywarden_keystore::KeyScope;

fn bob() -> KeyScope {
    KeyScope::group("user:bob")
}

#[test]
fn test_channel_delivers_openable_messages() {
    let ws = TestWorkspace::new();
    let ctx = ws.open();
    let sink = RecordingSink::new();
    let channel = ctx.channel("alice", sink.clone());

    let identity = ctx.identity_public_key(&bob()).unwrap();
    let pem = identity.value.as_pem().unwrap();
    channel.send("bob", pem, b"first").unwrap();
    channel.send("bob", pem, b"second").unwrap();

    let delivered = sink.take();
    assert_eq!(delivered.len(), 2);
    // Fresh ephemeral key and IV per message
    assert_ne!(delivered[0].ephemeral_public_key, delivered[1].ephemeral_public_key);
    assert_ne!(delivered[0].iv, delivered[1].iv);
    assert_eq!(delivered[0].sender_id, "alice");
    assert_eq!(delivered[0].receiver_id, "bob");

    assert_eq!(ctx.open_message(&delivered[0], &bob()).unwrap().as_slice(), b"first");
    assert_eq!(ctx.open_message(&delivered[1], &bob()).unwrap().as_slice(), b"second");
}

#[test]
fn test_message_survives_json_transport() {
    let ws = TestWorkspace::new();
    let ctx = ws.open();

    let message = ctx.seal_message("alice", "bob", &bob(), b"over the wire").unwrap();
    let wire = message.to_json().unwrap();
    assert!(wire.contains("\"ephemeralPublicKey\""));

    let received = SecureMessage::from_json(&wire).unwrap();
    assert_eq!(ctx.open_message(&received, &bob()).unwrap().as_slice(), b"over the wire");
}

#[test]
fn test_tampered_message_rejected() {
    let ws = TestWorkspace::new();
    let ctx = ws.open();
    let message = ctx.seal_message("alice", "bob", &bob(), b"pay 10").unwrap();

    let mut flipped = message.clone();
    flipped.ciphertext[0] ^= 0x01;
    let err = ctx.open_message(&flipped, &bob()).unwrap_err();
    assert!(matches!(err, KeyringError::Session(SessionError::Decryption(_))));
    assert_eq!(err.public_message(), "message unavailable");

    // Sender and receiver are bound into the AEAD
    let mut rerouted = message;
    rerouted.sender_id = "mallory".to_string();
    assert!(matches!(
        ctx.open_message(&rerouted, &bob()),
        Err(KeyringError::Session(SessionError::Decryption(_)))
    ));
}

#[test]
fn test_messages_open_after_restart() {
    let ws = TestWorkspace::new();

    let message = {
        let ctx = ws.open();
        ctx.seal_message("alice", "bob", &bob(), b"still here").unwrap()
    };

    let ctx = ws.open();
    assert_eq!(ctx.open_message(&message, &bob()).unwrap().as_slice(), b"still here");
}
