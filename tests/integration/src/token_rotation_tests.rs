//! Token verification across secret rotations

use crate::test_utils::TestWorkspace;
use chrono::Duration;
use serde_json::json;

fn advance_and_rotate(ws: &TestWorkspace, ctx: &keywarden_keyring::KeyringContext) {
    ws.clock.advance(Duration::days(91));
    assert!(ctx.tokens().rotate_if_due().unwrap());
}

#[test]
fn test_token_outlives_rotations_until_fallbacks_exhausted() {
    let ws = TestWorkspace::new();
    let ctx = ws.open();
    let max_fallbacks = ctx.config().tokens.max_fallbacks;

    let token = ctx
        .tokens()
        .sign(&json!({ "sub": "alice", "role": "admin" }), Duration::days(3650))
        .unwrap();

    let claims = ctx.tokens().verify(&token).unwrap();
    assert_eq!(claims.payload["sub"], "alice");
    assert_eq!(claims.iss, ctx.config().tokens.issuer);

    for _ in 0..max_fallbacks {
        advance_and_rotate(&ws, &ctx);
        assert!(ctx.tokens().verify(&token).is_some());
    }

    advance_and_rotate(&ws, &ctx);
    assert!(ctx.tokens().verify(&token).is_none());
    assert_eq!(ctx.tokens().fallback_count(), max_fallbacks);
}

#[test]
fn test_rotated_secrets_persist_across_restart() {
    let ws = TestWorkspace::new();

    let token = {
        let ctx = ws.open();
        let token = ctx
            .tokens()
            .sign(&json!({ "sub": "bob" }), Duration::days(365))
            .unwrap();
        advance_and_rotate(&ws, &ctx);
        assert!(!ctx.tokens().persist_pending());
        token
    };

    let ctx = ws.open();
    assert_eq!(ctx.tokens().fallback_count(), 1);
    let claims = ctx.tokens().verify(&token).unwrap();
    assert_eq!(claims.payload["sub"], "bob");
}

#[test]
fn test_expiry_follows_clock() {
    let ws = TestWorkspace::new();
    let ctx = ws.open();

    let token = ctx
        .tokens()
        .sign(&json!({ "sub": "carol" }), Duration::minutes(15))
        .unwrap();
    assert!(!ctx.tokens().is_expired(&token));

    ws.clock.advance(Duration::minutes(16));
    assert!(ctx.tokens().is_expired(&token));
    assert!(ctx.tokens().verify(&token).is_none());
}

#[test]
fn test_token_from_other_keyring_rejected() {
    let ours = TestWorkspace::new();
    let theirs = TestWorkspace::new();

    let token = theirs
        .open()
        .tokens()
        .sign(&json!({ "sub": "mallory" }), Duration::hours(1))
        .unwrap();

    assert!(ours.open().tokens().verify(&token).is_none());
}

#[tokio::test]
async fn test_background_tasks_rotate_secret() {
    let ws = TestWorkspace::new();
    let mut config = ws.config();
    config.tokens.check_interval_secs = 1;
    let mut ctx = keywarden_keyring::KeyringContext::open_with_clock(
        config,
        std::sync::Arc::new(ws.clock.clone()),
    )
    .unwrap();

    ctx.start().unwrap();
    ws.clock.advance(Duration::days(91));

    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
    while ctx.tokens().fallback_count() == 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }

    assert_eq!(ctx.tokens().fallback_count(), 1);
    ctx.shutdown().await;
}
