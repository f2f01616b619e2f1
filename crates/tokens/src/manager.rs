//! Rotating HS256 signing secrets for auth tokens.
//!
//! Tokens are always signed with the primary secret. Verification tries
//! the primary and then each fallback, newest first, so tokens issued
//! before a rotation keep working until their secret ages out of the
//! fallback list.
//!
//! Persistence failures never take signing down: the rotated secret stays
//! in effect in memory and the write is retried on the next rotation check.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use keywarden_core::{ConfigError, SharedClock, TokensConfig, MAX_TOKEN_FALLBACKS};
use keywarden_crypto::SecretBytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{TokenError, TokenResult};
use crate::secret::{SigningSecret, MIN_SECRET_LEN};
use crate::source::SecretSource;

const RESERVED_CLAIMS: [&str; 5] = ["jti", "iss", "aud", "iat", "exp"];

/// Token claims. Caller payload fields sit next to the registered ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub jti: String,
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

/// The only claim [`SecretRotationManager::is_expired`] looks at.
#[derive(Debug, Deserialize)]
struct ExpiryClaim {
    exp: i64,
}

/// Rotation and claim settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationSettings {
    pub issuer: String,
    pub audience: String,
    pub rotation_interval: Duration,
    pub max_fallbacks: usize,
    pub primary_secret_env: String,
}

impl RotationSettings {
    pub fn from_config(config: &TokensConfig) -> Self {
        Self {
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            rotation_interval: config.rotation_interval(),
            max_fallbacks: config.max_fallbacks,
            primary_secret_env: config.primary_secret_env.clone(),
        }
    }
}

impl Default for RotationSettings {
    fn default() -> Self {
        Self {
            issuer: "keywarden".to_string(),
            audience: "keywarden-clients".to_string(),
            rotation_interval: Duration::days(90),
            max_fallbacks: MAX_TOKEN_FALLBACKS,
            primary_secret_env: "KEYWARDEN_JWT_SECRET".to_string(),
        }
    }
}

/// Signs and verifies tokens under a rotating secret.
pub struct SecretRotationManager {
    state: RwLock<SigningSecret>,
    source: Arc<dyn SecretSource>,
    clock: SharedClock,
    settings: RotationSettings,
    persist_lock: Mutex<()>,
    persist_pending: AtomicBool,
}

impl SecretRotationManager {
    /// Load secrets from `source`, else the configured env var, else generate.
    pub fn initialize(source: Arc<dyn SecretSource>, clock: SharedClock, settings: RotationSettings) -> TokenResult<Self> {
        let env_value = std::env::var(&settings.primary_secret_env).ok();
        Self::initialize_with(source, clock, settings, env_value.as_deref())
    }

    /// Same as [`SecretRotationManager::initialize`] with the env value supplied directly.
    pub fn initialize_with(
        source: Arc<dyn SecretSource>,
        clock: SharedClock,
        settings: RotationSettings,
        env_secret: Option<&str>,
    ) -> TokenResult<Self> {
        let now = clock.now();

        let state = match source.load()? {
            Some(record) => {
                let state =
                    SigningSecret::from_record(&record, settings.rotation_interval, settings.max_fallbacks)?;
                info!(
                    fallbacks = state.fallback_count(),
                    next_rotation_at = %state.next_rotation_at,
                    "Signing secrets loaded"
                );
                state
            }
            None => match env_secret.filter(|s| !s.is_empty()) {
                Some(value) => {
                    if value.len() < MIN_SECRET_LEN {
                        return Err(ConfigError::MalformedSecret {
                            origin: settings.primary_secret_env.clone(),
                            reason: format!("must be at least {} bytes", MIN_SECRET_LEN),
                        }
                        .into());
                    }
                    info!(env = %settings.primary_secret_env, "Primary signing secret taken from environment");
                    SigningSecret::new(
                        SecretBytes::new(value.as_bytes().to_vec()),
                        now,
                        settings.rotation_interval,
                    )
                }
                None => {
                    info!("No signing secret found; generating a new one");
                    SigningSecret::generate(now, settings.rotation_interval)
                }
            },
        };

        let due = state.is_due(now);
        let manager = Self {
            state: RwLock::new(state),
            source,
            clock,
            settings,
            persist_lock: Mutex::new(()),
            persist_pending: AtomicBool::new(false),
        };

        let outcome = if due {
            info!("Loaded signing secret is past its rotation date");
            manager.rotate()
        } else {
            manager.persist()
        };
        if let Err(e) = outcome {
            if e.is_fatal() {
                return Err(e);
            }
        }

        Ok(manager)
    }

    fn read_state(&self) -> RwLockReadGuard<'_, SigningSecret> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, SigningSecret> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn settings(&self) -> &RotationSettings {
        &self.settings
    }

    pub fn next_rotation_at(&self) -> DateTime<Utc> {
        self.read_state().next_rotation_at
    }

    pub fn key_created_at(&self) -> DateTime<Utc> {
        self.read_state().key_created_at
    }

    pub fn fallback_count(&self) -> usize {
        self.read_state().fallback_count()
    }

    /// A previous write failed and has not been retried successfully.
    pub fn persist_pending(&self) -> bool {
        self.persist_pending.load(Ordering::SeqCst)
    }

    /// Install a fresh primary and demote the old one to fallback.
    ///
    /// The new secret is live before persistence is attempted; a failed
    /// write returns `RotationFailure` but does not undo the rotation.
    pub fn rotate(&self) -> TokenResult<()> {
        {
            let mut state = self.write_state();
            state.rotate(
                self.clock.now(),
                self.settings.rotation_interval,
                self.settings.max_fallbacks,
            );
            info!(
                fallbacks = state.fallback_count(),
                next_rotation_at = %state.next_rotation_at,
                "Signing secret rotated"
            );
        }
        self.persist()
    }

    /// Rotate when due; otherwise retry a pending write. Returns whether it rotated.
    pub fn rotate_if_due(&self) -> TokenResult<bool> {
        if self.read_state().is_due(self.clock.now()) {
            self.rotate()?;
            return Ok(true);
        }
        if self.persist_pending() {
            debug!("Retrying pending signing secret write");
            self.persist()?;
        }
        Ok(false)
    }

    fn persist(&self) -> TokenResult<()> {
        let _guard = self.persist_lock.lock().unwrap_or_else(|e| e.into_inner());
        let record = self.read_state().to_record();

        match self.source.store(&record) {
            Ok(()) => {
                if self.persist_pending.swap(false, Ordering::SeqCst) {
                    info!("Pending signing secret write succeeded");
                }
                Ok(())
            }
            Err(e) => {
                self.persist_pending.store(true, Ordering::SeqCst);
                warn!(error = %e, "Failed to persist signing secrets; will retry");
                Err(TokenError::RotationFailure {
                    reason: e.to_string(),
                    retry_scheduled: true,
                })
            }
        }
    }

    /// Sign `payload` (a JSON object) into an HS256 token valid for `expires_in`.
    pub fn sign<T: Serialize>(&self, payload: &T, expires_in: Duration) -> TokenResult<String> {
        let mut payload = match serde_json::to_value(payload)? {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(TokenError::InvalidPayload(format!(
                    "expected a JSON object, got {}",
                    other
                )))
            }
        };
        for claim in RESERVED_CLAIMS {
            payload.remove(claim);
        }

        let now = self.clock.now();
        let claims = Claims {
            jti: Uuid::new_v4().to_string(),
            iss: self.settings.issuer.clone(),
            aud: self.settings.audience.clone(),
            iat: now.timestamp(),
            exp: (now + expires_in).timestamp(),
            payload,
        };

        let state = self.read_state();
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(&state.primary),
        )?;
        Ok(token)
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.settings.issuer.as_str()]);
        validation.set_audience(&[self.settings.audience.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);
        // Expiry is checked against the injected clock below.
        validation.validate_exp = false;
        validation.leeway = 0;
        validation
    }

    /// Claims of a valid token, trying the primary then each fallback.
    pub fn verify(&self, token: &str) -> Option<Claims> {
        let validation = self.validation();
        let state = self.read_state();

        for (index, secret) in state.candidates().enumerate() {
            match decode::<Claims>(token, &DecodingKey::from_secret(secret), &validation) {
                Ok(data) => {
                    if data.claims.exp <= self.clock.now().timestamp() {
                        debug!(jti = %data.claims.jti, "Token expired");
                        return None;
                    }
                    if index > 0 {
                        info!(fallback_index = index - 1, jti = %data.claims.jti, "Token verified with fallback secret");
                    }
                    return Some(data.claims);
                }
                Err(e) if matches!(e.kind(), ErrorKind::InvalidSignature) => continue,
                Err(e) => {
                    debug!(error = %e, "Token rejected");
                    return None;
                }
            }
        }

        debug!("Token signature matched no known secret");
        None
    }

    /// Whether `exp` has passed, without checking the signature.
    /// Tokens that cannot be decoded count as expired.
    pub fn is_expired(&self, token: &str) -> bool {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp"]);

        match decode::<ExpiryClaim>(token, &DecodingKey::from_secret(&[]), &validation) {
            Ok(data) => data.claims.exp <= self.clock.now().timestamp(),
            Err(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secret::SecretRecord;
    use crate::source::MemorySecretSource;
    use keywarden_core::{Clock, ManualClock};
    use serde_json::json;

    fn setup() -> (SecretRotationManager, ManualClock, Arc<MemorySecretSource>) {
        let clock = ManualClock::starting_now();
        let source = Arc::new(MemorySecretSource::new());
        let manager = SecretRotationManager::initialize_with(
            source.clone(),
            Arc::new(clock.clone()),
            RotationSettings::default(),
            None,
        )
        .unwrap();
        (manager, clock, source)
    }

    #[test]
    fn test_initialize_generates_and_persists() {
        let (manager, clock, source) = setup();

        let record: SecretRecord = source.stored().unwrap();
        assert_eq!(record.fallback_secrets.len(), 0);
        assert_eq!(manager.next_rotation_at(), clock.now() + Duration::days(90));
        assert!(!manager.persist_pending());
    }

    #[test]
    fn test_initialize_from_env() {
        let clock = ManualClock::starting_now();
        let source = Arc::new(MemorySecretSource::new());
        let secret = "e".repeat(40);

        let manager = SecretRotationManager::initialize_with(
            source.clone(),
            Arc::new(clock),
            RotationSettings::default(),
            Some(&secret),
        )
        .unwrap();

        let token = manager.sign(&json!({"sub": "u1"}), Duration::minutes(5)).unwrap();
        let data = decode::<Claims>(
            &token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &manager.validation(),
        );
        assert!(data.is_ok());
    }

    #[test]
    fn test_short_env_secret_rejected() {
        let result = SecretRotationManager::initialize_with(
            Arc::new(MemorySecretSource::new()),
            Arc::new(ManualClock::starting_now()),
            RotationSettings::default(),
            Some("short"),
        );
        assert!(matches!(result, Err(TokenError::Config(_))));
    }

    #[test]
    fn test_sign_and_verify() {
        let (manager, _clock, _source) = setup();

        let token = manager
            .sign(&json!({"sub": "user-1", "role": "admin", "exp": 1}), Duration::hours(1))
            .unwrap();
        let claims = manager.verify(&token).unwrap();

        assert_eq!(claims.payload["sub"], "user-1");
        assert_eq!(claims.payload["role"], "admin");
        assert_eq!(claims.iss, "keywarden");
        assert_eq!(claims.aud, "keywarden-clients");
        assert_eq!(claims.exp - claims.iat, 3600);
        assert!(Uuid::parse_str(&claims.jti).is_ok());
    }

    #[test]
    fn test_unique_jti() {
        let (manager, _clock, _source) = setup();

        let a = manager.sign(&json!({}), Duration::hours(1)).unwrap();
        let b = manager.sign(&json!({}), Duration::hours(1)).unwrap();

        assert_ne!(manager.verify(&a).unwrap().jti, manager.verify(&b).unwrap().jti);
    }

    #[test]
    fn test_non_object_payload_rejected() {
        let (manager, _clock, _source) = setup();
        let err = manager.sign(&json!([1, 2]), Duration::hours(1)).unwrap_err();
        assert!(matches!(err, TokenError::InvalidPayload(_)));
    }

    #[test]
    fn test_verify_after_rotations() {
        let (manager, _clock, _source) = setup();

        let token = manager.sign(&json!({"sub": "u"}), Duration::days(365)).unwrap();

        for _ in 0..3 {
            manager.rotate().unwrap();
            assert!(manager.verify(&token).is_some());
        }

        // Fourth rotation pushes the signing secret out of the fallback list
        manager.rotate().unwrap();
        assert_eq!(manager.fallback_count(), 3);
        assert!(manager.verify(&token).is_none());
    }

    #[test]
    fn test_expiry_uses_clock() {
        let (manager, clock, _source) = setup();

        let token = manager.sign(&json!({}), Duration::minutes(10)).unwrap();
        assert!(manager.verify(&token).is_some());
        assert!(!manager.is_expired(&token));

        clock.advance(Duration::minutes(11));
        assert!(manager.verify(&token).is_none());
        assert!(manager.is_expired(&token));
    }

    #[test]
    fn test_expiry_of_minimal_foreign_token() {
        let (manager, clock, _source) = setup();
        let exp = (clock.now() + Duration::minutes(5)).timestamp();
        let token = encode(
            &Header::new(Algorithm::HS256),
            &json!({ "exp": exp }),
            &EncodingKey::from_secret(b"some-other-service-secret-material"),
        )
        .unwrap();

        assert!(!manager.is_expired(&token));
        assert!(manager.verify(&token).is_none());

        clock.advance(Duration::minutes(6));
        assert!(manager.is_expired(&token));
    }

    #[test]
    fn test_garbage_token() {
        let (manager, _clock, _source) = setup();
        assert!(manager.verify("not.a.token").is_none());
        assert!(manager.is_expired("not.a.token"));
    }

    #[test]
    fn test_foreign_issuer_rejected() {
        let (manager, _clock, source) = setup();
        let record = source.stored().unwrap();

        let other = SecretRotationManager::initialize_with(
            Arc::new(MemorySecretSource::with_record(record)),
            Arc::new(ManualClock::starting_now()),
            RotationSettings {
                issuer: "someone-else".to_string(),
                ..RotationSettings::default()
            },
            None,
        )
        .unwrap();

        let token = other.sign(&json!({}), Duration::hours(1)).unwrap();
        assert!(manager.verify(&token).is_none());
    }

    #[test]
    fn test_rotation_failure_is_non_fatal() {
        let (manager, _clock, source) = setup();
        let before = manager.sign(&json!({}), Duration::hours(1)).unwrap();

        source.set_fail_writes(true);
        let err = manager.rotate().unwrap_err();
        assert!(matches!(
            err,
            TokenError::RotationFailure {
                retry_scheduled: true,
                ..
            }
        ));
        assert!(!err.is_fatal());
        assert!(manager.persist_pending());

        // New primary is already live
        let after = manager.sign(&json!({}), Duration::hours(1)).unwrap();
        assert!(manager.verify(&after).is_some());
        assert!(manager.verify(&before).is_some());

        source.set_fail_writes(false);
        assert!(!manager.rotate_if_due().unwrap());
        assert!(!manager.persist_pending());
        assert_eq!(source.stored().unwrap().fallback_secrets.len(), 1);
    }

    #[test]
    fn test_rotate_if_due() {
        let (manager, clock, _source) = setup();

        assert!(!manager.rotate_if_due().unwrap());

        clock.advance(Duration::days(90));
        assert!(manager.rotate_if_due().unwrap());
        assert_eq!(manager.fallback_count(), 1);
        assert_eq!(manager.next_rotation_at(), clock.now() + Duration::days(90));
    }

    #[test]
    fn test_overdue_state_rotates_on_load() {
        let (manager, clock, source) = setup();
        let old_token = manager.sign(&json!({}), Duration::days(400)).unwrap();
        drop(manager);

        clock.advance(Duration::days(100));
        let reloaded = SecretRotationManager::initialize_with(
            source.clone(),
            Arc::new(clock.clone()),
            RotationSettings::default(),
            None,
        )
        .unwrap();

        assert_eq!(reloaded.fallback_count(), 1);
        assert_eq!(reloaded.key_created_at(), clock.now());
        assert!(reloaded.verify(&old_token).is_some());
    }
}
