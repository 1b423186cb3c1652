//! TOTP second factor (RFC 6238, SHA-1, 6 digits, 30 s steps, ±1 step skew).
//!
//! Seeds are sealed with `crypto` before they reach the user row. Enrollment
//! leaves MFA disabled until the first valid code confirms it.

pub mod crypto;

use anyhow::{Context, Result, anyhow};
use base64::Engine;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretSlice, SecretString};
use std::sync::Arc;
use totp_rs::{Algorithm, Secret, TOTP};
use tracing::info;

use crate::{
    auth::AuthError,
    clock::Clock,
    store::{CredentialStore, User},
};

const DIGITS: usize = 6;
const SKEW: u8 = 1;
const STEP_SECONDS: u64 = 30;

/// Returned once at enrollment; the client renders it as a QR code.
#[derive(Clone, Debug)]
pub struct Enrollment {
    pub secret_base32: String,
    pub provisioning_uri: String,
}

#[derive(Clone)]
pub struct MfaEngine {
    store: Arc<dyn CredentialStore>,
    clock: Arc<dyn Clock>,
    issuer: String,
    seed_key: Arc<SecretSlice<u8>>,
}

impl MfaEngine {
    /// `seed_key` is the base64 encoding of a 32-byte key.
    ///
    /// # Errors
    /// Returns an error if the key does not decode to 32 bytes.
    pub fn new(
        store: Arc<dyn CredentialStore>,
        clock: Arc<dyn Clock>,
        issuer: String,
        seed_key: &SecretString,
    ) -> Result<Self> {
        let key = decode_seed_key(seed_key)?;
        Ok(Self {
            store,
            clock,
            issuer,
            seed_key: Arc::new(SecretSlice::from(key)),
        })
    }

    /// Generate and store a fresh seed. Re-enrolling before confirmation
    /// replaces the pending seed.
    ///
    /// # Errors
    /// `MfaAlreadyEnabled` once MFA is active; `Internal` on crypto or store failure.
    pub async fn enroll(&self, user: &User) -> Result<Enrollment, AuthError> {
        if user.mfa_enabled {
            return Err(AuthError::MfaAlreadyEnabled);
        }

        let seed = Secret::generate_secret()
            .to_bytes()
            .map_err(|e| anyhow!("TOTP secret generation failed: {e:?}"))?;
        let sealed = crypto::seal_seed(self.seed_key.expose_secret(), &seed, user.id)?;

        let totp = self.totp(seed, &user.email)?;
        self.store
            .set_mfa(user.id, false, Some(sealed), self.clock.now())
            .await?;

        info!(user_id = %user.id, "TOTP enrollment started");
        Ok(Enrollment {
            secret_base32: totp.get_secret_base32(),
            provisioning_uri: totp.get_url(),
        })
    }

    /// Check the first code after enrollment and switch MFA on.
    ///
    /// # Errors
    /// `InvalidInput` without a pending enrollment; `InvalidMfaCode` on a bad code.
    pub async fn confirm_enrollment(&self, user: &User, code: &str) -> Result<(), AuthError> {
        if user.mfa_enabled {
            return Err(AuthError::MfaAlreadyEnabled);
        }
        let Some(sealed) = user.mfa_secret.as_deref() else {
            return Err(AuthError::InvalidInput(
                "MFA enrollment has not been started".to_string(),
            ));
        };

        if !self.check_sealed(sealed, user, code)? {
            return Err(AuthError::InvalidMfaCode);
        }

        self.store
            .set_mfa(user.id, true, Some(sealed.to_vec()), self.clock.now())
            .await?;
        info!(user_id = %user.id, "TOTP enrollment confirmed");
        Ok(())
    }

    /// Verify a login code for a user with MFA enabled.
    ///
    /// # Errors
    /// Returns an error if the stored seed cannot be opened.
    pub fn verify_login(&self, user: &User, code: &str) -> Result<bool> {
        let sealed = user
            .mfa_secret
            .as_deref()
            .ok_or_else(|| anyhow!("MFA enabled without a stored seed"))?;
        self.check_sealed(sealed, user, code)
    }

    fn check_sealed(&self, sealed: &[u8], user: &User, code: &str) -> Result<bool> {
        let seed = crypto::open_seed(self.seed_key.expose_secret(), sealed, user.id)?;
        verify(&seed, code, self.clock.now())
    }

    fn totp(&self, seed: Vec<u8>, account: &str) -> Result<TOTP> {
        build_totp(seed, Some(self.issuer.replace(':', "")), account.replace(':', ""))
    }
}

/// Check a code against a raw seed at `now`.
///
/// # Errors
/// Returns an error if the seed is too short for TOTP.
pub fn verify(seed: &[u8], code: &str, now: DateTime<Utc>) -> Result<bool> {
    let code = code.trim();
    if code.len() != DIGITS || !code.bytes().all(|b| b.is_ascii_digit()) {
        return Ok(false);
    }
    let Ok(unix) = u64::try_from(now.timestamp()) else {
        return Ok(false);
    };
    let totp = build_totp(seed.to_vec(), None, "storegate".to_string())?;
    Ok(totp.check(code, unix))
}

fn build_totp(seed: Vec<u8>, issuer: Option<String>, account: String) -> Result<TOTP> {
    TOTP::new(
        Algorithm::SHA1,
        DIGITS,
        SKEW,
        STEP_SECONDS,
        seed,
        issuer,
        account,
    )
    .map_err(|e| anyhow!("TOTP init error: {e}"))
}

fn decode_seed_key(key: &SecretString) -> Result<Vec<u8>> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(key.expose_secret().trim())
        .context("MFA encryption key is not valid base64")?;
    if bytes.len() != crypto::KEY_LEN {
        return Err(anyhow!(
            "MFA encryption key must decode to {} bytes",
            crypto::KEY_LEN
        ));
    }
    Ok(bytes)
}

#[cfg(test)]
pub(crate) fn code_at(seed: &[u8], at: DateTime<Utc>) -> Result<String> {
    let totp = build_totp(seed.to_vec(), None, "storegate".to_string())?;
    Ok(totp.generate(u64::try_from(at.timestamp())?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{clock::ManualClock, store::MemoryStore};
    use chrono::{Duration, TimeZone};

    const TEST_KEY: &str = "AAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8=";

    fn seed() -> Vec<u8> {
        b"12345678901234567890".to_vec()
    }

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(seconds, 0).single().unwrap_or_default()
    }

    #[test]
    fn rfc6238_reference_vector() -> Result<()> {
        // RFC 6238 appendix B, SHA-1, T = 59 -> 94287082 (last six digits).
        assert_eq!(code_at(&seed(), at(59))?, "287082");
        assert!(verify(&seed(), "287082", at(59))?);
        Ok(())
    }

    #[test]
    fn one_step_of_drift_is_tolerated() -> Result<()> {
        let now = at(1_700_000_000);
        let previous = code_at(&seed(), now - Duration::seconds(30))?;
        let next = code_at(&seed(), now + Duration::seconds(30))?;
        assert!(verify(&seed(), &previous, now)?);
        assert!(verify(&seed(), &next, now)?);
        Ok(())
    }

    #[test]
    fn codes_beyond_one_step_are_rejected() -> Result<()> {
        let now = at(1_700_000_000);
        let stale = code_at(&seed(), now - Duration::seconds(90))?;
        let future = code_at(&seed(), now + Duration::seconds(90))?;
        assert!(!verify(&seed(), &stale, now)?);
        assert!(!verify(&seed(), &future, now)?);
        Ok(())
    }

    #[test]
    fn malformed_codes_are_rejected_without_error() -> Result<()> {
        let now = at(1_700_000_000);
        assert!(!verify(&seed(), "12345", now)?);
        assert!(!verify(&seed(), "12a456", now)?);
        assert!(!verify(&seed(), "", now)?);
        Ok(())
    }

    #[test]
    fn seed_key_must_be_32_bytes() {
        let short = SecretString::from("AAECAwQFBgcICQoLDA0ODw==");
        assert!(decode_seed_key(&short).is_err());
        assert!(decode_seed_key(&SecretString::from("not base64!")).is_err());
        assert!(decode_seed_key(&SecretString::from(TEST_KEY)).is_ok());
    }

    #[tokio::test]
    async fn enroll_then_confirm_enables_mfa() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::new(at(1_700_000_000));
        let engine = MfaEngine::new(
            store.clone(),
            Arc::new(clock.clone()),
            "Storegate".into(),
            &SecretString::from(TEST_KEY),
        )?;
        let user = User::new("owner@shop.test".into(), "h".into(), clock.now());
        store.insert_user(&user).await?;

        let enrollment = engine.enroll(&user).await;
        let Ok(enrollment) = enrollment else {
            return Err(anyhow!("enroll failed"));
        };
        assert!(enrollment.provisioning_uri.starts_with("otpauth://totp/"));
        assert!(enrollment.secret_base32.len() >= 32);

        let pending = store
            .find_user_by_id(user.id)
            .await?
            .ok_or_else(|| anyhow!("missing user"))?;
        assert!(!pending.mfa_enabled);

        let raw = Secret::Encoded(enrollment.secret_base32.clone())
            .to_bytes()
            .map_err(|e| anyhow!("{e:?}"))?;
        assert_eq!(raw.len(), 20);

        let wrong = engine.confirm_enrollment(&pending, "000000").await;
        let good_code = code_at(&raw, clock.now())?;
        if good_code == "000000" {
            return Ok(());
        }
        assert!(matches!(wrong, Err(AuthError::InvalidMfaCode)));

        let confirmed = engine.confirm_enrollment(&pending, &good_code).await;
        assert!(confirmed.is_ok());

        let enabled = store
            .find_user_by_id(user.id)
            .await?
            .ok_or_else(|| anyhow!("missing user"))?;
        assert!(enabled.mfa_enabled);
        assert!(engine.verify_login(&enabled, &good_code)?);
        assert!(matches!(
            engine.enroll(&enabled).await,
            Err(AuthError::MfaAlreadyEnabled)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn confirm_without_enrollment_is_invalid_input() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let engine = MfaEngine::new(
            store,
            Arc::new(ManualClock::new(Utc::now())),
            "Storegate".into(),
            &SecretString::from(TEST_KEY),
        )?;
        let user = User::new("a@b.co".into(), "h".into(), Utc::now());
        let result = engine.confirm_enrollment(&user, "123456").await;
        assert!(matches!(result, Err(AuthError::InvalidInput(_))));
        Ok(())
    }
}
