//! Runtime configuration for auth flows.

use anyhow::{Context, Result, bail};
use chrono::Duration;
use secrecy::SecretString;
use url::Url;

use crate::lockout::LockoutPolicy;

/// Access tokens are short-lived by policy; this is not configurable.
pub const ACCESS_TOKEN_TTL_MINUTES: i64 = 15;

/// Ten years.
pub const MAX_REFRESH_TTL_DAYS: i64 = 3650;
/// One hour.
pub const MAX_WEBAUTHN_CHALLENGE_TTL_SECONDS: i64 = 3600;

const DEFAULT_REFRESH_TTL_DAYS: i64 = 30;
const DEFAULT_WEBAUTHN_CHALLENGE_TTL_SECONDS: i64 = 5 * 60;
const DEFAULT_INVITE_TTL_DAYS: i64 = 7;
const DEFAULT_MFA_ISSUER: &str = "Storegate";
const DEFAULT_RP_NAME: &str = "Storegate";

#[derive(Clone, Debug)]
pub struct AuthConfig {
    frontend_base_url: String,
    refresh_ttl_days: i64,
    lockout: LockoutPolicy,
    webauthn_rp_id: String,
    webauthn_rp_origin: String,
    webauthn_rp_name: String,
    webauthn_challenge_ttl_seconds: i64,
    invite_ttl_days: i64,
    mfa_issuer: String,
    mfa_encryption_key: SecretString,
}

impl AuthConfig {
    #[must_use]
    pub fn new(frontend_base_url: String, mfa_encryption_key: SecretString) -> Self {
        let rp_id = Url::parse(&frontend_base_url)
            .ok()
            .and_then(|u: Url| u.host_str().map(ToString::to_string))
            .unwrap_or_else(|| "localhost".to_string());

        // Origins never carry a trailing slash.
        let rp_origin = frontend_base_url.trim_end_matches('/').to_string();

        Self {
            frontend_base_url,
            refresh_ttl_days: DEFAULT_REFRESH_TTL_DAYS,
            lockout: LockoutPolicy::default(),
            webauthn_rp_id: rp_id,
            webauthn_rp_origin: rp_origin,
            webauthn_rp_name: DEFAULT_RP_NAME.to_string(),
            webauthn_challenge_ttl_seconds: DEFAULT_WEBAUTHN_CHALLENGE_TTL_SECONDS,
            invite_ttl_days: DEFAULT_INVITE_TTL_DAYS,
            mfa_issuer: DEFAULT_MFA_ISSUER.to_string(),
            mfa_encryption_key,
        }
    }

    #[must_use]
    pub fn with_refresh_ttl_days(mut self, days: i64) -> Self {
        self.refresh_ttl_days = days;
        self
    }

    #[must_use]
    pub fn with_lockout(mut self, lockout: LockoutPolicy) -> Self {
        self.lockout = lockout;
        self
    }

    #[must_use]
    pub fn with_webauthn_rp_id(mut self, rp_id: String) -> Self {
        self.webauthn_rp_id = rp_id;
        self
    }

    #[must_use]
    pub fn with_webauthn_rp_origin(mut self, rp_origin: String) -> Self {
        self.webauthn_rp_origin = rp_origin.trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn with_webauthn_rp_name(mut self, rp_name: String) -> Self {
        self.webauthn_rp_name = rp_name;
        self
    }

    #[must_use]
    pub fn with_webauthn_challenge_ttl_seconds(mut self, seconds: i64) -> Self {
        self.webauthn_challenge_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_mfa_issuer(mut self, issuer: String) -> Self {
        self.mfa_issuer = issuer;
        self
    }

    /// Reject lifetimes that cannot be added to a timestamp.
    ///
    /// # Errors
    /// Returns an error naming the first out-of-range setting.
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_REFRESH_TTL_DAYS).contains(&self.refresh_ttl_days) {
            bail!(
                "refresh token lifetime must be between 1 and {MAX_REFRESH_TTL_DAYS} days, got {}",
                self.refresh_ttl_days
            );
        }
        if !(1..=MAX_WEBAUTHN_CHALLENGE_TTL_SECONDS).contains(&self.webauthn_challenge_ttl_seconds)
        {
            bail!(
                "WebAuthn challenge lifetime must be between 1 and {MAX_WEBAUTHN_CHALLENGE_TTL_SECONDS} seconds, got {}",
                self.webauthn_challenge_ttl_seconds
            );
        }
        self.lockout.validate().context("Invalid lockout policy")
    }

    #[must_use]
    pub fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    #[must_use]
    pub fn access_ttl(&self) -> Duration {
        Duration::minutes(ACCESS_TOKEN_TTL_MINUTES)
    }

    #[must_use]
    pub fn refresh_ttl(&self) -> Duration {
        Duration::days(self.refresh_ttl_days.clamp(1, MAX_REFRESH_TTL_DAYS))
    }

    #[must_use]
    pub fn lockout(&self) -> LockoutPolicy {
        self.lockout
    }

    #[must_use]
    pub fn webauthn_rp_id(&self) -> &str {
        &self.webauthn_rp_id
    }

    #[must_use]
    pub fn webauthn_rp_origin(&self) -> &str {
        &self.webauthn_rp_origin
    }

    #[must_use]
    pub fn webauthn_rp_name(&self) -> &str {
        &self.webauthn_rp_name
    }

    #[must_use]
    pub fn webauthn_challenge_ttl(&self) -> Duration {
        Duration::seconds(
            self.webauthn_challenge_ttl_seconds
                .clamp(1, MAX_WEBAUTHN_CHALLENGE_TTL_SECONDS),
        )
    }

    #[must_use]
    pub fn invite_ttl(&self) -> Duration {
        Duration::days(self.invite_ttl_days)
    }

    #[must_use]
    pub fn mfa_issuer(&self) -> &str {
        &self.mfa_issuer
    }

    pub(crate) fn mfa_encryption_key(&self) -> &SecretString {
        &self.mfa_encryption_key
    }

    /// Cookies are only marked `Secure` when the frontend is served over HTTPS.
    #[must_use]
    pub fn cookie_secure(&self) -> bool {
        self.frontend_base_url.starts_with("https://")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> SecretString {
        SecretString::from("AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=")
    }

    #[test]
    fn auth_config_defaults_and_overrides() {
        let config = AuthConfig::new("https://shop.storegate.dev/".to_string(), key());

        assert_eq!(config.webauthn_rp_id(), "shop.storegate.dev");
        assert_eq!(config.webauthn_rp_origin(), "https://shop.storegate.dev");
        assert_eq!(config.access_ttl(), Duration::minutes(15));
        assert_eq!(config.refresh_ttl(), Duration::days(30));
        assert_eq!(config.lockout(), LockoutPolicy::default());
        assert!(config.cookie_secure());

        let config = config
            .with_refresh_ttl_days(7)
            .with_lockout(LockoutPolicy::new(3, 10))
            .with_webauthn_rp_origin("https://admin.storegate.dev/".to_string())
            .with_webauthn_challenge_ttl_seconds(60)
            .with_mfa_issuer("Acme".to_string());

        assert_eq!(config.refresh_ttl(), Duration::days(7));
        assert_eq!(config.lockout().max_failed_attempts(), 3);
        assert_eq!(config.webauthn_rp_origin(), "https://admin.storegate.dev");
        assert_eq!(config.webauthn_challenge_ttl(), Duration::seconds(60));
        assert_eq!(config.mfa_issuer(), "Acme");
    }

    #[test]
    fn out_of_range_lifetimes_fail_validation_without_panicking() {
        assert!(AuthConfig::new("https://shop.storegate.dev".to_string(), key()).validate().is_ok());

        let config = AuthConfig::new("https://shop.storegate.dev".to_string(), key())
            .with_refresh_ttl_days(1_000_000_000);
        assert!(config.validate().is_err());
        assert_eq!(config.refresh_ttl(), Duration::days(MAX_REFRESH_TTL_DAYS));

        let config = AuthConfig::new("https://shop.storegate.dev".to_string(), key())
            .with_webauthn_challenge_ttl_seconds(i64::MAX);
        assert!(config.validate().is_err());
        assert_eq!(
            config.webauthn_challenge_ttl(),
            Duration::seconds(MAX_WEBAUTHN_CHALLENGE_TTL_SECONDS)
        );

        let config = AuthConfig::new("https://shop.storegate.dev".to_string(), key())
            .with_lockout(LockoutPolicy::new(5, i64::MAX / 2));
        assert!(config.validate().is_err());
    }

    #[test]
    fn plain_http_frontend_disables_secure_cookies() {
        let config = AuthConfig::new("http://localhost:5173".to_string(), key());
        assert!(!config.cookie_secure());
        assert_eq!(config.webauthn_rp_id(), "localhost");
    }
}
