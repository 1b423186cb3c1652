use anyhow::{Result, bail};
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

use crate::{
    auth::config::{MAX_REFRESH_TTL_DAYS, MAX_WEBAUTHN_CHALLENGE_TTL_SECONDS},
    lockout::MAX_LOCKOUT_MINUTES,
};

pub const ARG_FRONTEND_URL: &str = "frontend-url";
pub const ARG_WEBAUTHN_RP_ID: &str = "webauthn-rp-id";
pub const ARG_WEBAUTHN_RP_ORIGIN: &str = "webauthn-rp-origin";
pub const ARG_WEBAUTHN_RP_NAME: &str = "webauthn-rp-name";
pub const ARG_WEBAUTHN_CHALLENGE_TTL: &str = "webauthn-challenge-ttl-seconds";
pub const ARG_MAX_FAILED_ATTEMPTS: &str = "max-failed-attempts";
pub const ARG_LOCKOUT_MINUTES: &str = "lockout-minutes";
pub const ARG_REFRESH_TTL_DAYS: &str = "refresh-ttl-days";
pub const ARG_MFA_ISSUER: &str = "mfa-issuer";
pub const ARG_MFA_ENCRYPTION_KEY: &str = "mfa-encryption-key";
pub const ARG_CAPTCHA_VERIFY_URL: &str = "captcha-verify-url";
pub const ARG_CAPTCHA_SECRET: &str = "captcha-secret";

#[derive(Debug)]
pub struct CaptchaOptions {
    pub verify_url: String,
    pub secret: SecretString,
}

#[derive(Debug)]
pub struct Options {
    pub frontend_url: String,
    pub webauthn_rp_id: Option<String>,
    pub webauthn_rp_origin: Option<String>,
    pub webauthn_rp_name: Option<String>,
    pub webauthn_challenge_ttl_seconds: i64,
    pub max_failed_attempts: u32,
    pub lockout_minutes: i64,
    pub refresh_ttl_days: i64,
    pub mfa_issuer: String,
    pub mfa_encryption_key: SecretString,
    pub captcha: Option<CaptchaOptions>,
}

impl Options {
    /// Parse auth arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the MFA key is missing or only half of the captcha
    /// settings are present.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        // clap passes through env vars set to ""
        let get_non_empty = |id: &str| {
            matches
                .get_one::<String>(id)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let Some(mfa_encryption_key) = get_non_empty(ARG_MFA_ENCRYPTION_KEY) else {
            bail!("missing required argument: --{ARG_MFA_ENCRYPTION_KEY}");
        };

        let captcha = match (
            get_non_empty(ARG_CAPTCHA_VERIFY_URL),
            get_non_empty(ARG_CAPTCHA_SECRET),
        ) {
            (Some(verify_url), Some(secret)) => Some(CaptchaOptions {
                verify_url,
                secret: SecretString::from(secret),
            }),
            (None, None) => None,
            (Some(_), None) => bail!("--{ARG_CAPTCHA_VERIFY_URL} requires --{ARG_CAPTCHA_SECRET}"),
            (None, Some(_)) => bail!("--{ARG_CAPTCHA_SECRET} requires --{ARG_CAPTCHA_VERIFY_URL}"),
        };

        Ok(Self {
            frontend_url: get_non_empty(ARG_FRONTEND_URL)
                .unwrap_or_else(|| "http://localhost:5173".to_string()),
            webauthn_rp_id: get_non_empty(ARG_WEBAUTHN_RP_ID),
            webauthn_rp_origin: get_non_empty(ARG_WEBAUTHN_RP_ORIGIN),
            webauthn_rp_name: get_non_empty(ARG_WEBAUTHN_RP_NAME),
            webauthn_challenge_ttl_seconds: matches
                .get_one::<i64>(ARG_WEBAUTHN_CHALLENGE_TTL)
                .copied()
                .unwrap_or(300),
            max_failed_attempts: matches
                .get_one::<u32>(ARG_MAX_FAILED_ATTEMPTS)
                .copied()
                .unwrap_or(5),
            lockout_minutes: matches
                .get_one::<i64>(ARG_LOCKOUT_MINUTES)
                .copied()
                .unwrap_or(15),
            refresh_ttl_days: matches
                .get_one::<i64>(ARG_REFRESH_TTL_DAYS)
                .copied()
                .unwrap_or(30),
            mfa_issuer: get_non_empty(ARG_MFA_ISSUER).unwrap_or_else(|| "Storegate".to_string()),
            mfa_encryption_key: SecretString::from(mfa_encryption_key),
            captcha,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_session_args(command);
    let command = with_webauthn_args(command);
    let command = with_mfa_args(command);
    with_captcha_args(command)
}

fn with_session_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_FRONTEND_URL)
                .long(ARG_FRONTEND_URL)
                .help("Frontend URL: CORS origin, cookie Secure flag, default WebAuthn relying party")
                .env("STOREGATE_FRONTEND_URL")
                .default_value("http://localhost:5173"),
        )
        .arg(
            Arg::new(ARG_REFRESH_TTL_DAYS)
                .long(ARG_REFRESH_TTL_DAYS)
                .help("Refresh token lifetime in days")
                .env("STOREGATE_REFRESH_TTL_DAYS")
                .default_value("30")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_REFRESH_TTL_DAYS)),
        )
        .arg(
            Arg::new(ARG_MAX_FAILED_ATTEMPTS)
                .long(ARG_MAX_FAILED_ATTEMPTS)
                .help("Consecutive failed logins that lock an account")
                .env("STOREGATE_MAX_FAILED_ATTEMPTS")
                .default_value("5")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new(ARG_LOCKOUT_MINUTES)
                .long(ARG_LOCKOUT_MINUTES)
                .help("Lockout duration and failure-counting window in minutes")
                .env("STOREGATE_LOCKOUT_MINUTES")
                .default_value("15")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_LOCKOUT_MINUTES)),
        )
}

fn with_webauthn_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_WEBAUTHN_RP_ID)
                .long(ARG_WEBAUTHN_RP_ID)
                .help("WebAuthn relying party id (default: frontend host)")
                .env("STOREGATE_WEBAUTHN_RP_ID"),
        )
        .arg(
            Arg::new(ARG_WEBAUTHN_RP_ORIGIN)
                .long(ARG_WEBAUTHN_RP_ORIGIN)
                .help("WebAuthn relying party origin (default: frontend URL)")
                .env("STOREGATE_WEBAUTHN_RP_ORIGIN"),
        )
        .arg(
            Arg::new(ARG_WEBAUTHN_RP_NAME)
                .long(ARG_WEBAUTHN_RP_NAME)
                .help("WebAuthn relying party display name")
                .env("STOREGATE_WEBAUTHN_RP_NAME"),
        )
        .arg(
            Arg::new(ARG_WEBAUTHN_CHALLENGE_TTL)
                .long(ARG_WEBAUTHN_CHALLENGE_TTL)
                .help("Lifetime of a pending WebAuthn ceremony in seconds")
                .env("STOREGATE_WEBAUTHN_CHALLENGE_TTL_SECONDS")
                .default_value("300")
                .value_parser(
                    clap::value_parser!(i64).range(1..=MAX_WEBAUTHN_CHALLENGE_TTL_SECONDS),
                ),
        )
}

fn with_mfa_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_MFA_ISSUER)
                .long(ARG_MFA_ISSUER)
                .help("Issuer shown by authenticator apps")
                .env("STOREGATE_MFA_ISSUER")
                .default_value("Storegate"),
        )
        .arg(
            Arg::new(ARG_MFA_ENCRYPTION_KEY)
                .long(ARG_MFA_ENCRYPTION_KEY)
                .help("Base64 32-byte key encrypting TOTP seeds at rest")
                .env("STOREGATE_MFA_ENCRYPTION_KEY")
                .hide_env_values(true),
        )
}

fn with_captcha_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_CAPTCHA_VERIFY_URL)
                .long(ARG_CAPTCHA_VERIFY_URL)
                .help("Captcha siteverify endpoint; unset accepts any non-empty token")
                .env("STOREGATE_CAPTCHA_VERIFY_URL"),
        )
        .arg(
            Arg::new(ARG_CAPTCHA_SECRET)
                .long(ARG_CAPTCHA_SECRET)
                .help("Captcha provider secret")
                .env("STOREGATE_CAPTCHA_SECRET")
                .hide_env_values(true),
        )
}
