//! Authentication flows and their supporting pieces.
//!
//! `AuthFlows` is the orchestrator: it composes the token service, lockout
//! ledger, MFA and WebAuthn engines, and the tenancy resolver into the
//! register/login/refresh/logout, MFA, passkey, and invite flows. It knows
//! nothing about HTTP; the `api` module maps its results onto responses and
//! cookies.
//!
//! ## Login pipeline
//!
//! Input validation, captcha, then the ledger. A locked account is rejected
//! before the password is checked. The failure that reaches the configured
//! threshold locks the account (the attempt itself still answers 401), so the
//! next attempt gets 423 regardless of the password.

pub mod captcha;
pub mod config;
pub mod csrf;
pub mod error;
pub mod flows;
mod utils;

pub use captcha::{CaptchaVerifier, HttpCaptchaVerifier, NoopCaptchaVerifier};
pub use config::AuthConfig;
pub use error::{AuthError, ErrorBody};
pub use flows::{AuthFlows, InviteGrant, LoginInput, RegisterInput, require_principal};
pub(crate) use utils::{extract_client_ip, normalize_email, valid_email};

/// Client metadata stored with tokens and login attempts.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestMeta {
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
}

#[cfg(test)]
mod tests;
