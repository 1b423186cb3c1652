//! # Storegate (authentication and store-scoped authorization)
//!
//! `storegate` authenticates users of a multi-store commerce platform and
//! decides what they may do inside each store.
//!
//! ## Credentials
//!
//! - **Passwords** are hashed with argon2id. Unknown-email logins still run a
//!   verification against a dummy hash.
//! - **Tokens** are opaque 256-bit secrets; only their SHA-256 digest is
//!   stored. Access tokens live 15 minutes. Refresh tokens rotate on every use
//!   and belong to a family: presenting an already-rotated refresh token
//!   revokes the entire family.
//! - **MFA** is TOTP (RFC 6238, 30 s step, ±1 step). Seeds are encrypted at
//!   rest with ChaCha20-Poly1305.
//! - **Passkeys** use WebAuthn. The signature counter must strictly increase
//!   (`0/0` excepted) or the assertion is rejected as a possible clone.
//!
//! ## Lockout
//!
//! Every login attempt is recorded. After `N` consecutive failures within `W`
//! minutes (defaults 5 and 15) the account is locked for `W` minutes and
//! answers `423 Locked` even for the right password.
//!
//! ## Tenancy
//!
//! Each request resolves to a `TenancyContext`: the principal, the active store
//! (`X-Store-Id`), the caller's role there, and the effective permissions (role
//! template plus explicit grants). Authorization denies by default: anonymous
//! callers get `401`, authenticated callers lacking the permission get `403`.

pub mod api;
pub mod auth;
pub mod cli;
pub mod clock;
pub mod lockout;
pub mod password;
pub mod store;
pub mod tenancy;
pub mod token;
pub mod totp;
pub mod webauthn;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
