//! `/auth` endpoints.
//!
//! Handlers stay thin: decode the body, resolve tenancy, call [`AuthFlows`],
//! and map the result. All decisions (lockout, rotation, MFA, passkeys) live in
//! the orchestrator.
//!
//! [`AuthFlows`]: crate::auth::AuthFlows

pub mod login;
pub mod me;
pub mod mfa;
pub mod passkeys;
pub mod session;
pub mod types;
