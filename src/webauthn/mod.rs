pub mod service;

pub use service::{WebAuthnEngine, encode_credential_id, enforce_sign_count};
