pub mod auth;
pub mod health;
pub mod invites;
pub mod tenancy;

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::{HeaderMap, header::USER_AGENT},
};

use crate::auth::{AuthError, RequestMeta, extract_client_ip};

pub use tenancy::Tenancy;

/// Client metadata persisted with tokens and login attempts.
pub(crate) fn request_meta(headers: &HeaderMap) -> RequestMeta {
    RequestMeta {
        client_ip: extract_client_ip(headers),
        user_agent: headers
            .get(USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.chars().take(512).collect()),
    }
}

/// Unwrap a JSON body, reporting malformed or incomplete bodies as 400.
pub(crate) fn payload<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AuthError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| AuthError::InvalidInput(rejection.body_text()))
}
