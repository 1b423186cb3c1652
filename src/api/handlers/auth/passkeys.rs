//! Passkey registration (signed in) and passkey login (anonymous).
//!
//! Options responses carry a `challenge_id` that the verify call must echo;
//! the ceremony state never leaves the server.

use anyhow::Context;
use axum::{
    Json,
    extract::{Extension, rejection::JsonRejection},
    http::HeaderMap,
    response::Response,
};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::debug;
use webauthn_rs::prelude::{PublicKeyCredential, RegisterPublicKeyCredential};

use super::{
    session::session_response,
    types::{
        TokenResponse, WebAuthnLoginOptionsRequest, WebAuthnLoginVerifyRequest,
        WebAuthnOptionsResponse, WebAuthnRegisterOptionsRequest, WebAuthnRegisterVerifyRequest,
        WebAuthnRegisterVerifyResponse,
    },
};
use crate::{
    api::handlers::{Tenancy, payload, request_meta},
    auth::{AuthError, AuthFlows, ErrorBody},
};

/// Browser payloads that do not parse are a failed ceremony, not bad input.
fn credential<T: DeserializeOwned>(value: serde_json::Value) -> Result<T, AuthError> {
    serde_json::from_value(value).map_err(|err| {
        debug!("Malformed WebAuthn credential: {err}");
        AuthError::WebAuthnFailed
    })
}

fn options_response<T: serde::Serialize>(
    challenge_id: uuid::Uuid,
    options: &T,
) -> Result<Json<WebAuthnOptionsResponse>, AuthError> {
    let options = serde_json::to_value(options).context("Failed to encode WebAuthn options")?;
    Ok(Json(WebAuthnOptionsResponse {
        challenge_id,
        options,
    }))
}

#[utoipa::path(
    post,
    path = "/auth/webauthn/register/options",
    request_body(content = WebAuthnRegisterOptionsRequest, description = "Optional"),
    responses(
        (status = 200, description = "Credential creation options", body = WebAuthnOptionsResponse),
        (status = 401, description = "Authentication required", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn register_options(
    flows: Extension<Arc<AuthFlows>>,
    Tenancy(context): Tenancy,
    request: Result<Json<WebAuthnRegisterOptionsRequest>, JsonRejection>,
) -> Result<Json<WebAuthnOptionsResponse>, AuthError> {
    // An empty or missing body falls back to the account email.
    let request = request.map(|Json(request)| request).unwrap_or_default();
    let (challenge_id, options) = flows
        .webauthn_register_options(&context, request.display_name.as_deref())
        .await?;
    options_response(challenge_id, &options)
}

#[utoipa::path(
    post,
    path = "/auth/webauthn/register/verify",
    request_body = WebAuthnRegisterVerifyRequest,
    responses(
        (status = 200, description = "Passkey stored", body = WebAuthnRegisterVerifyResponse),
        (status = 400, description = "Attestation rejected or challenge invalid", body = ErrorBody),
        (status = 401, description = "Authentication required", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn register_verify(
    flows: Extension<Arc<AuthFlows>>,
    Tenancy(context): Tenancy,
    request: Result<Json<WebAuthnRegisterVerifyRequest>, JsonRejection>,
) -> Result<Json<WebAuthnRegisterVerifyResponse>, AuthError> {
    let request = payload(request)?;
    let response: RegisterPublicKeyCredential = credential(request.credential)?;
    let stored = flows
        .webauthn_register_verify(&context, request.challenge_id, &response, request.transports)
        .await?;
    Ok(Json(WebAuthnRegisterVerifyResponse {
        credential_id: stored.credential_id,
        created_at: stored.created_at,
    }))
}

#[utoipa::path(
    post,
    path = "/auth/webauthn/login/options",
    request_body = WebAuthnLoginOptionsRequest,
    responses(
        (status = 200, description = "Assertion request options", body = WebAuthnOptionsResponse),
        (status = 401, description = "No passkey login available", body = ErrorBody),
        (status = 423, description = "Account temporarily locked", body = ErrorBody),
    ),
    tag = "auth"
)]
pub async fn login_options(
    flows: Extension<Arc<AuthFlows>>,
    request: Result<Json<WebAuthnLoginOptionsRequest>, JsonRejection>,
) -> Result<Json<WebAuthnOptionsResponse>, AuthError> {
    let request = payload(request)?;
    let (challenge_id, options) = flows.webauthn_login_options(&request.email).await?;
    options_response(challenge_id, &options)
}

#[utoipa::path(
    post,
    path = "/auth/webauthn/login/verify",
    request_body = WebAuthnLoginVerifyRequest,
    responses(
        (status = 200, description = "Signed in", body = TokenResponse),
        (status = 400, description = "Assertion rejected, replayed, or challenge invalid", body = ErrorBody),
        (status = 423, description = "Account temporarily locked", body = ErrorBody),
    ),
    tag = "auth"
)]
pub async fn login_verify(
    headers: HeaderMap,
    flows: Extension<Arc<AuthFlows>>,
    request: Result<Json<WebAuthnLoginVerifyRequest>, JsonRejection>,
) -> Result<Response, AuthError> {
    let request = payload(request)?;
    let response: PublicKeyCredential = credential(request.credential)?;
    let pair = flows
        .webauthn_login_verify(request.challenge_id, &response, &request_meta(&headers))
        .await?;
    session_response(&flows, pair)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn malformed_credentials_fail_the_ceremony() {
        let result: Result<PublicKeyCredential, AuthError> = credential(json!({"id": 7}));
        assert!(matches!(result, Err(AuthError::WebAuthnFailed)));
    }
}
