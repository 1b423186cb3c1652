//! Session cookies plus the refresh and logout endpoints.
//!
//! Every successful login-like flow answers through [`session_response`]:
//! the token pair goes in the body, the refresh secret is mirrored into an
//! `HttpOnly` cookie, and a fresh CSRF token is set for the double-submit
//! check.

use anyhow::Context;
use axum::{
    Json,
    extract::{Extension, rejection::JsonRejection},
    http::{HeaderMap, HeaderValue, StatusCode, header::SET_COOKIE},
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use super::types::{MessageResponse, RefreshRequest, TokenResponse};
use crate::{
    api::handlers::{Tenancy, request_meta},
    auth::{
        AuthError, AuthFlows, ErrorBody,
        csrf::{self, REFRESH_COOKIE},
    },
    token::{self, TokenPair},
};

/// Render a token pair and set the session cookies.
///
/// # Errors
/// `Internal` if the CSRF token cannot be generated or a cookie is not a
/// valid header value.
pub(crate) fn session_response(flows: &AuthFlows, pair: TokenPair) -> Result<Response, AuthError> {
    let config = flows.config();
    let secure = config.cookie_secure();
    let max_age = config.refresh_ttl().num_seconds();
    let csrf_token = token::generate_token()?;

    let mut headers = HeaderMap::new();
    for cookie in [
        csrf::refresh_cookie(&pair.refresh_token, max_age, secure),
        csrf::csrf_cookie(&csrf_token, max_age, secure),
    ] {
        let value = HeaderValue::from_str(&cookie).context("Failed to build session cookie")?;
        headers.append(SET_COOKIE, value);
    }

    let body = TokenResponse {
        user_id: pair.user_id,
        access_token: pair.access_token,
        token_type: "Bearer".to_string(),
        expires_in: config.access_ttl().num_seconds(),
        access_expires_at: pair.access_expires_at,
        refresh_token: pair.refresh_token,
        refresh_expires_at: pair.refresh_expires_at,
    };
    Ok((StatusCode::OK, headers, Json(body)).into_response())
}

/// Cookie wins over the body so browsers never need to expose the secret.
fn refresh_secret(headers: &HeaderMap, payload: Option<Json<RefreshRequest>>) -> Option<String> {
    csrf::cookie_value(headers, REFRESH_COOKIE).or_else(|| {
        payload
            .and_then(|Json(request)| request.refresh_token)
            .filter(|secret| !secret.trim().is_empty())
    })
}

#[utoipa::path(
    post,
    path = "/auth/refresh",
    request_body(content = RefreshRequest, description = "Optional when the refresh cookie is present"),
    responses(
        (status = 200, description = "Rotated token pair", body = TokenResponse),
        (status = 401, description = "Missing, expired, revoked, or reused refresh token", body = ErrorBody),
    ),
    tag = "auth"
)]
pub async fn refresh(
    headers: HeaderMap,
    flows: Extension<Arc<AuthFlows>>,
    payload: Result<Json<RefreshRequest>, JsonRejection>,
) -> Result<Response, AuthError> {
    let secret = refresh_secret(&headers, payload.ok());
    let pair = flows
        .refresh(secret.as_deref(), &request_meta(&headers))
        .await?;
    session_response(&flows, pair)
}

#[utoipa::path(
    post,
    path = "/auth/logout",
    request_body(content = RefreshRequest, description = "Optional when the refresh cookie is present"),
    responses(
        (status = 200, description = "Session revoked and cookies cleared", body = MessageResponse),
    ),
    tag = "auth"
)]
pub async fn logout(
    headers: HeaderMap,
    flows: Extension<Arc<AuthFlows>>,
    Tenancy(context): Tenancy,
    payload: Result<Json<RefreshRequest>, JsonRejection>,
) -> Result<Response, AuthError> {
    let secret = refresh_secret(&headers, payload.ok());
    flows.logout(secret.as_deref(), &context).await?;

    // Cookies are cleared even if nothing matched.
    let secure = flows.config().cookie_secure();
    let mut response_headers = HeaderMap::new();
    for cookie in [
        csrf::clear_refresh_cookie(secure),
        csrf::clear_csrf_cookie(secure),
    ] {
        if let Ok(value) = HeaderValue::from_str(&cookie) {
            response_headers.append(SET_COOKIE, value);
        }
    }

    let body = MessageResponse {
        message: "Logged out".to_string(),
    };
    Ok((StatusCode::OK, response_headers, Json(body)).into_response())
}
