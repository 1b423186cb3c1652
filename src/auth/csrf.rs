//! Session cookies and the double-submit CSRF guard.
//!
//! Browsers keep the refresh secret in an `HttpOnly` cookie. Because that
//! cookie rides along on cross-site requests, any mutating request that
//! carries it must also echo the readable CSRF cookie in `X-CSRF-Token`.
//! Requests authenticated purely by bearer header carry no ambient
//! credential and are not checked.

use axum::http::{HeaderMap, Method, header::AUTHORIZATION, header::COOKIE};
use subtle::ConstantTimeEq;

use super::AuthError;

pub const REFRESH_COOKIE: &str = "storegate_refresh";
pub const CSRF_COOKIE: &str = "storegate_csrf";
pub const CSRF_HEADER: &str = "x-csrf-token";

/// Paths that mint or drop the session themselves.
const EXEMPT_PATHS: [&str; 6] = [
    "/auth/register",
    "/auth/login",
    "/auth/refresh",
    "/auth/logout",
    "/auth/webauthn/login/options",
    "/auth/webauthn/login/verify",
];

#[must_use]
pub fn refresh_cookie(token: &str, max_age_seconds: i64, secure: bool) -> String {
    let mut cookie = format!(
        "{REFRESH_COOKIE}={token}; Path=/; HttpOnly; SameSite=Strict; Max-Age={max_age_seconds}"
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Readable by page scripts so they can copy it into the header.
#[must_use]
pub fn csrf_cookie(token: &str, max_age_seconds: i64, secure: bool) -> String {
    let mut cookie =
        format!("{CSRF_COOKIE}={token}; Path=/; SameSite=Strict; Max-Age={max_age_seconds}");
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

#[must_use]
pub fn clear_refresh_cookie(secure: bool) -> String {
    refresh_cookie("", 0, secure)
}

#[must_use]
pub fn clear_csrf_cookie(secure: bool) -> String {
    csrf_cookie("", 0, secure)
}

/// Value of cookie `name` across every `Cookie` header.
#[must_use]
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[must_use]
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))?
        .trim();
    (!token.is_empty()).then(|| token.to_string())
}

fn is_mutating(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

/// # Errors
/// `Forbidden` when a cookie-carrying mutating request lacks a matching token.
pub fn check(method: &Method, path: &str, headers: &HeaderMap) -> Result<(), AuthError> {
    if !is_mutating(method) || EXEMPT_PATHS.contains(&path) {
        return Ok(());
    }
    if cookie_value(headers, REFRESH_COOKIE).is_none() {
        return Ok(());
    }

    let cookie = cookie_value(headers, CSRF_COOKIE).unwrap_or_default();
    let header = headers
        .get(CSRF_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if cookie.is_empty() || header.is_empty() {
        return Err(AuthError::Forbidden);
    }
    if bool::from(cookie.as_bytes().ct_eq(header.as_bytes())) {
        Ok(())
    } else {
        Err(AuthError::Forbidden)
    }
}
