//! Input normalization and request metadata helpers.

use axum::http::HeaderMap;
use once_cell::sync::Lazy;
use regex::Regex;

static EMAIL_FORMAT: Lazy<Result<Regex, regex::Error>> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$"));

/// Lookup/uniqueness key for an email address.
pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic format check on already-normalized input.
pub(crate) fn valid_email(email_normalized: &str) -> bool {
    EMAIL_FORMAT
        .as_ref()
        .is_ok_and(|regex| regex.is_match(email_normalized))
}

/// First hop of `X-Forwarded-For`, else `X-Real-IP`.
pub(crate) fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if let Some(ip) = forwarded {
        return Some(ip.to_string());
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
