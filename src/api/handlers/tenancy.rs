//! Per-request tenancy extraction.
//!
//! Resolves the bearer token and the `X-Store-Id` header into a
//! [`TenancyContext`]. Anonymous requests get an anonymous context; handlers
//! decide whether that is acceptable.

use anyhow::anyhow;
use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, request::Parts},
};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    auth::{AuthError, AuthFlows, csrf::bearer_token},
    tenancy::TenancyContext,
};

pub const STORE_HEADER: &str = "x-store-id";

/// Extractor yielding the resolved context for the current request.
///
/// ```rust,ignore
/// async fn handler(Tenancy(context): Tenancy) -> impl IntoResponse { ... }
/// ```
pub struct Tenancy(pub TenancyContext);

/// Malformed values mean "no active store".
#[must_use]
pub fn store_id(headers: &HeaderMap) -> Option<Uuid> {
    headers
        .get(STORE_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| Uuid::parse_str(value.trim()).ok())
}

impl<S> FromRequestParts<S> for Tenancy
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let flows = parts
            .extensions
            .get::<Arc<AuthFlows>>()
            .cloned()
            .ok_or_else(|| AuthError::Internal(anyhow!("auth state missing from extensions")))?;

        let bearer = bearer_token(&parts.headers);
        let context = flows
            .resolve(bearer.as_deref(), store_id(&parts.headers))
            .await?;
        Ok(Self(context))
    }
}
