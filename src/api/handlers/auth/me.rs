use axum::{Json, extract::Extension};
use std::sync::Arc;

use super::types::MeResponse;
use crate::{
    api::handlers::Tenancy,
    auth::{AuthError, AuthFlows, ErrorBody, require_principal},
};

#[utoipa::path(
    get,
    path = "/auth/me",
    params(
        ("X-Store-Id" = Option<String>, Header, description = "Active store id"),
    ),
    responses(
        (status = 200, description = "Caller identity and resolved tenancy", body = MeResponse),
        (status = 401, description = "Authentication required", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn me(
    flows: Extension<Arc<AuthFlows>>,
    Tenancy(context): Tenancy,
) -> Result<Json<MeResponse>, AuthError> {
    let principal = require_principal(&context)?;
    let user = flows
        .store()
        .find_user_by_id(principal.user_id)
        .await?
        .ok_or(AuthError::Unauthenticated)?;

    // BTreeSet iteration is already sorted.
    let permissions = context
        .permissions
        .iter()
        .map(|permission| permission.as_str().to_string())
        .collect();

    Ok(Json(MeResponse {
        user_id: user.id,
        email: user.email,
        mfa_enabled: user.mfa_enabled,
        store_id: context.store_id,
        store_role: context.store_role,
        permissions,
        platform_owner: context.platform_owner,
        platform_staff: context.platform_staff,
    }))
}
