//! Store staff invitations.
//!
//! Creating an invitation needs `staff.manage` on the store named in the path,
//! which must also be the active store (`X-Store-Id`). The secret is returned
//! once; only its hash is kept.

use axum::{
    Json,
    extract::{Extension, Path, rejection::JsonRejection},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

use super::{
    Tenancy,
    auth::types::{AcceptInviteRequest, AcceptInviteResponse},
    payload,
};
use crate::{
    auth::{AuthError, AuthFlows, ErrorBody},
    tenancy::StoreRole,
};

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct CreateInviteRequest {
    pub email: String,
    pub role: StoreRole,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct InviteResponse {
    pub invite_id: Uuid,
    pub store_id: Uuid,
    pub email: String,
    pub role: StoreRole,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[utoipa::path(
    post,
    path = "/stores/{store_id}/invites",
    params(
        ("store_id" = Uuid, Path, description = "Store to invite into"),
        ("X-Store-Id" = String, Header, description = "Active store id; must match the path"),
    ),
    request_body = CreateInviteRequest,
    responses(
        (status = 200, description = "Invitation created; the token is shown once", body = InviteResponse),
        (status = 400, description = "Invalid email or role", body = ErrorBody),
        (status = 401, description = "Authentication required", body = ErrorBody),
        (status = 403, description = "Missing staff.manage on this store", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "stores"
)]
pub async fn create(
    flows: Extension<Arc<AuthFlows>>,
    Path(store_id): Path<Uuid>,
    Tenancy(context): Tenancy,
    request: Result<Json<CreateInviteRequest>, JsonRejection>,
) -> Result<Json<InviteResponse>, AuthError> {
    let request = payload(request)?;
    let grant = flows
        .create_invite(&context, store_id, &request.email, request.role)
        .await?;
    Ok(Json(InviteResponse {
        invite_id: grant.invite_id,
        store_id: grant.store_id,
        email: grant.email,
        role: grant.role,
        token: grant.token,
        expires_at: grant.expires_at,
    }))
}

#[utoipa::path(
    post,
    path = "/auth/invites/accept",
    request_body = AcceptInviteRequest,
    responses(
        (status = 200, description = "Store role granted", body = AcceptInviteResponse),
        (status = 400, description = "Unknown, expired, used, or mismatched invitation", body = ErrorBody),
        (status = 401, description = "Authentication required", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn accept(
    flows: Extension<Arc<AuthFlows>>,
    Tenancy(context): Tenancy,
    request: Result<Json<AcceptInviteRequest>, JsonRejection>,
) -> Result<Json<AcceptInviteResponse>, AuthError> {
    let request = payload(request)?;
    let (store_id, role) = flows.accept_invite(&context, &request.token).await?;
    Ok(Json(AcceptInviteResponse { store_id, role }))
}
