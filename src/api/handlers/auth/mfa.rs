//! TOTP enrollment for the signed-in user.

use axum::{
    Json,
    extract::{Extension, rejection::JsonRejection},
};
use std::sync::Arc;

use super::types::{MessageResponse, MfaEnrollResponse, MfaVerifyRequest};
use crate::{
    api::handlers::{Tenancy, payload},
    auth::{AuthError, AuthFlows, ErrorBody},
};

#[utoipa::path(
    post,
    path = "/auth/mfa/enroll",
    responses(
        (status = 200, description = "Pending TOTP secret and provisioning URI", body = MfaEnrollResponse),
        (status = 401, description = "Authentication required", body = ErrorBody),
        (status = 409, description = "MFA already enabled", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn enroll(
    flows: Extension<Arc<AuthFlows>>,
    Tenancy(context): Tenancy,
) -> Result<Json<MfaEnrollResponse>, AuthError> {
    let enrollment = flows.mfa_enroll(&context).await?;
    Ok(Json(MfaEnrollResponse {
        secret: enrollment.secret_base32,
        provisioning_uri: enrollment.provisioning_uri,
    }))
}

#[utoipa::path(
    post,
    path = "/auth/mfa/verify",
    request_body = MfaVerifyRequest,
    responses(
        (status = 200, description = "MFA enabled", body = MessageResponse),
        (status = 400, description = "Invalid code or no pending enrollment", body = ErrorBody),
        (status = 401, description = "Authentication required", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn verify(
    flows: Extension<Arc<AuthFlows>>,
    Tenancy(context): Tenancy,
    request: Result<Json<MfaVerifyRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, AuthError> {
    let request = payload(request)?;
    flows.mfa_verify(&context, &request.code).await?;
    Ok(Json(MessageResponse {
        message: "MFA enabled".to_string(),
    }))
}
