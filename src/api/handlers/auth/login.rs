//! Password registration and login.

use axum::{
    Json,
    extract::{Extension, rejection::JsonRejection},
    http::HeaderMap,
    response::Response,
};
use std::sync::Arc;
use tracing::instrument;

use super::{
    session::session_response,
    types::{LoginRequest, RegisterRequest, TokenResponse},
};
use crate::{
    api::handlers::{payload, request_meta},
    auth::{AuthError, AuthFlows, ErrorBody, LoginInput, RegisterInput},
};

#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 200, description = "Account created and signed in", body = TokenResponse),
        (status = 400, description = "Invalid input or captcha", body = ErrorBody),
        (status = 409, description = "Email already registered", body = ErrorBody),
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn register(
    headers: HeaderMap,
    flows: Extension<Arc<AuthFlows>>,
    request: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Response, AuthError> {
    let request = payload(request)?;
    let input = RegisterInput {
        email: request.email,
        password: request.password,
        captcha_token: request.captcha_token,
    };
    let pair = flows.register(input, &request_meta(&headers)).await?;
    session_response(&flows, pair)
}

#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Signed in", body = TokenResponse),
        (status = 400, description = "Invalid input, captcha, or MFA code; or MFA code required", body = ErrorBody),
        (status = 401, description = "Invalid credentials", body = ErrorBody),
        (status = 423, description = "Account temporarily locked", body = ErrorBody),
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn login(
    headers: HeaderMap,
    flows: Extension<Arc<AuthFlows>>,
    request: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Response, AuthError> {
    let request = payload(request)?;
    let input = LoginInput {
        email: request.email,
        password: request.password,
        captcha_token: request.captcha_token,
        mfa_code: request.mfa_code,
    };
    let pair = flows.login(input, &request_meta(&headers)).await?;
    session_response(&flows, pair)
}
