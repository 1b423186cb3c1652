//! Error taxonomy for authentication and authorization flows.
//!
//! Every variant carries a stable `reason` code that clients can switch on.
//! Messages never narrow down *why* a credential was rejected.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::error;
use utoipa::ToSchema;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("Captcha verification failed")]
    CaptchaInvalid,
    #[error("MFA code required")]
    MfaRequired,
    #[error("Invalid MFA code")]
    InvalidMfaCode,
    #[error("WebAuthn verification failed")]
    WebAuthnFailed,
    #[error("Invalid invitation")]
    InviteInvalid,
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Invalid or expired token")]
    InvalidToken,
    #[error("Authentication required")]
    Unauthenticated,
    #[error("Forbidden")]
    Forbidden,
    #[error("Email already registered")]
    EmailTaken,
    #[error("MFA already enabled")]
    MfaAlreadyEnabled,
    #[error("Account locked")]
    AccountLocked,
    #[error("Internal error")]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    /// Machine-readable reason code returned in the response body.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::CaptchaInvalid => "captcha_invalid",
            Self::MfaRequired => "mfa_required",
            Self::InvalidMfaCode => "invalid_mfa_code",
            Self::WebAuthnFailed => "webauthn_failed",
            Self::InviteInvalid => "invite_invalid",
            Self::InvalidCredentials => "invalid_credentials",
            Self::InvalidToken => "invalid_token",
            Self::Unauthenticated => "unauthenticated",
            Self::Forbidden => "forbidden",
            Self::EmailTaken => "email_taken",
            Self::MfaAlreadyEnabled => "mfa_already_enabled",
            Self::AccountLocked => "account_locked",
            Self::Internal(_) => "internal",
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_)
            | Self::CaptchaInvalid
            | Self::MfaRequired
            | Self::InvalidMfaCode
            | Self::WebAuthnFailed
            | Self::InviteInvalid => StatusCode::BAD_REQUEST,
            Self::InvalidCredentials | Self::InvalidToken | Self::Unauthenticated => {
                StatusCode::UNAUTHORIZED
            }
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::EmailTaken | Self::MfaAlreadyEnabled => StatusCode::CONFLICT,
            Self::AccountLocked => StatusCode::LOCKED,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        if let Self::Internal(err) = &self {
            error!("Internal error: {err:#}");
        }
        let body = ErrorBody {
            error: self.reason().to_string(),
            message: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}
