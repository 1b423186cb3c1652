//! Request/response types for auth endpoints.
//!
//! WebAuthn option and credential payloads are passed through as raw JSON in
//! the shape the browser API produces, so the schema only names them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::tenancy::StoreRole;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub captcha_token: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    pub captcha_token: String,
    #[serde(default)]
    pub mfa_code: Option<String>,
}

/// Browsers send the refresh secret as a cookie; other clients may put it here.
#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
pub struct RefreshRequest {
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct TokenResponse {
    pub user_id: Uuid,
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_token: String,
    pub refresh_expires_at: DateTime<Utc>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MeResponse {
    pub user_id: Uuid,
    pub email: String,
    pub mfa_enabled: bool,
    pub store_id: Option<Uuid>,
    pub store_role: Option<StoreRole>,
    pub permissions: Vec<String>,
    pub platform_owner: bool,
    pub platform_staff: bool,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MfaEnrollResponse {
    pub secret: String,
    pub provisioning_uri: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MfaVerifyRequest {
    pub code: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct WebAuthnOptionsResponse {
    pub challenge_id: Uuid,
    #[schema(value_type = Object)]
    pub options: serde_json::Value,
}

/// Optional body; the account email is shown when `display_name` is absent.
#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
pub struct WebAuthnRegisterOptionsRequest {
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct WebAuthnRegisterVerifyRequest {
    pub challenge_id: Uuid,
    #[schema(value_type = Object)]
    pub credential: serde_json::Value,
    #[serde(default)]
    pub transports: Vec<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct WebAuthnRegisterVerifyResponse {
    pub credential_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct WebAuthnLoginOptionsRequest {
    pub email: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct WebAuthnLoginVerifyRequest {
    pub challenge_id: Uuid,
    #[schema(value_type = Object)]
    pub credential: serde_json::Value,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct AcceptInviteRequest {
    pub token: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct AcceptInviteResponse {
    pub store_id: Uuid,
    pub role: StoreRole,
}
