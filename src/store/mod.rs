//! Persistence boundary for credentials, ledgers, and tenancy grants.
//!
//! Conditional operations (`revoke_refresh_if_active`,
//! `update_webauthn_counter`, `take_webauthn_challenge`, `accept_store_invite`)
//! are atomic in every implementation; concurrent callers see exactly one
//! winner.

pub mod memory;
pub mod models;
pub mod postgres;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::tenancy::permissions::{PlatformRole, StoreRole};

pub use memory::MemoryStore;
pub use models::{
    AccessToken, CeremonyKind, InsertOutcome, LoginAttempt, RefreshToken, StoreInvite, User,
    WebAuthnChallenge, WebAuthnCredential,
};
pub use postgres::PgStore;

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Backend name reported by `/health`.
    fn backend(&self) -> &'static str;

    /// Cheap liveness check.
    async fn ping(&self) -> Result<()>;

    // Users

    /// Returns `Conflict` when the normalized email is already registered.
    async fn insert_user(&self, user: &User) -> Result<InsertOutcome>;
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>>;
    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>>;
    async fn set_lockout(
        &self,
        user_id: Uuid,
        locked: bool,
        lockout_end: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<()>;
    async fn set_mfa(
        &self,
        user_id: Uuid,
        enabled: bool,
        secret: Option<Vec<u8>>,
        now: DateTime<Utc>,
    ) -> Result<()>;

    // Tokens

    async fn insert_access_token(&self, token: &AccessToken) -> Result<()>;
    async fn insert_refresh_token(&self, token: &RefreshToken) -> Result<()>;
    async fn find_access_token(&self, token_hash: &[u8]) -> Result<Option<AccessToken>>;
    async fn find_refresh_token(&self, token_hash: &[u8]) -> Result<Option<RefreshToken>>;
    /// Marks the token revoked only if it is not revoked yet. Returns whether
    /// this call performed the revocation.
    async fn revoke_refresh_if_active(&self, token_id: Uuid, now: DateTime<Utc>) -> Result<bool>;
    /// Revokes every refresh token in the family and every access token minted
    /// alongside one of them. Returns the number of rows touched.
    async fn revoke_token_family(&self, family_id: Uuid, now: DateTime<Utc>) -> Result<u64>;
    async fn revoke_access_token(&self, token_id: Uuid, now: DateTime<Utc>) -> Result<()>;

    // Login ledger

    async fn record_login_attempt(&self, attempt: &LoginAttempt) -> Result<()>;
    async fn count_failed_attempts_since(&self, email: &str, since: DateTime<Utc>) -> Result<u64>;
    async fn last_successful_attempt(&self, email: &str) -> Result<Option<DateTime<Utc>>>;

    // WebAuthn

    /// Returns `Conflict` when the credential id is already registered.
    async fn insert_webauthn_credential(&self, credential: &WebAuthnCredential)
    -> Result<InsertOutcome>;
    async fn find_webauthn_credential(
        &self,
        credential_id: &str,
    ) -> Result<Option<WebAuthnCredential>>;
    async fn list_webauthn_credentials(&self, user_id: Uuid) -> Result<Vec<WebAuthnCredential>>;
    /// Compare-and-set on the signature counter. Returns `false` when the
    /// stored counter no longer equals `expected`.
    async fn update_webauthn_counter(
        &self,
        id: Uuid,
        expected: u32,
        sign_count: u32,
        public_key: &[u8],
        now: DateTime<Utc>,
    ) -> Result<bool>;
    async fn put_webauthn_challenge(&self, challenge: &WebAuthnChallenge) -> Result<()>;
    /// Removes and returns the challenge. A second take yields `None`.
    async fn take_webauthn_challenge(&self, id: Uuid) -> Result<Option<WebAuthnChallenge>>;

    // Tenancy

    async fn find_store_role(&self, store_id: Uuid, user_id: Uuid) -> Result<Option<StoreRole>>;
    async fn upsert_store_role(&self, store_id: Uuid, user_id: Uuid, role: StoreRole)
    -> Result<()>;
    /// Raw grant codes; unknown codes are filtered by the resolver.
    async fn list_store_grants(&self, store_id: Uuid, user_id: Uuid) -> Result<Vec<String>>;
    async fn grant_store_permission(
        &self,
        store_id: Uuid,
        user_id: Uuid,
        permission: &str,
    ) -> Result<()>;
    async fn list_platform_roles(&self, user_id: Uuid) -> Result<Vec<PlatformRole>>;
    async fn grant_platform_role(&self, user_id: Uuid, role: PlatformRole) -> Result<()>;

    // Invites

    async fn insert_store_invite(&self, invite: &StoreInvite) -> Result<()>;
    async fn find_store_invite(&self, token_hash: &[u8]) -> Result<Option<StoreInvite>>;
    /// Sets `accepted_at` only if the invite is still pending.
    async fn accept_store_invite(&self, invite_id: Uuid, now: DateTime<Utc>) -> Result<bool>;
}
