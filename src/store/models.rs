//! Persisted records.

use chrono::{DateTime, Utc};
use std::fmt;
use uuid::Uuid;

use crate::tenancy::permissions::StoreRole;

#[derive(Clone)]
pub struct User {
    pub id: Uuid,
    /// Normalized (trimmed, lowercased).
    pub email: String,
    pub password_hash: String,
    pub locked: bool,
    pub lockout_end: Option<DateTime<Utc>>,
    pub mfa_enabled: bool,
    /// Encrypted TOTP seed. Only the MFA engine reads or writes it.
    pub mfa_secret: Option<Vec<u8>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    #[must_use]
    pub fn new(email: String, password_hash: String, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            email,
            password_hash,
            locked: false,
            lockout_end: None,
            mfa_enabled: false,
            mfa_secret: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Lockout is active while `lockout_end` lies in the future.
    #[must_use]
    pub fn is_locked_out(&self, now: DateTime<Utc>) -> bool {
        self.locked && self.lockout_end.is_some_and(|end| end > now)
    }
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("locked", &self.locked)
            .field("lockout_end", &self.lockout_end)
            .field("mfa_enabled", &self.mfa_enabled)
            .finish_non_exhaustive()
    }
}

/// Short-lived bearer credential. Only the SHA-256 hash of the secret is kept.
#[derive(Clone, Debug)]
pub struct AccessToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: Vec<u8>,
    /// Refresh token this access token was minted alongside.
    pub refresh_token_id: Option<Uuid>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
}

impl AccessToken {
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at > now
    }
}

/// Long-lived, single-use credential that can be exchanged for a new pair.
#[derive(Clone, Debug)]
pub struct RefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: Vec<u8>,
    /// Token this one replaced during rotation.
    pub parent_id: Option<Uuid>,
    /// Root of the rotation chain; shared by every descendant.
    pub family_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
}

impl RefreshToken {
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at > now
    }
}

/// Append-only login ledger row.
#[derive(Clone, Debug)]
pub struct LoginAttempt {
    pub id: Uuid,
    pub email: String,
    pub success: bool,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub attempted_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct WebAuthnCredential {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Base64url credential id as presented by the authenticator.
    pub credential_id: String,
    /// Serialized passkey (public key plus verification state).
    pub public_key: Vec<u8>,
    pub sign_count: u32,
    pub credential_type: String,
    pub transports: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CeremonyKind {
    Registration,
    Assertion,
}

impl CeremonyKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Registration => "registration",
            Self::Assertion => "assertion",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "registration" => Some(Self::Registration),
            "assertion" => Some(Self::Assertion),
            _ => None,
        }
    }
}

/// Pending WebAuthn ceremony. `state` is the serialized server-side state.
#[derive(Clone, Debug)]
pub struct WebAuthnChallenge {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: CeremonyKind,
    pub state: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct StoreInvite {
    pub id: Uuid,
    pub store_id: Uuid,
    pub email: String,
    pub role: StoreRole,
    pub token_hash: Vec<u8>,
    pub expires_at: DateTime<Utc>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
}

impl StoreInvite {
    #[must_use]
    pub fn is_pending(&self, now: DateTime<Utc>) -> bool {
        self.accepted_at.is_none() && self.expires_at > now
    }
}

/// Outcome of an insert guarded by a uniqueness constraint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    Created,
    Conflict,
}
