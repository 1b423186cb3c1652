//! In-process store used for local development and tests.
//!
//! A single mutex guards every table so each trait method is atomic.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    AccessToken, CredentialStore, InsertOutcome, LoginAttempt, RefreshToken, StoreInvite, User,
    WebAuthnChallenge, WebAuthnCredential,
};
use crate::tenancy::permissions::{PlatformRole, StoreRole};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    access_tokens: HashMap<Uuid, AccessToken>,
    refresh_tokens: HashMap<Uuid, RefreshToken>,
    login_attempts: Vec<LoginAttempt>,
    credentials: HashMap<Uuid, WebAuthnCredential>,
    challenges: HashMap<Uuid, WebAuthnChallenge>,
    store_roles: HashMap<(Uuid, Uuid), StoreRole>,
    store_grants: HashMap<(Uuid, Uuid), Vec<String>>,
    platform_roles: HashMap<Uuid, HashSet<PlatformRole>>,
    invites: HashMap<Uuid, StoreInvite>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn insert_user(&self, user: &User) -> Result<InsertOutcome> {
        let mut tables = self.tables.lock().await;
        if tables.users.values().any(|u| u.email == user.email) {
            return Ok(InsertOutcome::Conflict);
        }
        tables.users.insert(user.id, user.clone());
        Ok(InsertOutcome::Created)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let tables = self.tables.lock().await;
        Ok(tables.users.values().find(|u| u.email == email).cloned())
    }

    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>> {
        Ok(self.tables.lock().await.users.get(&user_id).cloned())
    }

    async fn set_lockout(
        &self,
        user_id: Uuid,
        locked: bool,
        lockout_end: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if let Some(user) = self.tables.lock().await.users.get_mut(&user_id) {
            user.locked = locked;
            user.lockout_end = lockout_end;
            user.updated_at = now;
        }
        Ok(())
    }

    async fn set_mfa(
        &self,
        user_id: Uuid,
        enabled: bool,
        secret: Option<Vec<u8>>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if let Some(user) = self.tables.lock().await.users.get_mut(&user_id) {
            user.mfa_enabled = enabled;
            user.mfa_secret = secret;
            user.updated_at = now;
        }
        Ok(())
    }

    async fn insert_access_token(&self, token: &AccessToken) -> Result<()> {
        self.tables
            .lock()
            .await
            .access_tokens
            .insert(token.id, token.clone());
        Ok(())
    }

    async fn insert_refresh_token(&self, token: &RefreshToken) -> Result<()> {
        self.tables
            .lock()
            .await
            .refresh_tokens
            .insert(token.id, token.clone());
        Ok(())
    }

    async fn find_access_token(&self, token_hash: &[u8]) -> Result<Option<AccessToken>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .access_tokens
            .values()
            .find(|t| t.token_hash == token_hash)
            .cloned())
    }

    async fn find_refresh_token(&self, token_hash: &[u8]) -> Result<Option<RefreshToken>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .refresh_tokens
            .values()
            .find(|t| t.token_hash == token_hash)
            .cloned())
    }

    async fn revoke_refresh_if_active(&self, token_id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        match tables.refresh_tokens.get_mut(&token_id) {
            Some(token) if token.revoked_at.is_none() => {
                token.revoked_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_token_family(&self, family_id: Uuid, now: DateTime<Utc>) -> Result<u64> {
        let mut tables = self.tables.lock().await;
        let mut touched = 0;
        let mut members = HashSet::new();
        for token in tables
            .refresh_tokens
            .values_mut()
            .filter(|t| t.family_id == family_id)
        {
            members.insert(token.id);
            if token.revoked_at.is_none() {
                token.revoked_at = Some(now);
                touched += 1;
            }
        }
        for token in tables.access_tokens.values_mut() {
            let in_family = token
                .refresh_token_id
                .is_some_and(|id| members.contains(&id));
            if in_family && token.revoked_at.is_none() {
                token.revoked_at = Some(now);
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn revoke_access_token(&self, token_id: Uuid, now: DateTime<Utc>) -> Result<()> {
        if let Some(token) = self.tables.lock().await.access_tokens.get_mut(&token_id) {
            token.revoked_at.get_or_insert(now);
        }
        Ok(())
    }

    async fn record_login_attempt(&self, attempt: &LoginAttempt) -> Result<()> {
        self.tables
            .lock()
            .await
            .login_attempts
            .push(attempt.clone());
        Ok(())
    }

    async fn count_failed_attempts_since(&self, email: &str, since: DateTime<Utc>) -> Result<u64> {
        let tables = self.tables.lock().await;
        let count = tables
            .login_attempts
            .iter()
            .filter(|a| a.email == email && !a.success && a.attempted_at > since)
            .count();
        Ok(u64::try_from(count)?)
    }

    async fn last_successful_attempt(&self, email: &str) -> Result<Option<DateTime<Utc>>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .login_attempts
            .iter()
            .filter(|a| a.email == email && a.success)
            .map(|a| a.attempted_at)
            .max())
    }

    async fn insert_webauthn_credential(
        &self,
        credential: &WebAuthnCredential,
    ) -> Result<InsertOutcome> {
        let mut tables = self.tables.lock().await;
        if tables
            .credentials
            .values()
            .any(|c| c.credential_id == credential.credential_id)
        {
            return Ok(InsertOutcome::Conflict);
        }
        tables.credentials.insert(credential.id, credential.clone());
        Ok(InsertOutcome::Created)
    }

    async fn find_webauthn_credential(
        &self,
        credential_id: &str,
    ) -> Result<Option<WebAuthnCredential>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .credentials
            .values()
            .find(|c| c.credential_id == credential_id)
            .cloned())
    }

    async fn list_webauthn_credentials(&self, user_id: Uuid) -> Result<Vec<WebAuthnCredential>> {
        let tables = self.tables.lock().await;
        let mut credentials: Vec<_> = tables
            .credentials
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        credentials.sort_by_key(|c| c.created_at);
        Ok(credentials)
    }

    async fn update_webauthn_counter(
        &self,
        id: Uuid,
        expected: u32,
        sign_count: u32,
        public_key: &[u8],
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        match tables.credentials.get_mut(&id) {
            Some(credential) if credential.sign_count == expected => {
                credential.sign_count = sign_count;
                credential.public_key = public_key.to_vec();
                credential.last_used_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn put_webauthn_challenge(&self, challenge: &WebAuthnChallenge) -> Result<()> {
        self.tables
            .lock()
            .await
            .challenges
            .insert(challenge.id, challenge.clone());
        Ok(())
    }

    async fn take_webauthn_challenge(&self, id: Uuid) -> Result<Option<WebAuthnChallenge>> {
        Ok(self.tables.lock().await.challenges.remove(&id))
    }

    async fn find_store_role(&self, store_id: Uuid, user_id: Uuid) -> Result<Option<StoreRole>> {
        let tables = self.tables.lock().await;
        Ok(tables.store_roles.get(&(store_id, user_id)).copied())
    }

    async fn upsert_store_role(
        &self,
        store_id: Uuid,
        user_id: Uuid,
        role: StoreRole,
    ) -> Result<()> {
        self.tables
            .lock()
            .await
            .store_roles
            .insert((store_id, user_id), role);
        Ok(())
    }

    async fn list_store_grants(&self, store_id: Uuid, user_id: Uuid) -> Result<Vec<String>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .store_grants
            .get(&(store_id, user_id))
            .cloned()
            .unwrap_or_default())
    }

    async fn grant_store_permission(
        &self,
        store_id: Uuid,
        user_id: Uuid,
        permission: &str,
    ) -> Result<()> {
        let mut tables = self.tables.lock().await;
        let grants = tables.store_grants.entry((store_id, user_id)).or_default();
        if !grants.iter().any(|g| g == permission) {
            grants.push(permission.to_string());
        }
        Ok(())
    }

    async fn list_platform_roles(&self, user_id: Uuid) -> Result<Vec<PlatformRole>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .platform_roles
            .get(&user_id)
            .map(|roles| roles.iter().copied().collect())
            .unwrap_or_default())
    }

    async fn grant_platform_role(&self, user_id: Uuid, role: PlatformRole) -> Result<()> {
        self.tables
            .lock()
            .await
            .platform_roles
            .entry(user_id)
            .or_default()
            .insert(role);
        Ok(())
    }

    async fn insert_store_invite(&self, invite: &StoreInvite) -> Result<()> {
        self.tables
            .lock()
            .await
            .invites
            .insert(invite.id, invite.clone());
        Ok(())
    }

    async fn find_store_invite(&self, token_hash: &[u8]) -> Result<Option<StoreInvite>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .invites
            .values()
            .find(|i| i.token_hash == token_hash)
            .cloned())
    }

    async fn accept_store_invite(&self, invite_id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        match tables.invites.get_mut(&invite_id) {
            Some(invite) if invite.is_pending(now) => {
                invite.accepted_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
