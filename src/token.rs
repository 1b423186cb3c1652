//! Opaque access/refresh tokens.
//!
//! Clients hold 256-bit random secrets; the store only ever sees their
//! SHA-256 digest. Refresh tokens form rotation chains rooted at a family id.
//! Presenting a refresh secret that was already rotated away revokes the
//! whole family, since only a stolen copy could still be in circulation.

use anyhow::{Context, Result};
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use rand::{RngCore, rngs::OsRng};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    auth::{AuthError, RequestMeta},
    clock::Clock,
    store::{AccessToken, CredentialStore, RefreshToken},
};

/// Fresh 32-byte secret, base64url without padding.
///
/// # Errors
/// Returns an error if the OS RNG fails.
pub fn generate_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate token")?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

/// Digest used as the lookup key. A fast hash is enough for 256-bit secrets.
#[must_use]
pub fn hash_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

/// Raw secrets returned to the caller exactly once.
#[derive(Clone, Debug)]
pub struct TokenPair {
    pub user_id: Uuid,
    pub access_token: String,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_token: String,
    pub refresh_expires_at: DateTime<Utc>,
}

/// Where a new refresh token sits in its family.
#[derive(Clone, Copy, Debug)]
pub enum TokenScope {
    /// Fresh authentication; starts a new family.
    Login,
    /// Replaces `parent_id` inside `family_id`.
    Rotation { parent_id: Uuid, family_id: Uuid },
}

#[derive(Clone)]
pub struct TokenService {
    store: Arc<dyn CredentialStore>,
    clock: Arc<dyn Clock>,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenService {
    #[must_use]
    pub fn new(
        store: Arc<dyn CredentialStore>,
        clock: Arc<dyn Clock>,
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            access_ttl,
            refresh_ttl,
        }
    }

    /// Mint an access/refresh pair for `user_id`.
    ///
    /// # Errors
    /// Returns an error if secret generation or persistence fails.
    pub async fn issue(
        &self,
        user_id: Uuid,
        scope: TokenScope,
        meta: &RequestMeta,
    ) -> Result<TokenPair> {
        let now = self.clock.now();
        let refresh_secret = generate_token()?;
        let access_secret = generate_token()?;

        let refresh_id = Uuid::new_v4();
        let (parent_id, family_id) = match scope {
            TokenScope::Login => (None, refresh_id),
            TokenScope::Rotation {
                parent_id,
                family_id,
            } => (Some(parent_id), family_id),
        };

        let refresh = RefreshToken {
            id: refresh_id,
            user_id,
            token_hash: hash_token(&refresh_secret),
            parent_id,
            family_id,
            expires_at: now
                .checked_add_signed(self.refresh_ttl)
                .context("Refresh token expiry out of range")?,
            created_at: now,
            revoked_at: None,
            client_ip: meta.client_ip.clone(),
            user_agent: meta.user_agent.clone(),
        };
        self.store.insert_refresh_token(&refresh).await?;

        let access = AccessToken {
            id: Uuid::new_v4(),
            user_id,
            token_hash: hash_token(&access_secret),
            refresh_token_id: Some(refresh.id),
            expires_at: now
                .checked_add_signed(self.access_ttl)
                .context("Access token expiry out of range")?,
            created_at: now,
            revoked_at: None,
            client_ip: meta.client_ip.clone(),
            user_agent: meta.user_agent.clone(),
        };
        self.store.insert_access_token(&access).await?;

        debug!(%user_id, %family_id, "Issued token pair");
        Ok(TokenPair {
            user_id,
            access_token: access_secret,
            access_expires_at: access.expires_at,
            refresh_token: refresh_secret,
            refresh_expires_at: refresh.expires_at,
        })
    }

    /// Resolve a bearer secret to its token. Unknown, expired, and revoked
    /// tokens are indistinguishable to the caller.
    ///
    /// # Errors
    /// Returns an error if the store lookup fails.
    pub async fn authenticate(&self, access_secret: &str) -> Result<Option<AccessToken>> {
        let token = self
            .store
            .find_access_token(&hash_token(access_secret))
            .await?;
        let now = self.clock.now();
        Ok(token.filter(|token| token.is_active(now)))
    }

    /// Exchange a refresh secret for a new pair, consuming the old one.
    ///
    /// # Errors
    /// `InvalidToken` for any unusable secret; reuse of a consumed secret also
    /// revokes its family.
    pub async fn rotate(
        &self,
        refresh_secret: &str,
        meta: &RequestMeta,
    ) -> Result<TokenPair, AuthError> {
        let Some(current) = self
            .store
            .find_refresh_token(&hash_token(refresh_secret))
            .await?
        else {
            return Err(AuthError::InvalidToken);
        };

        let now = self.clock.now();
        if current.revoked_at.is_some() {
            self.revoke_family_on_reuse(&current).await?;
            return Err(AuthError::InvalidToken);
        }
        if current.expires_at <= now {
            return Err(AuthError::InvalidToken);
        }

        // Exactly one concurrent caller wins this update.
        if !self.store.revoke_refresh_if_active(current.id, now).await? {
            self.revoke_family_on_reuse(&current).await?;
            return Err(AuthError::InvalidToken);
        }

        let pair = self
            .issue(
                current.user_id,
                TokenScope::Rotation {
                    parent_id: current.id,
                    family_id: current.family_id,
                },
                meta,
            )
            .await?;
        Ok(pair)
    }

    /// Revoke the family of the presented refresh secret. Unknown secrets are
    /// ignored.
    ///
    /// # Errors
    /// Returns an error if the store update fails.
    pub async fn revoke_family(&self, refresh_secret: &str) -> Result<()> {
        let token = self
            .store
            .find_refresh_token(&hash_token(refresh_secret))
            .await?;
        if let Some(token) = token {
            let revoked = self
                .store
                .revoke_token_family(token.family_id, self.clock.now())
                .await?;
            debug!(
                user_id = %token.user_id,
                family_id = %token.family_id,
                revoked,
                "Revoked token family"
            );
        }
        Ok(())
    }

    /// Revoke a single access token (logout presented with a bearer only).
    ///
    /// # Errors
    /// Returns an error if the store update fails.
    pub async fn revoke_access(&self, token_id: Uuid) -> Result<()> {
        self.store
            .revoke_access_token(token_id, self.clock.now())
            .await
    }

    async fn revoke_family_on_reuse(&self, token: &RefreshToken) -> Result<()> {
        let revoked = self
            .store
            .revoke_token_family(token.family_id, self.clock.now())
            .await?;
        warn!(
            user_id = %token.user_id,
            family_id = %token.family_id,
            revoked,
            "Refresh token reuse detected; family revoked"
        );
        Ok(())
    }
}
