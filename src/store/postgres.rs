//! PostgreSQL-backed store.
//!
//! Role enums are encoded as `SMALLINT` here and nowhere else.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Connection, PgPool, Row, postgres::PgPoolOptions, postgres::PgRow};
use tracing::{Instrument, Span};
use uuid::Uuid;

use super::{
    AccessToken, CeremonyKind, CredentialStore, InsertOutcome, LoginAttempt, RefreshToken,
    StoreInvite, User, WebAuthnChallenge, WebAuthnCredential,
};
use crate::tenancy::permissions::{PlatformRole, StoreRole};

const SCHEMA: &str = include_str!("../../sql/schema.sql");

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect and make sure the schema exists.
    ///
    /// # Errors
    /// Returns an error if the connection or schema bootstrap fails.
    pub async fn connect(dsn: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(5)
            .connect(dsn)
            .await
            .context("Failed to connect to database")?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Applies `sql/schema.sql`. Every statement is idempotent.
    ///
    /// # Errors
    /// Returns an error if any statement fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .instrument(db_span("MIGRATE", "sql/schema.sql"))
            .await
            .context("Failed to apply schema")?;
        Ok(())
    }
}

fn db_span(operation: &'static str, statement: &'static str) -> Span {
    tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

pub(crate) const fn store_role_code(role: StoreRole) -> i16 {
    match role {
        StoreRole::Owner => 0,
        StoreRole::Admin => 1,
        StoreRole::Staff => 2,
        StoreRole::Custom => 3,
    }
}

pub(crate) fn store_role_from_code(code: i16) -> Result<StoreRole> {
    match code {
        0 => Ok(StoreRole::Owner),
        1 => Ok(StoreRole::Admin),
        2 => Ok(StoreRole::Staff),
        3 => Ok(StoreRole::Custom),
        other => Err(anyhow!("unknown store role code {other}")),
    }
}

pub(crate) const fn platform_role_code(role: PlatformRole) -> i16 {
    match role {
        PlatformRole::Owner => 0,
        PlatformRole::Staff => 1,
    }
}

pub(crate) fn platform_role_from_code(code: i16) -> Result<PlatformRole> {
    match code {
        0 => Ok(PlatformRole::Owner),
        1 => Ok(PlatformRole::Staff),
        other => Err(anyhow!("unknown platform role code {other}")),
    }
}

fn user_from_row(row: &PgRow) -> Result<User, sqlx::Error> {
    Ok(User {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        locked: row.try_get("locked")?,
        lockout_end: row.try_get("lockout_end")?,
        mfa_enabled: row.try_get("mfa_enabled")?,
        mfa_secret: row.try_get("mfa_secret")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn access_from_row(row: &PgRow) -> Result<AccessToken, sqlx::Error> {
    Ok(AccessToken {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        token_hash: row.try_get("token_hash")?,
        refresh_token_id: row.try_get("refresh_token_id")?,
        expires_at: row.try_get("expires_at")?,
        created_at: row.try_get("created_at")?,
        revoked_at: row.try_get("revoked_at")?,
        client_ip: row.try_get("client_ip")?,
        user_agent: row.try_get("user_agent")?,
    })
}

fn refresh_from_row(row: &PgRow) -> Result<RefreshToken, sqlx::Error> {
    Ok(RefreshToken {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        token_hash: row.try_get("token_hash")?,
        parent_id: row.try_get("parent_id")?,
        family_id: row.try_get("family_id")?,
        expires_at: row.try_get("expires_at")?,
        created_at: row.try_get("created_at")?,
        revoked_at: row.try_get("revoked_at")?,
        client_ip: row.try_get("client_ip")?,
        user_agent: row.try_get("user_agent")?,
    })
}

fn credential_from_row(row: &PgRow) -> Result<WebAuthnCredential> {
    let sign_count: i64 = row.try_get("sign_count")?;
    Ok(WebAuthnCredential {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        credential_id: row.try_get("credential_id")?,
        public_key: row.try_get("public_key")?,
        sign_count: u32::try_from(sign_count).context("sign_count out of range")?,
        credential_type: row.try_get("credential_type")?,
        transports: row.try_get("transports")?,
        created_at: row.try_get("created_at")?,
        last_used_at: row.try_get("last_used_at")?,
    })
}

fn invite_from_row(row: &PgRow) -> Result<StoreInvite> {
    Ok(StoreInvite {
        id: row.try_get("id")?,
        store_id: row.try_get("store_id")?,
        email: row.try_get("email")?,
        role: store_role_from_code(row.try_get("role")?)?,
        token_hash: row.try_get("token_hash")?,
        expires_at: row.try_get("expires_at")?,
        created_by: row.try_get("created_by")?,
        created_at: row.try_get("created_at")?,
        accepted_at: row.try_get("accepted_at")?,
    })
}

#[async_trait]
impl CredentialStore for PgStore {
    fn backend(&self) -> &'static str {
        "postgresql"
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self
            .pool
            .acquire()
            .instrument(db_span("ACQUIRE", "acquire"))
            .await
            .context("Failed to acquire database connection")?;
        conn.ping()
            .instrument(db_span("PING", "ping"))
            .await
            .context("Failed to ping database")
    }

    async fn insert_user(&self, user: &User) -> Result<InsertOutcome> {
        let query = r"
            INSERT INTO users
                (id, email, password_hash, locked, lockout_end, mfa_enabled, mfa_secret, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ";
        let result = sqlx::query(query)
            .bind(user.id)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(user.locked)
            .bind(user.lockout_end)
            .bind(user.mfa_enabled)
            .bind(user.mfa_secret.as_deref())
            .bind(user.created_at)
            .bind(user.updated_at)
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await;

        match result {
            Ok(_) => Ok(InsertOutcome::Created),
            Err(err) if is_unique_violation(&err) => Ok(InsertOutcome::Conflict),
            Err(err) => Err(err).context("Failed to insert user"),
        }
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let query = "SELECT * FROM users WHERE email = $1";
        let row = sqlx::query(query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("Failed to fetch user by email")?;
        Ok(row.as_ref().map(user_from_row).transpose()?)
    }

    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>> {
        let query = "SELECT * FROM users WHERE id = $1";
        let row = sqlx::query(query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("Failed to fetch user by id")?;
        Ok(row.as_ref().map(user_from_row).transpose()?)
    }

    async fn set_lockout(
        &self,
        user_id: Uuid,
        locked: bool,
        lockout_end: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let query = "UPDATE users SET locked = $2, lockout_end = $3, updated_at = $4 WHERE id = $1";
        sqlx::query(query)
            .bind(user_id)
            .bind(locked)
            .bind(lockout_end)
            .bind(now)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("Failed to update lockout")?;
        Ok(())
    }

    async fn set_mfa(
        &self,
        user_id: Uuid,
        enabled: bool,
        secret: Option<Vec<u8>>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let query =
            "UPDATE users SET mfa_enabled = $2, mfa_secret = $3, updated_at = $4 WHERE id = $1";
        sqlx::query(query)
            .bind(user_id)
            .bind(enabled)
            .bind(secret)
            .bind(now)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("Failed to update MFA state")?;
        Ok(())
    }

    async fn insert_access_token(&self, token: &AccessToken) -> Result<()> {
        let query = r"
            INSERT INTO access_tokens
                (id, user_id, token_hash, refresh_token_id, expires_at, created_at, revoked_at, client_ip, user_agent)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ";
        sqlx::query(query)
            .bind(token.id)
            .bind(token.user_id)
            .bind(&token.token_hash)
            .bind(token.refresh_token_id)
            .bind(token.expires_at)
            .bind(token.created_at)
            .bind(token.revoked_at)
            .bind(token.client_ip.as_deref())
            .bind(token.user_agent.as_deref())
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await
            .context("Failed to insert access token")?;
        Ok(())
    }

    async fn insert_refresh_token(&self, token: &RefreshToken) -> Result<()> {
        let query = r"
            INSERT INTO refresh_tokens
                (id, user_id, token_hash, parent_id, family_id, expires_at, created_at, revoked_at, client_ip, user_agent)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        ";
        sqlx::query(query)
            .bind(token.id)
            .bind(token.user_id)
            .bind(&token.token_hash)
            .bind(token.parent_id)
            .bind(token.family_id)
            .bind(token.expires_at)
            .bind(token.created_at)
            .bind(token.revoked_at)
            .bind(token.client_ip.as_deref())
            .bind(token.user_agent.as_deref())
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await
            .context("Failed to insert refresh token")?;
        Ok(())
    }

    async fn find_access_token(&self, token_hash: &[u8]) -> Result<Option<AccessToken>> {
        let query = "SELECT * FROM access_tokens WHERE token_hash = $1";
        let row = sqlx::query(query)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("Failed to fetch access token")?;
        Ok(row.as_ref().map(access_from_row).transpose()?)
    }

    async fn find_refresh_token(&self, token_hash: &[u8]) -> Result<Option<RefreshToken>> {
        let query = "SELECT * FROM refresh_tokens WHERE token_hash = $1";
        let row = sqlx::query(query)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("Failed to fetch refresh token")?;
        Ok(row.as_ref().map(refresh_from_row).transpose()?)
    }

    async fn revoke_refresh_if_active(&self, token_id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let query =
            "UPDATE refresh_tokens SET revoked_at = $2 WHERE id = $1 AND revoked_at IS NULL";
        let result = sqlx::query(query)
            .bind(token_id)
            .bind(now)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("Failed to revoke refresh token")?;
        Ok(result.rows_affected() == 1)
    }

    async fn revoke_token_family(&self, family_id: Uuid, now: DateTime<Utc>) -> Result<u64> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin family revocation")?;

        let query = r"
            UPDATE refresh_tokens SET revoked_at = $2
            WHERE family_id = $1 AND revoked_at IS NULL
        ";
        let refresh = sqlx::query(query)
            .bind(family_id)
            .bind(now)
            .execute(&mut *tx)
            .instrument(db_span("UPDATE", query))
            .await
            .context("Failed to revoke refresh family")?;

        let query = r"
            UPDATE access_tokens SET revoked_at = $2
            WHERE revoked_at IS NULL
              AND refresh_token_id IN (SELECT id FROM refresh_tokens WHERE family_id = $1)
        ";
        let access = sqlx::query(query)
            .bind(family_id)
            .bind(now)
            .execute(&mut *tx)
            .instrument(db_span("UPDATE", query))
            .await
            .context("Failed to revoke family access tokens")?;

        tx.commit()
            .await
            .context("Failed to commit family revocation")?;
        Ok(refresh.rows_affected() + access.rows_affected())
    }

    async fn revoke_access_token(&self, token_id: Uuid, now: DateTime<Utc>) -> Result<()> {
        let query = "UPDATE access_tokens SET revoked_at = $2 WHERE id = $1 AND revoked_at IS NULL";
        sqlx::query(query)
            .bind(token_id)
            .bind(now)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("Failed to revoke access token")?;
        Ok(())
    }

    async fn record_login_attempt(&self, attempt: &LoginAttempt) -> Result<()> {
        let query = r"
            INSERT INTO login_attempts (id, email, success, client_ip, user_agent, attempted_at)
            VALUES ($1, $2, $3, $4, $5, $6)
        ";
        sqlx::query(query)
            .bind(attempt.id)
            .bind(&attempt.email)
            .bind(attempt.success)
            .bind(attempt.client_ip.as_deref())
            .bind(attempt.user_agent.as_deref())
            .bind(attempt.attempted_at)
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await
            .context("Failed to record login attempt")?;
        Ok(())
    }

    async fn count_failed_attempts_since(&self, email: &str, since: DateTime<Utc>) -> Result<u64> {
        let query = r"
            SELECT COUNT(*) AS failures FROM login_attempts
            WHERE email = $1 AND success = FALSE AND attempted_at > $2
        ";
        let row = sqlx::query(query)
            .bind(email)
            .bind(since)
            .fetch_one(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("Failed to count login failures")?;
        let failures: i64 = row.try_get("failures")?;
        Ok(u64::try_from(failures)?)
    }

    async fn last_successful_attempt(&self, email: &str) -> Result<Option<DateTime<Utc>>> {
        let query = r"
            SELECT MAX(attempted_at) AS last_success FROM login_attempts
            WHERE email = $1 AND success = TRUE
        ";
        let row = sqlx::query(query)
            .bind(email)
            .fetch_one(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("Failed to fetch last successful login")?;
        Ok(row.try_get("last_success")?)
    }

    async fn insert_webauthn_credential(
        &self,
        credential: &WebAuthnCredential,
    ) -> Result<InsertOutcome> {
        let query = r"
            INSERT INTO webauthn_credentials
                (id, user_id, credential_id, public_key, sign_count, credential_type, transports, created_at, last_used_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ";
        let result = sqlx::query(query)
            .bind(credential.id)
            .bind(credential.user_id)
            .bind(&credential.credential_id)
            .bind(&credential.public_key)
            .bind(i64::from(credential.sign_count))
            .bind(&credential.credential_type)
            .bind(&credential.transports)
            .bind(credential.created_at)
            .bind(credential.last_used_at)
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await;

        match result {
            Ok(_) => Ok(InsertOutcome::Created),
            Err(err) if is_unique_violation(&err) => Ok(InsertOutcome::Conflict),
            Err(err) => Err(err).context("Failed to insert webauthn credential"),
        }
    }

    async fn find_webauthn_credential(
        &self,
        credential_id: &str,
    ) -> Result<Option<WebAuthnCredential>> {
        let query = "SELECT * FROM webauthn_credentials WHERE credential_id = $1";
        let row = sqlx::query(query)
            .bind(credential_id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("Failed to fetch webauthn credential")?;
        row.as_ref().map(credential_from_row).transpose()
    }

    async fn list_webauthn_credentials(&self, user_id: Uuid) -> Result<Vec<WebAuthnCredential>> {
        let query = "SELECT * FROM webauthn_credentials WHERE user_id = $1 ORDER BY created_at";
        let rows = sqlx::query(query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("Failed to list webauthn credentials")?;
        rows.iter().map(credential_from_row).collect()
    }

    async fn update_webauthn_counter(
        &self,
        id: Uuid,
        expected: u32,
        sign_count: u32,
        public_key: &[u8],
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let query = r"
            UPDATE webauthn_credentials
            SET sign_count = $3, public_key = $4, last_used_at = $5
            WHERE id = $1 AND sign_count = $2
        ";
        let result = sqlx::query(query)
            .bind(id)
            .bind(i64::from(expected))
            .bind(i64::from(sign_count))
            .bind(public_key)
            .bind(now)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("Failed to update webauthn counter")?;
        Ok(result.rows_affected() == 1)
    }

    async fn put_webauthn_challenge(&self, challenge: &WebAuthnChallenge) -> Result<()> {
        let query = r"
            INSERT INTO webauthn_challenges (id, user_id, kind, state, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
        ";
        sqlx::query(query)
            .bind(challenge.id)
            .bind(challenge.user_id)
            .bind(challenge.kind.as_str())
            .bind(&challenge.state)
            .bind(challenge.expires_at)
            .bind(challenge.created_at)
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await
            .context("Failed to store webauthn challenge")?;
        Ok(())
    }

    async fn take_webauthn_challenge(&self, id: Uuid) -> Result<Option<WebAuthnChallenge>> {
        let query = "DELETE FROM webauthn_challenges WHERE id = $1 RETURNING *";
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(db_span("DELETE", query))
            .await
            .context("Failed to take webauthn challenge")?;

        let Some(row) = row else {
            return Ok(None);
        };
        let kind: String = row.try_get("kind")?;
        Ok(Some(WebAuthnChallenge {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            kind: CeremonyKind::parse(&kind)
                .ok_or_else(|| anyhow!("unknown ceremony kind {kind}"))?,
            state: row.try_get("state")?,
            expires_at: row.try_get("expires_at")?,
            created_at: row.try_get("created_at")?,
        }))
    }

    async fn find_store_role(&self, store_id: Uuid, user_id: Uuid) -> Result<Option<StoreRole>> {
        let query = "SELECT role FROM store_user_roles WHERE store_id = $1 AND user_id = $2";
        let code: Option<i16> = sqlx::query_scalar(query)
            .bind(store_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("Failed to fetch store role")?;
        code.map(store_role_from_code).transpose()
    }

    async fn upsert_store_role(
        &self,
        store_id: Uuid,
        user_id: Uuid,
        role: StoreRole,
    ) -> Result<()> {
        let query = r"
            INSERT INTO store_user_roles (store_id, user_id, role) VALUES ($1, $2, $3)
            ON CONFLICT (store_id, user_id) DO UPDATE SET role = EXCLUDED.role
        ";
        sqlx::query(query)
            .bind(store_id)
            .bind(user_id)
            .bind(store_role_code(role))
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await
            .context("Failed to upsert store role")?;
        Ok(())
    }

    async fn list_store_grants(&self, store_id: Uuid, user_id: Uuid) -> Result<Vec<String>> {
        let query =
            "SELECT permission FROM store_user_permissions WHERE store_id = $1 AND user_id = $2";
        sqlx::query_scalar(query)
            .bind(store_id)
            .bind(user_id)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("Failed to list store grants")
    }

    async fn grant_store_permission(
        &self,
        store_id: Uuid,
        user_id: Uuid,
        permission: &str,
    ) -> Result<()> {
        let query = r"
            INSERT INTO store_user_permissions (store_id, user_id, permission) VALUES ($1, $2, $3)
            ON CONFLICT DO NOTHING
        ";
        sqlx::query(query)
            .bind(store_id)
            .bind(user_id)
            .bind(permission)
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await
            .context("Failed to grant store permission")?;
        Ok(())
    }

    async fn list_platform_roles(&self, user_id: Uuid) -> Result<Vec<PlatformRole>> {
        let query = "SELECT role FROM platform_user_roles WHERE user_id = $1";
        let codes: Vec<i16> = sqlx::query_scalar(query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("Failed to list platform roles")?;
        codes.into_iter().map(platform_role_from_code).collect()
    }

    async fn grant_platform_role(&self, user_id: Uuid, role: PlatformRole) -> Result<()> {
        let query = r"
            INSERT INTO platform_user_roles (user_id, role) VALUES ($1, $2)
            ON CONFLICT DO NOTHING
        ";
        sqlx::query(query)
            .bind(user_id)
            .bind(platform_role_code(role))
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await
            .context("Failed to grant platform role")?;
        Ok(())
    }

    async fn insert_store_invite(&self, invite: &StoreInvite) -> Result<()> {
        let query = r"
            INSERT INTO store_invites
                (id, store_id, email, role, token_hash, expires_at, created_by, created_at, accepted_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ";
        sqlx::query(query)
            .bind(invite.id)
            .bind(invite.store_id)
            .bind(&invite.email)
            .bind(store_role_code(invite.role))
            .bind(&invite.token_hash)
            .bind(invite.expires_at)
            .bind(invite.created_by)
            .bind(invite.created_at)
            .bind(invite.accepted_at)
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await
            .context("Failed to insert store invite")?;
        Ok(())
    }

    async fn find_store_invite(&self, token_hash: &[u8]) -> Result<Option<StoreInvite>> {
        let query = "SELECT * FROM store_invites WHERE token_hash = $1";
        let row = sqlx::query(query)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("Failed to fetch store invite")?;
        row.as_ref().map(invite_from_row).transpose()
    }

    async fn accept_store_invite(&self, invite_id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let query = r"
            UPDATE store_invites SET accepted_at = $2
            WHERE id = $1 AND accepted_at IS NULL AND expires_at > $2
        ";
        let result = sqlx::query(query)
            .bind(invite_id)
            .bind(now)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("Failed to accept store invite")?;
        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_role_codes_are_stable() -> Result<()> {
        for (role, code) in [
            (StoreRole::Owner, 0),
            (StoreRole::Admin, 1),
            (StoreRole::Staff, 2),
            (StoreRole::Custom, 3),
        ] {
            assert_eq!(store_role_code(role), code);
            assert_eq!(store_role_from_code(code)?, role);
        }
        assert!(store_role_from_code(4).is_err());
        Ok(())
    }

    #[test]
    fn platform_role_codes_are_stable() -> Result<()> {
        assert_eq!(platform_role_code(PlatformRole::Owner), 0);
        assert_eq!(platform_role_code(PlatformRole::Staff), 1);
        assert_eq!(platform_role_from_code(1)?, PlatformRole::Staff);
        assert!(platform_role_from_code(-1).is_err());
        Ok(())
    }

    #[test]
    fn schema_declares_every_table() {
        for table in [
            "users",
            "access_tokens",
            "refresh_tokens",
            "login_attempts",
            "webauthn_credentials",
            "webauthn_challenges",
            "store_user_roles",
            "store_user_permissions",
            "platform_user_roles",
            "store_invites",
        ] {
            assert!(
                SCHEMA.contains(&format!("CREATE TABLE IF NOT EXISTS {table} (")),
                "missing table {table}"
            );
        }
    }
}
