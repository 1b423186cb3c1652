//! Login attempt ledger and brute-force lockout.
//!
//! Failures are counted per normalized email inside a rolling window that
//! never reaches back past the last successful login, so only consecutive
//! failures count. The failure that brings the count to `max_failed_attempts`
//! locks the account; the next attempt is rejected as locked regardless of
//! the password.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    auth::RequestMeta,
    clock::Clock,
    store::{CredentialStore, LoginAttempt, User},
};

const DEFAULT_MAX_FAILED_ATTEMPTS: u32 = 5;
const DEFAULT_LOCKOUT_MINUTES: i64 = 15;

/// One week.
pub const MAX_LOCKOUT_MINUTES: i64 = 7 * 24 * 60;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LockoutPolicy {
    max_failed_attempts: u32,
    lockout_minutes: i64,
}

impl LockoutPolicy {
    #[must_use]
    pub const fn new(max_failed_attempts: u32, lockout_minutes: i64) -> Self {
        Self {
            max_failed_attempts,
            lockout_minutes,
        }
    }

    #[must_use]
    pub const fn max_failed_attempts(&self) -> u32 {
        self.max_failed_attempts
    }

    /// Both the counting window and the lockout duration, clamped to
    /// `1..=MAX_LOCKOUT_MINUTES`.
    #[must_use]
    pub fn window(&self) -> Duration {
        Duration::minutes(self.lockout_minutes.clamp(1, MAX_LOCKOUT_MINUTES))
    }

    /// # Errors
    /// Returns an error for a zero threshold or a window outside
    /// `1..=MAX_LOCKOUT_MINUTES`.
    pub fn validate(&self) -> Result<()> {
        if self.max_failed_attempts == 0 {
            bail!("max failed attempts must be at least 1");
        }
        if !(1..=MAX_LOCKOUT_MINUTES).contains(&self.lockout_minutes) {
            bail!(
                "lockout minutes must be between 1 and {MAX_LOCKOUT_MINUTES}, got {}",
                self.lockout_minutes
            );
        }
        Ok(())
    }
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FAILED_ATTEMPTS, DEFAULT_LOCKOUT_MINUTES)
    }
}

#[derive(Clone)]
pub struct LoginAttemptLedger {
    store: Arc<dyn CredentialStore>,
    clock: Arc<dyn Clock>,
    policy: LockoutPolicy,
}

impl LoginAttemptLedger {
    #[must_use]
    pub fn new(
        store: Arc<dyn CredentialStore>,
        clock: Arc<dyn Clock>,
        policy: LockoutPolicy,
    ) -> Self {
        Self {
            store,
            clock,
            policy,
        }
    }

    #[must_use]
    pub fn policy(&self) -> LockoutPolicy {
        self.policy
    }

    /// Appends one row to the ledger.
    ///
    /// # Errors
    /// Returns an error if the store write fails.
    pub async fn record(&self, email: &str, success: bool, meta: &RequestMeta) -> Result<()> {
        let attempt = LoginAttempt {
            id: Uuid::new_v4(),
            email: email.to_string(),
            success,
            client_ip: meta.client_ip.clone(),
            user_agent: meta.user_agent.clone(),
            attempted_at: self.clock.now(),
        };
        self.store.record_login_attempt(&attempt).await
    }

    #[must_use]
    pub fn is_locked(&self, user: &User) -> bool {
        user.is_locked_out(self.clock.now())
    }

    /// Failures that count toward lockout right now.
    ///
    /// # Errors
    /// Returns an error if the ledger cannot be read.
    pub async fn recent_failures(&self, email: &str) -> Result<u64> {
        let now = self.clock.now();
        let since = self.counting_start(email, now).await?;
        self.store.count_failed_attempts_since(email, since).await
    }

    async fn counting_start(&self, email: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let window_start = now
            .checked_sub_signed(self.policy.window())
            .context("Lockout window start out of range")?;
        let last_success = self.store.last_successful_attempt(email).await?;
        Ok(last_success.map_or(window_start, |success| success.max(window_start)))
    }

    /// Recomputes the failure count after a rejected credential and locks the
    /// account when the threshold is reached. Returns whether the account is
    /// now locked.
    ///
    /// # Errors
    /// Returns an error if the ledger or user record cannot be accessed.
    pub async fn register_failure(&self, user: &User) -> Result<bool> {
        let failures = self.recent_failures(&user.email).await?;
        if failures < u64::from(self.policy.max_failed_attempts) {
            return Ok(false);
        }

        let now = self.clock.now();
        let lockout_end = now
            .checked_add_signed(self.policy.window())
            .context("Lockout end out of range")?;
        self.store
            .set_lockout(user.id, true, Some(lockout_end), now)
            .await?;
        warn!(
            user_id = %user.id,
            failures,
            lockout_end = %lockout_end,
            "Account locked after repeated login failures"
        );
        Ok(true)
    }

    /// Clears lockout state after a successful login.
    ///
    /// # Errors
    /// Returns an error if the user record cannot be updated.
    pub async fn clear(&self, user: &User) -> Result<()> {
        if user.locked || user.lockout_end.is_some() {
            self.store
                .set_lockout(user.id, false, None, self.clock.now())
                .await?;
            info!(user_id = %user.id, "Lockout cleared");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{clock::ManualClock, store::MemoryStore};

    struct Fixture {
        store: Arc<MemoryStore>,
        clock: ManualClock,
        ledger: LoginAttemptLedger,
        user: User,
    }

    async fn fixture(policy: LockoutPolicy) -> Result<Fixture> {
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::new(Utc::now());
        let user = User::new("shopper@shop.test".into(), "hash".into(), clock.now());
        store.insert_user(&user).await?;
        let ledger = LoginAttemptLedger::new(store.clone(), Arc::new(clock.clone()), policy);
        Ok(Fixture {
            store,
            clock,
            ledger,
            user,
        })
    }

    async fn fail(fixture: &Fixture) -> Result<bool> {
        fixture
            .ledger
            .record(&fixture.user.email, false, &RequestMeta::default())
            .await?;
        fixture.ledger.register_failure(&fixture.user).await
    }

    async fn reload(fixture: &Fixture) -> Result<User> {
        fixture
            .store
            .find_user_by_id(fixture.user.id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("user vanished"))
    }

    #[test]
    fn default_policy_is_five_in_fifteen_minutes() {
        let policy = LockoutPolicy::default();
        assert_eq!(policy.max_failed_attempts(), 5);
        assert_eq!(policy.window(), Duration::minutes(15));
    }

    #[test]
    fn oversized_windows_are_clamped_and_rejected() {
        let policy = LockoutPolicy::new(5, i64::MAX / 2);
        assert_eq!(policy.window(), Duration::minutes(MAX_LOCKOUT_MINUTES));
        assert!(policy.validate().is_err());

        assert!(LockoutPolicy::new(0, 15).validate().is_err());
        assert!(LockoutPolicy::new(5, 0).validate().is_err());
        assert!(LockoutPolicy::new(5, MAX_LOCKOUT_MINUTES).validate().is_ok());
        assert!(LockoutPolicy::default().validate().is_ok());
    }

    #[tokio::test]
    async fn nth_failure_locks_the_account() -> Result<()> {
        let fixture = fixture(LockoutPolicy::default()).await?;
        for _ in 0..4 {
            assert!(!fail(&fixture).await?);
        }
        assert!(fail(&fixture).await?);

        let user = reload(&fixture).await?;
        assert!(fixture.ledger.is_locked(&user));
        assert_eq!(user.lockout_end, Some(fixture.clock.now() + Duration::minutes(15)));
        Ok(())
    }

    #[tokio::test]
    async fn failures_outside_the_window_do_not_count() -> Result<()> {
        let fixture = fixture(LockoutPolicy::new(3, 10)).await?;
        assert!(!fail(&fixture).await?);
        assert!(!fail(&fixture).await?);
        fixture.clock.advance(Duration::minutes(11));
        assert!(!fail(&fixture).await?);
        assert_eq!(fixture.ledger.recent_failures(&fixture.user.email).await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn success_resets_the_consecutive_count() -> Result<()> {
        let fixture = fixture(LockoutPolicy::new(3, 15)).await?;
        assert!(!fail(&fixture).await?);
        assert!(!fail(&fixture).await?);

        fixture.clock.advance(Duration::seconds(1));
        fixture
            .ledger
            .record(&fixture.user.email, true, &RequestMeta::default())
            .await?;
        fixture.clock.advance(Duration::seconds(1));

        assert!(!fail(&fixture).await?);
        assert_eq!(fixture.ledger.recent_failures(&fixture.user.email).await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn lock_expires_and_clear_resets_state() -> Result<()> {
        let fixture = fixture(LockoutPolicy::new(2, 15)).await?;
        fail(&fixture).await?;
        assert!(fail(&fixture).await?);

        let user = reload(&fixture).await?;
        fixture.clock.advance(Duration::minutes(15));
        assert!(!fixture.ledger.is_locked(&user));

        fixture.ledger.clear(&user).await?;
        let user = reload(&fixture).await?;
        assert!(!user.locked);
        assert_eq!(user.lockout_end, None);
        Ok(())
    }
}
