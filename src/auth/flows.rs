//! `AuthFlows`: the orchestrator behind every `/auth` and invite endpoint.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use webauthn_rs::prelude::{
    CreationChallengeResponse, PublicKeyCredential, RegisterPublicKeyCredential,
    RequestChallengeResponse,
};

use super::{
    AuthConfig, AuthError, RequestMeta, captcha::CaptchaVerifier, normalize_email, valid_email,
};
use crate::{
    clock::Clock,
    lockout::LoginAttemptLedger,
    password::{self, MAX_PASSWORD_LEN, MIN_PASSWORD_LEN, PasswordHasher},
    store::{CredentialStore, InsertOutcome, StoreInvite, User, WebAuthnCredential},
    tenancy::{
        AuthorizationEngine, Permission, Policy, Principal, StoreRole, TenancyContext,
        TenancyResolver,
    },
    token::{self, TokenPair, TokenScope, TokenService},
    totp::{Enrollment, MfaEngine},
    webauthn::WebAuthnEngine,
};

#[derive(Clone, Debug)]
pub struct RegisterInput {
    pub email: String,
    pub password: String,
    pub captcha_token: String,
}

#[derive(Clone, Debug)]
pub struct LoginInput {
    pub email: String,
    pub password: String,
    pub captcha_token: String,
    pub mfa_code: Option<String>,
}

/// A freshly created invitation. `token` is shown to the inviter once.
#[derive(Clone, Debug)]
pub struct InviteGrant {
    pub invite_id: Uuid,
    pub store_id: Uuid,
    pub email: String,
    pub role: StoreRole,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

pub struct AuthFlows {
    config: AuthConfig,
    store: Arc<dyn CredentialStore>,
    clock: Arc<dyn Clock>,
    hasher: PasswordHasher,
    tokens: TokenService,
    ledger: LoginAttemptLedger,
    mfa: MfaEngine,
    webauthn: WebAuthnEngine,
    captcha: Arc<dyn CaptchaVerifier>,
    resolver: TenancyResolver,
    authz: AuthorizationEngine,
}

impl AuthFlows {
    /// Wire every engine against one store and clock.
    ///
    /// # Errors
    /// Returns an error if a configured lifetime is out of range, or the MFA
    /// key or WebAuthn relying party is invalid.
    pub fn new(
        config: AuthConfig,
        store: Arc<dyn CredentialStore>,
        clock: Arc<dyn Clock>,
        captcha: Arc<dyn CaptchaVerifier>,
    ) -> Result<Self> {
        config.validate()?;
        let tokens = TokenService::new(
            store.clone(),
            clock.clone(),
            config.access_ttl(),
            config.refresh_ttl(),
        );
        let ledger = LoginAttemptLedger::new(store.clone(), clock.clone(), config.lockout());
        let mfa = MfaEngine::new(
            store.clone(),
            clock.clone(),
            config.mfa_issuer().to_string(),
            config.mfa_encryption_key(),
        )?;
        let webauthn = WebAuthnEngine::new(&config, store.clone(), clock.clone())?;
        let resolver = TenancyResolver::new(store.clone(), tokens.clone());

        Ok(Self {
            config,
            store,
            clock,
            hasher: PasswordHasher::new()?,
            tokens,
            ledger,
            mfa,
            webauthn,
            captcha,
            resolver,
            authz: AuthorizationEngine,
        })
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    #[must_use]
    pub fn webauthn(&self) -> &WebAuthnEngine {
        &self.webauthn
    }

    /// # Errors
    /// `Internal` if the store cannot be read.
    pub async fn resolve(
        &self,
        bearer: Option<&str>,
        store_id: Option<Uuid>,
    ) -> Result<TenancyContext, AuthError> {
        Ok(self.resolver.resolve(bearer, store_id).await?)
    }

    /// # Errors
    /// `Unauthenticated` or `Forbidden` per [`AuthorizationEngine::authorize`].
    pub fn authorize(&self, context: &TenancyContext, policy: Policy) -> Result<(), AuthError> {
        self.authz.authorize(context, policy)
    }

    /// # Errors
    /// `InvalidInput`, `CaptchaInvalid`, or `EmailTaken`.
    #[instrument(skip_all)]
    pub async fn register(
        &self,
        input: RegisterInput,
        meta: &RequestMeta,
    ) -> Result<TokenPair, AuthError> {
        let email = normalize_email(&input.email);
        if !valid_email(&email) {
            return Err(AuthError::InvalidInput("Invalid email address".to_string()));
        }
        if !password::password_length_ok(&input.password) {
            return Err(AuthError::InvalidInput(format!(
                "Password must be between {MIN_PASSWORD_LEN} and {MAX_PASSWORD_LEN} characters"
            )));
        }
        self.check_captcha(&input.captcha_token, meta).await?;

        let password_hash = self.hasher.hash(&input.password)?;
        let user = User::new(email, password_hash, self.clock.now());
        if self.store.insert_user(&user).await? == InsertOutcome::Conflict {
            info!("Registration rejected: email already registered");
            return Err(AuthError::EmailTaken);
        }

        self.ledger.record(&user.email, true, meta).await?;
        let pair = self.tokens.issue(user.id, TokenScope::Login, meta).await?;
        info!(user_id = %user.id, "User registered");
        Ok(pair)
    }

    /// Password login, optionally with a TOTP code.
    ///
    /// # Errors
    /// `InvalidInput`, `CaptchaInvalid`, `AccountLocked`, `InvalidCredentials`,
    /// `MfaRequired`, or `InvalidMfaCode`.
    #[instrument(skip_all)]
    pub async fn login(&self, input: LoginInput, meta: &RequestMeta) -> Result<TokenPair, AuthError> {
        let email = normalize_email(&input.email);
        if !valid_email(&email)
            || input.password.is_empty()
            || input.password.chars().count() > MAX_PASSWORD_LEN
        {
            return Err(AuthError::InvalidInput(
                "Email and password are required".to_string(),
            ));
        }
        self.check_captcha(&input.captcha_token, meta).await?;

        let Some(user) = self.store.find_user_by_email(&email).await? else {
            self.ledger.record(&email, false, meta).await?;
            self.hasher.verify_dummy(&input.password);
            return Err(AuthError::InvalidCredentials);
        };

        if self.ledger.is_locked(&user) {
            self.ledger.record(&email, false, meta).await?;
            info!(user_id = %user.id, "Login rejected: account locked");
            return Err(AuthError::AccountLocked);
        }

        if !self.hasher.verify(&input.password, &user.password_hash) {
            self.ledger.record(&email, false, meta).await?;
            self.ledger.register_failure(&user).await?;
            return Err(AuthError::InvalidCredentials);
        }

        if user.mfa_enabled {
            let code = input
                .mfa_code
                .as_deref()
                .map(str::trim)
                .filter(|code| !code.is_empty());
            let Some(code) = code else {
                self.ledger.record(&email, false, meta).await?;
                return Err(AuthError::MfaRequired);
            };
            if !self.mfa.verify_login(&user, code)? {
                self.ledger.record(&email, false, meta).await?;
                self.ledger.register_failure(&user).await?;
                return Err(AuthError::InvalidMfaCode);
            }
        }

        self.complete_login(&user, meta).await
    }

    /// Rotate a refresh secret into a new pair.
    ///
    /// # Errors
    /// `InvalidToken` for a missing or unusable secret.
    #[instrument(skip_all)]
    pub async fn refresh(
        &self,
        refresh_secret: Option<&str>,
        meta: &RequestMeta,
    ) -> Result<TokenPair, AuthError> {
        let secret = refresh_secret
            .map(str::trim)
            .filter(|secret| !secret.is_empty())
            .ok_or(AuthError::InvalidToken)?;
        self.tokens.rotate(secret, meta).await
    }

    /// Revoke the refresh family and the presented access token. Unknown
    /// credentials are ignored so logout always succeeds.
    ///
    /// # Errors
    /// `Internal` if the store update fails.
    #[instrument(skip_all)]
    pub async fn logout(
        &self,
        refresh_secret: Option<&str>,
        context: &TenancyContext,
    ) -> Result<(), AuthError> {
        if let Some(secret) = refresh_secret.map(str::trim).filter(|s| !s.is_empty()) {
            self.tokens.revoke_family(secret).await?;
        }
        if let Some(principal) = &context.principal {
            self.tokens.revoke_access(principal.token_id).await?;
            info!(user_id = %principal.user_id, "User logged out");
        }
        Ok(())
    }

    /// # Errors
    /// `Unauthenticated` for anonymous callers; `MfaAlreadyEnabled` once active.
    pub async fn mfa_enroll(&self, context: &TenancyContext) -> Result<Enrollment, AuthError> {
        let user = self.current_user(context).await?;
        self.mfa.enroll(&user).await
    }

    /// Confirm a pending enrollment with the first code.
    ///
    /// # Errors
    /// `Unauthenticated`, `InvalidInput`, or `InvalidMfaCode`.
    pub async fn mfa_verify(&self, context: &TenancyContext, code: &str) -> Result<(), AuthError> {
        let user = self.current_user(context).await?;
        let code = code.trim();
        if code.is_empty() {
            return Err(AuthError::InvalidInput("Missing MFA code".to_string()));
        }
        self.mfa.confirm_enrollment(&user, code).await
    }

    /// # Errors
    /// `Unauthenticated` for anonymous callers.
    pub async fn webauthn_register_options(
        &self,
        context: &TenancyContext,
        display_name: Option<&str>,
    ) -> Result<(Uuid, CreationChallengeResponse), AuthError> {
        let user = self.current_user(context).await?;
        self.webauthn.registration_options(&user, display_name).await
    }

    /// # Errors
    /// `Unauthenticated` or `WebAuthnFailed`.
    pub async fn webauthn_register_verify(
        &self,
        context: &TenancyContext,
        challenge_id: Uuid,
        credential: &RegisterPublicKeyCredential,
        transports: Vec<String>,
    ) -> Result<WebAuthnCredential, AuthError> {
        let user = self.current_user(context).await?;
        self.webauthn
            .finish_registration(&user, challenge_id, credential, transports)
            .await
    }

    /// Start a passkey login. Unknown emails and users without passkeys get
    /// the same generic rejection.
    ///
    /// # Errors
    /// `InvalidInput`, `InvalidCredentials`, or `AccountLocked`.
    pub async fn webauthn_login_options(
        &self,
        email: &str,
    ) -> Result<(Uuid, RequestChallengeResponse), AuthError> {
        let email = normalize_email(email);
        if !valid_email(&email) {
            return Err(AuthError::InvalidInput("Invalid email address".to_string()));
        }
        let Some(user) = self.store.find_user_by_email(&email).await? else {
            return Err(AuthError::InvalidCredentials);
        };
        if self.ledger.is_locked(&user) {
            return Err(AuthError::AccountLocked);
        }
        self.webauthn.login_options(&user).await
    }

    /// # Errors
    /// `WebAuthnFailed`, `InvalidCredentials`, or `AccountLocked`.
    #[instrument(skip_all)]
    pub async fn webauthn_login_verify(
        &self,
        challenge_id: Uuid,
        credential: &PublicKeyCredential,
        meta: &RequestMeta,
    ) -> Result<TokenPair, AuthError> {
        let user_id = self.webauthn.finish_login(challenge_id, credential).await?;
        let Some(user) = self.store.find_user_by_id(user_id).await? else {
            return Err(AuthError::InvalidCredentials);
        };
        if self.ledger.is_locked(&user) {
            self.ledger.record(&user.email, false, meta).await?;
            return Err(AuthError::AccountLocked);
        }
        self.complete_login(&user, meta).await
    }

    /// Invite `email` into `store_id` with `role`.
    ///
    /// # Errors
    /// `Unauthenticated`/`Forbidden` without `staff.manage` on the active
    /// store; `InvalidInput` for a bad email or an owner invitation.
    #[instrument(skip_all, fields(%store_id))]
    pub async fn create_invite(
        &self,
        context: &TenancyContext,
        store_id: Uuid,
        email: &str,
        role: StoreRole,
    ) -> Result<InviteGrant, AuthError> {
        self.authorize(context, Policy::StorePermission(Permission::StaffManage))?;
        if context.store_id != Some(store_id) {
            return Err(AuthError::Forbidden);
        }
        let principal = require_principal(context)?;

        let email = normalize_email(email);
        if !valid_email(&email) {
            return Err(AuthError::InvalidInput("Invalid email address".to_string()));
        }
        if role == StoreRole::Owner {
            return Err(AuthError::InvalidInput(
                "The owner role cannot be granted by invitation".to_string(),
            ));
        }

        let secret = token::generate_token()?;
        let now = self.clock.now();
        let invite = StoreInvite {
            id: Uuid::new_v4(),
            store_id,
            email,
            role,
            token_hash: token::hash_token(&secret),
            expires_at: now
                .checked_add_signed(self.config.invite_ttl())
                .context("Invitation expiry out of range")?,
            created_by: principal.user_id,
            created_at: now,
            accepted_at: None,
        };
        self.store.insert_store_invite(&invite).await?;
        info!(invite_id = %invite.id, role = ?role, "Store invitation created");

        Ok(InviteGrant {
            invite_id: invite.id,
            store_id,
            email: invite.email,
            role,
            token: secret,
            expires_at: invite.expires_at,
        })
    }

    /// Redeem an invitation for the calling user.
    ///
    /// # Errors
    /// `Unauthenticated` for anonymous callers; `InviteInvalid` for unknown,
    /// expired, used, or mismatched invitations.
    #[instrument(skip_all)]
    pub async fn accept_invite(
        &self,
        context: &TenancyContext,
        secret: &str,
    ) -> Result<(Uuid, StoreRole), AuthError> {
        let principal = require_principal(context)?;
        let secret = secret.trim();
        if secret.is_empty() {
            return Err(AuthError::InvalidInput("Missing invitation token".to_string()));
        }

        let Some(invite) = self.store.find_store_invite(&token::hash_token(secret)).await? else {
            return Err(AuthError::InviteInvalid);
        };
        let now = self.clock.now();
        if !invite.is_pending(now) {
            return Err(AuthError::InviteInvalid);
        }
        if invite.email != principal.email {
            warn!(
                invite_id = %invite.id,
                user_id = %principal.user_id,
                "Invitation presented by a different account"
            );
            return Err(AuthError::InviteInvalid);
        }
        if !self.store.accept_store_invite(invite.id, now).await? {
            return Err(AuthError::InviteInvalid);
        }

        self.store
            .upsert_store_role(invite.store_id, principal.user_id, invite.role)
            .await?;
        info!(
            invite_id = %invite.id,
            store_id = %invite.store_id,
            user_id = %principal.user_id,
            "Store invitation accepted"
        );
        Ok((invite.store_id, invite.role))
    }

    async fn complete_login(&self, user: &User, meta: &RequestMeta) -> Result<TokenPair, AuthError> {
        self.ledger.record(&user.email, true, meta).await?;
        self.ledger.clear(user).await?;
        let pair = self.tokens.issue(user.id, TokenScope::Login, meta).await?;
        info!(user_id = %user.id, "Login succeeded");
        Ok(pair)
    }

    async fn check_captcha(&self, token: &str, meta: &RequestMeta) -> Result<(), AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::CaptchaInvalid);
        }
        match self.captcha.verify(token, meta.client_ip.as_deref()).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(AuthError::CaptchaInvalid),
            Err(err) => {
                warn!("Captcha verification unavailable: {err:#}");
                Err(AuthError::CaptchaInvalid)
            }
        }
    }

    async fn current_user(&self, context: &TenancyContext) -> Result<User, AuthError> {
        let principal = require_principal(context)?;
        self.store
            .find_user_by_id(principal.user_id)
            .await?
            .ok_or(AuthError::Unauthenticated)
    }
}

/// # Errors
/// `Unauthenticated` when the context is anonymous.
pub fn require_principal(context: &TenancyContext) -> Result<&Principal, AuthError> {
    context.principal.as_ref().ok_or(AuthError::Unauthenticated)
}
