//! Passkey registration and assertion ceremonies.
//!
//! Flow:
//! 1) Options: build a challenge bound to the user and persist the ceremony
//!    state with a short TTL.
//! 2) Verify: take the state (single use), let `webauthn-rs` check origin,
//!    RP id, challenge and signature, then persist or update the credential.
//!
//! The signature counter is checked again against the stored value and
//! written with a compare-and-set, so two replays of one assertion cannot
//! both pass.

use anyhow::{Context, Result};
use base64::Engine;
use chrono::Duration;
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;
use webauthn_rs::prelude::*;

use crate::{
    auth::{AuthConfig, AuthError},
    clock::Clock,
    store::{
        CeremonyKind, CredentialStore, InsertOutcome, User, WebAuthnChallenge, WebAuthnCredential,
    },
};

const CREDENTIAL_TYPE: &str = "public-key";
const MAX_DISPLAY_NAME_CHARS: usize = 64;

/// Counter rule: `0/0` means the authenticator does not implement a counter;
/// anything else must strictly increase.
#[must_use]
pub fn enforce_sign_count(stored: u32, presented: u32) -> bool {
    (stored == 0 && presented == 0) || presented > stored
}

#[must_use]
pub fn encode_credential_id(raw: &[u8]) -> String {
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(raw)
}

#[derive(Clone)]
pub struct WebAuthnEngine {
    webauthn: Arc<Webauthn>,
    store: Arc<dyn CredentialStore>,
    clock: Arc<dyn Clock>,
    challenge_ttl: Duration,
}

impl WebAuthnEngine {
    /// # Errors
    /// Returns an error if the RP origin is not a valid URL or the RP id does
    /// not match it.
    pub fn new(
        config: &AuthConfig,
        store: Arc<dyn CredentialStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let origin = Url::parse(config.webauthn_rp_origin()).with_context(|| {
            format!("Invalid WebAuthn origin: {}", config.webauthn_rp_origin())
        })?;
        let webauthn = WebauthnBuilder::new(config.webauthn_rp_id(), &origin)
            .context("Invalid WebAuthn relying party")?
            .rp_name(config.webauthn_rp_name())
            .build()
            .context("Failed to build WebAuthn verifier")?;

        Ok(Self {
            webauthn: Arc::new(webauthn),
            store,
            clock,
            challenge_ttl: config.webauthn_challenge_ttl(),
        })
    }

    /// Start a registration. The authenticator shows `display_name`, or the
    /// account email when none is given.
    ///
    /// # Errors
    /// `Internal` on store or serialization failure.
    pub async fn registration_options(
        &self,
        user: &User,
        display_name: Option<&str>,
    ) -> Result<(Uuid, CreationChallengeResponse), AuthError> {
        let existing = self.passkeys_for(user.id).await?;
        let exclude: Vec<CredentialID> = existing
            .iter()
            .map(|(_, passkey)| passkey.cred_id().clone())
            .collect();

        let display_name: String = display_name
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(user.email.as_str())
            .chars()
            .take(MAX_DISPLAY_NAME_CHARS)
            .collect();

        let (options, state) = self
            .webauthn
            .start_passkey_registration(
                user.id,
                &user.email,
                &display_name,
                (!exclude.is_empty()).then_some(exclude),
            )
            .map_err(|err| {
                warn!(user_id = %user.id, "WebAuthn registration start failed: {err}");
                AuthError::WebAuthnFailed
            })?;

        let state = serde_json::to_string(&state).context("Failed to serialize ceremony")?;
        let challenge_id = self
            .persist_challenge(user.id, CeremonyKind::Registration, state)
            .await?;
        Ok((challenge_id, options))
    }

    /// # Errors
    /// `WebAuthnFailed` for a missing, expired, or foreign challenge, a failed
    /// attestation, or an already registered credential.
    pub async fn finish_registration(
        &self,
        user: &User,
        challenge_id: Uuid,
        response: &RegisterPublicKeyCredential,
        transports: Vec<String>,
    ) -> Result<WebAuthnCredential, AuthError> {
        let challenge = self
            .take_challenge(challenge_id, CeremonyKind::Registration, Some(user.id))
            .await?;
        let state: PasskeyRegistration =
            serde_json::from_str(&challenge.state).context("Corrupt registration state")?;

        let passkey = self
            .webauthn
            .finish_passkey_registration(response, &state)
            .map_err(|err| {
                warn!(user_id = %user.id, "WebAuthn attestation rejected: {err}");
                AuthError::WebAuthnFailed
            })?;

        let now = self.clock.now();
        let credential = WebAuthnCredential {
            id: Uuid::new_v4(),
            user_id: user.id,
            credential_id: encode_credential_id(passkey.cred_id().as_slice()),
            public_key: serde_json::to_vec(&passkey).context("Failed to serialize passkey")?,
            // Later assertions must beat the counter the authenticator attested.
            sign_count: Credential::from(passkey).counter,
            credential_type: CREDENTIAL_TYPE.to_string(),
            transports,
            created_at: now,
            last_used_at: None,
        };

        match self.store.insert_webauthn_credential(&credential).await? {
            InsertOutcome::Created => {
                info!(
                    user_id = %user.id,
                    credential_id = %credential.credential_id,
                    "Passkey registered"
                );
                Ok(credential)
            }
            InsertOutcome::Conflict => {
                warn!(user_id = %user.id, "Passkey already registered");
                Err(AuthError::WebAuthnFailed)
            }
        }
    }

    /// # Errors
    /// `InvalidCredentials` if the user has no passkeys.
    pub async fn login_options(
        &self,
        user: &User,
    ) -> Result<(Uuid, RequestChallengeResponse), AuthError> {
        let passkeys: Vec<Passkey> = self
            .passkeys_for(user.id)
            .await?
            .into_iter()
            .map(|(_, passkey)| passkey)
            .collect();
        if passkeys.is_empty() {
            return Err(AuthError::InvalidCredentials);
        }

        let (options, state) = self
            .webauthn
            .start_passkey_authentication(&passkeys)
            .map_err(|err| {
                warn!(user_id = %user.id, "WebAuthn authentication start failed: {err}");
                AuthError::WebAuthnFailed
            })?;

        let state = serde_json::to_string(&state).context("Failed to serialize ceremony")?;
        let challenge_id = self
            .persist_challenge(user.id, CeremonyKind::Assertion, state)
            .await?;
        Ok((challenge_id, options))
    }

    /// Verify an assertion and return the authenticated user id.
    ///
    /// # Errors
    /// `WebAuthnFailed` on any verification failure, including a counter that
    /// did not advance.
    pub async fn finish_login(
        &self,
        challenge_id: Uuid,
        response: &PublicKeyCredential,
    ) -> Result<Uuid, AuthError> {
        let challenge = self
            .take_challenge(challenge_id, CeremonyKind::Assertion, None)
            .await?;
        let state: PasskeyAuthentication =
            serde_json::from_str(&challenge.state).context("Corrupt authentication state")?;

        let result = self
            .webauthn
            .finish_passkey_authentication(response, &state)
            .map_err(|err| {
                warn!(user_id = %challenge.user_id, "WebAuthn assertion rejected: {err}");
                AuthError::WebAuthnFailed
            })?;

        let credential_id = encode_credential_id(result.cred_id().as_slice());
        let Some(credential) = self.store.find_webauthn_credential(&credential_id).await? else {
            return Err(AuthError::WebAuthnFailed);
        };
        if credential.user_id != challenge.user_id {
            warn!(
                user_id = %challenge.user_id,
                "Assertion used a credential owned by another user"
            );
            return Err(AuthError::WebAuthnFailed);
        }

        let mut passkey: Passkey = serde_json::from_slice(&credential.public_key)
            .context("Failed to deserialize passkey")?;
        passkey.update_credential(&result);
        let public_key = serde_json::to_vec(&passkey).context("Failed to serialize passkey")?;

        self.commit_assertion(&credential, result.counter(), &public_key)
            .await?;
        Ok(credential.user_id)
    }

    /// Apply the counter rule and persist the new counter atomically.
    ///
    /// # Errors
    /// `WebAuthnFailed` when the counter did not advance or another request
    /// consumed the same counter value first.
    pub async fn commit_assertion(
        &self,
        credential: &WebAuthnCredential,
        presented: u32,
        public_key: &[u8],
    ) -> Result<(), AuthError> {
        if !enforce_sign_count(credential.sign_count, presented) {
            warn!(
                user_id = %credential.user_id,
                credential_id = %credential.credential_id,
                stored = credential.sign_count,
                presented,
                "WebAuthn counter did not advance; possible cloned authenticator"
            );
            return Err(AuthError::WebAuthnFailed);
        }

        let updated = self
            .store
            .update_webauthn_counter(
                credential.id,
                credential.sign_count,
                presented,
                public_key,
                self.clock.now(),
            )
            .await?;
        if !updated {
            warn!(
                user_id = %credential.user_id,
                credential_id = %credential.credential_id,
                "Concurrent WebAuthn assertion lost the counter update"
            );
            return Err(AuthError::WebAuthnFailed);
        }
        Ok(())
    }

    async fn persist_challenge(
        &self,
        user_id: Uuid,
        kind: CeremonyKind,
        state: String,
    ) -> Result<Uuid> {
        let now = self.clock.now();
        let challenge = WebAuthnChallenge {
            id: Uuid::new_v4(),
            user_id,
            kind,
            state,
            expires_at: now
                .checked_add_signed(self.challenge_ttl)
                .context("Challenge expiry out of range")?,
            created_at: now,
        };
        self.store.put_webauthn_challenge(&challenge).await?;
        Ok(challenge.id)
    }

    /// Consume a pending ceremony. The state is gone after this call even
    /// when validation fails.
    ///
    /// # Errors
    /// `WebAuthnFailed` for unknown, expired, wrong-kind, or foreign challenges.
    pub async fn take_challenge(
        &self,
        challenge_id: Uuid,
        kind: CeremonyKind,
        expected_user: Option<Uuid>,
    ) -> Result<WebAuthnChallenge, AuthError> {
        let Some(challenge) = self.store.take_webauthn_challenge(challenge_id).await? else {
            return Err(AuthError::WebAuthnFailed);
        };
        if challenge.kind != kind || challenge.expires_at <= self.clock.now() {
            return Err(AuthError::WebAuthnFailed);
        }
        if expected_user.is_some_and(|user_id| user_id != challenge.user_id) {
            warn!(
                challenge_user = %challenge.user_id,
                "WebAuthn challenge presented by a different user"
            );
            return Err(AuthError::WebAuthnFailed);
        }
        Ok(challenge)
    }

    async fn passkeys_for(&self, user_id: Uuid) -> Result<Vec<(WebAuthnCredential, Passkey)>> {
        let credentials = self.store.list_webauthn_credentials(user_id).await?;
        credentials
            .into_iter()
            .map(|credential| {
                let passkey: Passkey = serde_json::from_slice(&credential.public_key)
                    .context("Failed to deserialize passkey")?;
                Ok((credential, passkey))
            })
            .collect()
    }
}
