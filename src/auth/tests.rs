use super::*;
use crate::{
    clock::{Clock, ManualClock},
    lockout::LockoutPolicy,
    store::{CredentialStore, MemoryStore, WebAuthnCredential},
    tenancy::{Permission, Policy, StoreRole, TenancyContext},
    token::TokenPair,
    totp,
    webauthn::encode_credential_id,
};
use anyhow::Result;
use chrono::{Duration, Utc};
use secrecy::SecretString;
use std::sync::Arc;
use totp_rs::Secret;
use url::Url;
use uuid::Uuid;
use webauthn_authenticator_rs::{WebauthnAuthenticator, softpasskey::SoftPasskey};

const MFA_KEY: &str = "AAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8=";
const PASSWORD: &str = "Passw0rd!";

struct Harness {
    flows: AuthFlows,
    store: Arc<MemoryStore>,
    clock: ManualClock,
}

fn harness() -> Result<Harness> {
    harness_with(LockoutPolicy::default())
}

fn harness_with(lockout: LockoutPolicy) -> Result<Harness> {
    let config = AuthConfig::new(
        "https://shop.storegate.dev".to_string(),
        SecretString::from(MFA_KEY),
    )
    .with_lockout(lockout);
    let store = Arc::new(MemoryStore::new());
    let clock = ManualClock::new(Utc::now());
    let flows = AuthFlows::new(
        config,
        store.clone(),
        Arc::new(clock.clone()),
        Arc::new(NoopCaptchaVerifier),
    )?;
    Ok(Harness {
        flows,
        store,
        clock,
    })
}

fn meta() -> RequestMeta {
    RequestMeta {
        client_ip: Some("203.0.113.7".to_string()),
        user_agent: Some("storegate-tests".to_string()),
    }
}

fn registration(email: &str, password: &str) -> RegisterInput {
    RegisterInput {
        email: email.to_string(),
        password: password.to_string(),
        captcha_token: "ok".to_string(),
    }
}

fn credentials(email: &str, password: &str) -> LoginInput {
    LoginInput {
        email: email.to_string(),
        password: password.to_string(),
        captcha_token: "ok".to_string(),
        mfa_code: None,
    }
}

impl Harness {
    async fn register(&self, email: &str) -> Result<TokenPair> {
        Ok(self
            .flows
            .register(registration(email, PASSWORD), &meta())
            .await?)
    }

    /// Each attempt lands one second after the previous one.
    async fn login(&self, email: &str, password: &str) -> Result<TokenPair, AuthError> {
        self.clock.advance(Duration::seconds(1));
        self.flows.login(credentials(email, password), &meta()).await
    }

    async fn context(&self, pair: &TokenPair, store_id: Option<Uuid>) -> Result<TenancyContext> {
        Ok(self
            .flows
            .resolve(Some(&pair.access_token), store_id)
            .await?)
    }
}

#[tokio::test]
async fn alice_is_locked_after_five_failures_and_recovers() -> Result<()> {
    let h = harness()?;
    h.register("alice@x.com").await?;
    h.login("alice@x.com", PASSWORD).await?;

    for attempt in 1..=5 {
        let result = h.login("alice@x.com", "wrong-password").await;
        assert!(
            matches!(result, Err(AuthError::InvalidCredentials)),
            "attempt {attempt}"
        );
    }

    // Sixth attempt is locked even with the right password.
    let result = h.login("alice@x.com", PASSWORD).await;
    assert!(matches!(result, Err(AuthError::AccountLocked)));
    assert_eq!(result.err().map(|e| e.status().as_u16()), Some(423));

    h.clock.advance(Duration::minutes(16));
    h.login("alice@x.com", PASSWORD).await?;

    let user = h.store.find_user_by_email("alice@x.com").await?;
    assert!(user.is_some_and(|u| !u.locked && u.lockout_end.is_none()));
    Ok(())
}

#[test]
fn unrepresentable_lifetimes_are_rejected_at_startup() {
    for config in [
        AuthConfig::new(
            "https://shop.storegate.dev".to_string(),
            SecretString::from(MFA_KEY),
        )
        .with_refresh_ttl_days(1_000_000_000),
        AuthConfig::new(
            "https://shop.storegate.dev".to_string(),
            SecretString::from(MFA_KEY),
        )
        .with_lockout(LockoutPolicy::new(5, i64::MAX / 2)),
        AuthConfig::new(
            "https://shop.storegate.dev".to_string(),
            SecretString::from(MFA_KEY),
        )
        .with_webauthn_challenge_ttl_seconds(i64::MAX),
    ] {
        let flows = AuthFlows::new(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(ManualClock::new(Utc::now())),
            Arc::new(NoopCaptchaVerifier),
        );
        assert!(flows.is_err());
    }
}

#[tokio::test]
async fn lockout_threshold_is_configurable() -> Result<()> {
    let h = harness_with(LockoutPolicy::new(2, 1))?;
    h.register("carol@x.com").await?;
    for _ in 0..2 {
        assert!(h.login("carol@x.com", "nope-nope").await.is_err());
    }
    assert!(matches!(
        h.login("carol@x.com", PASSWORD).await,
        Err(AuthError::AccountLocked)
    ));
    h.clock.advance(Duration::seconds(61));
    assert!(h.login("carol@x.com", PASSWORD).await.is_ok());
    Ok(())
}

#[tokio::test]
async fn success_resets_the_consecutive_failure_count() -> Result<()> {
    let h = harness()?;
    h.register("dave@x.com").await?;
    for _ in 0..4 {
        assert!(h.login("dave@x.com", "bad-password").await.is_err());
    }
    h.login("dave@x.com", PASSWORD).await?;
    for _ in 0..4 {
        assert!(h.login("dave@x.com", "bad-password").await.is_err());
    }
    // Eight failures in the window, but never five in a row.
    assert!(h.login("dave@x.com", PASSWORD).await.is_ok());
    Ok(())
}

#[tokio::test]
async fn duplicate_registration_is_case_insensitive() -> Result<()> {
    let h = harness()?;
    h.register("alice@x.com").await?;
    let result = h
        .flows
        .register(registration("  ALICE@X.com ", "Another1!"), &meta())
        .await;
    assert!(matches!(result, Err(AuthError::EmailTaken)));
    assert_eq!(result.err().map(|e| e.status().as_u16()), Some(409));

    // The original password still works; no second row replaced it.
    assert!(h.login("Alice@X.com", PASSWORD).await.is_ok());
    Ok(())
}

#[tokio::test]
async fn registration_validates_before_side_effects() -> Result<()> {
    let h = harness()?;
    let bad_email = h
        .flows
        .register(registration("not-an-email", PASSWORD), &meta())
        .await;
    assert!(matches!(bad_email, Err(AuthError::InvalidInput(_))));

    let short = h
        .flows
        .register(registration("eve@x.com", "short"), &meta())
        .await;
    assert!(matches!(short, Err(AuthError::InvalidInput(_))));

    let mut no_captcha = registration("eve@x.com", PASSWORD);
    no_captcha.captcha_token = "  ".to_string();
    let result = h.flows.register(no_captcha, &meta()).await;
    assert!(matches!(result, Err(AuthError::CaptchaInvalid)));

    assert!(h.store.find_user_by_email("eve@x.com").await?.is_none());
    Ok(())
}

#[tokio::test]
async fn unknown_email_is_recorded_and_generic() -> Result<()> {
    let h = harness()?;
    let result = h.login("ghost@x.com", PASSWORD).await;
    assert!(matches!(result, Err(AuthError::InvalidCredentials)));

    let since = h.clock.now() - Duration::minutes(1);
    assert_eq!(
        h.store.count_failed_attempts_since("ghost@x.com", since).await?,
        1
    );
    Ok(())
}

#[tokio::test]
async fn access_token_works_until_expiry() -> Result<()> {
    let h = harness()?;
    let pair = h.register("frank@x.com").await?;

    let context = h.context(&pair, None).await?;
    assert_eq!(context.user_id(), Some(pair.user_id));

    h.clock.advance(Duration::minutes(15));
    let context = h.context(&pair, None).await?;
    assert!(!context.is_authenticated());
    Ok(())
}

#[tokio::test]
async fn refresh_reuse_revokes_the_whole_family() -> Result<()> {
    let h = harness()?;
    let first = h.register("gina@x.com").await?;

    let second = h
        .flows
        .refresh(Some(&first.refresh_token), &meta())
        .await?;
    assert_ne!(second.refresh_token, first.refresh_token);

    let reuse = h.flows.refresh(Some(&first.refresh_token), &meta()).await;
    assert!(matches!(reuse, Err(AuthError::InvalidToken)));

    // The legitimate successor died with the family.
    let successor = h.flows.refresh(Some(&second.refresh_token), &meta()).await;
    assert!(matches!(successor, Err(AuthError::InvalidToken)));
    assert!(!h.context(&second, None).await?.is_authenticated());

    let third = h.flows.refresh(Some(&first.refresh_token), &meta()).await;
    assert!(matches!(third, Err(AuthError::InvalidToken)));
    Ok(())
}

#[tokio::test]
async fn refresh_requires_a_secret() -> Result<()> {
    let h = harness()?;
    assert!(matches!(
        h.flows.refresh(None, &meta()).await,
        Err(AuthError::InvalidToken)
    ));
    assert!(matches!(
        h.flows.refresh(Some("forged"), &meta()).await,
        Err(AuthError::InvalidToken)
    ));
    Ok(())
}

#[tokio::test]
async fn logout_revokes_refresh_and_access() -> Result<()> {
    let h = harness()?;
    let pair = h.register("hank@x.com").await?;
    let context = h.context(&pair, None).await?;

    h.flows
        .logout(Some(&pair.refresh_token), &context)
        .await?;

    assert!(!h.context(&pair, None).await?.is_authenticated());
    let result = h.flows.refresh(Some(&pair.refresh_token), &meta()).await;
    assert!(matches!(result, Err(AuthError::InvalidToken)));

    // Anonymous logout with nothing to revoke still succeeds.
    h.flows
        .logout(None, &TenancyContext::anonymous(None))
        .await?;
    Ok(())
}

async fn enroll_and_confirm(h: &Harness, pair: &TokenPair) -> Result<Vec<u8>> {
    let context = h.context(pair, None).await?;
    let enrollment = h.flows.mfa_enroll(&context).await?;
    assert!(enrollment.provisioning_uri.starts_with("otpauth://totp/"));

    let seed = Secret::Encoded(enrollment.secret_base32)
        .to_bytes()
        .map_err(|e| anyhow::anyhow!("{e:?}"))?;

    let early = h.flows.mfa_verify(&context, "000000").await;
    if totp::code_at(&seed, h.clock.now())? != "000000" {
        assert!(matches!(early, Err(AuthError::InvalidMfaCode)));
    }

    let code = totp::code_at(&seed, h.clock.now())?;
    h.flows.mfa_verify(&context, &code).await?;
    Ok(seed)
}

#[tokio::test]
async fn mfa_login_requires_a_current_code() -> Result<()> {
    let h = harness()?;
    let pair = h.register("ivy@x.com").await?;
    let seed = enroll_and_confirm(&h, &pair).await?;

    let missing = h.login("ivy@x.com", PASSWORD).await;
    assert!(matches!(missing, Err(AuthError::MfaRequired)));
    assert_eq!(missing.err().map(|e| e.reason()), Some("mfa_required"));

    let mut input = credentials("ivy@x.com", PASSWORD);
    input.mfa_code = Some(totp::code_at(&seed, h.clock.now() - Duration::seconds(120))?);
    let current = totp::code_at(&seed, h.clock.now())?;
    if input.mfa_code.as_deref() != Some(current.as_str()) {
        let stale = h.flows.login(input.clone(), &meta()).await;
        assert!(matches!(stale, Err(AuthError::InvalidMfaCode)));
    }

    input.mfa_code = Some(current);
    assert!(h.flows.login(input, &meta()).await.is_ok());
    Ok(())
}

#[tokio::test]
async fn mfa_cannot_be_enrolled_twice() -> Result<()> {
    let h = harness()?;
    let pair = h.register("jack@x.com").await?;
    enroll_and_confirm(&h, &pair).await?;

    let context = h.context(&pair, None).await?;
    let again = h.flows.mfa_enroll(&context).await;
    assert!(matches!(again, Err(AuthError::MfaAlreadyEnabled)));
    Ok(())
}

#[tokio::test]
async fn mfa_endpoints_reject_anonymous_callers() -> Result<()> {
    let h = harness()?;
    let anonymous = TenancyContext::anonymous(None);
    assert!(matches!(
        h.flows.mfa_enroll(&anonymous).await,
        Err(AuthError::Unauthenticated)
    ));
    assert!(matches!(
        h.flows.mfa_verify(&anonymous, "123456").await,
        Err(AuthError::Unauthenticated)
    ));
    Ok(())
}

#[tokio::test]
async fn staff_reads_orders_and_explicit_grant_adds_product_writes() -> Result<()> {
    let h = harness()?;
    let pair = h.register("staff@x.com").await?;
    let store_id = Uuid::new_v4();
    h.store
        .upsert_store_role(store_id, pair.user_id, StoreRole::Staff)
        .await?;

    let context = h.context(&pair, Some(store_id)).await?;
    assert!(
        h.flows
            .authorize(&context, Policy::StorePermission(Permission::OrdersRead))
            .is_ok()
    );
    assert!(matches!(
        h.flows
            .authorize(&context, Policy::StorePermission(Permission::OrdersWrite)),
        Err(AuthError::Forbidden)
    ));
    assert!(matches!(
        h.flows
            .authorize(&context, Policy::StorePermission(Permission::ProductsWrite)),
        Err(AuthError::Forbidden)
    ));

    h.store
        .grant_store_permission(store_id, pair.user_id, Permission::ProductsWrite.as_str())
        .await?;
    let context = h.context(&pair, Some(store_id)).await?;
    assert!(
        h.flows
            .authorize(&context, Policy::StorePermission(Permission::ProductsWrite))
            .is_ok()
    );
    Ok(())
}

#[tokio::test]
async fn store_permissions_need_an_active_store() -> Result<()> {
    let h = harness()?;
    let pair = h.register("owner@x.com").await?;
    let store_id = Uuid::new_v4();
    h.store
        .upsert_store_role(store_id, pair.user_id, StoreRole::Owner)
        .await?;

    let context = h.context(&pair, None).await?;
    assert!(matches!(
        h.flows
            .authorize(&context, Policy::StorePermission(Permission::OrdersRead)),
        Err(AuthError::Forbidden)
    ));
    Ok(())
}

struct InviteSetup {
    store_id: Uuid,
    owner: TokenPair,
}

async fn store_with_owner(h: &Harness) -> Result<InviteSetup> {
    let owner = h.register("boss@x.com").await?;
    let store_id = Uuid::new_v4();
    h.store
        .upsert_store_role(store_id, owner.user_id, StoreRole::Owner)
        .await?;
    Ok(InviteSetup { store_id, owner })
}

#[tokio::test]
async fn invitation_grants_the_role_once() -> Result<()> {
    let h = harness()?;
    let setup = store_with_owner(&h).await?;
    let owner_context = h.context(&setup.owner, Some(setup.store_id)).await?;

    let grant = h
        .flows
        .create_invite(&owner_context, setup.store_id, "Bob@X.com", StoreRole::Staff)
        .await?;
    assert_eq!(grant.email, "bob@x.com");
    assert_eq!(grant.expires_at, h.clock.now() + Duration::days(7));

    let bob = h.register("bob@x.com").await?;
    let bob_context = h.context(&bob, None).await?;
    let (store_id, role) = h.flows.accept_invite(&bob_context, &grant.token).await?;
    assert_eq!((store_id, role), (setup.store_id, StoreRole::Staff));

    let bob_in_store = h.context(&bob, Some(setup.store_id)).await?;
    assert!(bob_in_store.has_permission(Permission::OrdersRead));

    let again = h.flows.accept_invite(&bob_context, &grant.token).await;
    assert!(matches!(again, Err(AuthError::InviteInvalid)));
    Ok(())
}

#[tokio::test]
async fn invitation_is_bound_to_email_and_expiry() -> Result<()> {
    let h = harness()?;
    let setup = store_with_owner(&h).await?;
    let owner_context = h.context(&setup.owner, Some(setup.store_id)).await?;
    let grant = h
        .flows
        .create_invite(&owner_context, setup.store_id, "bob@x.com", StoreRole::Admin)
        .await?;

    let mallory = h.register("mallory@x.com").await?;
    let mallory_context = h.context(&mallory, None).await?;
    let stolen = h.flows.accept_invite(&mallory_context, &grant.token).await;
    assert!(matches!(stolen, Err(AuthError::InviteInvalid)));

    let bob = h.register("bob@x.com").await?;
    h.clock.advance(Duration::days(7));
    let bob_context = h.flows.resolve(Some(&bob.access_token), None).await?;
    // Access token expired along with the invite; refresh first.
    assert!(!bob_context.is_authenticated());
    let bob = h.flows.refresh(Some(&bob.refresh_token), &meta()).await?;
    let bob_context = h.context(&bob, None).await?;
    let expired = h.flows.accept_invite(&bob_context, &grant.token).await;
    assert!(matches!(expired, Err(AuthError::InviteInvalid)));
    Ok(())
}

#[tokio::test]
async fn only_staff_managers_of_the_active_store_can_invite() -> Result<()> {
    let h = harness()?;
    let setup = store_with_owner(&h).await?;

    let anonymous = TenancyContext::anonymous(Some(setup.store_id));
    let result = h
        .flows
        .create_invite(&anonymous, setup.store_id, "x@x.com", StoreRole::Staff)
        .await;
    assert!(matches!(result, Err(AuthError::Unauthenticated)));

    // Active store differs from the target store.
    let other_store = Uuid::new_v4();
    h.store
        .upsert_store_role(other_store, setup.owner.user_id, StoreRole::Owner)
        .await?;
    let context = h.context(&setup.owner, Some(other_store)).await?;
    let result = h
        .flows
        .create_invite(&context, setup.store_id, "x@x.com", StoreRole::Staff)
        .await;
    assert!(matches!(result, Err(AuthError::Forbidden)));

    let staff = h.register("clerk@x.com").await?;
    h.store
        .upsert_store_role(setup.store_id, staff.user_id, StoreRole::Staff)
        .await?;
    let context = h.context(&staff, Some(setup.store_id)).await?;
    let result = h
        .flows
        .create_invite(&context, setup.store_id, "x@x.com", StoreRole::Staff)
        .await;
    assert!(matches!(result, Err(AuthError::Forbidden)));

    let context = h.context(&setup.owner, Some(setup.store_id)).await?;
    let result = h
        .flows
        .create_invite(&context, setup.store_id, "x@x.com", StoreRole::Owner)
        .await;
    assert!(matches!(result, Err(AuthError::InvalidInput(_))));
    Ok(())
}

#[tokio::test]
async fn passkey_login_options_do_not_reveal_accounts() -> Result<()> {
    let h = harness()?;
    h.register("kim@x.com").await?;

    let unknown = h.flows.webauthn_login_options("nobody@x.com").await;
    let no_passkey = h.flows.webauthn_login_options("kim@x.com").await;
    assert!(matches!(unknown, Err(AuthError::InvalidCredentials)));
    assert!(matches!(no_passkey, Err(AuthError::InvalidCredentials)));
    Ok(())
}

#[tokio::test]
async fn passkey_registration_options_need_a_session() -> Result<()> {
    let h = harness()?;
    let anonymous = TenancyContext::anonymous(None);
    assert!(matches!(
        h.flows.webauthn_register_options(&anonymous, None).await,
        Err(AuthError::Unauthenticated)
    ));

    let pair = h.register("lee@x.com").await?;
    let context = h.context(&pair, None).await?;
    let (_, options) = h.flows.webauthn_register_options(&context, None).await?;
    assert_eq!(options.public_key.rp.id, "shop.storegate.dev");
    assert_eq!(options.public_key.user.name, "lee@x.com");
    assert_eq!(options.public_key.user.display_name, "lee@x.com");

    let (_, options) = h
        .flows
        .webauthn_register_options(&context, Some("  Lee's YubiKey "))
        .await?;
    assert_eq!(options.public_key.user.name, "lee@x.com");
    assert_eq!(options.public_key.user.display_name, "Lee's YubiKey");
    Ok(())
}

#[tokio::test]
async fn passkey_registers_then_signs_in_once_per_challenge() -> Result<()> {
    let h = harness()?;
    let pair = h.register("nia@x.com").await?;
    let context = h.context(&pair, None).await?;
    let origin = Url::parse("https://shop.storegate.dev")?;
    let mut authenticator = WebauthnAuthenticator::new(SoftPasskey::new(true));

    let (challenge_id, options) = h
        .flows
        .webauthn_register_options(&context, Some("Nia's laptop"))
        .await?;
    let attestation = authenticator
        .do_registration(origin.clone(), options)
        .map_err(|e| anyhow::anyhow!("{e:?}"))?;
    let stored = h
        .flows
        .webauthn_register_verify(&context, challenge_id, &attestation, Vec::new())
        .await?;
    assert_eq!(stored.user_id, pair.user_id);

    // An attestation only verifies against the challenge it signed.
    let (challenge_id, _) = h.flows.webauthn_register_options(&context, None).await?;
    assert!(matches!(
        h.flows
            .webauthn_register_verify(&context, challenge_id, &attestation, Vec::new())
            .await,
        Err(AuthError::WebAuthnFailed)
    ));

    let (challenge_id, options) = h.flows.webauthn_login_options("NIA@x.com").await?;
    let assertion = authenticator
        .do_authentication(origin, options)
        .map_err(|e| anyhow::anyhow!("{e:?}"))?;
    let session = h
        .flows
        .webauthn_login_verify(challenge_id, &assertion, &meta())
        .await?;
    assert_eq!(session.user_id, pair.user_id);
    let resumed = h.context(&session, None).await?;
    assert_eq!(resumed.user_id(), Some(pair.user_id));

    assert!(matches!(
        h.flows
            .webauthn_login_verify(challenge_id, &assertion, &meta())
            .await,
        Err(AuthError::WebAuthnFailed)
    ));
    Ok(())
}

#[tokio::test]
async fn passkey_counter_must_advance_and_is_persisted() -> Result<()> {
    let h = harness()?;
    let pair = h.register("max@x.com").await?;
    let credential = WebAuthnCredential {
        id: Uuid::new_v4(),
        user_id: pair.user_id,
        credential_id: encode_credential_id(b"max-key"),
        public_key: b"{}".to_vec(),
        sign_count: 10,
        credential_type: "public-key".to_string(),
        transports: Vec::new(),
        created_at: h.clock.now(),
        last_used_at: None,
    };
    h.store.insert_webauthn_credential(&credential).await?;

    let replay = h.flows.webauthn().commit_assertion(&credential, 10, b"{}").await;
    assert!(matches!(replay, Err(AuthError::WebAuthnFailed)));

    h.flows
        .webauthn()
        .commit_assertion(&credential, 11, b"{}")
        .await?;
    let stored = h
        .store
        .find_webauthn_credential(&credential.credential_id)
        .await?;
    assert_eq!(stored.map(|c| c.sign_count), Some(11));
    Ok(())
}
