use crate::{
    api,
    auth::{AuthConfig, AuthFlows, CaptchaVerifier, HttpCaptchaVerifier, NoopCaptchaVerifier},
    cli::commands::auth::{CaptchaOptions, Options},
    clock::SystemClock,
    lockout::LockoutPolicy,
    store::{CredentialStore, MemoryStore, PgStore},
};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: Option<String>,
    pub auth: Options,
}

/// Translate CLI options into the orchestrator configuration.
#[must_use]
pub fn auth_config(options: Options) -> (AuthConfig, Option<CaptchaOptions>) {
    let mut config = AuthConfig::new(options.frontend_url, options.mfa_encryption_key)
        .with_refresh_ttl_days(options.refresh_ttl_days)
        .with_lockout(LockoutPolicy::new(
            options.max_failed_attempts,
            options.lockout_minutes,
        ))
        .with_webauthn_challenge_ttl_seconds(options.webauthn_challenge_ttl_seconds)
        .with_mfa_issuer(options.mfa_issuer);

    if let Some(rp_id) = options.webauthn_rp_id {
        config = config.with_webauthn_rp_id(rp_id);
    }
    if let Some(rp_origin) = options.webauthn_rp_origin {
        config = config.with_webauthn_rp_origin(rp_origin);
    }
    if let Some(rp_name) = options.webauthn_rp_name {
        config = config.with_webauthn_rp_name(rp_name);
    }

    (config, options.captcha)
}

/// # Errors
/// Returns an error if the HTTP client cannot be built.
pub fn captcha_verifier(options: Option<CaptchaOptions>) -> Result<Arc<dyn CaptchaVerifier>> {
    match options {
        Some(options) => Ok(Arc::new(HttpCaptchaVerifier::new(
            options.verify_url,
            options.secret,
        )?)),
        None => {
            warn!("No captcha verifier configured: any non-empty captcha token is accepted");
            Ok(Arc::new(NoopCaptchaVerifier))
        }
    }
}

async fn credential_store(dsn: Option<&str>) -> Result<Arc<dyn CredentialStore>> {
    if let Some(dsn) = dsn {
        let store = PgStore::connect(dsn).await?;
        info!("Using PostgreSQL credential store");
        return Ok(Arc::new(store));
    }
    warn!("No DSN configured: using the in-memory credential store, all state is lost on restart");
    Ok(Arc::new(MemoryStore::new()))
}

/// Execute the server action.
/// # Errors
/// Returns an error if the store, configuration, or listener cannot be set up.
pub async fn execute(args: Args) -> Result<()> {
    let (config, captcha) = auth_config(args.auth);
    let captcha = captcha_verifier(captcha)?;
    let store = credential_store(args.dsn.as_deref()).await?;

    let flows = AuthFlows::new(config, store, Arc::new(SystemClock), captcha)
        .context("Invalid authentication configuration")?;

    api::serve(args.port, Arc::new(flows)).await
}
