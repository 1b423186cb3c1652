//! Bot-check verification for unauthenticated entry points.
//!
//! The HTTP verifier speaks the `siteverify` protocol shared by reCAPTCHA,
//! hCaptcha and Turnstile: a form POST answered with `{"success": bool}`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;
use tracing::{Instrument, debug, info_span};

#[async_trait]
pub trait CaptchaVerifier: Send + Sync {
    /// `Ok(false)` means the provider rejected the token.
    async fn verify(&self, token: &str, client_ip: Option<&str>) -> Result<bool>;
}

/// Accepts any non-empty token. For local development and tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopCaptchaVerifier;

#[async_trait]
impl CaptchaVerifier for NoopCaptchaVerifier {
    async fn verify(&self, token: &str, _client_ip: Option<&str>) -> Result<bool> {
        Ok(!token.trim().is_empty())
    }
}

#[derive(Deserialize)]
struct SiteVerifyResponse {
    success: bool,
    #[serde(default, rename = "error-codes")]
    error_codes: Vec<String>,
}

pub struct HttpCaptchaVerifier {
    client: reqwest::Client,
    verify_url: String,
    secret: SecretString,
}

impl HttpCaptchaVerifier {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(verify_url: String, secret: SecretString) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(Duration::from_secs(5))
            .build()
            .context("Failed to build captcha HTTP client")?;
        Ok(Self {
            client,
            verify_url,
            secret,
        })
    }
}

#[async_trait]
impl CaptchaVerifier for HttpCaptchaVerifier {
    async fn verify(&self, token: &str, client_ip: Option<&str>) -> Result<bool> {
        let token = token.trim();
        if token.is_empty() {
            return Ok(false);
        }

        let mut form = vec![
            ("secret", self.secret.expose_secret()),
            ("response", token),
        ];
        if let Some(ip) = client_ip {
            form.push(("remoteip", ip));
        }

        let span = info_span!("captcha.verify", http.url = %self.verify_url);
        let response: SiteVerifyResponse = async {
            self.client
                .post(&self.verify_url)
                .form(&form)
                .send()
                .await
                .context("Captcha provider unreachable")?
                .error_for_status()
                .context("Captcha provider returned an error status")?
                .json()
                .await
                .context("Captcha provider returned malformed JSON")
        }
        .instrument(span)
        .await?;

        if !response.success {
            debug!(errors = ?response.error_codes, "Captcha rejected");
        }
        Ok(response.success)
    }
}
