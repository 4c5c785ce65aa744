//! External identity providers
//! Mission: Exchange third-party ID or access tokens for a verified identity
//!
//! Provider calls are bounded by a caller-supplied timeout and every failure is
//! mapped to a [`Rejection`]; raw transport errors never reach the client.

use crate::pipeline::Rejection;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub const GOOGLE_TOKENINFO_URL: &str = "https://oauth2.googleapis.com/tokeninfo";

/// Identity asserted by an external provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalIdentity {
    pub provider_subject: String,
    pub email: String,
    pub name: Option<String>,
    pub email_verified: bool,
}

impl ExternalIdentity {
    /// Display name, falling back to the email local part.
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) if !name.trim().is_empty() => name.trim().to_string(),
            _ => self
                .email
                .split('@')
                .next()
                .unwrap_or_default()
                .to_string(),
        }
    }
}

/// Credential handed over by the client after a third-party sign-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExternalCredential {
    IdToken(String),
    AccessToken(String),
}

impl ExternalCredential {
    /// ID token when given and non-blank, else access token.
    pub fn pick(id_token: Option<String>, access_token: Option<String>) -> Option<Self> {
        let present = |t: Option<String>| t.filter(|t| !t.trim().is_empty());
        present(id_token)
            .map(ExternalCredential::IdToken)
            .or_else(|| present(access_token).map(ExternalCredential::AccessToken))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ExternalCredential::IdToken(_) => "id_token",
            ExternalCredential::AccessToken(_) => "access_token",
        }
    }

    pub fn token(&self) -> &str {
        match self {
            ExternalCredential::IdToken(t) | ExternalCredential::AccessToken(t) => t,
        }
    }
}

#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider looked at the credential and refused it.
    #[error("credential rejected by provider: {0}")]
    Rejected(String),

    /// The provider could not be reached or answered nonsense.
    #[error("provider request failed: {0}")]
    Transport(String),
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn verify(&self, credential: &ExternalCredential)
        -> Result<ExternalIdentity, ProviderError>;
}

/// Verify `credential` with `provider`, giving up after `timeout`.
pub async fn verify_external(
    provider: &dyn IdentityProvider,
    credential: &ExternalCredential,
    timeout: Duration,
) -> Result<ExternalIdentity, Rejection> {
    match tokio::time::timeout(timeout, provider.verify(credential)).await {
        Ok(Ok(identity)) => {
            debug!(
                provider = provider.name(),
                kind = credential.kind(),
                "External credential verified"
            );
            Ok(identity)
        }
        Ok(Err(ProviderError::Rejected(reason))) => {
            debug!(provider = provider.name(), %reason, "External credential rejected");
            Err(Rejection::InvalidCredential {
                cause: "provider_rejected",
            })
        }
        Ok(Err(ProviderError::Transport(reason))) => {
            warn!(provider = provider.name(), %reason, "Identity provider request failed");
            Err(Rejection::ProviderUnavailable)
        }
        Err(_) => {
            warn!(
                provider = provider.name(),
                timeout_ms = timeout.as_millis() as u64,
                "Identity provider timed out"
            );
            Err(Rejection::ProviderUnavailable)
        }
    }
}

/// Google token verification through the `tokeninfo` endpoint.
///
/// Access tokens are checked there too, so both credential kinds are held to
/// the same audience rule.
pub struct GoogleTokenInfo {
    http_client: reqwest::Client,
    client_id: String,
    endpoint: String,
}

impl GoogleTokenInfo {
    pub fn new(http_client: reqwest::Client, client_id: impl Into<String>) -> Self {
        Self::with_endpoint(http_client, client_id, GOOGLE_TOKENINFO_URL)
    }

    pub fn with_endpoint(
        http_client: reqwest::Client,
        client_id: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            http_client,
            client_id: client_id.into(),
            endpoint: endpoint.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenInfo {
    sub: String,
    aud: Option<String>,
    /// Authorized party; the client an access token was issued to.
    azp: Option<String>,
    email: Option<String>,
    /// Google encodes this as the string "true"/"false".
    email_verified: Option<String>,
    name: Option<String>,
}

#[async_trait]
impl IdentityProvider for GoogleTokenInfo {
    fn name(&self) -> &'static str {
        "google"
    }

    async fn verify(
        &self,
        credential: &ExternalCredential,
    ) -> Result<ExternalIdentity, ProviderError> {
        let resp = self
            .http_client
            .get(&self.endpoint)
            .query(&[(credential.kind(), credential.token())])
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = resp.status();
        if status.is_client_error() {
            return Err(ProviderError::Rejected(format!("tokeninfo returned {status}")));
        }
        if !status.is_success() {
            return Err(ProviderError::Transport(format!("tokeninfo returned {status}")));
        }

        let info = resp
            .json::<TokenInfo>()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let issued_to_us = [&info.aud, &info.azp]
            .into_iter()
            .any(|party| party.as_deref() == Some(self.client_id.as_str()));
        if !issued_to_us {
            return Err(ProviderError::Rejected("audience mismatch".to_string()));
        }

        let email = info
            .email
            .filter(|e| !e.is_empty())
            .ok_or_else(|| ProviderError::Rejected("token carries no email".to_string()))?;

        Ok(ExternalIdentity {
            provider_subject: info.sub,
            email,
            name: info.name,
            email_verified: info.email_verified.as_deref() == Some("true"),
        })
    }
}
