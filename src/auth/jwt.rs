use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use jsonwebtoken::{decode, decode_header, jwk::JwkSet, Algorithm, DecodingKey, Validation};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::config::AppConfig;

pub const GOOGLE_ISSUERS: [&str; 2] = ["accounts.google.com", "https://accounts.google.com"];

const JWKS_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Error)]
pub enum PushAuthError {
    #[error("push authentication is not configured")]
    NotConfigured,
    #[error("push token has no key id")]
    MissingKeyId,
    #[error("no signing key matches kid {0}")]
    UnknownKey(String),
    #[error("failed to load signing keys: {0}")]
    Jwks(String),
    #[error("invalid push token: {0}")]
    Invalid(#[from] jsonwebtoken::errors::Error),
    #[error("push token was not issued for the expected service account")]
    ServiceAccount,
}

/// Claims Pub/Sub places in the OIDC token of an authenticated push.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushClaims {
    pub iss: String,
    pub aud: String,
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: Option<bool>,
    pub iat: usize,
    pub exp: usize,
}

#[async_trait]
pub trait PushTokenVerifier: Send + Sync + 'static {
    async fn verify(&self, token: &str) -> Result<PushClaims, PushAuthError>;
}

/// Verifies Pub/Sub push tokens against Google's published signing keys.
pub struct GoogleJwksVerifier {
    http: Client,
    jwks_url: String,
    audience: Option<String>,
    service_account: Option<String>,
    keys: RwLock<Option<(Instant, JwkSet)>>,
}

impl GoogleJwksVerifier {
    pub fn from_config(http: Client, config: &AppConfig) -> Self {
        Self {
            http,
            jwks_url: config.google_jwks_url.clone(),
            audience: config.google_push_audience.clone(),
            service_account: config.google_push_service_account.clone(),
            keys: RwLock::new(None),
        }
    }

    async fn key_set(&self, force_refresh: bool) -> Result<JwkSet, PushAuthError> {
        if !force_refresh {
            let cached = self.keys.read().await;
            if let Some((fetched_at, keys)) = cached.as_ref() {
                if fetched_at.elapsed() < JWKS_TTL {
                    return Ok(keys.clone());
                }
            }
        }

        let keys = self
            .fetch_keys()
            .await
            .map_err(|err| PushAuthError::Jwks(format!("{err:#}")))?;
        *self.keys.write().await = Some((Instant::now(), keys.clone()));
        Ok(keys)
    }

    async fn fetch_keys(&self) -> anyhow::Result<JwkSet> {
        self.http
            .get(&self.jwks_url)
            .send()
            .await
            .context("jwks request failed")?
            .error_for_status()
            .context("jwks endpoint returned an error")?
            .json()
            .await
            .context("jwks response was not a key set")
    }
}

#[async_trait]
impl PushTokenVerifier for GoogleJwksVerifier {
    async fn verify(&self, token: &str) -> Result<PushClaims, PushAuthError> {
        let audience = self.audience.as_deref().ok_or(PushAuthError::NotConfigured)?;
        let header = decode_header(token)?;
        let kid = header.kid.ok_or(PushAuthError::MissingKeyId)?;

        // Google rotates keys; an unknown kid forces one refetch.
        let mut keys = self.key_set(false).await?;
        if keys.find(&kid).is_none() {
            keys = self.key_set(true).await?;
        }
        let jwk = keys
            .find(&kid)
            .ok_or_else(|| PushAuthError::UnknownKey(kid.clone()))?;
        let key = DecodingKey::from_jwk(jwk)?;

        validate_with_key(
            token,
            &key,
            Algorithm::RS256,
            audience,
            self.service_account.as_deref(),
        )
    }
}

pub fn validate_with_key(
    token: &str,
    key: &DecodingKey,
    algorithm: Algorithm,
    audience: &str,
    service_account: Option<&str>,
) -> Result<PushClaims, PushAuthError> {
    let mut validation = Validation::new(algorithm);
    validation.set_audience(&[audience]);
    validation.set_issuer(&GOOGLE_ISSUERS);
    let data = decode::<PushClaims>(token, key, &validation)?;
    let claims = data.claims;

    if let Some(expected) = service_account {
        let verified = claims.email_verified.unwrap_or(false);
        if !verified || claims.email.as_deref() != Some(expected) {
            return Err(PushAuthError::ServiceAccount);
        }
    }

    Ok(claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &[u8] = b"push-secret";
    const AUDIENCE: &str = "https://app.example.com/api/webhooks/google-meet";

    fn token(iss: &str, aud: &str, email: Option<&str>) -> String {
        let now = Utc::now().timestamp() as usize;
        let claims = PushClaims {
            iss: iss.to_string(),
            aud: aud.to_string(),
            sub: "1234".to_string(),
            email: email.map(str::to_string),
            email_verified: Some(true),
            iat: now,
            exp: now + 300,
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET),
        )
        .unwrap()
    }

    fn validate(token: &str, service_account: Option<&str>) -> Result<PushClaims, PushAuthError> {
        validate_with_key(
            token,
            &DecodingKey::from_secret(SECRET),
            Algorithm::HS256,
            AUDIENCE,
            service_account,
        )
    }

    #[test]
    fn accepts_google_issued_token() {
        let claims = validate(&token("https://accounts.google.com", AUDIENCE, None), None).unwrap();
        assert_eq!(claims.sub, "1234");
    }

    #[test]
    fn rejects_wrong_audience_or_issuer() {
        assert!(validate(&token("accounts.google.com", "https://other", None), None).is_err());
        assert!(validate(&token("https://evil.example.com", AUDIENCE, None), None).is_err());
    }

    #[test]
    fn enforces_service_account_when_configured() {
        let sa = "push@project.iam.gserviceaccount.com";
        let ok = token("accounts.google.com", AUDIENCE, Some(sa));
        assert!(validate(&ok, Some(sa)).is_ok());

        let other = token("accounts.google.com", AUDIENCE, Some("someone@example.com"));
        assert!(matches!(
            validate(&other, Some(sa)),
            Err(PushAuthError::ServiceAccount)
        ));
    }
}
