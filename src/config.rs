use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use url::Url;

use crate::db::DEFAULT_MAX_POOL_SIZE;
use crate::retry::{RetryPolicy, MAX_DELAY_SECS};

pub const DEFAULT_GOOGLE_JWKS_URL: &str = "https://www.googleapis.com/oauth2/v3/certs";
pub const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-sonnet-4-20250514";
pub const DEFAULT_GRAPH_API_BASE_URL: &str = "https://graph.microsoft.com/v1.0";
pub const DEFAULT_MEET_API_BASE_URL: &str = "https://meet.googleapis.com/v2";

#[derive(Clone, Debug)]
pub struct OAuthClientConfig {
    pub client_id: String,
    pub client_secret: String,
    pub token_url: String,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_pool_size: u32,
    pub server_host: String,
    pub server_port: u16,
    pub cors_allowed_origin: Option<String>,
    pub cron_secret: String,
    pub cron_trust_platform_header: bool,
    pub zoom_webhook_secret: Option<String>,
    pub teams_client_state: Option<String>,
    pub google_push_audience: Option<String>,
    pub google_push_service_account: Option<String>,
    pub google_jwks_url: String,
    pub retry_base_delay_secs: u64,
    pub retry_max_delay_secs: u64,
    pub retry_max_attempts: i32,
    pub retry_batch_size: i64,
    pub retry_lease_secs: u64,
    pub anthropic_api_key: Option<String>,
    pub anthropic_model: String,
    pub anthropic_base_url: String,
    pub graph_api_base_url: String,
    pub meet_api_base_url: String,
    pub zoom_oauth: Option<OAuthClientConfig>,
    pub microsoft_oauth: Option<OAuthClientConfig>,
    pub google_oauth: Option<OAuthClientConfig>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let database_max_pool_size = env::var("DATABASE_MAX_POOL_SIZE")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(DEFAULT_MAX_POOL_SIZE);
        let server_host = env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let server_port = env::var("SERVER_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .context("SERVER_PORT must be a valid u16")?;
        let cors_allowed_origin = env::var("CORS_ALLOWED_ORIGIN").ok();
        let cron_secret = env::var("CRON_SECRET").context("CRON_SECRET must be set")?;
        let cron_trust_platform_header = env::var("CRON_TRUST_PLATFORM_HEADER")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let zoom_webhook_secret = env::var("ZOOM_WEBHOOK_SECRET_TOKEN").ok();
        let teams_client_state = env::var("TEAMS_CLIENT_STATE").ok();
        let google_push_audience = env::var("GOOGLE_PUSH_AUDIENCE").ok();
        let google_push_service_account = env::var("GOOGLE_PUSH_SERVICE_ACCOUNT").ok();
        let google_jwks_url =
            env::var("GOOGLE_JWKS_URL").unwrap_or_else(|_| DEFAULT_GOOGLE_JWKS_URL.to_string());
        let retry_base_delay_secs = env::var("WEBHOOK_RETRY_BASE_DELAY_SECS")
            .unwrap_or_else(|_| "60".to_string())
            .parse()
            .context("WEBHOOK_RETRY_BASE_DELAY_SECS must be an integer")?;
        let retry_max_delay_secs = env::var("WEBHOOK_RETRY_MAX_DELAY_SECS")
            .unwrap_or_else(|_| "3600".to_string())
            .parse()
            .context("WEBHOOK_RETRY_MAX_DELAY_SECS must be an integer")?;
        let retry_max_attempts = env::var("WEBHOOK_RETRY_MAX_ATTEMPTS")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .context("WEBHOOK_RETRY_MAX_ATTEMPTS must be an integer")?;
        let retry_batch_size = env::var("WEBHOOK_RETRY_BATCH_SIZE")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .context("WEBHOOK_RETRY_BATCH_SIZE must be an integer")?;
        let retry_lease_secs = env::var("WEBHOOK_RETRY_LEASE_SECS")
            .unwrap_or_else(|_| "900".to_string())
            .parse()
            .context("WEBHOOK_RETRY_LEASE_SECS must be an integer")?;
        let anthropic_api_key = env::var("ANTHROPIC_API_KEY").ok();
        let anthropic_model =
            env::var("ANTHROPIC_MODEL").unwrap_or_else(|_| DEFAULT_ANTHROPIC_MODEL.to_string());
        let anthropic_base_url = env::var("ANTHROPIC_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_ANTHROPIC_BASE_URL.to_string());
        let graph_api_base_url = env::var("GRAPH_API_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_GRAPH_API_BASE_URL.to_string());
        let meet_api_base_url = env::var("MEET_API_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_MEET_API_BASE_URL.to_string());

        let zoom_oauth = oauth_client_from_env(
            "ZOOM_CLIENT_ID",
            "ZOOM_CLIENT_SECRET",
            "https://zoom.us/oauth/token".to_string(),
        );
        let microsoft_tenant =
            env::var("MICROSOFT_TENANT_ID").unwrap_or_else(|_| "common".to_string());
        let microsoft_oauth = oauth_client_from_env(
            "MICROSOFT_CLIENT_ID",
            "MICROSOFT_CLIENT_SECRET",
            format!("https://login.microsoftonline.com/{microsoft_tenant}/oauth2/v2.0/token"),
        );
        let google_oauth = oauth_client_from_env(
            "GOOGLE_CLIENT_ID",
            "GOOGLE_CLIENT_SECRET",
            "https://oauth2.googleapis.com/token".to_string(),
        );

        Ok(Self {
            database_url,
            database_max_pool_size,
            server_host,
            server_port,
            cors_allowed_origin,
            cron_secret,
            cron_trust_platform_header,
            zoom_webhook_secret,
            teams_client_state,
            google_push_audience,
            google_push_service_account,
            google_jwks_url,
            retry_base_delay_secs,
            retry_max_delay_secs,
            retry_max_attempts,
            retry_batch_size,
            retry_lease_secs,
            anthropic_api_key,
            anthropic_model,
            anthropic_base_url,
            graph_api_base_url,
            meet_api_base_url,
            zoom_oauth,
            microsoft_oauth,
            google_oauth,
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: clamped_secs(self.retry_base_delay_secs),
            max_delay: clamped_secs(self.retry_max_delay_secs),
            max_attempts: self.retry_max_attempts.max(1),
            batch_size: self.retry_batch_size.max(1),
            lease: clamped_secs(self.retry_lease_secs.max(1)),
        }
    }

    pub fn redacted_database_url(&self) -> String {
        redact_database_url(&self.database_url)
    }
}

fn clamped_secs(secs: u64) -> Duration {
    Duration::from_secs(secs.min(MAX_DELAY_SECS.unsigned_abs()))
}

fn oauth_client_from_env(
    id_var: &str,
    secret_var: &str,
    token_url: String,
) -> Option<OAuthClientConfig> {
    let client_id = env::var(id_var).ok()?;
    let client_secret = env::var(secret_var).ok()?;
    Some(OAuthClientConfig {
        client_id,
        client_secret,
        token_url,
    })
}

fn redact_database_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("*****"));
            }
            parsed.to_string()
        }
        Err(_) => "***".to_string(),
    }
}
