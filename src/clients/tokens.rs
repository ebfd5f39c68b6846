use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDateTime, Utc};
use diesel::prelude::*;
use reqwest::Client;
use serde::Deserialize;
use tokio::task;

use crate::config::{AppConfig, OAuthClientConfig};
use crate::db::PgPool;
use crate::models::PlatformConnection;
use crate::platform::Platform;
use crate::schema::platform_connections;

/// Tokens this close to expiry are refreshed before use.
const EXPIRY_LEEWAY_SECS: i64 = 60;

/// Hands out a usable OAuth access token for the account that owns a meeting.
#[async_trait]
pub trait TokenProvider: Send + Sync + 'static {
    async fn access_token(&self, platform: Platform, account_key: &str) -> Result<String>;
}

/// Reads tokens from `platform_connections` and refreshes expired ones
/// through the platform's OAuth token endpoint.
pub struct StoredTokenProvider {
    pool: PgPool,
    http: Client,
    zoom: Option<OAuthClientConfig>,
    microsoft: Option<OAuthClientConfig>,
    google: Option<OAuthClientConfig>,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

impl StoredTokenProvider {
    pub fn new(pool: PgPool, http: Client, config: &AppConfig) -> Self {
        Self {
            pool,
            http,
            zoom: config.zoom_oauth.clone(),
            microsoft: config.microsoft_oauth.clone(),
            google: config.google_oauth.clone(),
        }
    }

    fn oauth_client(&self, platform: Platform) -> Option<&OAuthClientConfig> {
        match platform {
            Platform::Zoom => self.zoom.as_ref(),
            Platform::MicrosoftTeams => self.microsoft.as_ref(),
            Platform::GoogleMeet => self.google.as_ref(),
        }
    }

    async fn load_connection(
        &self,
        platform: Platform,
        account_key: &str,
    ) -> Result<Option<PlatformConnection>> {
        let pool = self.pool.clone();
        let account_key = account_key.to_string();
        task::spawn_blocking(move || -> Result<Option<PlatformConnection>> {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("database pool error: {err}"))?;
            let row = platform_connections::table
                .filter(platform_connections::platform.eq(platform.as_str()))
                .filter(platform_connections::account_key.eq(&account_key))
                .first(&mut conn)
                .optional()?;
            Ok(row)
        })
        .await
        .context("token lookup task panicked")?
    }

    async fn refresh(
        &self,
        platform: Platform,
        connection: &PlatformConnection,
    ) -> Result<String> {
        let client = self
            .oauth_client(platform)
            .ok_or_else(|| anyhow!("no OAuth client configured for {platform}"))?;
        let refresh_token = connection
            .refresh_token
            .as_deref()
            .ok_or_else(|| anyhow!("access token expired and no refresh token stored"))?;

        let mut form = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];
        let mut request = self.http.post(&client.token_url);
        if platform == Platform::Zoom {
            request = request.basic_auth(&client.client_id, Some(&client.client_secret));
        } else {
            form.push(("client_id", client.client_id.as_str()));
            form.push(("client_secret", client.client_secret.as_str()));
        }

        let refreshed: RefreshResponse = request
            .form(&form)
            .send()
            .await
            .context("token refresh request failed")?
            .error_for_status()
            .context("token refresh rejected")?
            .json()
            .await
            .context("token refresh response was not JSON")?;

        let expires_at = refreshed
            .expires_in
            .map(|secs| (Utc::now() + ChronoDuration::seconds(secs)).naive_utc());
        self.store_refreshed(connection.id, &refreshed, expires_at)
            .await?;

        Ok(refreshed.access_token)
    }

    async fn store_refreshed(
        &self,
        connection_id: uuid::Uuid,
        refreshed: &RefreshResponse,
        expires_at: Option<NaiveDateTime>,
    ) -> Result<()> {
        let pool = self.pool.clone();
        let access_token = refreshed.access_token.clone();
        let refresh_token = refreshed.refresh_token.clone();
        task::spawn_blocking(move || -> Result<()> {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("database pool error: {err}"))?;
            let now = Utc::now().naive_utc();
            diesel::update(platform_connections::table.find(connection_id))
                .set((
                    platform_connections::access_token.eq(&access_token),
                    platform_connections::expires_at.eq(expires_at),
                    platform_connections::updated_at.eq(now),
                ))
                .execute(&mut conn)?;
            // Providers that rotate refresh tokens send a new one; others omit it.
            if let Some(refresh_token) = refresh_token {
                diesel::update(platform_connections::table.find(connection_id))
                    .set(platform_connections::refresh_token.eq(Some(refresh_token)))
                    .execute(&mut conn)?;
            }
            Ok(())
        })
        .await
        .context("token update task panicked")?
    }
}

pub(crate) fn needs_refresh(expires_at: Option<NaiveDateTime>, now: NaiveDateTime) -> bool {
    match expires_at {
        Some(expires_at) => expires_at <= now + ChronoDuration::seconds(EXPIRY_LEEWAY_SECS),
        None => false,
    }
}

#[async_trait]
impl TokenProvider for StoredTokenProvider {
    async fn access_token(&self, platform: Platform, account_key: &str) -> Result<String> {
        let connection = self
            .load_connection(platform, account_key)
            .await?
            .ok_or_else(|| anyhow!("no {platform} connection for account {account_key}"))?;

        if needs_refresh(connection.expires_at, Utc::now().naive_utc()) {
            tracing::info!(%platform, account_key, "refreshing expired access token");
            return self.refresh(platform, &connection).await;
        }

        Ok(connection.access_token)
    }
}
