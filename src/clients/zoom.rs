use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;

#[async_trait]
pub trait ZoomApi: Send + Sync + 'static {
    /// Downloads a recording file (the VTT transcript) from its `download_url`.
    async fn download_transcript(&self, download_url: &str, access_token: &str) -> Result<String>;
}

pub struct ZoomHttpClient {
    http: Client,
}

impl ZoomHttpClient {
    pub fn new(http: Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ZoomApi for ZoomHttpClient {
    async fn download_transcript(&self, download_url: &str, access_token: &str) -> Result<String> {
        self.http
            .get(download_url)
            .bearer_auth(access_token)
            .send()
            .await
            .context("zoom transcript download failed")?
            .error_for_status()
            .context("zoom rejected the transcript download")?
            .text()
            .await
            .context("failed to read zoom transcript body")
    }
}
