use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use reqwest::Client;

use crate::auth::jwt::{GoogleJwksVerifier, PushTokenVerifier};
use crate::config::AppConfig;
use crate::db::PgPool;

pub mod drafts;
pub mod graph;
pub mod meet;
pub mod tokens;
pub mod zoom;

pub use drafts::{AnthropicDraftGenerator, DraftGenerator, DraftRequest, GeneratedDraft};
pub use graph::{GraphApi, GraphHttpClient, OnlineMeeting};
pub use meet::{ConferenceParticipant, ConferenceRecord, MeetApi, MeetHttpClient, MeetTranscript, TranscriptEntry};
pub use tokens::{StoredTokenProvider, TokenProvider};
pub use zoom::{ZoomApi, ZoomHttpClient};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// External services the pipeline talks to, injected so tests can swap
/// in fakes.
#[derive(Clone)]
pub struct PlatformClients {
    pub tokens: Arc<dyn TokenProvider>,
    pub zoom: Arc<dyn ZoomApi>,
    pub graph: Arc<dyn GraphApi>,
    pub meet: Arc<dyn MeetApi>,
    pub drafts: Arc<dyn DraftGenerator>,
    pub push_verifier: Arc<dyn PushTokenVerifier>,
}

impl PlatformClients {
    pub fn from_config(pool: PgPool, config: &AppConfig) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(concat!("replysequence/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            tokens: Arc::new(StoredTokenProvider::new(pool, http.clone(), config)),
            zoom: Arc::new(ZoomHttpClient::new(http.clone())),
            graph: Arc::new(GraphHttpClient::new(
                http.clone(),
                config.graph_api_base_url.clone(),
            )),
            meet: Arc::new(MeetHttpClient::new(
                http.clone(),
                config.meet_api_base_url.clone(),
            )),
            drafts: Arc::new(AnthropicDraftGenerator::new(
                http.clone(),
                config.anthropic_api_key.clone(),
                config.anthropic_model.clone(),
                config.anthropic_base_url.clone(),
            )),
            push_verifier: Arc::new(GoogleJwksVerifier::from_config(http, config)),
        })
    }
}
