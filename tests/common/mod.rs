use std::env;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request};
use axum::Router;
use chrono::{Duration as ChronoDuration, Utc};
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::PgConnection;
use http_body_util::BodyExt;
use once_cell::sync::Lazy;
use replysequence::auth::jwt::{PushAuthError, PushClaims, PushTokenVerifier};
use replysequence::auth::signature::zoom_signature_header;
use replysequence::clients::{
    ConferenceParticipant, ConferenceRecord, DraftGenerator, DraftRequest, GeneratedDraft,
    GraphApi, MeetApi, MeetTranscript, OnlineMeeting, PlatformClients, TokenProvider,
    TranscriptEntry, ZoomApi,
};
use replysequence::config::{AppConfig, DEFAULT_ANTHROPIC_MODEL};
use replysequence::db::{self, PgPool};
use replysequence::models::{Draft, Job, Meeting, RawEvent, WebhookFailure};
use replysequence::platform::Platform;
use replysequence::routes;
use replysequence::schema::{drafts, jobs, meetings, raw_events, webhook_failures};
use replysequence::state::AppState;
use tokio::sync::Mutex;
use tower::util::ServiceExt;
use uuid::Uuid;

pub const ZOOM_SECRET: &str = "zoom-test-secret";
pub const TEAMS_CLIENT_STATE: &str = "teams-client-state";
pub const CRON_SECRET: &str = "cron-test-secret";
pub const VALID_PUSH_TOKEN: &str = "valid-push-token";

pub const SAMPLE_VTT: &str = "WEBVTT\n\n1\n00:00:01.000 --> 00:00:04.000\nAna: Thanks for joining.\n\n2\n00:00:05.000 --> 00:00:09.000\nBen: Let's ship the pilot next week.\n";

static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

type CallHook = Box<dyn FnOnce() + Send>;

/// Token provider whose refresh can be switched off to simulate an expired
/// connection.
#[derive(Default)]
pub struct FakeTokens {
    failing: AtomicBool,
    calls: AtomicUsize,
    on_next_call: StdMutex<Option<CallHook>>,
}

impl FakeTokens {
    /// Runs `hook` once, inside the next token request.
    #[allow(dead_code)]
    pub fn on_next_call(&self, hook: impl FnOnce() + Send + 'static) {
        *self.on_next_call.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    #[allow(dead_code)]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenProvider for FakeTokens {
    async fn access_token(&self, _platform: Platform, account_key: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let hook = self.on_next_call.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("refresh token for {account_key} was revoked"));
        }
        Ok("test-access-token".to_string())
    }
}

pub struct FakeZoom;

#[async_trait]
impl ZoomApi for FakeZoom {
    async fn download_transcript(&self, _download_url: &str, _access_token: &str) -> Result<String> {
        Ok(SAMPLE_VTT.to_string())
    }
}

pub struct FakeGraph;

#[async_trait]
impl GraphApi for FakeGraph {
    async fn get_online_meeting(
        &self,
        _access_token: &str,
        _user_id: Option<&str>,
        meeting_id: &str,
    ) -> Result<OnlineMeeting> {
        Ok(serde_json::from_value(serde_json::json!({
            "id": meeting_id,
            "subject": "Quarterly planning",
            "startDateTime": "2024-05-01T15:00:00Z",
            "endDateTime": "2024-05-01T15:45:00Z",
            "participants": {
                "organizer": {
                    "upn": "host@example.com",
                    "identity": { "user": { "displayName": "Ana" } }
                },
                "attendees": [
                    { "upn": "ben@example.com", "identity": { "user": { "displayName": "Ben" } } }
                ]
            }
        }))?)
    }

    async fn get_transcript_content(&self, _access_token: &str, _resource: &str) -> Result<String> {
        Ok(SAMPLE_VTT.to_string())
    }
}

/// Meet API double. Until `set_transcripts_ready(true)` the conference has
/// no generated transcript.
#[derive(Default)]
pub struct FakeMeet {
    transcripts_ready: AtomicBool,
}

impl FakeMeet {
    #[allow(dead_code)]
    pub fn set_transcripts_ready(&self, ready: bool) {
        self.transcripts_ready.store(ready, Ordering::SeqCst);
    }

    fn ready(&self) -> bool {
        self.transcripts_ready.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MeetApi for FakeMeet {
    async fn get_conference_record(
        &self,
        _access_token: &str,
        name: &str,
    ) -> Result<ConferenceRecord> {
        if !self.ready() {
            return Ok(ConferenceRecord {
                name: name.to_string(),
                ..Default::default()
            });
        }
        Ok(serde_json::from_value(serde_json::json!({
            "name": name,
            "startTime": "2024-05-02T09:00:00Z",
            "endTime": "2024-05-02T09:30:00Z",
            "space": "spaces/standup"
        }))?)
    }

    async fn list_transcripts(
        &self,
        _access_token: &str,
        conference_record: &str,
    ) -> Result<Vec<MeetTranscript>> {
        if !self.ready() {
            return Ok(Vec::new());
        }
        Ok(vec![MeetTranscript {
            name: format!("{conference_record}/transcripts/t-1"),
            state: Some("FILE_GENERATED".to_string()),
        }])
    }

    async fn list_transcript_entries(
        &self,
        _access_token: &str,
        transcript: &str,
    ) -> Result<Vec<TranscriptEntry>> {
        if !self.ready() {
            return Ok(Vec::new());
        }
        let record = transcript.split("/transcripts/").next().unwrap_or(transcript);
        Ok(serde_json::from_value(serde_json::json!([
            { "participant": format!("{record}/participants/p-1"), "text": "Morning, quick update." },
            { "participant": format!("{record}/participants/p-2"), "text": "Pilot ships Friday." }
        ]))?)
    }

    async fn list_participants(
        &self,
        _access_token: &str,
        conference_record: &str,
    ) -> Result<Vec<ConferenceParticipant>> {
        if !self.ready() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_value(serde_json::json!([
            { "name": format!("{conference_record}/participants/p-1"), "signedinUser": { "displayName": "Ana" } },
            { "name": format!("{conference_record}/participants/p-2"), "anonymousUser": { "displayName": "Ben" } }
        ]))?)
    }
}

pub struct FakeDrafts;

#[async_trait]
impl DraftGenerator for FakeDrafts {
    async fn generate(&self, request: &DraftRequest) -> Result<GeneratedDraft> {
        Ok(GeneratedDraft {
            subject: format!(
                "Follow-up: {}",
                request.topic.as_deref().unwrap_or("our meeting")
            ),
            body: format!("Hi all,\n\nThanks for the call.\n\n{}", request.transcript),
            model: "fake-model".to_string(),
        })
    }
}

pub struct FakePushVerifier;

#[async_trait]
impl PushTokenVerifier for FakePushVerifier {
    async fn verify(&self, token: &str) -> Result<PushClaims, PushAuthError> {
        if token != VALID_PUSH_TOKEN {
            return Err(PushAuthError::ServiceAccount);
        }
        let now = Utc::now().timestamp() as usize;
        Ok(PushClaims {
            iss: "https://accounts.google.com".to_string(),
            aud: "https://replies.example.com/api/webhooks/google-meet".to_string(),
            sub: "pubsub".to_string(),
            email: Some("pubsub@example.iam.gserviceaccount.com".to_string()),
            email_verified: Some(true),
            iat: now,
            exp: now + 3600,
        })
    }
}

pub struct TestApp {
    pub state: AppState,
    pub tokens: Arc<FakeTokens>,
    #[allow(dead_code)]
    pub meet: Arc<FakeMeet>,
    router: Router,
}

impl TestApp {
    pub async fn new() -> Result<Self> {
        let database_url = env::var("TEST_DATABASE_URL")
            .context("TEST_DATABASE_URL must be set for integration tests")?;

        let config = AppConfig {
            database_url,
            database_max_pool_size: 4,
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            cors_allowed_origin: None,
            cron_secret: CRON_SECRET.to_string(),
            cron_trust_platform_header: false,
            zoom_webhook_secret: Some(ZOOM_SECRET.to_string()),
            teams_client_state: Some(TEAMS_CLIENT_STATE.to_string()),
            google_push_audience: Some(
                "https://replies.example.com/api/webhooks/google-meet".to_string(),
            ),
            google_push_service_account: None,
            google_jwks_url: "http://127.0.0.1:9/certs".to_string(),
            retry_base_delay_secs: 60,
            retry_max_delay_secs: 3600,
            retry_max_attempts: 5,
            retry_batch_size: 10,
            retry_lease_secs: 900,
            anthropic_api_key: None,
            anthropic_model: DEFAULT_ANTHROPIC_MODEL.to_string(),
            anthropic_base_url: "http://127.0.0.1:9".to_string(),
            graph_api_base_url: "http://127.0.0.1:9".to_string(),
            meet_api_base_url: "http://127.0.0.1:9".to_string(),
            zoom_oauth: None,
            microsoft_oauth: None,
            google_oauth: None,
        };

        let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
        prepare_database(&pool).await?;

        let tokens = Arc::new(FakeTokens::default());
        let meet = Arc::new(FakeMeet::default());
        let clients = PlatformClients {
            tokens: tokens.clone(),
            zoom: Arc::new(FakeZoom),
            graph: Arc::new(FakeGraph),
            meet: meet.clone(),
            drafts: Arc::new(FakeDrafts),
            push_verifier: Arc::new(FakePushVerifier),
        };
        let state = AppState::new(pool, config, clients);
        let router = routes::create_router(state.clone());

        Ok(Self {
            state,
            tokens,
            meet,
            router,
        })
    }

    pub async fn post_raw(
        &self,
        path: &str,
        body: Vec<u8>,
        headers: &[(&str, String)],
    ) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header("content-type", "application/json");
        for (name, value) in headers {
            builder = builder.header(*name, value.as_str());
        }
        let request = builder.body(Body::from(body))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    /// Posts a Zoom webhook signed with the test secret.
    #[allow(dead_code)]
    pub async fn post_zoom(&self, payload: &serde_json::Value) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        let timestamp = Utc::now().timestamp().to_string();
        let signature = zoom_signature_header(ZOOM_SECRET, &timestamp, &body);
        self.post_raw(
            "/api/webhooks/zoom",
            body,
            &[
                ("x-zm-signature", signature),
                ("x-zm-request-timestamp", timestamp),
            ],
        )
        .await
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(Method::GET).uri(path);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    #[allow(dead_code)]
    pub async fn meetings(&self) -> Result<Vec<Meeting>> {
        self.with_conn(|conn| {
            meetings::table
                .order(meetings::created_at.asc())
                .load::<Meeting>(conn)
                .context("failed to load meetings")
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn raw_events(&self) -> Result<Vec<RawEvent>> {
        self.with_conn(|conn| {
            raw_events::table
                .order(raw_events::received_at.asc())
                .load::<RawEvent>(conn)
                .context("failed to load raw events")
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn webhook_failures(&self) -> Result<Vec<WebhookFailure>> {
        self.with_conn(|conn| {
            webhook_failures::table
                .order(webhook_failures::created_at.asc())
                .load::<WebhookFailure>(conn)
                .context("failed to load webhook failures")
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn jobs_by_type(&self, ty: &str) -> Result<Vec<Job>> {
        let ty = ty.to_string();
        self.with_conn(move |conn| {
            jobs::table
                .filter(jobs::job_type.eq(&ty))
                .load::<Job>(conn)
                .context("failed to load jobs")
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn drafts_for(&self, meeting_id: Uuid) -> Result<Vec<Draft>> {
        self.with_conn(move |conn| {
            drafts::table
                .filter(drafts::meeting_id.eq(meeting_id))
                .load::<Draft>(conn)
                .context("failed to load drafts")
        })
        .await
    }

    /// Moves every pending ledger entry's retry slot into the past.
    #[allow(dead_code)]
    pub async fn make_failures_due(&self) -> Result<()> {
        self.with_conn(|conn| {
            let past = (Utc::now() - ChronoDuration::seconds(5)).naive_utc();
            diesel::update(webhook_failures::table.filter(webhook_failures::status.eq("pending")))
                .set(webhook_failures::next_retry_at.eq(past))
                .execute(conn)
                .context("failed to reschedule webhook failures")?;
            Ok(())
        })
        .await
    }

    pub async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut PgConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get database connection: {err}"))?;
            f(&mut conn)
        })
        .await
        .context("connection task panicked")?
    }
}

pub async fn acquire_db_lock() -> tokio::sync::MutexGuard<'static, ()> {
    DB_LOCK.lock().await
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

#[allow(dead_code)]
pub async fn body_json(response: hyper::Response<Body>) -> Result<serde_json::Value> {
    let body = body_to_vec(response.into_body()).await?;
    Ok(serde_json::from_slice(&body)?)
}

async fn prepare_database(pool: &PgPool) -> Result<()> {
    let pool_for_migrations = pool.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        db::run_migrations(&pool_for_migrations)?;
        let mut conn = pool_for_migrations
            .get()
            .map_err(|err| anyhow!("failed to acquire connection: {err}"))?;
        truncate_all(&mut conn)?;
        Ok(())
    })
    .await
    .context("migration task panicked")?
}

fn truncate_all(conn: &mut PgConnection) -> Result<()> {
    conn.batch_execute(
        "TRUNCATE TABLE drafts, transcripts, meetings, webhook_failures, idempotency_locks, raw_events, jobs, platform_connections CASCADE;",
    )
    .context("failed to truncate tables")?;
    Ok(())
}
