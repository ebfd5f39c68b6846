use chrono::NaiveDateTime;
use diesel::prelude::*;
use uuid::Uuid;

use crate::schema::*;

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = raw_events)]
pub struct RawEvent {
    pub id: Uuid,
    pub platform: String,
    pub event_type: String,
    pub external_event_id: String,
    pub payload: serde_json::Value,
    pub metadata: serde_json::Value,
    pub status: String,
    pub meeting_id: Option<Uuid>,
    pub received_at: NaiveDateTime,
    pub processed_at: Option<NaiveDateTime>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = raw_events)]
pub struct NewRawEvent {
    pub id: Uuid,
    pub platform: String,
    pub event_type: String,
    pub external_event_id: String,
    pub payload: serde_json::Value,
    pub metadata: serde_json::Value,
    pub status: String,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = idempotency_locks)]
#[diesel(primary_key(key))]
pub struct IdempotencyLock {
    pub key: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = idempotency_locks)]
pub struct NewIdempotencyLock<'a> {
    pub key: &'a str,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = webhook_failures)]
pub struct WebhookFailure {
    pub id: Uuid,
    pub platform: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub fingerprint: String,
    pub raw_event_id: Option<Uuid>,
    pub attempts: i32,
    pub next_retry_at: NaiveDateTime,
    pub status: String,
    pub last_error: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = webhook_failures)]
pub struct NewWebhookFailure {
    pub id: Uuid,
    pub platform: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub fingerprint: String,
    pub raw_event_id: Option<Uuid>,
    pub attempts: i32,
    pub next_retry_at: NaiveDateTime,
    pub status: String,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = meetings)]
pub struct Meeting {
    pub id: Uuid,
    pub platform: String,
    pub external_meeting_id: String,
    pub host_email: Option<String>,
    pub topic: String,
    pub start_time: Option<NaiveDateTime>,
    pub end_time: Option<NaiveDateTime>,
    pub duration_minutes: Option<i32>,
    pub participants: serde_json::Value,
    pub status: String,
    pub processing_step: Option<String>,
    pub processing_progress: i32,
    pub error_message: Option<String>,
    pub raw_event_id: Option<Uuid>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = meetings)]
pub struct NewMeeting {
    pub id: Uuid,
    pub platform: String,
    pub external_meeting_id: String,
    pub host_email: Option<String>,
    pub topic: String,
    pub start_time: Option<NaiveDateTime>,
    pub end_time: Option<NaiveDateTime>,
    pub duration_minutes: Option<i32>,
    pub participants: serde_json::Value,
    pub status: String,
    pub processing_step: Option<String>,
    pub processing_progress: i32,
    pub raw_event_id: Option<Uuid>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = transcripts)]
#[diesel(belongs_to(Meeting))]
pub struct Transcript {
    pub id: Uuid,
    pub meeting_id: Uuid,
    pub content: String,
    pub format: String,
    pub word_count: i32,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = transcripts)]
pub struct NewTranscript {
    pub id: Uuid,
    pub meeting_id: Uuid,
    pub content: String,
    pub format: String,
    pub word_count: i32,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = drafts)]
#[diesel(belongs_to(Meeting))]
pub struct Draft {
    pub id: Uuid,
    pub meeting_id: Uuid,
    pub subject: String,
    pub body: String,
    pub model: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = drafts)]
pub struct NewDraft {
    pub id: Uuid,
    pub meeting_id: Uuid,
    pub subject: String,
    pub body: String,
    pub model: String,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = jobs)]
pub struct Job {
    pub id: Uuid,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub attempts: i32,
    pub run_after: NaiveDateTime,
    pub last_error: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = jobs)]
pub struct NewJob {
    pub id: Uuid,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub run_after: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = platform_connections)]
pub struct PlatformConnection {
    pub id: Uuid,
    pub platform: String,
    pub account_key: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = platform_connections)]
pub struct NewPlatformConnection {
    pub id: Uuid,
    pub platform: String,
    pub account_key: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<NaiveDateTime>,
}
