//! Turns a stored webhook payload into meeting and transcript records.
//!
//! Processors try exactly once. Errors propagate to the caller (the webhook
//! endpoint or the retry pass), which owns the retry ledger bookkeeping.

use diesel::pg::PgConnection;
use diesel::Connection;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::task;
use uuid::Uuid;

use crate::events::{NotificationError, PlatformNotification};
use crate::jobs::{enqueue_job, JobQueueError, JOB_GENERATE_DRAFT};
use crate::meetings::{
    self, find_meeting_by_external_id, find_transcript, insert_transcript, upsert_meeting,
    MeetingDetails, STATUS_PENDING, STEP_DRAFT_QUEUED,
};
use crate::models::{RawEvent, WebhookFailure};
use crate::platform::{Platform, UnknownPlatform};
use crate::raw_events::mark_raw_event_processed;
use crate::state::AppState;

pub mod meet;
pub mod teams;
pub mod zoom;

/// Replayable processor input, built either from a fresh delivery or from a
/// retry ledger entry.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub platform: Platform,
    pub raw_event_id: Option<Uuid>,
    pub event_type: String,
    pub payload: Value,
}

impl InboundEvent {
    pub fn from_raw_event(event: &RawEvent) -> Result<Self, UnknownPlatform> {
        Ok(Self {
            platform: event.platform.parse()?,
            raw_event_id: Some(event.id),
            event_type: event.event_type.clone(),
            payload: event.payload.clone(),
        })
    }

    pub fn from_failure(failure: &WebhookFailure) -> Result<Self, UnknownPlatform> {
        Ok(Self {
            platform: failure.platform.parse()?,
            raw_event_id: failure.raw_event_id,
            event_type: failure.event_type.clone(),
            payload: failure.payload.clone(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessAction {
    Created,
    SkippedDuplicate,
    Ignored,
    AwaitingTranscript,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessOutcome {
    pub action: ProcessAction,
    pub meeting_id: Option<Uuid>,
}

impl ProcessOutcome {
    pub fn created(meeting_id: Uuid) -> Self {
        Self {
            action: ProcessAction::Created,
            meeting_id: Some(meeting_id),
        }
    }

    pub fn skipped(meeting_id: Uuid) -> Self {
        Self {
            action: ProcessAction::SkippedDuplicate,
            meeting_id: Some(meeting_id),
        }
    }

    pub fn ignored() -> Self {
        Self {
            action: ProcessAction::Ignored,
            meeting_id: None,
        }
    }

    pub fn awaiting_transcript() -> Self {
        Self {
            action: ProcessAction::AwaitingTranscript,
            meeting_id: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("invalid {platform} payload: {message}")]
    InvalidPayload { platform: Platform, message: String },
    #[error("No valid token for {platform} account {account}: {error:#}")]
    Token {
        platform: Platform,
        account: String,
        error: anyhow::Error,
    },
    #[error("{platform} API request failed: {error:#}")]
    Upstream {
        platform: Platform,
        error: anyhow::Error,
    },
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("database pool error: {0}")]
    Pool(String),
    #[error("failed to queue draft generation: {0}")]
    Queue(#[from] JobQueueError),
    #[error("processing task failed: {0}")]
    Task(String),
}

impl ProcessError {
    pub fn invalid(platform: Platform, message: impl Into<String>) -> Self {
        Self::InvalidPayload {
            platform,
            message: message.into(),
        }
    }
}

impl From<NotificationError> for ProcessError {
    fn from(value: NotificationError) -> Self {
        let platform = match &value {
            NotificationError::Json { platform, .. } => *platform,
            NotificationError::Meet(_) => Platform::GoogleMeet,
        };
        Self::invalid(platform, value.to_string())
    }
}

/// Routes an event to the processor of its platform.
pub async fn process_event(
    state: &AppState,
    event: &InboundEvent,
) -> Result<ProcessOutcome, ProcessError> {
    let outcome = match PlatformNotification::parse(event.platform, &event.payload)? {
        PlatformNotification::Zoom(zoom_event) => zoom::process(state, event, &zoom_event).await?,
        PlatformNotification::Teams(notification) => {
            teams::process(state, event, &notification).await?
        }
        PlatformNotification::Meet(notification) => {
            meet::process(state, event, &notification).await?
        }
    };

    if let Some(raw_event_id) = event.raw_event_id {
        finish_raw_event(state, raw_event_id, &outcome).await?;
    }

    tracing::info!(
        platform = %event.platform,
        event_type = %event.event_type,
        action = ?outcome.action,
        meeting_id = ?outcome.meeting_id,
        "processed platform event"
    );
    Ok(outcome)
}

/// Ignored events stay `pending` in the raw event store; everything else
/// that completed without error is `processed`.
async fn finish_raw_event(
    state: &AppState,
    raw_event_id: Uuid,
    outcome: &ProcessOutcome,
) -> Result<(), ProcessError> {
    if outcome.action == ProcessAction::Ignored {
        return Ok(());
    }
    let meeting_id = outcome.meeting_id;
    with_conn(state, move |conn| {
        mark_raw_event_processed(conn, raw_event_id, meeting_id)?;
        Ok(())
    })
    .await
}

/// Runs blocking diesel work off the async runtime.
pub(crate) async fn with_conn<F, T>(state: &AppState, f: F) -> Result<T, ProcessError>
where
    F: FnOnce(&mut PgConnection) -> Result<T, ProcessError> + Send + 'static,
    T: Send + 'static,
{
    let pool = state.pool.clone();
    task::spawn_blocking(move || {
        let mut conn = pool
            .get()
            .map_err(|err| ProcessError::Pool(err.to_string()))?;
        f(&mut conn)
    })
    .await
    .map_err(|err| ProcessError::Task(err.to_string()))?
}

/// Looks for an existing transcript so replays skip the download.
pub(crate) async fn existing_transcript_meeting(
    state: &AppState,
    platform: Platform,
    external_meeting_id: &str,
) -> Result<Option<Uuid>, ProcessError> {
    let external_meeting_id = external_meeting_id.to_string();
    with_conn(state, move |conn| {
        let Some(meeting) = find_meeting_by_external_id(conn, platform, &external_meeting_id)?
        else {
            return Ok(None);
        };
        Ok(find_transcript(conn, meeting.id)?.map(|_| meeting.id))
    })
    .await
}

/// Stores the meeting and its transcript and queues draft generation, all in
/// one transaction. A meeting that already has a transcript is left alone.
pub(crate) async fn persist_meeting(
    state: &AppState,
    raw_event_id: Option<Uuid>,
    details: MeetingDetails,
    transcript: String,
    format: &'static str,
) -> Result<ProcessOutcome, ProcessError> {
    with_conn(state, move |conn| {
        conn.transaction::<_, ProcessError, _>(|conn| {
            let new_meeting = details.into_new_meeting(raw_event_id);
            let meeting = upsert_meeting(conn, &new_meeting)?;

            if insert_transcript(conn, meeting.id, &transcript, format)?.is_none() {
                return Ok(ProcessOutcome::skipped(meeting.id));
            }

            enqueue_job(
                conn,
                JOB_GENERATE_DRAFT,
                json!({ "meeting_id": meeting.id }),
                None,
            )?;
            meetings::update_progress(conn, meeting.id, STATUS_PENDING, STEP_DRAFT_QUEUED, 25)?;

            Ok(ProcessOutcome::created(meeting.id))
        })
    })
    .await
}
