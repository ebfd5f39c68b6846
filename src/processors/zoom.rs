use crate::events::ZoomEvent;
use crate::meetings::MeetingDetails;
use crate::platform::Platform;
use crate::state::AppState;
use crate::transcript::FORMAT_VTT;

use super::{
    existing_transcript_meeting, persist_meeting, InboundEvent, ProcessError, ProcessOutcome,
};

const PLATFORM: Platform = Platform::Zoom;

pub(crate) async fn process(
    state: &AppState,
    inbound: &InboundEvent,
    event: &ZoomEvent,
) -> Result<ProcessOutcome, ProcessError> {
    if !event.is_transcript_event() {
        tracing::debug!(event_type = %event.event, "ignoring zoom event");
        return Ok(ProcessOutcome::ignored());
    }

    let object = event
        .payload
        .object
        .as_ref()
        .ok_or_else(|| ProcessError::invalid(PLATFORM, "payload.object is missing"))?;
    let meeting_uuid = event
        .meeting_uuid()
        .ok_or_else(|| ProcessError::invalid(PLATFORM, "payload.object.uuid is missing"))?;

    // The transcript file can arrive in a later recording.transcript_completed.
    let Some(file) = event.completed_transcript() else {
        tracing::info!(meeting_uuid, "zoom recording has no completed transcript yet");
        return Ok(ProcessOutcome::awaiting_transcript());
    };
    let Some(download_url) = file.download_url.as_deref() else {
        return Ok(ProcessOutcome::awaiting_transcript());
    };

    if let Some(meeting_id) = existing_transcript_meeting(state, PLATFORM, meeting_uuid).await? {
        return Ok(ProcessOutcome::skipped(meeting_id));
    }

    let access_token = match event.download_token.as_deref().filter(|t| !t.is_empty()) {
        Some(token) => token.to_string(),
        None => {
            let account = event.account_key().ok_or_else(|| {
                ProcessError::invalid(PLATFORM, "no host or account to fetch a token for")
            })?;
            state
                .clients
                .tokens
                .access_token(PLATFORM, account)
                .await
                .map_err(|error| ProcessError::Token {
                    platform: PLATFORM,
                    account: account.to_string(),
                    error,
                })?
        }
    };

    let vtt = state
        .clients
        .zoom
        .download_transcript(download_url, &access_token)
        .await
        .map_err(|error| ProcessError::Upstream {
            platform: PLATFORM,
            error,
        })?;

    let details = MeetingDetails {
        platform: PLATFORM,
        external_meeting_id: meeting_uuid.to_string(),
        host_email: object.host_email.clone(),
        topic: object
            .topic
            .clone()
            .unwrap_or_else(|| "Zoom meeting".to_string()),
        start_time: object.start_time.or(file.recording_start),
        end_time: file.recording_end,
        duration_minutes: object.duration,
        participants: Vec::new(),
    };

    persist_meeting(state, inbound.raw_event_id, details, vtt, FORMAT_VTT).await
}
