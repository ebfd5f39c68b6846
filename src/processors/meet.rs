use std::collections::HashMap;

use crate::clients::meet::{ConferenceParticipant, ConferenceRecord, MeetTranscript, TranscriptEntry};
use crate::events::MeetNotification;
use crate::meetings::MeetingDetails;
use crate::platform::Platform;
use crate::state::AppState;
use crate::transcript::FORMAT_TEXT;

use super::{
    existing_transcript_meeting, persist_meeting, InboundEvent, ProcessError, ProcessOutcome,
};

const PLATFORM: Platform = Platform::GoogleMeet;

pub(crate) async fn process(
    state: &AppState,
    inbound: &InboundEvent,
    notification: &MeetNotification,
) -> Result<ProcessOutcome, ProcessError> {
    if !notification.is_transcript_event() {
        tracing::debug!(event_type = %notification.event_type, "ignoring meet event");
        return Ok(ProcessOutcome::ignored());
    }

    let record_name = notification
        .conference_record_name()
        .ok_or_else(|| ProcessError::invalid(PLATFORM, "event has no conference record"))?;

    if let Some(meeting_id) = existing_transcript_meeting(state, PLATFORM, &record_name).await? {
        return Ok(ProcessOutcome::skipped(meeting_id));
    }

    let account = notification.account_key();
    let access_token = state
        .clients
        .tokens
        .access_token(PLATFORM, account)
        .await
        .map_err(|error| ProcessError::Token {
            platform: PLATFORM,
            account: account.to_string(),
            error,
        })?;

    let upstream = |error: anyhow::Error| ProcessError::Upstream {
        platform: PLATFORM,
        error,
    };
    let meet = &state.clients.meet;
    let record = meet
        .get_conference_record(&access_token, &record_name)
        .await
        .map_err(upstream)?;
    let transcripts = meet
        .list_transcripts(&access_token, &record_name)
        .await
        .map_err(upstream)?;

    let Some(transcript) = pick_transcript(&transcripts, notification.transcript_name()) else {
        tracing::info!(conference_record = %record_name, "meet transcript not generated yet");
        return Ok(ProcessOutcome::awaiting_transcript());
    };

    let entries = meet
        .list_transcript_entries(&access_token, &transcript.name)
        .await
        .map_err(upstream)?;
    if entries.is_empty() {
        return Ok(ProcessOutcome::awaiting_transcript());
    }
    let participants = meet
        .list_participants(&access_token, &record_name)
        .await
        .map_err(upstream)?;

    let text = render_entries(&entries, &participants);
    let details = meeting_details(&record_name, &record, &participants);
    persist_meeting(state, inbound.raw_event_id, details, text, FORMAT_TEXT).await
}

/// The transcript named by the event, else the first finished one.
fn pick_transcript<'a>(
    transcripts: &'a [MeetTranscript],
    named: Option<&str>,
) -> Option<&'a MeetTranscript> {
    match named {
        Some(name) => transcripts
            .iter()
            .find(|t| t.name == name && t.is_finished()),
        None => transcripts.iter().find(|t| t.is_finished()),
    }
}

fn render_entries(entries: &[TranscriptEntry], participants: &[ConferenceParticipant]) -> String {
    let names: HashMap<&str, &str> = participants
        .iter()
        .filter_map(|p| p.display_name().map(|name| (p.name.as_str(), name)))
        .collect();

    entries
        .iter()
        .filter(|entry| !entry.text.trim().is_empty())
        .map(|entry| {
            let speaker = entry
                .participant
                .as_deref()
                .and_then(|id| names.get(id).copied())
                .unwrap_or("Unknown speaker");
            format!("{}: {}", speaker, entry.text.trim())
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn meeting_details(
    record_name: &str,
    record: &ConferenceRecord,
    participants: &[ConferenceParticipant],
) -> MeetingDetails {
    MeetingDetails {
        platform: PLATFORM,
        external_meeting_id: record_name.to_string(),
        host_email: None,
        topic: record
            .space
            .as_deref()
            .map(|space| format!("Google Meet ({space})"))
            .unwrap_or_else(|| "Google Meet call".to_string()),
        start_time: record.start_time,
        end_time: record.end_time,
        duration_minutes: None,
        participants: participants
            .iter()
            .filter_map(|p| p.display_name().map(str::to_string))
            .collect(),
    }
}
