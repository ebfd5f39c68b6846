use crate::clients::graph::OnlineMeeting;
use crate::events::teams::{GraphNotification, TranscriptResource};
use crate::meetings::MeetingDetails;
use crate::platform::Platform;
use crate::state::AppState;
use crate::transcript::FORMAT_VTT;

use super::{
    existing_transcript_meeting, persist_meeting, InboundEvent, ProcessError, ProcessOutcome,
};

const PLATFORM: Platform = Platform::MicrosoftTeams;
const CHANGE_CREATED: &str = "created";

pub(crate) async fn process(
    state: &AppState,
    inbound: &InboundEvent,
    notification: &GraphNotification,
) -> Result<ProcessOutcome, ProcessError> {
    let Some(resource) = notification.transcript_resource() else {
        tracing::debug!(resource = %notification.resource, "ignoring non-transcript graph notification");
        return Ok(ProcessOutcome::ignored());
    };
    if !notification.change_type().eq_ignore_ascii_case(CHANGE_CREATED) {
        return Ok(ProcessOutcome::ignored());
    }

    if let Some(meeting_id) =
        existing_transcript_meeting(state, PLATFORM, &resource.meeting_id).await?
    {
        return Ok(ProcessOutcome::skipped(meeting_id));
    }

    let account = notification.account_key();
    let access_token = state
        .clients
        .tokens
        .access_token(PLATFORM, &account)
        .await
        .map_err(|error| ProcessError::Token {
            platform: PLATFORM,
            account: account.clone(),
            error,
        })?;

    let upstream = |error: anyhow::Error| ProcessError::Upstream {
        platform: PLATFORM,
        error,
    };
    let meeting = state
        .clients
        .graph
        .get_online_meeting(&access_token, resource.user_id.as_deref(), &resource.meeting_id)
        .await
        .map_err(upstream)?;
    let vtt = state
        .clients
        .graph
        .get_transcript_content(&access_token, &notification.resource)
        .await
        .map_err(upstream)?;

    let details = meeting_details(&resource, meeting);
    persist_meeting(state, inbound.raw_event_id, details, vtt, FORMAT_VTT).await
}

fn meeting_details(resource: &TranscriptResource, meeting: OnlineMeeting) -> MeetingDetails {
    let participants = meeting.participants.as_ref();
    let host_email = participants
        .and_then(|p| p.organizer.as_ref())
        .and_then(|organizer| organizer.upn.clone());
    let names = participants
        .map(|p| {
            p.organizer
                .iter()
                .chain(p.attendees.iter())
                .filter_map(|info| info.display_name().or(info.upn.as_deref()))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    MeetingDetails {
        platform: PLATFORM,
        external_meeting_id: resource.meeting_id.clone(),
        host_email,
        topic: meeting
            .subject
            .filter(|subject| !subject.trim().is_empty())
            .unwrap_or_else(|| "Teams meeting".to_string()),
        start_time: meeting.start_date_time,
        end_time: meeting.end_date_time,
        duration_minutes: None,
        participants: names,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builds_details_from_online_meeting() {
        let meeting: OnlineMeeting = serde_json::from_value(json!({
            "id": "MSo1",
            "subject": "Pricing review",
            "startDateTime": "2024-05-01T15:00:00Z",
            "endDateTime": "2024-05-01T15:30:00Z",
            "participants": {
                "organizer": {
                    "upn": "host@contoso.com",
                    "identity": { "user": { "displayName": "Host Person" } }
                },
                "attendees": [
                    { "upn": "guest@fabrikam.com" }
                ]
            }
        }))
        .unwrap();
        let resource = TranscriptResource {
            user_id: Some("u-1".into()),
            meeting_id: "MSo1".into(),
            transcript_id: "t-1".into(),
        };

        let details = meeting_details(&resource, meeting);
        assert_eq!(details.topic, "Pricing review");
        assert_eq!(details.host_email.as_deref(), Some("host@contoso.com"));
        assert_eq!(details.participants, vec!["Host Person", "guest@fabrikam.com"]);
        assert_eq!(details.resolved_duration(), Some(30));
    }
}
