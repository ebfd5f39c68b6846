use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde_json::Value;
use uuid::Uuid;

use crate::models::{Meeting, NewMeeting, NewTranscript, Transcript};
use crate::platform::Platform;
use crate::schema::{meetings, transcripts};
use crate::transcript::{plain_text, word_count};

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_PROCESSING: &str = "processing";
pub const STATUS_COMPLETED: &str = "completed";
pub const STATUS_FAILED: &str = "failed";

pub const STEP_DRAFT_QUEUED: &str = "draft_queued";
pub const STEP_GENERATING_DRAFT: &str = "generating_draft";
pub const STEP_COMPLETED: &str = "completed";

/// Meeting attributes as reported by the platform.
#[derive(Debug, Clone)]
pub struct MeetingDetails {
    pub platform: Platform,
    pub external_meeting_id: String,
    pub host_email: Option<String>,
    pub topic: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_minutes: Option<i32>,
    pub participants: Vec<String>,
}

impl MeetingDetails {
    /// Falls back to the span between start and end when the platform does
    /// not report a duration.
    pub fn resolved_duration(&self) -> Option<i32> {
        self.duration_minutes.or_else(|| {
            let (start, end) = (self.start_time?, self.end_time?);
            i32::try_from((end - start).num_minutes()).ok()
        })
    }

    pub fn into_new_meeting(self, raw_event_id: Option<Uuid>) -> NewMeeting {
        let duration_minutes = self.resolved_duration();
        NewMeeting {
            id: Uuid::new_v4(),
            platform: self.platform.as_str().to_string(),
            external_meeting_id: self.external_meeting_id,
            host_email: self.host_email,
            topic: self.topic,
            start_time: self.start_time.map(|t| t.naive_utc()),
            end_time: self.end_time.map(|t| t.naive_utc()),
            duration_minutes,
            participants: Value::from(self.participants),
            status: STATUS_PENDING.to_string(),
            processing_step: None,
            processing_progress: 0,
            raw_event_id,
        }
    }
}

pub fn find_meeting(conn: &mut PgConnection, id: Uuid) -> QueryResult<Meeting> {
    meetings::table.find(id).first(conn)
}

pub fn find_meeting_by_external_id(
    conn: &mut PgConnection,
    platform: Platform,
    external_meeting_id: &str,
) -> QueryResult<Option<Meeting>> {
    meetings::table
        .filter(meetings::platform.eq(platform.as_str()))
        .filter(meetings::external_meeting_id.eq(external_meeting_id))
        .first(conn)
        .optional()
}

pub fn find_transcript(conn: &mut PgConnection, meeting_id: Uuid) -> QueryResult<Option<Transcript>> {
    transcripts::table
        .filter(transcripts::meeting_id.eq(meeting_id))
        .first(conn)
        .optional()
}

/// Inserts the meeting unless one already exists for the same platform id,
/// and returns the stored row either way.
pub fn upsert_meeting(conn: &mut PgConnection, new_meeting: &NewMeeting) -> QueryResult<Meeting> {
    diesel::insert_into(meetings::table)
        .values(new_meeting)
        .on_conflict((meetings::platform, meetings::external_meeting_id))
        .do_nothing()
        .execute(conn)?;

    meetings::table
        .filter(meetings::platform.eq(&new_meeting.platform))
        .filter(meetings::external_meeting_id.eq(&new_meeting.external_meeting_id))
        .first(conn)
}

/// Returns `None` when the meeting already has a transcript.
pub fn insert_transcript(
    conn: &mut PgConnection,
    meeting_id: Uuid,
    content: &str,
    format: &str,
) -> QueryResult<Option<Transcript>> {
    let text = plain_text(content, format);
    let new_transcript = NewTranscript {
        id: Uuid::new_v4(),
        meeting_id,
        content: content.to_string(),
        format: format.to_string(),
        word_count: word_count(&text),
    };

    diesel::insert_into(transcripts::table)
        .values(&new_transcript)
        .on_conflict(transcripts::meeting_id)
        .do_nothing()
        .get_result(conn)
        .optional()
}

pub fn update_progress(
    conn: &mut PgConnection,
    meeting_id: Uuid,
    status: &str,
    step: &str,
    progress: i32,
) -> QueryResult<()> {
    diesel::update(meetings::table.find(meeting_id))
        .set((
            meetings::status.eq(status),
            meetings::processing_step.eq(Some(step)),
            meetings::processing_progress.eq(progress.clamp(0, 100)),
            meetings::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)?;
    Ok(())
}

pub fn mark_meeting_completed(conn: &mut PgConnection, meeting_id: Uuid) -> QueryResult<()> {
    diesel::update(meetings::table.find(meeting_id))
        .set((
            meetings::status.eq(STATUS_COMPLETED),
            meetings::processing_step.eq(Some(STEP_COMPLETED)),
            meetings::processing_progress.eq(100),
            meetings::error_message.eq::<Option<String>>(None),
            meetings::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)?;
    Ok(())
}

pub fn mark_meeting_failed(
    conn: &mut PgConnection,
    meeting_id: Uuid,
    message: &str,
) -> QueryResult<()> {
    diesel::update(meetings::table.find(meeting_id))
        .set((
            meetings::status.eq(STATUS_FAILED),
            meetings::error_message.eq(Some(message)),
            meetings::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)?;
    Ok(())
}

pub fn participant_names(meeting: &Meeting) -> Vec<String> {
    meeting
        .participants
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn details() -> MeetingDetails {
        MeetingDetails {
            platform: Platform::GoogleMeet,
            external_meeting_id: "conferenceRecords/abc".into(),
            host_email: None,
            topic: "Weekly sync".into(),
            start_time: Some(Utc.with_ymd_and_hms(2024, 5, 1, 15, 0, 0).unwrap()),
            end_time: Some(Utc.with_ymd_and_hms(2024, 5, 1, 15, 45, 0).unwrap()),
            duration_minutes: None,
            participants: vec!["Ana".into(), "Ben".into()],
        }
    }

    #[test]
    fn duration_falls_back_to_time_span() {
        assert_eq!(details().resolved_duration(), Some(45));

        let reported = MeetingDetails {
            duration_minutes: Some(40),
            ..details()
        };
        assert_eq!(reported.resolved_duration(), Some(40));
    }

    #[test]
    fn new_meetings_start_pending() {
        let new_meeting = details().into_new_meeting(None);
        assert_eq!(new_meeting.status, STATUS_PENDING);
        assert_eq!(new_meeting.platform, "google_meet");
        assert_eq!(new_meeting.participants, serde_json::json!(["Ana", "Ben"]));
        assert_eq!(new_meeting.processing_progress, 0);
    }
}
