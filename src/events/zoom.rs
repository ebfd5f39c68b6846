use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

pub const EVENT_URL_VALIDATION: &str = "endpoint.url_validation";
pub const EVENT_RECORDING_COMPLETED: &str = "recording.completed";
pub const EVENT_TRANSCRIPT_COMPLETED: &str = "recording.transcript_completed";

const FILE_TYPE_TRANSCRIPT: &str = "TRANSCRIPT";
const FILE_STATUS_COMPLETED: &str = "completed";

#[derive(Debug, Clone, Deserialize)]
pub struct ZoomEvent {
    pub event: String,
    #[serde(default)]
    pub event_ts: Option<i64>,
    #[serde(default)]
    pub payload: ZoomEventPayload,
    /// Short-lived token Zoom attaches for downloading the recording files.
    #[serde(default)]
    pub download_token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ZoomEventPayload {
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default, rename = "plainToken")]
    pub plain_token: Option<String>,
    #[serde(default)]
    pub object: Option<ZoomRecordingObject>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ZoomRecordingObject {
    #[serde(default)]
    pub uuid: Option<String>,
    /// Numeric meeting id; Zoom reuses it across occurrences, `uuid` is unique.
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub host_id: Option<String>,
    #[serde(default)]
    pub host_email: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    /// Minutes.
    #[serde(default)]
    pub duration: Option<i32>,
    #[serde(default)]
    pub recording_files: Vec<ZoomRecordingFile>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ZoomRecordingFile {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub file_type: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default)]
    pub recording_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub recording_end: Option<DateTime<Utc>>,
}

impl ZoomEvent {
    pub fn is_url_validation(&self) -> bool {
        self.event == EVENT_URL_VALIDATION
    }

    pub fn is_transcript_event(&self) -> bool {
        matches!(
            self.event.as_str(),
            EVENT_RECORDING_COMPLETED | EVENT_TRANSCRIPT_COMPLETED
        )
    }

    pub fn meeting_uuid(&self) -> Option<&str> {
        self.payload
            .object
            .as_ref()
            .and_then(|object| object.uuid.as_deref())
            .filter(|uuid| !uuid.is_empty())
    }

    /// `{meetingUUID}-{eventTimestamp}`, the key Zoom redeliveries share.
    pub fn external_event_id(&self) -> String {
        let subject = self
            .meeting_uuid()
            .map(str::to_string)
            .or_else(|| {
                self.payload
                    .object
                    .as_ref()
                    .and_then(|object| object.id.as_ref())
                    .map(|id| match id {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
            })
            .unwrap_or_else(|| self.event.clone());
        format!("{}-{}", subject, self.event_ts.unwrap_or_default())
    }

    pub fn completed_transcript(&self) -> Option<&ZoomRecordingFile> {
        self.payload.object.as_ref()?.recording_files.iter().find(|file| {
            let is_transcript = file
                .file_type
                .as_deref()
                .is_some_and(|kind| kind.eq_ignore_ascii_case(FILE_TYPE_TRANSCRIPT));
            let completed = file
                .status
                .as_deref()
                .map_or(true, |status| status.eq_ignore_ascii_case(FILE_STATUS_COMPLETED));
            is_transcript && completed && file.download_url.is_some()
        })
    }

    /// The account whose stored OAuth connection can download the files.
    pub fn account_key(&self) -> Option<&str> {
        let object = self.payload.object.as_ref();
        object
            .and_then(|o| o.host_email.as_deref())
            .or_else(|| object.and_then(|o| o.host_id.as_deref()))
            .or(self.payload.account_id.as_deref())
            .filter(|key| !key.is_empty())
    }
}
