use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Deserialize;
use thiserror::Error;

pub const EVENT_CONFERENCE_ENDED: &str = "google.workspace.meet.conference.v2.ended";
pub const EVENT_TRANSCRIPT_GENERATED: &str = "google.workspace.meet.transcript.v2.fileGenerated";

const CLOUD_EVENT_TYPE_ATTRIBUTE: &str = "ce-type";

#[derive(Debug, Error)]
pub enum MeetPayloadError {
    #[error("push message carries no data")]
    MissingData,
    #[error("push message data is not base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("push message data is not a workspace event: {0}")]
    Json(#[from] serde_json::Error),
}

/// Body of a Pub/Sub push delivery.
#[derive(Debug, Clone, Deserialize)]
pub struct PushEnvelope {
    pub message: PushMessage,
    #[serde(default)]
    pub subscription: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushMessage {
    #[serde(default)]
    pub data: Option<String>,
    #[serde(alias = "message_id")]
    pub message_id: String,
    #[serde(default, alias = "publish_time")]
    pub publish_time: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

/// Decoded `message.data`: a Google Workspace event about a Meet conference.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceEvent {
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub conference_record: Option<ResourceRef>,
    #[serde(default)]
    pub transcript: Option<ResourceRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResourceRef {
    pub name: String,
}

/// A push delivery with its workspace event decoded.
#[derive(Debug, Clone)]
pub struct MeetNotification {
    pub message_id: String,
    pub subscription: Option<String>,
    pub publish_time: Option<String>,
    pub event_type: String,
    pub event: WorkspaceEvent,
}

impl PushEnvelope {
    pub fn decode_event(&self) -> Result<WorkspaceEvent, MeetPayloadError> {
        let data = self
            .message
            .data
            .as_deref()
            .filter(|data| !data.is_empty())
            .ok_or(MeetPayloadError::MissingData)?;
        let bytes = STANDARD.decode(data)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn into_notification(self) -> Result<MeetNotification, MeetPayloadError> {
        let event = self.decode_event()?;
        let event_type = event
            .event_type
            .clone()
            .or_else(|| {
                self.message
                    .attributes
                    .get(CLOUD_EVENT_TYPE_ATTRIBUTE)
                    .cloned()
            })
            .unwrap_or_else(|| "unknown".to_string());

        Ok(MeetNotification {
            message_id: self.message.message_id,
            subscription: self.subscription,
            publish_time: self.message.publish_time,
            event_type,
            event,
        })
    }
}

impl MeetNotification {
    pub fn is_transcript_event(&self) -> bool {
        matches!(
            self.event_type.as_str(),
            EVENT_CONFERENCE_ENDED | EVENT_TRANSCRIPT_GENERATED
        )
    }

    /// `conferenceRecords/{id}`, taken from the record itself or from the
    /// transcript name it prefixes.
    pub fn conference_record_name(&self) -> Option<String> {
        if let Some(record) = &self.event.conference_record {
            return Some(record.name.clone());
        }
        let transcript = self.event.transcript.as_ref()?;
        transcript
            .name
            .split_once("/transcripts/")
            .map(|(record, _)| record.to_string())
    }

    pub fn transcript_name(&self) -> Option<&str> {
        self.event.transcript.as_ref().map(|t| t.name.as_str())
    }

    pub fn account_key(&self) -> &str {
        self.subscription.as_deref().unwrap_or(&self.message_id)
    }
}
