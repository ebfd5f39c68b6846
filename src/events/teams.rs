use serde::Deserialize;
use serde_json::Value;

pub const EVENT_TRANSCRIPT_CREATED: &str = "callTranscript.created";

const TRANSCRIPT_ODATA_TYPE: &str = "#microsoft.graph.callTranscript";

#[derive(Debug, Clone, Deserialize)]
pub struct GraphNotificationBatch {
    #[serde(default)]
    pub value: Vec<Value>,
}

/// One item of a Microsoft Graph change notification batch.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNotification {
    pub subscription_id: String,
    #[serde(default)]
    pub client_state: Option<String>,
    #[serde(default)]
    pub change_type: Option<String>,
    pub resource: String,
    #[serde(default)]
    pub resource_data: Option<GraphResourceData>,
    #[serde(default)]
    pub tenant_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphResourceData {
    #[serde(default, rename = "@odata.type")]
    pub odata_type: Option<String>,
    #[serde(default, rename = "@odata.id")]
    pub odata_id: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
}

/// Path parts of a `callTranscript` resource, e.g.
/// `users/{userId}/onlineMeetings/{meetingId}/transcripts/{transcriptId}` or
/// `communications/onlineMeetings('{meetingId}')/transcripts('{transcriptId}')`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptResource {
    pub user_id: Option<String>,
    pub meeting_id: String,
    pub transcript_id: String,
}

impl TranscriptResource {
    pub fn parse(resource: &str) -> Option<Self> {
        let mut user_id = None;
        let mut meeting_id = None;
        let mut transcript_id = None;

        for (name, value) in resource_segments(resource) {
            match name.to_ascii_lowercase().as_str() {
                "users" => user_id = Some(value),
                "onlinemeetings" => meeting_id = Some(value),
                "transcripts" => transcript_id = Some(value),
                _ => {}
            }
        }

        Some(Self {
            user_id,
            meeting_id: meeting_id?,
            transcript_id: transcript_id?,
        })
    }
}

/// Splits a Graph resource path into `(collection, id)` pairs, accepting both
/// the `name/id` and the `name('id')` spellings.
fn resource_segments(resource: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    let mut parts = resource
        .trim_start_matches('/')
        .split('/')
        .filter(|part| !part.is_empty())
        .peekable();

    while let Some(part) = parts.next() {
        if let Some(pair) = keyed_segment(part) {
            pairs.push(pair);
            continue;
        }
        // A bare name owns the next part only when that part is a plain id,
        // e.g. `communications/onlineMeetings('x')` has no id for `communications`.
        if let Some(value) = parts.next_if(|next| keyed_segment(next).is_none()) {
            pairs.push((part.to_string(), value.to_string()));
        }
    }
    pairs
}

fn keyed_segment(part: &str) -> Option<(String, String)> {
    let (name, rest) = part.split_once("('")?;
    let value = rest.trim_end_matches(')').trim_end_matches('\'');
    Some((name.to_string(), value.to_string()))
}

impl GraphNotification {
    pub fn change_type(&self) -> &str {
        self.change_type.as_deref().unwrap_or("unknown")
    }

    pub fn transcript_resource(&self) -> Option<TranscriptResource> {
        let declared_type = self
            .resource_data
            .as_ref()
            .and_then(|data| data.odata_type.as_deref());
        if let Some(kind) = declared_type {
            if !kind.eq_ignore_ascii_case(TRANSCRIPT_ODATA_TYPE) {
                return None;
            }
        }
        TranscriptResource::parse(&self.resource)
    }

    /// `callTranscript.{changeType}` for transcripts, `{resourceType}.{changeType}`
    /// otherwise.
    pub fn event_type(&self) -> String {
        let resource_kind = if self.transcript_resource().is_some() {
            "callTranscript".to_string()
        } else {
            self.resource_data
                .as_ref()
                .and_then(|data| data.odata_type.as_deref())
                .map(|kind| {
                    kind.trim_start_matches("#microsoft.graph.")
                        .trim_start_matches("#Microsoft.Graph.")
                        .to_string()
                })
                .unwrap_or_else(|| "resource".to_string())
        };
        format!("{}.{}", resource_kind, self.change_type())
    }

    /// Graph notifications carry no id of their own; the resource path is
    /// unique per transcript.
    pub fn external_event_id(&self) -> String {
        format!(
            "{}:{}:{}",
            self.subscription_id,
            self.change_type(),
            self.resource
        )
    }

    /// Key used to look up the stored OAuth connection.
    pub fn account_key(&self) -> String {
        self.transcript_resource()
            .and_then(|resource| resource.user_id)
            .unwrap_or_else(|| self.subscription_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn notification(resource: &str, odata_type: Option<&str>) -> GraphNotification {
        let mut resource_data = json!({ "id": "t-1" });
        if let Some(kind) = odata_type {
            resource_data["@odata.type"] = json!(kind);
        }
        serde_json::from_value(json!({
            "subscriptionId": "sub-1",
            "clientState": "secret",
            "changeType": "created",
            "resource": resource,
            "resourceData": resource_data,
            "tenantId": "tenant-1"
        }))
        .unwrap()
    }

    #[test]
    fn parses_slash_style_resource() {
        let parsed =
            TranscriptResource::parse("users/u-1/onlineMeetings/m-1/transcripts/t-1").unwrap();
        assert_eq!(parsed.user_id.as_deref(), Some("u-1"));
        assert_eq!(parsed.meeting_id, "m-1");
        assert_eq!(parsed.transcript_id, "t-1");
    }

    #[test]
    fn parses_parenthesised_resource() {
        let parsed = TranscriptResource::parse(
            "communications/onlineMeetings('MSo1N2Y5')/transcripts('MSMjMCMjZTU')",
        )
        .unwrap();
        assert_eq!(parsed.user_id, None);
        assert_eq!(parsed.meeting_id, "MSo1N2Y5");
        assert_eq!(parsed.transcript_id, "MSMjMCMjZTU");
    }

    #[test]
    fn parses_mixed_resource_styles() {
        let parsed = TranscriptResource::parse(
            "/users/u-1/onlineMeetings('m-1')/transcripts('t-1')",
        )
        .unwrap();
        assert_eq!(parsed.user_id.as_deref(), Some("u-1"));
        assert_eq!(parsed.meeting_id, "m-1");
        assert_eq!(parsed.transcript_id, "t-1");
    }

    #[test]
    fn rejects_resources_without_transcript() {
        assert!(TranscriptResource::parse("users/u-1/onlineMeetings/m-1").is_none());
        assert!(TranscriptResource::parse("chats/c-1/messages/m-1").is_none());
    }

    #[test]
    fn transcript_notifications_get_transcript_event_type() {
        let item = notification(
            "users/u-1/onlineMeetings/m-1/transcripts/t-1",
            Some("#microsoft.graph.callTranscript"),
        );
        assert_eq!(item.event_type(), EVENT_TRANSCRIPT_CREATED);
        assert_eq!(item.account_key(), "u-1");
        assert_eq!(
            item.external_event_id(),
            "sub-1:created:users/u-1/onlineMeetings/m-1/transcripts/t-1"
        );
    }

    #[test]
    fn other_resources_keep_their_own_type() {
        let item = notification("chats/c-1/messages/m-1", Some("#microsoft.graph.chatMessage"));
        assert!(item.transcript_resource().is_none());
        assert_eq!(item.event_type(), "chatMessage.created");
        assert_eq!(item.account_key(), "sub-1");
    }
}
