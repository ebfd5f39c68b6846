use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;

/// Transcripts still being written report this state.
pub const TRANSCRIPT_STATE_STARTED: &str = "STARTED";

/// The subset of the Google Meet REST API the Meet processor needs.
#[async_trait]
pub trait MeetApi: Send + Sync + 'static {
    async fn get_conference_record(&self, access_token: &str, name: &str)
        -> Result<ConferenceRecord>;

    async fn list_transcripts(
        &self,
        access_token: &str,
        conference_record: &str,
    ) -> Result<Vec<MeetTranscript>>;

    async fn list_transcript_entries(
        &self,
        access_token: &str,
        transcript: &str,
    ) -> Result<Vec<TranscriptEntry>>;

    async fn list_participants(
        &self,
        access_token: &str,
        conference_record: &str,
    ) -> Result<Vec<ConferenceParticipant>>;
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConferenceRecord {
    pub name: String,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub space: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetTranscript {
    pub name: String,
    #[serde(default)]
    pub state: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptEntry {
    #[serde(default)]
    pub participant: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConferenceParticipant {
    pub name: String,
    #[serde(default)]
    pub signedin_user: Option<NamedUser>,
    #[serde(default)]
    pub anonymous_user: Option<NamedUser>,
    #[serde(default)]
    pub phone_user: Option<NamedUser>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamedUser {
    #[serde(default)]
    pub display_name: Option<String>,
}

impl ConferenceParticipant {
    pub fn display_name(&self) -> Option<&str> {
        [&self.signedin_user, &self.anonymous_user, &self.phone_user]
            .into_iter()
            .flatten()
            .find_map(|user| user.display_name.as_deref())
    }
}

impl MeetTranscript {
    pub fn is_finished(&self) -> bool {
        self.state.as_deref() != Some(TRANSCRIPT_STATE_STARTED)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Page<T> {
    #[serde(default = "Vec::new", alias = "transcripts", alias = "transcriptEntries", alias = "participants")]
    items: Vec<T>,
    #[serde(default)]
    next_page_token: Option<String>,
}

pub struct MeetHttpClient {
    http: Client,
    base_url: String,
}

impl MeetHttpClient {
    pub fn new(http: Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn list_all<T: DeserializeOwned>(&self, access_token: &str, path: &str) -> Result<Vec<T>> {
        let url = format!("{}/{}", self.base_url, path);
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self.http.get(&url).bearer_auth(access_token);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let page: Page<T> = request
                .send()
                .await
                .with_context(|| format!("meet request for {path} failed"))?
                .error_for_status()
                .with_context(|| format!("meet rejected the request for {path}"))?
                .json()
                .await
                .with_context(|| format!("meet response for {path} was not JSON"))?;

            items.extend(page.items);
            match page.next_page_token.filter(|token| !token.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(items)
    }
}

#[async_trait]
impl MeetApi for MeetHttpClient {
    async fn get_conference_record(
        &self,
        access_token: &str,
        name: &str,
    ) -> Result<ConferenceRecord> {
        self.http
            .get(format!("{}/{}", self.base_url, name))
            .bearer_auth(access_token)
            .send()
            .await
            .context("meet conference record request failed")?
            .error_for_status()
            .context("meet rejected the conference record request")?
            .json()
            .await
            .context("meet conference record response was not JSON")
    }

    async fn list_transcripts(
        &self,
        access_token: &str,
        conference_record: &str,
    ) -> Result<Vec<MeetTranscript>> {
        self.list_all(access_token, &format!("{conference_record}/transcripts"))
            .await
    }

    async fn list_transcript_entries(
        &self,
        access_token: &str,
        transcript: &str,
    ) -> Result<Vec<TranscriptEntry>> {
        self.list_all(access_token, &format!("{transcript}/entries"))
            .await
    }

    async fn list_participants(
        &self,
        access_token: &str,
        conference_record: &str,
    ) -> Result<Vec<ConferenceParticipant>> {
        self.list_all(access_token, &format!("{conference_record}/participants"))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn pages_accept_each_collection_name() {
        let page: Page<TranscriptEntry> = serde_json::from_value(json!({
            "transcriptEntries": [{ "participant": "p/1", "text": "hi" }],
            "nextPageToken": "abc"
        }))
        .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.next_page_token.as_deref(), Some("abc"));

        let empty: Page<MeetTranscript> = serde_json::from_value(json!({})).unwrap();
        assert!(empty.items.is_empty());
    }

    #[test]
    fn participant_name_comes_from_any_user_kind() {
        let participant: ConferenceParticipant = serde_json::from_value(json!({
            "name": "conferenceRecords/c/participants/p",
            "phoneUser": { "displayName": "+1 555" }
        }))
        .unwrap();
        assert_eq!(participant.display_name(), Some("+1 555"));
    }

    #[test]
    fn started_transcripts_are_not_finished() {
        let started = MeetTranscript {
            name: "t".into(),
            state: Some("STARTED".into()),
        };
        let generated = MeetTranscript {
            name: "t".into(),
            state: Some("FILE_GENERATED".into()),
        };
        assert!(!started.is_finished());
        assert!(generated.is_finished());
    }
}
