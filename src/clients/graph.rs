use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;

/// The subset of the Microsoft Graph API the Teams processor needs.
#[async_trait]
pub trait GraphApi: Send + Sync + 'static {
    async fn get_online_meeting(
        &self,
        access_token: &str,
        user_id: Option<&str>,
        meeting_id: &str,
    ) -> Result<OnlineMeeting>;

    /// Fetches a `callTranscript` resource's content as WebVTT.
    async fn get_transcript_content(&self, access_token: &str, resource: &str) -> Result<String>;
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineMeeting {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub start_date_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub participants: Option<MeetingParticipants>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MeetingParticipants {
    #[serde(default)]
    pub organizer: Option<MeetingParticipantInfo>,
    #[serde(default)]
    pub attendees: Vec<MeetingParticipantInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MeetingParticipantInfo {
    #[serde(default)]
    pub upn: Option<String>,
    #[serde(default)]
    pub identity: Option<IdentitySet>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IdentitySet {
    #[serde(default)]
    pub user: Option<Identity>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    #[serde(default)]
    pub display_name: Option<String>,
}

impl MeetingParticipantInfo {
    pub fn display_name(&self) -> Option<&str> {
        self.identity
            .as_ref()
            .and_then(|identity| identity.user.as_ref())
            .and_then(|user| user.display_name.as_deref())
    }
}

pub struct GraphHttpClient {
    http: Client,
    base_url: String,
}

impl GraphHttpClient {
    pub fn new(http: Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl GraphApi for GraphHttpClient {
    async fn get_online_meeting(
        &self,
        access_token: &str,
        user_id: Option<&str>,
        meeting_id: &str,
    ) -> Result<OnlineMeeting> {
        let url = match user_id {
            Some(user_id) => format!(
                "{}/users/{}/onlineMeetings/{}",
                self.base_url, user_id, meeting_id
            ),
            None => format!("{}/me/onlineMeetings/{}", self.base_url, meeting_id),
        };

        self.http
            .get(url)
            .bearer_auth(access_token)
            .send()
            .await
            .context("graph online meeting request failed")?
            .error_for_status()
            .context("graph rejected the online meeting request")?
            .json()
            .await
            .context("graph online meeting response was not JSON")
    }

    async fn get_transcript_content(&self, access_token: &str, resource: &str) -> Result<String> {
        let url = format!(
            "{}/{}/content",
            self.base_url,
            resource.trim_start_matches('/')
        );

        self.http
            .get(url)
            .query(&[("$format", "text/vtt")])
            .bearer_auth(access_token)
            .send()
            .await
            .context("graph transcript request failed")?
            .error_for_status()
            .context("graph rejected the transcript request")?
            .text()
            .await
            .context("failed to read graph transcript body")
    }
}
