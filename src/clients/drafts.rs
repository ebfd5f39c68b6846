use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 1024;
/// Transcripts are truncated to this many characters before prompting.
const MAX_TRANSCRIPT_CHARS: usize = 60_000;

#[derive(Debug, Clone)]
pub struct DraftRequest {
    pub platform: String,
    pub topic: Option<String>,
    pub host_email: Option<String>,
    pub participants: Vec<String>,
    pub transcript: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedDraft {
    pub subject: String,
    pub body: String,
    pub model: String,
}

#[async_trait]
pub trait DraftGenerator: Send + Sync + 'static {
    async fn generate(&self, request: &DraftRequest) -> Result<GeneratedDraft>;
}

/// Writes follow-up emails through the Anthropic Messages API.
pub struct AnthropicDraftGenerator {
    http: Client,
    api_key: Option<String>,
    model: String,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

const SYSTEM_PROMPT: &str = "You write concise, friendly follow-up emails after sales and client \
meetings. Reply with the subject on the first line prefixed by \"Subject:\", a blank line, \
then the email body. Do not invent commitments that were not discussed.";

impl AnthropicDraftGenerator {
    pub fn new(
        http: Client,
        api_key: Option<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            http,
            api_key,
            model: model.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl DraftGenerator for AnthropicDraftGenerator {
    async fn generate(&self, request: &DraftRequest) -> Result<GeneratedDraft> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("ANTHROPIC_API_KEY is not configured"))?;

        let prompt = build_prompt(request);
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: MAX_TOKENS,
            system: SYSTEM_PROMPT,
            messages: vec![json!({ "role": "user", "content": prompt })],
        };

        let response: MessagesResponse = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .context("draft generation request failed")?
            .error_for_status()
            .context("draft generation was rejected")?
            .json()
            .await
            .context("draft generation response was not JSON")?;

        let text: String = response
            .content
            .iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n");

        let (subject, body) = parse_draft_text(&text, request.topic.as_deref())
            .ok_or_else(|| anyhow!("draft generation returned no text"))?;

        Ok(GeneratedDraft {
            subject,
            body,
            model: response.model.unwrap_or_else(|| self.model.clone()),
        })
    }
}

fn build_prompt(request: &DraftRequest) -> String {
    let mut prompt = format!("Meeting platform: {}\n", request.platform);
    if let Some(topic) = &request.topic {
        prompt.push_str(&format!("Topic: {topic}\n"));
    }
    if let Some(host) = &request.host_email {
        prompt.push_str(&format!("Host: {host}\n"));
    }
    if !request.participants.is_empty() {
        prompt.push_str(&format!(
            "Participants: {}\n",
            request.participants.join(", ")
        ));
    }

    let transcript: String = request
        .transcript
        .chars()
        .take(MAX_TRANSCRIPT_CHARS)
        .collect();
    prompt.push_str("\nTranscript:\n");
    prompt.push_str(&transcript);
    prompt.push_str("\n\nWrite the follow-up email from the host to the other participants.");
    prompt
}

/// Splits model output into `(subject, body)`. A missing `Subject:` line
/// falls back to the meeting topic.
pub fn parse_draft_text(text: &str, topic: Option<&str>) -> Option<(String, String)> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    let (first, rest) = trimmed.split_once('\n').unwrap_or((trimmed, ""));
    let subject_line = first
        .trim()
        .strip_prefix("Subject:")
        .or_else(|| first.trim().strip_prefix("subject:"))
        .map(str::trim);

    match subject_line {
        Some(subject) if !subject.is_empty() => {
            Some((subject.to_string(), rest.trim().to_string()))
        }
        _ => {
            let subject = match topic {
                Some(topic) => format!("Follow-up: {topic}"),
                None => "Follow-up from our meeting".to_string(),
            };
            Some((subject, trimmed.to_string()))
        }
    }
}
