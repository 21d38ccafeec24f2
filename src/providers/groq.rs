use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::filename;
use super::{ExternalError, MetadataProvider};
use crate::config::GroqConfig;
use crate::models::{AssetRef, SubmissionContext, VideoMetadata};

const SYSTEM_PROMPT: &str = "You are a YouTube SEO expert. Always respond with valid JSON only.";

const PROMPT_TEMPLATE: &str = "You are a YouTube SEO expert. Given the video filename below, \
generate compelling metadata for a YouTube video.

Filename: {filename}

Respond in this EXACT JSON format (no markdown, no extra text):
{
  \"title\": \"Catchy, SEO-friendly title (max 100 chars)\",
  \"description\": \"Engaging description with relevant keywords (200-500 chars). Include a call to action.\",
  \"tags\": \"tag1, tag2, tag3, tag4, tag5\"
}";

static CODE_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^\s*```[a-zA-Z]*\s*(.*?)\s*```\s*$").expect("valid code fence regex")
});

/// Metadata from an OpenAI-compatible chat completion endpoint (Groq by default).
pub struct GroqMetadata {
    client: reqwest::Client,
    config: GroqConfig,
}

impl GroqMetadata {
    pub fn new(config: GroqConfig) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| format!("Failed to build reqwest client: {e}"))?;
        Ok(Self { client, config })
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

/// Tags come back either as "a, b, c" or as a JSON array.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawTags {
    Csv(String),
    List(Vec<String>),
}

#[derive(Deserialize)]
struct RawMetadata {
    title: Option<String>,
    description: Option<String>,
    tags: Option<RawTags>,
}

pub fn build_prompt(context: &SubmissionContext) -> String {
    let mut prompt = PROMPT_TEMPLATE.replace("{filename}", &context.filename);
    if let Some(caption) = context.caption.as_deref().filter(|c| !c.trim().is_empty()) {
        prompt.push_str(&format!("\n\nAdditional context from user: {caption}"));
    }
    prompt
}

/// Parse the model's answer, falling back to filename-derived metadata when
/// the answer is not the JSON we asked for.
pub fn parse_answer(raw: &str, context: &SubmissionContext) -> VideoMetadata {
    let body = CODE_FENCE
        .captures(raw)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(raw)
        .trim();

    let parsed: RawMetadata = match serde_json::from_str(body) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::warn!("Unparseable metadata answer for '{}': {e}", context.filename);
            return filename::from_filename(&context.filename, context.caption.as_deref());
        }
    };

    let title = parsed
        .title
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| filename::title_from_filename(&context.filename));

    let tags = match parsed.tags {
        Some(RawTags::Csv(s)) => s
            .split(',')
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect(),
        Some(RawTags::List(list)) => list
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect(),
        None => Vec::new(),
    };

    VideoMetadata {
        title,
        description: parsed.description.unwrap_or_default(),
        tags,
    }
}

#[async_trait]
impl MetadataProvider for GroqMetadata {
    fn name(&self) -> &str {
        "groq"
    }

    async fn generate(
        &self,
        _asset: &AssetRef,
        context: &SubmissionContext,
    ) -> Result<VideoMetadata, ExternalError> {
        let request = ChatCompletionRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: build_prompt(context),
                },
            ],
            temperature: 0.7,
            max_tokens: 500,
        };

        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ExternalError::from_reqwest("Metadata request failed", e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .text()
                .await
                .unwrap_or_default()
                .chars()
                .take(512)
                .collect::<String>();
            return Err(ExternalError::from_status(status.as_u16(), &body));
        }

        let completion: ChatCompletionResponse = resp
            .json()
            .await
            .map_err(|e| ExternalError::Transient(format!("Invalid completion response: {e}")))?;

        let raw = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ExternalError::Transient("Completion had no content".to_string()))?;

        let metadata = parse_answer(&raw, context);
        tracing::info!("Generated metadata for '{}': {}", context.filename, metadata.title);
        Ok(metadata)
    }
}
