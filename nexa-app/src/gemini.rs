//! Gemini REST client for text, image and dashboard-insight requests.

use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::model_profiles::{IMAGE_MODEL, INSIGHTS_MODEL};

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(90);

pub const INSIGHTS_PROMPT: &str = "Generate 3 short, futuristic OS status messages for NEXA v7.3 (e.g. 'Universal File Core: Online', 'Doc Analysis: Ready'). JSON array.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            inline_data: None,
        }
    }

    pub fn inline(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            text: None,
            inline_data: Some(InlineData {
                mime_type: mime_type.into(),
                data: data.into(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    pub role: String,
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextRequest {
    pub model: String,
    pub contents: Vec<Content>,
    pub system_instruction: String,
    pub temperature: f32,
    pub thinking_budget: Option<u32>,
}

/// An image returned inline by the image model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub mime_type: String,
    pub data: String,
}

/// Remote generation capability. The chat service only talks to this trait.
#[async_trait]
pub trait GenerativeBackend: Send + Sync {
    /// Concatenated reply text; empty when the model sent none.
    async fn generate_text(&self, request: &TextRequest) -> anyhow::Result<String>;

    /// Generate an image from `prompt`, editing `source` when given.
    async fn generate_image(
        &self,
        prompt: &str,
        source: Option<&InlineData>,
    ) -> anyhow::Result<Option<GeneratedImage>>;

    /// Raw JSON text of the dashboard status lines.
    async fn dashboard_insights(&self) -> anyhow::Result<String>;
}

pub struct GeminiClient {
    api_key: String,
    base_url: String,
    http: reqwest::Client,
}

impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>) -> anyhow::Result<Self> {
        Self::with_base_url(api_key, DEFAULT_API_BASE)
    }

    pub fn with_base_url(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    async fn generate_content(&self, model: &str, body: &Value) -> anyhow::Result<Value> {
        let url = format!("{}/v1beta/models/{model}:generateContent", self.base_url);
        debug!(model, "generateContent request");
        let resp = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("Gemini API error {status}: {}", api_error_message(&body));
        }
        Ok(resp.json().await?)
    }
}

#[async_trait]
impl GenerativeBackend for GeminiClient {
    async fn generate_text(&self, request: &TextRequest) -> anyhow::Result<String> {
        let resp = self
            .generate_content(&request.model, &text_request_body(request))
            .await?;
        Ok(response_text(&resp))
    }

    async fn generate_image(
        &self,
        prompt: &str,
        source: Option<&InlineData>,
    ) -> anyhow::Result<Option<GeneratedImage>> {
        let resp = self
            .generate_content(IMAGE_MODEL, &image_request_body(prompt, source))
            .await?;
        Ok(first_inline_image(&resp))
    }

    async fn dashboard_insights(&self) -> anyhow::Result<String> {
        let resp = self
            .generate_content(INSIGHTS_MODEL, &insights_request_body())
            .await?;
        Ok(response_text(&resp))
    }
}

pub fn text_request_body(request: &TextRequest) -> Value {
    let mut generation_config = json!({ "temperature": request.temperature });
    if let Some(budget) = request.thinking_budget {
        generation_config["thinkingConfig"] = json!({ "thinkingBudget": budget });
    }
    json!({
        "contents": request.contents,
        "systemInstruction": { "parts": [{ "text": request.system_instruction }] },
        "generationConfig": generation_config,
    })
}

pub fn image_request_body(prompt: &str, source: Option<&InlineData>) -> Value {
    let mut parts = Vec::with_capacity(2);
    if let Some(src) = source {
        parts.push(Part::inline(src.mime_type.clone(), src.data.clone()));
    }
    parts.push(Part::text(prompt));
    json!({
        "contents": [{ "role": "user", "parts": parts }],
        "generationConfig": { "responseModalities": ["IMAGE"] },
    })
}

pub fn insights_request_body() -> Value {
    json!({
        "contents": [{ "role": "user", "parts": [{ "text": INSIGHTS_PROMPT }] }],
        "generationConfig": { "responseMimeType": "application/json" },
    })
}

fn first_candidate_parts(resp: &Value) -> Vec<Part> {
    resp.pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter(|p| !p.get("thought").and_then(Value::as_bool).unwrap_or(false))
                .filter_map(|p| serde_json::from_value::<Part>(p.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}

/// Text parts of the first candidate, joined. Thought summaries are skipped.
pub fn response_text(resp: &Value) -> String {
    first_candidate_parts(resp)
        .into_iter()
        .filter_map(|p| p.text)
        .collect()
}

pub fn first_inline_image(resp: &Value) -> Option<GeneratedImage> {
    first_candidate_parts(resp)
        .into_iter()
        .find_map(|p| p.inline_data)
        .map(|d| GeneratedImage {
            mime_type: d.mime_type,
            data: d.data,
        })
}

fn api_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.to_string())
}
