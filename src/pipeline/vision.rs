//! Vision-model interaction: one chat-completion call per page image.
//!
//! This module is intentionally thin — the prompts live in
//! [`crate::prompts`] and response interpretation lives in
//! [`crate::pipeline::parse`], so the seam here is exactly "page image in,
//! free text out". That seam is the [`VisionModel`] trait; the ingest
//! pipeline only ever sees `Arc<dyn VisionModel>`, which is what makes the
//! whole flow testable with scripted fakes and call-count assertions.
//!
//! There is deliberately no retry loop here. A failed page surfaces as a
//! per-page error and the document continues; re-running a file is an
//! explicit user action in the upload orchestrator.

use crate::config::IngestConfig;
use crate::error::{IngestError, PageError};
use crate::pipeline::encode::EncodedPage;
use crate::prompts::{PAGE_INSTRUCTION, SYSTEM_PROMPT};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Failure of a single model call, before page attribution.
#[derive(Debug, Error)]
pub enum VisionCallError {
    #[error("request timed out after {secs}s")]
    Timeout { secs: u64 },
    #[error("{0}")]
    Failed(String),
}

/// Narrow async seam over the multimodal model: one page image plus the two
/// fixed prompts in, raw response text out.
///
/// Implementations never parse or validate the response — any text,
/// including prose wrapped around a JSON array, is a valid return value.
#[async_trait]
pub trait VisionModel: Send + Sync {
    async fn extract_page(
        &self,
        system_prompt: &str,
        instruction: &str,
        page: &EncodedPage,
    ) -> Result<String, VisionCallError>;
}

/// Call the model for one page, attributing failures to the page.
///
/// The returned error is the non-fatal per-page kind; callers record it in
/// the page's outcome and continue with the rest of the document.
pub async fn call_page(
    model: &Arc<dyn VisionModel>,
    page: &EncodedPage,
) -> Result<String, PageError> {
    match model
        .extract_page(SYSTEM_PROMPT, PAGE_INSTRUCTION, page)
        .await
    {
        Ok(text) => Ok(text),
        Err(VisionCallError::Timeout { secs }) => {
            warn!(page = page.page, secs, "Vision call timed out");
            Err(PageError::Timeout {
                page: page.page,
                secs,
            })
        }
        Err(VisionCallError::Failed(detail)) => {
            warn!(page = page.page, %detail, "Vision call failed");
            Err(PageError::Extraction {
                page: page.page,
                detail,
            })
        }
    }
}

// ── OpenAI-compatible client ─────────────────────────────────────────────

/// Production [`VisionModel`] speaking the OpenAI chat-completions wire
/// shape (also served by OpenRouter, LM Studio, Ollama's compat endpoint).
pub struct OpenAiVisionClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    max_tokens: usize,
    timeout_secs: u64,
}

impl OpenAiVisionClient {
    pub fn new(config: &IngestConfig) -> Result<Self, IngestError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.api_timeout_secs))
            .build()
            .map_err(|e| IngestError::Internal(format!("http client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_response_tokens,
            timeout_secs: config.api_timeout_secs,
        })
    }
}

#[async_trait]
impl VisionModel for OpenAiVisionClient {
    async fn extract_page(
        &self,
        system_prompt: &str,
        instruction: &str,
        page: &EncodedPage,
    ) -> Result<String, VisionCallError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: MessageContent::Text(system_prompt),
                },
                ChatMessage {
                    role: "user",
                    content: MessageContent::Parts(vec![
                        ContentPart::Text { text: instruction },
                        ContentPart::ImageUrl {
                            image_url: ImageUrl {
                                url: &page.data_uri,
                            },
                        },
                    ]),
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let url = format!("{}/chat/completions", self.base_url);
        let mut request = self.client.post(&url).json(&body);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                VisionCallError::Timeout {
                    secs: self.timeout_secs,
                }
            } else {
                VisionCallError::Failed(format!("request failed: {e}"))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(VisionCallError::Failed(format!(
                "HTTP {status}: {}",
                truncate(&detail, 300)
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| VisionCallError::Failed(format!("malformed response body: {e}")))?;

        if let Some(usage) = &parsed.usage {
            debug!(
                page = page.page,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "Vision call complete"
            );
        }

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| VisionCallError::Failed("response contained no choices".into()))
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &s[..end])
    }
}

// ── Wire types ───────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: usize,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: MessageContent<'a>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum MessageContent<'a> {
    Text(&'a str),
    Parts(Vec<ContentPart<'a>>),
}

#[derive(Serialize)]
#[serde(tag = "type")]
enum ContentPart<'a> {
    #[serde(rename = "text")]
    Text { text: &'a str },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl<'a> },
}

#[derive(Serialize)]
struct ImageUrl<'a> {
    url: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}
