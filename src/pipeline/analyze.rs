//! Analysis: send extracted text to a chat-completions service.
//!
//! ## Why failures become strings
//!
//! The analysis result lands in a history record that a person reads. A
//! record that says "The analysis request failed." is useful; a pipeline
//! that aborted is not. So [`AnalysisEngine::analyze`] never returns an
//! error: every failure maps to one of the fixed strings below and is
//! persisted exactly like a success. The inner
//! [`AnalysisEngine::request_summary`] keeps the `Result` shape for callers
//! that need to distinguish the two (the controller's state machine does).
//!
//! The service is resolved lazily, per call: an injected [`ChatService`]
//! wins, then a configured key, then `OPENAI_API_KEY` from the environment.
//! Construction therefore never fails on a missing key; only an actual
//! analysis does.

use crate::config::PipelineConfig;
use crate::error::ScanError;
use crate::prompts;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Analysis produced the fixed reply-missing placeholder.
pub const NO_RESPONSE_PLACEHOLDER: &str = "No response from the analysis service.";

/// The service answered with a non-success status (or no key was available).
pub const ANALYSIS_REQUEST_FAILED: &str = "The analysis request failed.";

/// Catch-all for transport errors, bad payloads, and template problems.
pub const ANALYSIS_ERROR_TEXT: &str = "An error occurred while analyzing the document.";

// ── Wire types ───────────────────────────────────────────────────────────

/// One chat message in the request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Request body for `POST {api_base}/chat/completions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: usize,
}

/// Response envelope. Every level is optional: a syntactically valid but
/// contentless reply is not an error, it is the no-response placeholder.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatChoice {
    pub message: Option<ChatReply>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatReply {
    pub content: Option<String>,
}

impl ChatResponse {
    /// The first choice's message content, if any non-empty content exists.
    pub fn first_content(self) -> Option<String> {
        self.choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .filter(|c| !c.is_empty())
    }
}

// ── Service seam ─────────────────────────────────────────────────────────

/// A chat-completions backend. Implemented by [`OpenAiChat`] for real use
/// and by stubs in tests; inject one via
/// [`crate::config::PipelineConfigBuilder::service`].
#[async_trait]
pub trait ChatService: Send + Sync {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, ScanError>;
}

/// reqwest-backed client for any OpenAI-compatible chat endpoint.
pub struct OpenAiChat {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
}

impl OpenAiChat {
    pub fn new(
        api_base: impl Into<String>,
        api_key: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self, ScanError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ScanError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        let api_base: String = api_base.into();
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl ChatService for OpenAiChat {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, ScanError> {
        let url = format!("{}/chat/completions", self.api_base);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ScanError::Analysis {
                message: e.to_string(),
            })?;

        let status = response.status();
        let body = response.bytes().await.map_err(|e| ScanError::Analysis {
            message: e.to_string(),
        })?;

        if !status.is_success() {
            return Err(ScanError::AnalysisStatus {
                status: status.as_u16(),
                detail: snippet(&String::from_utf8_lossy(&body), 400),
            });
        }

        serde_json::from_slice(&body).map_err(|e| ScanError::Analysis {
            message: format!("error decoding response body: {}", e),
        })
    }
}

/// Map an analysis-stage error to the fixed string persisted in its place.
pub fn failure_text(error: &ScanError) -> &'static str {
    match error {
        ScanError::AnalysisStatus { .. } | ScanError::ApiKeyMissing => ANALYSIS_REQUEST_FAILED,
        _ => ANALYSIS_ERROR_TEXT,
    }
}

// ── Engine ───────────────────────────────────────────────────────────────

/// Composes the prompt and drives the chat service.
pub struct AnalysisEngine {
    config: PipelineConfig,
}

impl AnalysisEngine {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Analyze extracted text, always producing a displayable string.
    pub async fn analyze(&self, extracted_text: &str) -> String {
        match self.request_summary(extracted_text).await {
            Ok(summary) => summary,
            Err(e) => {
                warn!("Analysis failed: {}", e);
                failure_text(&e).to_string()
            }
        }
    }

    /// Analyze extracted text, surfacing failures as errors.
    pub async fn request_summary(&self, extracted_text: &str) -> Result<String, ScanError> {
        let template = self.resolve_template().await?;
        let service = self.resolve_service()?;
        let request = self.build_request(&template, extracted_text);

        debug!("Requesting analysis from model '{}'", request.model);
        let response = service.complete(request).await?;

        Ok(response
            .first_content()
            .unwrap_or_else(|| NO_RESPONSE_PLACEHOLDER.to_string()))
    }

    /// The template for this run: inline config, then file, then built-in.
    pub async fn resolve_template(&self) -> Result<String, ScanError> {
        if let Some(template) = &self.config.template {
            return Ok(template.clone());
        }
        if let Some(path) = &self.config.template_path {
            let text = tokio::fs::read_to_string(path)
                .await
                .map_err(|e| ScanError::TemplateLoad {
                    path: path.clone(),
                    source: e,
                })?;
            return Ok(text.trim_end().to_string());
        }
        Ok(prompts::DEFAULT_ANALYSIS_TEMPLATE.to_string())
    }

    /// Assemble the fixed two-message request.
    pub fn build_request(&self, template: &str, extracted_text: &str) -> ChatRequest {
        let persona = self
            .config
            .system_prompt
            .clone()
            .unwrap_or_else(|| prompts::SYSTEM_PERSONA.to_string());

        ChatRequest {
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage::system(persona),
                ChatMessage::user(prompts::compose_prompt(template, extracted_text)),
            ],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        }
    }

    fn resolve_service(&self) -> Result<Arc<dyn ChatService>, ScanError> {
        if let Some(service) = &self.config.service {
            return Ok(Arc::clone(service));
        }
        let key = match &self.config.api_key {
            Some(key) => key.clone(),
            None => std::env::var("OPENAI_API_KEY").map_err(|_| ScanError::ApiKeyMissing)?,
        };
        Ok(Arc::new(OpenAiChat::new(
            &self.config.api_base,
            key,
            self.config.api_timeout_secs,
        )?))
    }
}

fn snippet(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}
