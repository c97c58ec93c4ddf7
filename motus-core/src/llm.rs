//! Language-model client — completion backend for the domain handlers
//!
//! Provides a `CompletionBackend` trait with a Claude Messages API
//! implementation. Handlers compose {system instructions, compressed
//! context, current message}; the client owns transport, timeouts and
//! retries.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

use crate::config::LlmConfig;

const ANTHROPIC_VERSION: &str = "2023-06-01";

// ============================================================================
// CompletionBackend trait
// ============================================================================

/// Prompt parts for one completion. `context` is the compressed history
/// window; empty means the model sees only the current message.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub system: String,
    pub context: String,
    pub message: String,
}

impl CompletionRequest {
    /// Render the user-turn content. Context, when present, precedes the
    /// current message under fixed labels so continuity survives rotation.
    pub fn user_content(&self) -> String {
        if self.context.is_empty() {
            self.message.clone()
        } else {
            format!(
                "Conversación reciente: {}\n\nMensaje actual: {}",
                self.context, self.message
            )
        }
    }
}

/// Abstraction over completion providers.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

// ============================================================================
// Error types
// ============================================================================

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Empty completion in response")]
    EmptyCompletion,

    #[error("Missing API key")]
    MissingApiKey,

    #[error("All {attempts} retry attempts failed")]
    RetryExhausted { attempts: usize },
}

// ============================================================================
// Claude API structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
struct ClaudeRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "String::is_empty")]
    system: String,
    messages: Vec<ClaudeMessage>,
}

#[derive(Debug, Serialize)]
struct ClaudeMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ClaudeResponse {
    content: Vec<ClaudeContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ClaudeContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct ClaudeErrorResponse {
    error: Option<ClaudeErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ClaudeErrorDetail {
    message: String,
}

// ============================================================================
// ClaudeClient
// ============================================================================

/// Claude Messages API client.
#[derive(Debug, Clone)]
pub struct ClaudeClient {
    client: Client,
    config: LlmConfig,
    base_url: String,
}

impl ClaudeClient {
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        Self::with_base_url(config, "https://api.anthropic.com".to_string())
    }

    /// Create a client with a custom base URL (for testing / integration)
    pub fn with_base_url(config: LlmConfig, base_url: String) -> Result<Self, LlmError> {
        if config.api_key.is_empty() {
            return Err(LlmError::MissingApiKey);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            config,
            base_url,
        })
    }

    async fn complete_once(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let url = format!("{}/v1/messages", self.base_url);

        let body = ClaudeRequest {
            model: self.config.model.clone(),
            max_tokens: self.config.max_tokens,
            system: request.system.clone(),
            messages: vec![ClaudeMessage {
                role: "user",
                content: request.user_content(),
            }],
        };

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ClaudeErrorResponse>(&error_body)
                .ok()
                .and_then(|e| e.error)
                .map(|e| e.message)
                .unwrap_or(error_body);

            tracing::error!(code = status.as_u16(), message = %message, "Claude API error");

            return Err(LlmError::Api {
                code: status.as_u16(),
                message,
            });
        }

        let parsed: ClaudeResponse = response.json().await?;

        let text: String = parsed
            .content
            .iter()
            .filter(|b| b.kind == "text")
            .map(|b| b.text.as_str())
            .collect();

        if text.is_empty() {
            return Err(LlmError::EmptyCompletion);
        }

        Ok(text)
    }
}

#[async_trait]
impl CompletionBackend for ClaudeClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let retry_strategy = ExponentialBackoff::from_millis(self.config.retry_delay_ms)
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.config.max_retries);

        let result = Retry::spawn(retry_strategy, || self.complete_once(request)).await;

        match result {
            Ok(text) => Ok(text),
            Err(e) => {
                tracing::error!(
                    attempts = self.config.max_retries,
                    error = %e,
                    "All completion retry attempts failed"
                );
                Err(LlmError::RetryExhausted {
                    attempts: self.config.max_retries,
                })
            }
        }
    }

    fn name(&self) -> &str {
        "claude"
    }
}
