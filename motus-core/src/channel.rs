//! Outbound messaging channel — delivery plus pre-send validation
//!
//! The channel accepts a destination identifier and plain text. WhatsApp
//! caps text bodies at 4096 characters, so every body passes through
//! `prepare_outbound` first: oversize text is truncated with a visible
//! suffix, empty or whitespace-only text is replaced with a fixed apology.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::config::WhatsAppConfig;

/// Hard limit imposed by the WhatsApp Cloud API on text bodies.
pub const MAX_BODY_CHARS: usize = 4096;

/// Cut point for oversize bodies, leaving room for the truncation suffix.
const TRUNCATE_AT_CHARS: usize = 4046;

const TRUNCATION_SUFFIX: &str = "... [mensaje truncado]";

/// Sent when the aggregated response fails validation outright.
pub const VALIDATION_APOLOGY: &str =
    "Lo siento, tuve un problema generando la respuesta. ¿Puedes intentar de nuevo?";

// ============================================================================
// Pre-send validation
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedBody {
    pub body: String,
    pub was_truncated: bool,
    pub was_replaced: bool,
}

/// Validate and bound an outbound body. Never fails: malformed input is
/// replaced, oversize input is truncated at a character (not byte) offset.
pub fn prepare_outbound(body: &str) -> PreparedBody {
    if body.trim().is_empty() {
        return PreparedBody {
            body: VALIDATION_APOLOGY.to_string(),
            was_truncated: false,
            was_replaced: true,
        };
    }

    let char_count = body.chars().count();
    if char_count <= MAX_BODY_CHARS {
        return PreparedBody {
            body: body.to_string(),
            was_truncated: false,
            was_replaced: false,
        };
    }

    let head: String = body.chars().take(TRUNCATE_AT_CHARS).collect();
    PreparedBody {
        body: format!("{head}{TRUNCATION_SUFFIX}"),
        was_truncated: true,
        was_replaced: false,
    }
}

// ============================================================================
// OutboundChannel trait
// ============================================================================

/// Abstraction over delivery transports. Callers pass already-prepared
/// bodies; implementations only move bytes.
#[async_trait]
pub trait OutboundChannel: Send + Sync {
    async fn send_text(&self, to: &str, body: &str) -> Result<(), ChannelError>;

    /// Channel name for logging.
    fn name(&self) -> &str;
}

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Missing access token")]
    MissingToken,
}

// ============================================================================
// WhatsApp Cloud API structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
struct WhatsAppSendRequest<'a> {
    messaging_product: &'static str,
    to: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    text: WhatsAppText<'a>,
}

#[derive(Debug, Serialize)]
struct WhatsAppText<'a> {
    body: &'a str,
}

#[derive(Debug, Deserialize)]
struct WhatsAppErrorResponse {
    error: Option<WhatsAppErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct WhatsAppErrorDetail {
    message: String,
}

// ============================================================================
// WhatsAppClient
// ============================================================================

/// WhatsApp Cloud API client. `api_url` already includes the phone number
/// id, so sends go to `{api_url}/messages`.
#[derive(Debug, Clone)]
pub struct WhatsAppClient {
    client: Client,
    api_url: String,
    token: String,
}

impl WhatsAppClient {
    pub fn new(config: &WhatsAppConfig) -> Result<Self, ChannelError> {
        if config.token.is_empty() {
            return Err(ChannelError::MissingToken);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }
}

#[async_trait]
impl OutboundChannel for WhatsAppClient {
    async fn send_text(&self, to: &str, body: &str) -> Result<(), ChannelError> {
        let url = format!("{}/messages", self.api_url);

        let request = WhatsAppSendRequest {
            messaging_product: "whatsapp",
            to,
            kind: "text",
            text: WhatsAppText { body },
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&request)
            .send()
            .await?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<WhatsAppErrorResponse>(&error_body)
                .ok()
                .and_then(|e| e.error)
                .map(|e| e.message)
                .unwrap_or(error_body);

            tracing::error!(code = status.as_u16(), message = %message, "WhatsApp API error");

            return Err(ChannelError::Api {
                code: status.as_u16(),
                message,
            });
        }

        Ok(())
    }

    fn name(&self) -> &str {
        "whatsapp"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn body_within_limit_passes_through() {
        let body = "a".repeat(MAX_BODY_CHARS);
        let prepared = prepare_outbound(&body);
        assert_eq!(prepared.body, body);
        assert!(!prepared.was_truncated);
        assert!(!prepared.was_replaced);
    }

    #[test]
    fn oversize_body_is_truncated_with_suffix() {
        let prepared = prepare_outbound(&"a".repeat(5000));
        assert!(prepared.was_truncated);
        assert!(prepared.body.starts_with(&"a".repeat(TRUNCATE_AT_CHARS)));
        assert!(prepared.body.ends_with(TRUNCATION_SUFFIX));
        assert!(prepared.body.chars().count() <= MAX_BODY_CHARS);
    }

    #[test]
    fn truncation_counts_chars_not_bytes() {
        let prepared = prepare_outbound(&"ñ".repeat(5000));
        assert!(prepared.was_truncated);
        assert!(prepared.body.starts_with(&"ñ".repeat(TRUNCATE_AT_CHARS)));
        assert!(prepared.body.chars().count() <= MAX_BODY_CHARS);
    }

    #[test]
    fn empty_body_is_replaced_with_apology() {
        for body in ["", "   ", "\n\t"] {
            let prepared = prepare_outbound(body);
            assert_eq!(prepared.body, VALIDATION_APOLOGY);
            assert!(prepared.was_replaced);
        }
    }

    fn test_config(api_url: String) -> WhatsAppConfig {
        WhatsAppConfig {
            api_url,
            token: "test-token".to_string(),
            timeout_seconds: 5,
        }
    }

    #[test]
    fn missing_token_is_rejected_at_construction() {
        let config = WhatsAppConfig {
            token: String::new(),
            ..test_config("http://localhost".to_string())
        };
        assert!(matches!(
            WhatsAppClient::new(&config),
            Err(ChannelError::MissingToken)
        ));
    }

    #[tokio::test]
    async fn send_posts_the_cloud_api_envelope() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/messages"))
            .and(header("authorization", "Bearer test-token"))
            .and(body_json(serde_json::json!({
                "messaging_product": "whatsapp",
                "to": "5215551234567",
                "type": "text",
                "text": {"body": "hola"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "messages": [{"id": "wamid.test"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = WhatsAppClient::new(&test_config(server.uri())).unwrap();
        client.send_text("5215551234567", "hola").await.unwrap();
    }

    #[tokio::test]
    async fn api_error_surfaces_code_and_message() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/messages"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "error": {"message": "Invalid OAuth access token"}
            })))
            .mount(&server)
            .await;

        let client = WhatsAppClient::new(&test_config(server.uri())).unwrap();
        let err = client.send_text("x", "hola").await.unwrap_err();
        match err {
            ChannelError::Api { code, message } => {
                assert_eq!(code, 401);
                assert_eq!(message, "Invalid OAuth access token");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
