//! Motus HTTP API — WhatsApp webhook plus operational endpoints
//!
//! Architecture: each endpoint has a thin axum handler that delegates to a
//! pure inner function. The inner functions are directly testable without
//! axum dispatch machinery.
//!
//! Endpoints:
//! - GET  /health  — health check with DB status
//! - GET  /version — server version info
//! - GET  /webhook — WhatsApp subscription verification handshake
//! - POST /webhook — incoming message notifications
//!
//! The POST route always answers 200 regardless of processing outcome:
//! WhatsApp re-delivers on any non-success status, and a failed message is
//! better dropped than replayed in a loop.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use motus_core::Coordinator;
use serde::Deserialize;
use sqlx::PgPool;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

/// Shared state for all HTTP handlers. `pool` is absent when the server
/// runs against a non-Postgres store (tests).
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
    pub verify_token: String,
    pub pool: Option<PgPool>,
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/webhook", get(verify_handler).post(webhook_handler))
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    state: Arc<AppState>,
    host: &str,
    port: u16,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{host}:{port}");
    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Motus HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Webhook envelope DTOs
// ============================================================================

#[derive(Debug, Deserialize, Default)]
pub struct WebhookEnvelope {
    #[serde(default)]
    pub entry: Vec<WebhookEntry>,
}

#[derive(Debug, Deserialize, Default)]
pub struct WebhookEntry {
    #[serde(default)]
    pub changes: Vec<WebhookChange>,
}

#[derive(Debug, Deserialize, Default)]
pub struct WebhookChange {
    #[serde(default)]
    pub value: WebhookValue,
}

#[derive(Debug, Deserialize, Default)]
pub struct WebhookValue {
    #[serde(default)]
    pub messages: Vec<WebhookMessage>,
}

#[derive(Debug, Deserialize, Default)]
pub struct WebhookMessage {
    #[serde(default)]
    pub from: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    pub text: Option<WebhookText>,
}

#[derive(Debug, Deserialize, Default)]
pub struct WebhookText {
    #[serde(default)]
    pub body: String,
}

/// One user message pulled out of the notification envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub from: String,
    pub text: String,
}

/// Flatten the nested entry/changes/value structure into the text messages
/// it carries. Status notifications and non-text messages are skipped.
pub fn extract_incoming(envelope: &WebhookEnvelope) -> Vec<IncomingMessage> {
    envelope
        .entry
        .iter()
        .flat_map(|entry| &entry.changes)
        .flat_map(|change| &change.value.messages)
        .filter(|m| m.kind == "text" && !m.from.is_empty())
        .filter_map(|m| {
            m.text.as_ref().map(|t| IncomingMessage {
                from: m.from.clone(),
                text: t.body.clone(),
            })
        })
        .collect()
}

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

/// Inner health check — queries DB (when configured) and returns
/// (status_code, json_body).
pub async fn health_inner(pool: Option<&PgPool>) -> (StatusCode, serde_json::Value) {
    let postgres = match pool {
        Some(pool) => match motus_core::db::health_check(pool).await {
            Ok(v) => v,
            Err(e) => {
                return (
                    StatusCode::SERVICE_UNAVAILABLE,
                    serde_json::json!({
                        "status": "unhealthy",
                        "error": e.to_string(),
                    }),
                );
            }
        },
        None => "not configured".to_string(),
    };

    (
        StatusCode::OK,
        serde_json::json!({
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
            "postgresql": postgres,
        }),
    )
}

/// Inner version — returns version info (pure, no IO).
pub fn version_inner() -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "service": "motus",
    })
}

/// Inner verification handshake. WhatsApp sends `hub.mode=subscribe`, the
/// configured token and a challenge; echo the challenge back on a match.
pub fn verify_inner(
    verify_token: &str,
    params: &HashMap<String, String>,
) -> Result<String, StatusCode> {
    let mode = params.get("hub.mode").map(String::as_str);
    let token = params.get("hub.verify_token").map(String::as_str);
    let challenge = params.get("hub.challenge");

    match (mode, token, challenge) {
        (Some("subscribe"), Some(token), Some(challenge)) if token == verify_token => {
            Ok(challenge.clone())
        }
        _ => Err(StatusCode::FORBIDDEN),
    }
}

/// Inner webhook processing — runs every text message through the
/// coordinator. Always reports received; per-message failures are logged.
pub async fn webhook_inner(
    coordinator: &Coordinator,
    envelope: WebhookEnvelope,
) -> serde_json::Value {
    let incoming = extract_incoming(&envelope);
    let mut processed = 0usize;
    let mut failed = 0usize;

    for message in incoming {
        match coordinator.handle_message(&message.from, &message.text).await {
            Ok(outcome) => {
                processed += 1;
                if !outcome.delivered {
                    tracing::warn!(from = %message.from, "reply was not delivered");
                }
            }
            Err(e) => {
                failed += 1;
                tracing::error!(from = %message.from, error = %e, "message processing failed");
            }
        }
    }

    serde_json::json!({
        "status": "received",
        "processed": processed,
        "failed": failed,
    })
}

// ============================================================================
// Axum handler wrappers (thin — delegate to inner functions)
// ============================================================================

pub async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (status, body) = health_inner(state.pool.as_ref()).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn verify_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    match verify_inner(&state.verify_token, &params) {
        Ok(challenge) => (StatusCode::OK, challenge),
        Err(status) => (status, String::new()),
    }
}

pub async fn webhook_handler(
    State(state): State<Arc<AppState>>,
    Json(envelope): Json<WebhookEnvelope>,
) -> impl IntoResponse {
    let body = webhook_inner(&state.coordinator, envelope).await;
    (StatusCode::OK, Json(body))
}
