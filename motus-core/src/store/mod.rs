//! Conversation store — durable append-only log of turns, keyed by session
//!
//! Provides a `ConversationStore` trait with implementations for:
//! - **Postgres** — production backend over `conversation_sessions` /
//!   `conversation_messages`
//! - **In-memory** — mutex-guarded maps with the same contract, used by
//!   tests

mod memory;
mod postgres;

pub use memory::InMemoryConversationStore;
pub use postgres::PgConversationStore;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Message, MessageRole, Session};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Session {session_id} does not reference an active session")]
    InvalidSession { session_id: Uuid },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Input for a message append. The id, timestamp and token estimate are
/// assigned by the store.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub session_id: Uuid,
    pub role: MessageRole,
    pub content: String,
    pub metadata: serde_json::Value,
    pub agent_name: Option<String>,
}

impl NewMessage {
    pub fn new(session_id: Uuid, role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            session_id,
            role,
            content: content.into(),
            metadata: serde_json::json!({}),
            agent_name: None,
        }
    }

    pub fn with_agent(mut self, agent_name: impl Into<String>) -> Self {
        self.agent_name = Some(agent_name.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Durable conversation log. Messages are never mutated or deleted by
/// normal operation; session deactivation affects reachability, not
/// existence.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// The currently-active session for a user, if any.
    async fn active_session(&self, user_id: &str) -> Result<Option<Session>, StoreError>;

    /// Create a fresh active session for the user, deactivating any
    /// currently-active one in the same atomic step.
    async fn create_session(&self, user_id: &str) -> Result<Session, StoreError>;

    /// Mark one session inactive.
    async fn deactivate_session(&self, session_id: Uuid) -> Result<(), StoreError>;

    /// Deactivate every active session idle since before `cutoff`.
    /// Returns the number of sessions deactivated.
    async fn deactivate_idle_sessions(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Bump a session's `last_activity_at` to now.
    async fn touch_session(&self, session_id: Uuid) -> Result<(), StoreError>;

    /// Append one turn. Fails with [`StoreError::InvalidSession`] when the
    /// session is missing or inactive. Side effect: touches the owning
    /// session.
    async fn append(&self, message: NewMessage) -> Result<Message, StoreError>;

    /// At most `max` most-recent messages whose `created_at` falls within
    /// `within` of now, returned oldest-first. Empty when none qualify.
    async fn recent(
        &self,
        session_id: Uuid,
        within: Duration,
        max: usize,
    ) -> Result<Vec<Message>, StoreError>;
}
