use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::models::{estimate_tokens, Message, Session};

use super::{ConversationStore, NewMessage, StoreError};

#[derive(Default)]
struct StoreState {
    sessions: HashMap<Uuid, Session>,
    messages: Vec<Message>,
}

/// In-memory conversation store with the same contract as the Postgres
/// backend, including `InvalidSession` and the recency window. Insertion
/// order stands in for `created_at` ordering so appends within the same
/// millisecond stay stable.
#[derive(Default)]
pub struct InMemoryConversationStore {
    state: Mutex<StoreState>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test/demo helper: number of stored messages across all sessions.
    pub fn message_count(&self) -> usize {
        self.state.lock().expect("store lock poisoned").messages.len()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn active_session(&self, user_id: &str) -> Result<Option<Session>, StoreError> {
        let state = self.state.lock().expect("store lock poisoned");
        Ok(state
            .sessions
            .values()
            .filter(|s| s.user_id == user_id && s.is_active)
            .max_by_key(|s| s.last_activity_at)
            .cloned())
    }

    async fn create_session(&self, user_id: &str) -> Result<Session, StoreError> {
        let mut state = self.state.lock().expect("store lock poisoned");

        for session in state.sessions.values_mut() {
            if session.user_id == user_id && session.is_active {
                session.is_active = false;
            }
        }

        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            started_at: now,
            last_activity_at: now,
            is_active: true,
            metadata: serde_json::json!({}),
        };
        state.sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn deactivate_session(&self, session_id: Uuid) -> Result<(), StoreError> {
        let mut state = self.state.lock().expect("store lock poisoned");
        if let Some(session) = state.sessions.get_mut(&session_id) {
            session.is_active = false;
        }
        Ok(())
    }

    async fn deactivate_idle_sessions(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut state = self.state.lock().expect("store lock poisoned");
        let mut count = 0u64;
        for session in state.sessions.values_mut() {
            if session.is_active && session.last_activity_at < cutoff {
                session.is_active = false;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn touch_session(&self, session_id: Uuid) -> Result<(), StoreError> {
        let mut state = self.state.lock().expect("store lock poisoned");
        if let Some(session) = state.sessions.get_mut(&session_id) {
            session.last_activity_at = Utc::now();
        }
        Ok(())
    }

    async fn append(&self, message: NewMessage) -> Result<Message, StoreError> {
        let mut state = self.state.lock().expect("store lock poisoned");

        let now = Utc::now();
        match state.sessions.get_mut(&message.session_id) {
            Some(session) if session.is_active => {
                session.last_activity_at = now;
            }
            _ => {
                return Err(StoreError::InvalidSession {
                    session_id: message.session_id,
                });
            }
        }

        let token_estimate = estimate_tokens(&message.content);
        let stored = Message {
            id: Uuid::new_v4(),
            session_id: message.session_id,
            role: message.role,
            content: message.content,
            metadata: message.metadata,
            agent_name: message.agent_name,
            token_estimate,
            created_at: now,
        };
        state.messages.push(stored.clone());
        Ok(stored)
    }

    async fn recent(
        &self,
        session_id: Uuid,
        within: Duration,
        max: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let state = self.state.lock().expect("store lock poisoned");
        let cutoff = Utc::now() - within;

        let qualifying: Vec<Message> = state
            .messages
            .iter()
            .filter(|m| m.session_id == session_id && m.created_at >= cutoff)
            .cloned()
            .collect();

        // Keep the most-recent `max`, oldest-first.
        let skip = qualifying.len().saturating_sub(max);
        Ok(qualifying.into_iter().skip(skip).collect())
    }
}
