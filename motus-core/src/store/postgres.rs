use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{estimate_tokens, Message, MessageRole, Session};

use super::{ConversationStore, NewMessage, StoreError};

/// Postgres-backed conversation store.
///
/// Expects `conversation_sessions` and `conversation_messages` tables plus a
/// partial unique index on `conversation_sessions (user_id) WHERE is_active`
/// as the cross-instance backstop for the single-active-session invariant.
/// Row-level security on those tables is transparent here: the store only
/// relies on the atomicity and isolation the database provides.
#[derive(Clone)]
pub struct PgConversationStore {
    pool: PgPool,
}

impl PgConversationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

type MessageRow = (
    Uuid,
    Uuid,
    String,
    String,
    serde_json::Value,
    Option<String>,
    i32,
    DateTime<Utc>,
);

fn row_to_message(row: MessageRow) -> Message {
    let (id, session_id, role, content, metadata, agent_name, token_estimate, created_at) = row;
    Message {
        id,
        session_id,
        role: MessageRole::parse(&role),
        content,
        metadata,
        agent_name,
        token_estimate,
        created_at,
    }
}

#[async_trait]
impl ConversationStore for PgConversationStore {
    async fn active_session(&self, user_id: &str) -> Result<Option<Session>, StoreError> {
        let session = sqlx::query_as::<_, Session>(
            r#"
            SELECT id, user_id, started_at, last_activity_at, is_active, metadata
            FROM conversation_sessions
            WHERE user_id = $1 AND is_active = TRUE
            ORDER BY last_activity_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(session)
    }

    async fn create_session(&self, user_id: &str) -> Result<Session, StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE conversation_sessions SET is_active = FALSE WHERE user_id = $1 AND is_active = TRUE",
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        let session = sqlx::query_as::<_, Session>(
            r#"
            INSERT INTO conversation_sessions (id, user_id, started_at, last_activity_at, is_active, metadata)
            VALUES ($1, $2, NOW(), NOW(), TRUE, '{}'::jsonb)
            RETURNING id, user_id, started_at, last_activity_at, is_active, metadata
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(user_id = %user_id, session_id = %session.id, "Created conversation session");
        Ok(session)
    }

    async fn deactivate_session(&self, session_id: Uuid) -> Result<(), StoreError> {
        sqlx::query("UPDATE conversation_sessions SET is_active = FALSE WHERE id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn deactivate_idle_sessions(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE conversation_sessions SET is_active = FALSE WHERE is_active = TRUE AND last_activity_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn touch_session(&self, session_id: Uuid) -> Result<(), StoreError> {
        sqlx::query("UPDATE conversation_sessions SET last_activity_at = NOW() WHERE id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn append(&self, message: NewMessage) -> Result<Message, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Touch-and-check in one statement: zero rows means the session is
        // missing or inactive, which is fatal for this append.
        let touched = sqlx::query(
            "UPDATE conversation_sessions SET last_activity_at = NOW() WHERE id = $1 AND is_active = TRUE",
        )
        .bind(message.session_id)
        .execute(&mut *tx)
        .await?;

        if touched.rows_affected() == 0 {
            return Err(StoreError::InvalidSession {
                session_id: message.session_id,
            });
        }

        let token_estimate = estimate_tokens(&message.content);

        let row = sqlx::query_as::<_, MessageRow>(
            r#"
            INSERT INTO conversation_messages
                (id, session_id, role, content, metadata, agent_name, token_estimate, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
            RETURNING id, session_id, role, content, metadata, agent_name, token_estimate, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(message.session_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(&message.metadata)
        .bind(&message.agent_name)
        .bind(token_estimate)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(row_to_message(row))
    }

    async fn recent(
        &self,
        session_id: Uuid,
        within: Duration,
        max: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let cutoff = Utc::now() - within;

        // Most-recent `max` inside the window, then flipped to oldest-first.
        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT id, session_id, role, content, metadata, agent_name, token_estimate, created_at
            FROM conversation_messages
            WHERE session_id = $1 AND created_at >= $2
            ORDER BY created_at DESC
            LIMIT $3
            "#,
        )
        .bind(session_id)
        .bind(cutoff)
        .bind(max as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut messages: Vec<Message> = rows.into_iter().map(row_to_message).collect();
        messages.reverse();
        Ok(messages)
    }
}
