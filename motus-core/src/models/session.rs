use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One bounded window of conversation for a user.
///
/// Invariant: at most one row with `is_active = true` per `user_id` at any
/// instant. Sessions are deactivated on rotation, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Session {
    pub id: Uuid,
    pub user_id: String,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub is_active: bool,
    pub metadata: serde_json::Value,
}
