use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sender identity of a stored conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
    Tool,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
            MessageRole::Tool => "tool",
        }
    }

    /// Storage mapping is lossy on purpose: unknown roles read back as `user`,
    /// mirroring how inbound payload sources are normalized on write.
    pub fn parse(s: &str) -> Self {
        match s {
            "assistant" => MessageRole::Assistant,
            "system" => MessageRole::System,
            "tool" => MessageRole::Tool,
            _ => MessageRole::User,
        }
    }

    /// Single-letter prefix used by the compact context rendering.
    pub fn short_prefix(&self) -> &'static str {
        match self {
            MessageRole::User => "U",
            MessageRole::Assistant => "A",
            MessageRole::System => "S",
            MessageRole::Tool => "T",
        }
    }
}

/// One conversation turn. Append-only and immutable once written; owned
/// exclusively by its session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub session_id: Uuid,
    pub role: MessageRole,
    pub content: String,
    pub metadata: serde_json::Value,
    pub agent_name: Option<String>,
    pub token_estimate: i32,
    pub created_at: DateTime<Utc>,
}

/// Rough chars/4 token estimate, computed once at append time.
pub fn estimate_tokens(content: &str) -> i32 {
    (content.chars().count() / 4) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips_through_storage_string() {
        for role in [
            MessageRole::User,
            MessageRole::Assistant,
            MessageRole::System,
            MessageRole::Tool,
        ] {
            assert_eq!(MessageRole::parse(role.as_str()), role);
        }
    }

    #[test]
    fn unknown_role_normalizes_to_user() {
        assert_eq!(MessageRole::parse("webhook"), MessageRole::User);
        assert_eq!(MessageRole::parse(""), MessageRole::User);
    }

    #[test]
    fn token_estimate_is_quarter_of_chars() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("hola"), 1);
        assert_eq!(estimate_tokens(&"x".repeat(200)), 50);
    }
}
