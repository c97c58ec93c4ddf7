// ============================================================================
// Context compression: turn stored history into a bounded prompt fragment
// ============================================================================

use std::sync::Arc;

use chrono::Duration;
use tracing::warn;
use uuid::Uuid;

use crate::config::MemorySettings;
use crate::models::Message;
use crate::store::ConversationStore;

/// Separator between rendered entries. Its length plus the truncation
/// marker is the fixed per-message overhead on top of `max_chars`.
const ENTRY_SEPARATOR: &str = " | ";
const TRUNCATION_MARKER: &str = "...";

/// Verbosity mode bounding how much history reaches the model prompt.
///
/// Bounds are (message count, chars per message). `Full` renders every
/// message in the recency window untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryMode {
    UltraCompact,
    Optimized,
    Standard,
    Full,
}

impl MemoryMode {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "ultra_compact" => Some(Self::UltraCompact),
            "optimized" => Some(Self::Optimized),
            "standard" => Some(Self::Standard),
            "full" => Some(Self::Full),
            _ => None,
        }
    }

    pub fn max_messages(self) -> Option<usize> {
        match self {
            Self::UltraCompact => Some(4),
            Self::Optimized => Some(6),
            Self::Standard => Some(10),
            Self::Full => None,
        }
    }

    pub fn max_chars(self) -> Option<usize> {
        match self {
            Self::UltraCompact => Some(100),
            Self::Optimized => Some(200),
            Self::Standard => Some(500),
            Self::Full => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::UltraCompact => "ultra_compact",
            Self::Optimized => "optimized",
            Self::Standard => "standard",
            Self::Full => "full",
        }
    }
}

impl Default for MemoryMode {
    fn default() -> Self {
        Self::Optimized
    }
}

/// Result of a context load. `degraded` is set when the store was
/// unreachable and the window fell back to empty; the request goes on.
#[derive(Debug, Clone, Default)]
pub struct ContextWindow {
    pub rendered: String,
    pub message_count: usize,
    pub degraded: bool,
}

/// Truncate to `max_chars` characters (not bytes), appending a marker when
/// anything was cut. Content exactly at the limit passes through untouched.
fn truncate_content(content: &str, max_chars: usize) -> String {
    let mut chars = content.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{head}{TRUNCATION_MARKER}")
    } else {
        head
    }
}

/// Render messages as `prefix:content` pairs joined by the entry separator.
/// Deterministic for identical input and mode; guaranteed not to exceed
/// `max_messages * (max_chars + overhead)` characters in bounded modes.
pub fn compress(messages: &[Message], mode: MemoryMode) -> String {
    let tail = match mode.max_messages() {
        Some(max) => &messages[messages.len().saturating_sub(max)..],
        None => messages,
    };

    tail.iter()
        .map(|m| {
            let content = match mode.max_chars() {
                Some(max) => truncate_content(&m.content, max),
                None => m.content.clone(),
            };
            format!("{}:{}", m.role.short_prefix(), content)
        })
        .collect::<Vec<_>>()
        .join(ENTRY_SEPARATOR)
}

/// Loads recent history and compresses it per the configured mode.
#[derive(Clone)]
pub struct ContextCompressor {
    store: Arc<dyn ConversationStore>,
    mode: MemoryMode,
    window_minutes: i64,
    max_recent: usize,
}

impl ContextCompressor {
    pub fn new(store: Arc<dyn ConversationStore>, settings: &MemorySettings) -> Self {
        let mode = MemoryMode::parse(&settings.mode).unwrap_or_else(|| {
            warn!(mode = %settings.mode, "unrecognized memory mode, using optimized");
            MemoryMode::default()
        });
        Self {
            store,
            mode,
            window_minutes: settings.recent_window_minutes,
            max_recent: settings.max_recent_messages,
        }
    }

    pub fn mode(&self) -> MemoryMode {
        self.mode
    }

    /// Fetch and render the context window for a session. Store failure
    /// degrades to an empty window rather than failing the request.
    pub async fn load(&self, session_id: Uuid) -> ContextWindow {
        let fetch_max = self.mode.max_messages().unwrap_or(self.max_recent);
        let within = Duration::minutes(self.window_minutes);

        match self.store.recent(session_id, within, fetch_max).await {
            Ok(messages) => ContextWindow {
                rendered: compress(&messages, self.mode),
                message_count: messages.len(),
                degraded: false,
            },
            Err(err) => {
                warn!(%session_id, error = %err, "context load failed, degrading to empty window");
                ContextWindow {
                    degraded: true,
                    ..ContextWindow::default()
                }
            }
        }
    }
}
