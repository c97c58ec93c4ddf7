// ============================================================================
// Session lifecycle: one active session per user, rotated after idleness
// ============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::config::MemorySettings;
use crate::error::MotusError;
use crate::models::Session;
use crate::store::ConversationStore;

/// Serializes session creation and rotation per user. The store enforces
/// single-active with its uniqueness invariant; the per-user lock keeps the
/// check-then-create sequence from racing inside one process.
pub struct SessionManager {
    store: Arc<dyn ConversationStore>,
    idle_threshold: Duration,
    user_locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn ConversationStore>, settings: &MemorySettings) -> Self {
        Self {
            store,
            idle_threshold: Duration::days(settings.session_idle_days),
            user_locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, user_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.user_locks.lock().expect("lock map poisoned");
        locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Return the user's active session, rotating it first if it has been
    /// idle past the threshold. Creates one when none exists.
    pub async fn get_or_create_active(&self, user_id: &str) -> Result<Session, MotusError> {
        if user_id.trim().is_empty() {
            return Err(MotusError::UnresolvedUser);
        }

        let lock = self.lock_for(user_id);
        let _guard = lock.lock().await;

        if let Some(session) = self.store.active_session(user_id).await? {
            let idle_for = Utc::now() - session.last_activity_at;
            if idle_for <= self.idle_threshold {
                return Ok(session);
            }
            info!(%user_id, session_id = %session.id, "active session idle past threshold, rotating");
        }

        // create_session deactivates any lingering active row itself.
        let session = self.store.create_session(user_id).await?;
        info!(%user_id, session_id = %session.id, "created new session");
        Ok(session)
    }

    /// Force a fresh session regardless of idleness. Used when an append
    /// hits a session that went inactive mid-request.
    pub async fn rotate(&self, user_id: &str) -> Result<Session, MotusError> {
        if user_id.trim().is_empty() {
            return Err(MotusError::UnresolvedUser);
        }

        let lock = self.lock_for(user_id);
        let _guard = lock.lock().await;

        let session = self.store.create_session(user_id).await?;
        info!(%user_id, session_id = %session.id, "rotated session");
        Ok(session)
    }

    pub async fn touch(&self, session_id: Uuid) -> Result<(), MotusError> {
        self.store.touch_session(session_id).await?;
        Ok(())
    }

    /// Deactivate every session idle past the threshold. Returns how many
    /// were swept; the background sweeper calls this on an interval.
    pub async fn sweep_idle(&self) -> Result<u64, MotusError> {
        let cutoff = Utc::now() - self.idle_threshold;
        let swept = self.store.deactivate_idle_sessions(cutoff).await?;
        if swept > 0 {
            info!(swept, "deactivated idle sessions");
        }
        Ok(swept)
    }
}
