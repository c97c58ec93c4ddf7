pub mod agents;
pub mod channel;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod intent;
pub mod llm;
pub mod memory;
pub mod models;
pub mod session;
pub mod store;

pub use channel::{prepare_outbound, OutboundChannel, WhatsAppClient, MAX_BODY_CHARS};
pub use config::MotusConfig;
pub use coordinator::{Coordinator, CoordinatorOutcome};
pub use error::MotusError;
pub use intent::{classify, Domain, RoutingDecision};
pub use llm::{ClaudeClient, CompletionBackend, CompletionRequest};
pub use memory::{compress, ContextCompressor, ContextWindow, MemoryMode};
pub use session::SessionManager;
pub use store::{ConversationStore, InMemoryConversationStore, PgConversationStore};
