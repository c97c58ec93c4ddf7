//! Domain handlers — the collaborators the coordinator fans out to.
//!
//! Each handler owns one topic area (fitness, nutrition, general), answers
//! from the language model, and may execute a tool action first when the
//! router set the tool flag for its domain.

mod fitness;
mod general;
mod nutrition;
pub mod tools;

pub use fitness::FitnessHandler;
pub use general::GeneralHandler;
pub use nutrition::NutritionHandler;
pub use tools::{AcknowledgingToolExecutor, ToolAction, ToolError, ToolExecutor};

use async_trait::async_trait;
use thiserror::Error;

use crate::intent::Domain;
use crate::llm::LlmError;

/// Everything a handler receives for one invocation. `context` is the
/// already-compressed history window, possibly empty.
#[derive(Debug, Clone)]
pub struct HandlerRequest {
    pub user_id: String,
    pub message: String,
    pub context: String,
    pub domain: Domain,
    pub requires_tool: bool,
}

#[derive(Error, Debug)]
pub enum AgentError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Tool(#[from] ToolError),
}

#[async_trait]
pub trait DomainHandler: Send + Sync {
    /// Handler name for logging and the stored `agent_name`.
    fn name(&self) -> &'static str;

    async fn handle(&self, request: &HandlerRequest) -> Result<String, AgentError>;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::llm::{CompletionBackend, CompletionRequest};
    use std::sync::Mutex;

    /// Completion backend that returns a canned reply and records requests.
    pub struct FakeCompletion {
        pub reply: String,
        pub requests: Mutex<Vec<CompletionRequest>>,
        pub fail: bool,
    }

    impl FakeCompletion {
        pub fn replying(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                requests: Mutex::new(Vec::new()),
                fail: false,
            }
        }

        pub fn failing() -> Self {
            Self {
                reply: String::new(),
                requests: Mutex::new(Vec::new()),
                fail: true,
            }
        }
    }

    #[async_trait]
    impl CompletionBackend for FakeCompletion {
        async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
            self.requests
                .lock()
                .expect("fake lock poisoned")
                .push(request.clone());
            if self.fail {
                Err(LlmError::RetryExhausted { attempts: 1 })
            } else {
                Ok(self.reply.clone())
            }
        }

        fn name(&self) -> &str {
            "fake"
        }
    }

    /// Executor that records every executed action.
    #[derive(Default)]
    pub struct RecordingExecutor {
        pub executed: Mutex<Vec<ToolAction>>,
    }

    #[async_trait]
    impl ToolExecutor for RecordingExecutor {
        async fn execute(
            &self,
            _user_id: &str,
            action: &ToolAction,
        ) -> Result<String, ToolError> {
            action.validate()?;
            self.executed
                .lock()
                .expect("fake lock poisoned")
                .push(action.clone());
            Ok(format!("{} ok", action.name()))
        }
    }
}
