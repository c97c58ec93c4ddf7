//! General handler — fallback for unmatched or ambiguous messages.
//! Never invokes tools.

use std::sync::Arc;

use async_trait::async_trait;

use crate::llm::{CompletionBackend, CompletionRequest};

use super::{AgentError, DomainHandler, HandlerRequest};

const SYSTEM_PROMPT: &str = "Eres un asistente de bienestar por WhatsApp. Responde en \
español, breve y amable. Puedes orientar hacia temas de fitness y nutrición cuando \
sea relevante.";

pub struct GeneralHandler {
    llm: Arc<dyn CompletionBackend>,
}

impl GeneralHandler {
    pub fn new(llm: Arc<dyn CompletionBackend>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl DomainHandler for GeneralHandler {
    fn name(&self) -> &'static str {
        "general"
    }

    async fn handle(&self, request: &HandlerRequest) -> Result<String, AgentError> {
        let completion = self
            .llm
            .complete(&CompletionRequest {
                system: SYSTEM_PROMPT.to_string(),
                context: request.context.clone(),
                message: request.message.clone(),
            })
            .await?;
        Ok(completion)
    }
}
