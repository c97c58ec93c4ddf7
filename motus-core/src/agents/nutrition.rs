//! Nutrition handler — meal logging and diet questions.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::llm::{CompletionBackend, CompletionRequest};

use super::tools::{ToolAction, ToolExecutor};
use super::{AgentError, DomainHandler, HandlerRequest};

const SYSTEM_PROMPT: &str = "Eres un nutricionista experto. Responde en español, de forma \
breve y práctica, sobre alimentación, dietas y calorías.";

const TODAY_MEALS_PHRASES: &[&str] = &[
    "comidas tengo hoy",
    "qué comidas tengo",
    "que comidas tengo",
    "mis comidas de hoy",
];

pub struct NutritionHandler {
    llm: Arc<dyn CompletionBackend>,
    tools: Arc<dyn ToolExecutor>,
}

impl NutritionHandler {
    pub fn new(llm: Arc<dyn CompletionBackend>, tools: Arc<dyn ToolExecutor>) -> Self {
        Self { llm, tools }
    }
}

#[async_trait]
impl DomainHandler for NutritionHandler {
    fn name(&self) -> &'static str {
        "nutrition"
    }

    async fn handle(&self, request: &HandlerRequest) -> Result<String, AgentError> {
        let mut system = SYSTEM_PROMPT.to_string();
        let text = request.message.trim().to_lowercase();

        if request.requires_tool {
            let action = ToolAction::LogMeal {
                description: request.message.trim().to_string(),
            };
            action.validate()?;
            let summary = self.tools.execute(&request.user_id, &action).await?;
            debug!(action = action.name(), %summary, "meal logged");
            system.push_str(&format!(
                "\nAcción ya ejecutada: {summary}. Confírmala brevemente al usuario."
            ));
        } else if TODAY_MEALS_PHRASES.iter().any(|p| text.contains(p)) {
            // Read-only lookup, safe for informational questions.
            let summary = self
                .tools
                .execute(&request.user_id, &ToolAction::GetTodayMeals)
                .await?;
            system.push_str(&format!("\nComidas registradas hoy: {summary}."));
        }

        let completion = self
            .llm
            .complete(&CompletionRequest {
                system,
                context: request.context.clone(),
                message: request.message.clone(),
            })
            .await?;
        Ok(completion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::testing::{FakeCompletion, RecordingExecutor};
    use crate::intent::Domain;

    fn request(message: &str, domain: Domain, requires_tool: bool) -> HandlerRequest {
        HandlerRequest {
            user_id: "user-1".to_string(),
            message: message.to_string(),
            context: String::new(),
            domain,
            requires_tool,
        }
    }

    #[tokio::test]
    async fn meal_log_executes_the_log_tool() {
        let llm = Arc::new(FakeCompletion::replying("¡Registrado! Buena elección."));
        let tools = Arc::new(RecordingExecutor::default());
        let handler = NutritionHandler::new(llm, tools.clone());

        handler
            .handle(&request(
                "comí ensalada de pollo",
                Domain::NutritionLog,
                true,
            ))
            .await
            .unwrap();

        let executed = tools.executed.lock().unwrap();
        assert_eq!(
            *executed,
            vec![ToolAction::LogMeal {
                description: "comí ensalada de pollo".into()
            }]
        );
    }

    #[tokio::test]
    async fn today_meals_question_uses_only_the_read_only_lookup() {
        let llm = Arc::new(FakeCompletion::replying("Hoy llevas dos comidas."));
        let tools = Arc::new(RecordingExecutor::default());
        let handler = NutritionHandler::new(llm, tools.clone());

        handler
            .handle(&request(
                "¿qué comidas tengo hoy?",
                Domain::NutritionQuery,
                false,
            ))
            .await
            .unwrap();

        let executed = tools.executed.lock().unwrap();
        assert_eq!(*executed, vec![ToolAction::GetTodayMeals]);
        assert!(executed.iter().all(|a| !a.is_mutating()));
    }

    #[tokio::test]
    async fn generic_diet_question_touches_no_tools() {
        let llm = Arc::new(FakeCompletion::replying("Prioriza proteína en cada comida."));
        let tools = Arc::new(RecordingExecutor::default());
        let handler = NutritionHandler::new(llm, tools.clone());

        handler
            .handle(&request(
                "¿cuántas calorías tiene el arroz?",
                Domain::NutritionQuery,
                false,
            ))
            .await
            .unwrap();
        assert!(tools.executed.lock().unwrap().is_empty());
    }
}
