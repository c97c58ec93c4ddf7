//! Fitness handler — workout questions and workout actions.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use crate::llm::{CompletionBackend, CompletionRequest};

use super::tools::{ToolAction, ToolExecutor};
use super::{AgentError, DomainHandler, HandlerRequest};

const SYSTEM_PROMPT: &str = "Eres un entrenador personal experto. Responde en español, \
de forma breve y motivadora, sobre ejercicios, técnica y rutinas. Si el usuario quiere \
registrar una acción pero faltan datos (ejercicio, repeticiones), pídelos.";

const START_PHRASES: &[&str] = &[
    "empezar rutina",
    "comenzar rutina",
    "iniciar rutina",
    "empezar entrenamiento",
    "iniciar entrenamiento",
    "empezar a entrenar",
    "quiero entrenar",
];

const FINISH_PHRASES: &[&str] = &[
    "terminé",
    "termine",
    "finalizar rutina",
];

/// "hice 10 flexiones", "hice 12 repeticiones de press banca"
fn set_report_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"hice\s+(\d+)\s+(?:repeticiones\s+de\s+)?([\wáéíóúñü]+(?:\s+[\wáéíóúñü]+)*?)(?:\s+con\s+(\d+(?:\.\d+)?)\s*kg)?\s*$")
            .expect("set report pattern")
    })
}

/// Derive a concrete workout action from the message text. Returns `None`
/// when the tool flag is set but the message carries no parseable action;
/// the handler then answers conversationally and asks for details.
fn derive_action(message: &str) -> Option<ToolAction> {
    let text = message.trim().to_lowercase();

    if let Some(captures) = set_report_pattern().captures(&text) {
        let reps: u32 = captures.get(1)?.as_str().parse().ok()?;
        let exercise = captures.get(2)?.as_str().trim().to_string();
        let weight_kg = captures
            .get(3)
            .and_then(|m| m.as_str().parse::<f64>().ok());
        return Some(ToolAction::LogExerciseSet {
            exercise,
            reps,
            weight_kg,
        });
    }

    if FINISH_PHRASES.iter().any(|p| text.contains(p)) {
        return Some(ToolAction::FinishWorkout);
    }

    for phrase in START_PHRASES {
        if let Some(idx) = text.find(phrase) {
            let rest = text[idx + phrase.len()..].trim();
            let routine = rest
                .strip_prefix("de ")
                .unwrap_or(rest)
                .trim()
                .to_string();
            return Some(ToolAction::StartWorkout {
                routine: if routine.is_empty() {
                    "general".to_string()
                } else {
                    routine
                },
            });
        }
    }

    None
}

pub struct FitnessHandler {
    llm: Arc<dyn CompletionBackend>,
    tools: Arc<dyn ToolExecutor>,
}

impl FitnessHandler {
    pub fn new(llm: Arc<dyn CompletionBackend>, tools: Arc<dyn ToolExecutor>) -> Self {
        Self { llm, tools }
    }
}

#[async_trait]
impl DomainHandler for FitnessHandler {
    fn name(&self) -> &'static str {
        "fitness"
    }

    async fn handle(&self, request: &HandlerRequest) -> Result<String, AgentError> {
        let mut system = SYSTEM_PROMPT.to_string();

        if request.requires_tool {
            if let Some(action) = derive_action(&request.message) {
                action.validate()?;
                let summary = self.tools.execute(&request.user_id, &action).await?;
                debug!(action = action.name(), %summary, "workout action executed");
                system.push_str(&format!(
                    "\nAcción ya ejecutada: {summary}. Confírmala brevemente al usuario."
                ));
            }
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
