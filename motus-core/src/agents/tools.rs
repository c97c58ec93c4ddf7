//! Side-effecting tool actions available to the domain handlers.
//!
//! Actions form a closed set of tagged variants, each with an explicit
//! input shape and a pure validation step that runs before execution.
//! Execution itself goes through the `ToolExecutor` seam so the real
//! persistence backend stays swappable in tests.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ToolAction {
    StartWorkout {
        routine: String,
    },
    FinishWorkout,
    LogExerciseSet {
        exercise: String,
        reps: u32,
        weight_kg: Option<f64>,
    },
    LogMeal {
        description: String,
    },
    GetTodayMeals,
}

impl ToolAction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::StartWorkout { .. } => "start_workout",
            Self::FinishWorkout => "finish_workout",
            Self::LogExerciseSet { .. } => "log_exercise_set",
            Self::LogMeal { .. } => "log_meal",
            Self::GetTodayMeals => "get_today_meals",
        }
    }

    /// Whether executing this action mutates state. Read-only actions are
    /// safe to run for informational queries.
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Self::GetTodayMeals)
    }

    /// Check inputs before any execution happens.
    pub fn validate(&self) -> Result<(), ToolError> {
        match self {
            Self::StartWorkout { routine } => {
                if routine.trim().is_empty() {
                    return Err(self.invalid("routine name is empty"));
                }
            }
            Self::LogExerciseSet { exercise, reps, weight_kg } => {
                if exercise.trim().is_empty() {
                    return Err(self.invalid("exercise name is empty"));
                }
                if *reps == 0 {
                    return Err(self.invalid("reps must be positive"));
                }
                if let Some(kg) = weight_kg {
                    if !kg.is_finite() || *kg < 0.0 {
                        return Err(self.invalid("weight must be a non-negative number"));
                    }
                }
            }
            Self::LogMeal { description } => {
                if description.trim().is_empty() {
                    return Err(self.invalid("meal description is empty"));
                }
            }
            Self::FinishWorkout | Self::GetTodayMeals => {}
        }
        Ok(())
    }

    fn invalid(&self, reason: &str) -> ToolError {
        ToolError::InvalidInput {
            action: self.name(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("invalid input for {action}: {reason}")]
    InvalidInput {
        action: &'static str,
        reason: String,
    },

    #[error("tool execution failed: {0}")]
    Execution(String),
}

/// Executes validated tool actions against the fitness/nutrition backend.
/// Returns a short factual summary of what happened, which the handler
/// folds into its prompt.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, user_id: &str, action: &ToolAction) -> Result<String, ToolError>;
}

/// Executor that acknowledges actions without an external backend. Real
/// deployments replace this with a datastore-backed implementation.
#[derive(Debug, Default, Clone)]
pub struct AcknowledgingToolExecutor;

#[async_trait]
impl ToolExecutor for AcknowledgingToolExecutor {
    async fn execute(&self, _user_id: &str, action: &ToolAction) -> Result<String, ToolError> {
        action.validate()?;
        let summary = match action {
            ToolAction::StartWorkout { routine } => {
                format!("rutina '{routine}' iniciada")
            }
            ToolAction::FinishWorkout => "rutina finalizada".to_string(),
            ToolAction::LogExerciseSet { exercise, reps, weight_kg } => match weight_kg {
                Some(kg) => format!("serie registrada: {reps} x {exercise} con {kg} kg"),
                None => format!("serie registrada: {reps} x {exercise}"),
            },
            ToolAction::LogMeal { description } => {
                format!("comida registrada: {description}")
            }
            ToolAction::GetTodayMeals => "sin comidas registradas hoy".to_string(),
        };
        Ok(summary)
    }
}
