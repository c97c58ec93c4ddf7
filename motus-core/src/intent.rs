// ============================================================================
// Intent routing: rule-based classification of incoming messages
// ============================================================================
//
// Matching is substring-based over a lowercased copy of the input, the same
// discipline the handlers expect: topical vocabulary routes to a question
// domain, explicit action phrases route to a tool-invoking domain. An action
// match suppresses the question domain for the same topic so a message never
// triggers both flavors of one handler.

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

/// Capability domains a message can route to. `General` never invokes tools
/// and is only returned alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    NutritionLog,
    NutritionQuery,
    FitnessAction,
    FitnessQuestion,
    General,
}

impl Domain {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NutritionLog => "nutrition_log",
            Self::NutritionQuery => "nutrition_query",
            Self::FitnessAction => "fitness_action",
            Self::FitnessQuestion => "fitness_question",
            Self::General => "general",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DomainMatch {
    pub domain: Domain,
    pub requires_tool: bool,
}

/// Routing outcome. Matches are ordered by aggregation precedence:
/// nutrition before fitness, so downstream concatenation follows the
/// documented response order without re-sorting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoutingDecision {
    pub matches: Vec<DomainMatch>,
}

impl RoutingDecision {
    fn general() -> Self {
        Self {
            matches: vec![DomainMatch {
                domain: Domain::General,
                requires_tool: false,
            }],
        }
    }

    pub fn is_general(&self) -> bool {
        self.matches
            .iter()
            .all(|m| m.domain == Domain::General)
    }
}

/// Explicit action phrases. These are commands, not topics: a message has
/// to contain one of them (or the set-report pattern below) for the
/// fitness handler to receive the tool flag.
const FITNESS_ACTION_PHRASES: &[&str] = &[
    "empezar rutina",
    "empezar entrenamiento",
    "comenzar rutina",
    "iniciar rutina",
    "iniciar entrenamiento",
    "empezar a entrenar",
    "quiero entrenar",
    "terminé la rutina",
    "termine la rutina",
    "terminé el entrenamiento",
    "termine el entrenamiento",
    "terminé",
    "termine",
    "finalizar rutina",
    "completé una serie",
    "complete una serie",
    "registra mi serie",
    "rutina activa",
    "ejercicios disponibles",
];

const NUTRITION_LOG_PHRASES: &[&str] = &[
    "registra mi comida",
    "registrar comida",
    "comí",
    "desayuné",
    "desayune",
    "almorcé",
    "almorce",
    "cené",
];

const FITNESS_QUESTION_KEYWORDS: &[&str] = &[
    "cómo hacer",
    "como hacer",
    "técnica",
    "tecnica",
    "ejercicio",
    "rutina",
    "entrenar",
    "entrenamiento",
    "fitness",
    "gym",
    "gimnasio",
    "sentadilla",
    "flexion",
    "flexión",
    "cardio",
    "músculo",
    "musculo",
    "progresar",
];

const NUTRITION_QUERY_KEYWORDS: &[&str] = &[
    "comida",
    "comidas",
    "dieta",
    "nutrición",
    "nutricion",
    "caloría",
    "caloria",
    "alimentación",
    "alimentacion",
    "qué comer",
    "que comer",
    "proteína",
    "proteina",
];

/// Set reports like "hice 10 flexiones" or "hice 12 repeticiones de press".
fn set_report_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bhice\s+\d+\b").expect("set report pattern"))
}

fn contains_any(text: &str, phrases: &[&str]) -> bool {
    phrases.iter().any(|p| text.contains(p))
}

/// Classify a message into its target domains. Deterministic; empty or
/// unmatched input falls through to the general domain.
pub fn classify(text: &str) -> RoutingDecision {
    let normalized = text.trim().to_lowercase();
    if normalized.is_empty() {
        return RoutingDecision::general();
    }

    let fitness_action = contains_any(&normalized, FITNESS_ACTION_PHRASES)
        || set_report_pattern().is_match(&normalized);
    let nutrition_log = contains_any(&normalized, NUTRITION_LOG_PHRASES);

    // Action phrases outrank same-topic vocabulary: "empezar rutina" is a
    // command, not a question about routines.
    let fitness_question =
        !fitness_action && contains_any(&normalized, FITNESS_QUESTION_KEYWORDS);
    let nutrition_query =
        !nutrition_log && contains_any(&normalized, NUTRITION_QUERY_KEYWORDS);

    let mut matches = Vec::new();
    if nutrition_log {
        matches.push(DomainMatch {
            domain: Domain::NutritionLog,
            requires_tool: true,
        });
    }
    if nutrition_query {
        matches.push(DomainMatch {
            domain: Domain::NutritionQuery,
            requires_tool: false,
        });
    }
    if fitness_action {
        matches.push(DomainMatch {
            domain: Domain::FitnessAction,
            requires_tool: true,
        });
    }
    if fitness_question {
        matches.push(DomainMatch {
            domain: Domain::FitnessQuestion,
            requires_tool: false,
        });
    }

    if matches.is_empty() {
        return RoutingDecision::general();
    }

    // Conservative single-tool policy: when two domains both demand a
    // side-effecting tool in one message, only the fitness action keeps
    // the flag; the nutrition handler answers informationally instead.
    let tool_count = matches.iter().filter(|m| m.requires_tool).count();
    if tool_count > 1 {
        for m in &mut matches {
            if m.requires_tool && m.domain != Domain::FitnessAction {
                m.requires_tool = false;
            }
        }
    }

    RoutingDecision { matches }
}
