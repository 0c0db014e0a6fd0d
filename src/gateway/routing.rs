//! Routing rules: role→provider, prompt intent, adaptive model selection.
//!
//! Every function here is pure and total: identical inputs always produce
//! identical decisions, so routing can be unit-tested as a law.

use crate::config::ModelCatalog;

/// Which backend class a role routes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// Supervisory roles: planning and coordination via the polling bot.
    Bot,
    /// Execution roles: code generation and fixing via chat completions.
    Chat,
}

/// Supervisory roles pinned to the bot provider.
const SUPERVISORY_ROLES: &[&str] = &[
    "planner", "frontend", "backend", "devops", "qa", "android", "ios",
];

/// Execution roles pinned to the chat provider.
const EXECUTION_ROLES: &[&str] = &["builder", "installer", "fixer", "coder", "executor"];

/// Substring fallbacks for unknown roles, applied in order.
const ROLE_SUBSTRING_TABLE: &[(&[&str], ProviderKind)] = &[
    (&["plan", "architect"], ProviderKind::Bot),
    (&["front"], ProviderKind::Bot),
    (&["back"], ProviderKind::Bot),
    (&["devops", "deploy"], ProviderKind::Bot),
    (&["qa", "test", "quality"], ProviderKind::Bot),
    (&["android", "mobile"], ProviderKind::Bot),
    (&["ios", "apple", "swift"], ProviderKind::Bot),
    (&["build", "code", "install", "fix"], ProviderKind::Chat),
];

/// Map a role name to its provider.
///
/// Known roles match exactly; unknown roles fall back to substring matching
/// over a fixed table; everything else goes to the chat provider.
pub fn route_role(role: &str) -> ProviderKind {
    let normalized = role.trim().to_lowercase();

    if SUPERVISORY_ROLES.contains(&normalized.as_str()) {
        return ProviderKind::Bot;
    }
    if EXECUTION_ROLES.contains(&normalized.as_str()) {
        return ProviderKind::Chat;
    }

    for (needles, kind) in ROLE_SUBSTRING_TABLE {
        if needles.iter().any(|needle| normalized.contains(needle)) {
            return *kind;
        }
    }
    ProviderKind::Chat
}

/// Closed-set prompt intent used only by adaptive routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Scaffold,
    Crud,
    Static,
    Refactor,
    General,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scaffold => "scaffold",
            Self::Crud => "crud",
            Self::Static => "static",
            Self::Refactor => "refactor",
            Self::General => "general",
        }
    }
}

/// Classify a prompt into exactly one intent, first match wins.
pub fn detect_intent(prompt: &str) -> Intent {
    let p = prompt.to_lowercase();
    let any = |needles: &[&str]| needles.iter().any(|n| p.contains(n));

    if any(&["scaffold", "boilerplate", "setup", "new project"]) {
        Intent::Scaffold
    } else if any(&["crud", "form", "api", "list"]) {
        Intent::Crud
    } else if any(&["static", "landing", "html only"]) {
        Intent::Static
    } else if any(&["refactor", "optimize", "migration"]) {
        Intent::Refactor
    } else {
        Intent::General
    }
}

/// Declared task complexity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Complexity {
    Simple,
    #[default]
    Medium,
    Complex,
}

/// Outcome of adaptive model selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelChoice {
    pub model: String,
    pub reason: String,
}

fn is_builder_class(role: &str) -> bool {
    matches!(role, "builder" | "coder" | "executor")
}

/// Pick a chat model for the request. First matching row of the decision
/// table wins; the table is total over all inputs.
pub fn select_model(
    role: &str,
    complexity: Complexity,
    intent: Intent,
    queue_depth: usize,
    models: &ModelCatalog,
) -> ModelChoice {
    let normalized = role.trim().to_lowercase();

    if normalized == "fixer" {
        return ModelChoice {
            model: models.fixer.clone(),
            reason: "fixer_pinned".to_string(),
        };
    }
    if !is_builder_class(&normalized) {
        return ModelChoice {
            model: models.large.clone(),
            reason: "planner_quality_pinned".to_string(),
        };
    }

    match complexity {
        Complexity::Complex => {
            if matches!(intent, Intent::Crud | Intent::Static | Intent::Scaffold) {
                ModelChoice {
                    model: models.mid.clone(),
                    reason: format!("complex_optimized_{}", intent.as_str()),
                }
            } else {
                ModelChoice {
                    model: models.large.clone(),
                    reason: "complex_pinned_quality".to_string(),
                }
            }
        }
        Complexity::Simple => {
            if queue_depth >= 3 {
                ModelChoice {
                    model: models.small.clone(),
                    reason: "simple_queue_high".to_string(),
                }
            } else if queue_depth >= 2 {
                ModelChoice {
                    model: models.mid.clone(),
                    reason: "simple_queue_medium".to_string(),
                }
            } else {
                ModelChoice {
                    model: models.large.clone(),
                    reason: "simple_queue_low".to_string(),
                }
            }
        }
        Complexity::Medium => {
            if queue_depth >= 3 {
                ModelChoice {
                    model: models.mid.clone(),
                    reason: "medium_queue_high".to_string(),
                }
            } else if intent == Intent::Static {
                ModelChoice {
                    model: models.mid.clone(),
                    reason: "medium_optimized_static".to_string(),
                }
            } else {
                ModelChoice {
                    model: models.large.clone(),
                    reason: "medium_standard".to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> ModelCatalog {
        ModelCatalog {
            large: "large".into(),
            mid: "mid".into(),
            small: "small".into(),
            fixer: "fixer-small".into(),
        }
    }

    #[test]
    fn known_roles_route_exactly() {
        for role in ["planner", "frontend", "backend", "devops", "qa", "android", "ios"] {
            assert_eq!(route_role(role), ProviderKind::Bot, "{role}");
        }
        for role in ["builder", "installer", "fixer", "coder", "executor"] {
            assert_eq!(route_role(role), ProviderKind::Chat, "{role}");
        }
    }

    #[test]
    fn unknown_roles_use_substring_table() {
        assert_eq!(route_role("chief-architect"), ProviderKind::Bot);
        assert_eq!(route_role("FrontOfHouse"), ProviderKind::Bot);
        assert_eq!(route_role("deployment-bot"), ProviderKind::Bot);
        assert_eq!(route_role("quality-gate"), ProviderKind::Bot);
        assert_eq!(route_role("swift-specialist"), ProviderKind::Bot);
        assert_eq!(route_role("code-monkey"), ProviderKind::Chat);
        assert_eq!(route_role("hotfixer-9000"), ProviderKind::Chat);
    }

    #[test]
    fn unmatched_roles_default_to_chat() {
        assert_eq!(route_role("sommelier"), ProviderKind::Chat);
        assert_eq!(route_role(""), ProviderKind::Chat);
    }

    #[test]
    fn intent_first_match_wins() {
        assert_eq!(detect_intent("scaffold me a crud app"), Intent::Scaffold);
        assert_eq!(detect_intent("Set up a new project"), Intent::Scaffold);
        assert_eq!(detect_intent("a CRUD api for pets"), Intent::Crud);
        assert_eq!(detect_intent("just a landing page"), Intent::Static);
        assert_eq!(detect_intent("refactor this mess"), Intent::Refactor);
        assert_eq!(detect_intent("write a poem"), Intent::General);
    }

    #[test]
    fn fixer_is_pinned_regardless_of_everything() {
        for complexity in [Complexity::Simple, Complexity::Medium, Complexity::Complex] {
            let choice = select_model("fixer", complexity, Intent::Crud, 9, &catalog());
            assert_eq!(choice.model, "fixer-small");
            assert_eq!(choice.reason, "fixer_pinned");
        }
    }

    #[test]
    fn non_builder_roles_pin_large() {
        let choice = select_model("installer", Complexity::Simple, Intent::General, 5, &catalog());
        assert_eq!(choice.model, "large");
        assert_eq!(choice.reason, "planner_quality_pinned");
    }

    #[test]
    fn complex_pattern_intents_use_mid() {
        let choice = select_model("builder", Complexity::Complex, Intent::Crud, 0, &catalog());
        assert_eq!(choice.model, "mid");
        assert_eq!(choice.reason, "complex_optimized_crud");

        let choice = select_model("coder", Complexity::Complex, Intent::Refactor, 0, &catalog());
        assert_eq!(choice.model, "large");
        assert_eq!(choice.reason, "complex_pinned_quality");
    }

    #[test]
    fn simple_complexity_follows_queue_depth() {
        let cases = [
            (3, "small", "simple_queue_high"),
            (4, "small", "simple_queue_high"),
            (2, "mid", "simple_queue_medium"),
            (1, "large", "simple_queue_low"),
            (0, "large", "simple_queue_low"),
        ];
        for (depth, model, reason) in cases {
            let choice =
                select_model("builder", Complexity::Simple, Intent::General, depth, &catalog());
            assert_eq!(choice.model, model, "depth {depth}");
            assert_eq!(choice.reason, reason, "depth {depth}");
        }
    }

    #[test]
    fn medium_complexity_rows() {
        let choice = select_model("executor", Complexity::Medium, Intent::General, 3, &catalog());
        assert_eq!(choice.model, "mid");
        assert_eq!(choice.reason, "medium_queue_high");

        let choice = select_model("builder", Complexity::Medium, Intent::Static, 0, &catalog());
        assert_eq!(choice.model, "mid");
        assert_eq!(choice.reason, "medium_optimized_static");

        let choice = select_model("builder", Complexity::Medium, Intent::General, 2, &catalog());
        assert_eq!(choice.model, "large");
        assert_eq!(choice.reason, "medium_standard");
    }

    #[test]
    fn selection_is_deterministic() {
        let a = select_model("builder", Complexity::Complex, Intent::Static, 2, &catalog());
        let b = select_model("builder", Complexity::Complex, Intent::Static, 2, &catalog());
        assert_eq!(a, b);
    }
}
