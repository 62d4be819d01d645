use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of a single deep-tick step. Every step catches its own error and
/// folds it into this instead of propagating, so one failing step never
/// aborts the rest of the tick (spec.md §4.9, P10).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepOutcome {
    Ok { summary: String },
    Failed { error: String },
}

impl StepOutcome {
    pub fn ok(summary: impl Into<String>) -> Self {
        StepOutcome::Ok { summary: summary.into() }
    }

    pub fn failed(error: impl std::fmt::Display) -> Self {
        StepOutcome::Failed { error: error.to_string() }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, StepOutcome::Ok { .. })
    }
}

/// One light tick's work: hot-memory decay, ledger flush, stuck-session
/// timeout. Logged as a single line, same convention as `DeepTickReport`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LightTickReport {
    pub at: DateTime<Utc>,
    pub hot_decayed: StepOutcome,
    pub stuck_sessions_timed_out: StepOutcome,
}

/// One deep tick's work, one entry per numbered pipeline step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeepTickReport {
    pub at: DateTime<Utc>,
    pub full_decay: StepOutcome,
    pub fusion: StepOutcome,
    pub session_summarization: StepOutcome,
    pub enhanced_forgetting: StepOutcome,
    pub behavioral_inference: StepOutcome,
    pub trust_score_update: StepOutcome,
    pub goal_deadline_check: StepOutcome,
    pub proactive_evaluation: StepOutcome,
    pub sub_agent_cleanup: StepOutcome,
}

impl DeepTickReport {
    pub fn failed_steps(&self) -> Vec<&'static str> {
        let steps: [(&'static str, &StepOutcome); 9] = [
            ("full_decay", &self.full_decay),
            ("fusion", &self.fusion),
            ("session_summarization", &self.session_summarization),
            ("enhanced_forgetting", &self.enhanced_forgetting),
            ("behavioral_inference", &self.behavioral_inference),
            ("trust_score_update", &self.trust_score_update),
            ("goal_deadline_check", &self.goal_deadline_check),
            ("proactive_evaluation", &self.proactive_evaluation),
            ("sub_agent_cleanup", &self.sub_agent_cleanup),
        ];
        steps.into_iter().filter(|(_, o)| !o.is_ok()).map(|(name, _)| name).collect()
    }
}
