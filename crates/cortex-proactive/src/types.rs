use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// A deterministically-detected reason the user might benefit from an
/// unprompted nudge (spec.md §4.10 step 2). Each signal carries an index
/// position once collected into a batch — the triage LLM call refers back
/// to signals by that position rather than by `source_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GapSignal {
    #[serde(rename = "type")]
    pub signal_type: String,
    pub severity: Severity,
    pub description: String,
    pub source_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriageAction {
    Skip,
    Nudge,
}

/// One line of the triage LLM's response, keyed back to a `GapSignal` by
/// `index` into the batch that was sent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageItem {
    pub index: usize,
    pub action: TriageAction,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub urgency: Option<Severity>,
}

/// One user's result for a deep tick, returned to the gardener for its
/// step-8 log line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationSummary {
    pub user_id: String,
    pub skipped_reason: Option<String>,
    pub signals_collected: usize,
    pub nudges_scheduled: usize,
    pub dropped_as_duplicate: usize,
}

impl EvaluationSummary {
    pub fn skipped(user_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            skipped_reason: Some(reason.into()),
            signals_collected: 0,
            nudges_scheduled: 0,
            dropped_as_duplicate: 0,
        }
    }
}
