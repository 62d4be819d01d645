//! Step 3 — a single low-temperature LLM call decides, per collected
//! signal, whether it is worth surfacing as a nudge (spec.md §4.10 step 3).
//! On any parse failure the batch is dropped to zero items rather than
//! guessed at.

use std::sync::Arc;

use cortex_providers::{ChatRequest, LlmProvider, Message};
use tracing::warn;

use crate::types::{GapSignal, TriageItem};

const TRIAGE_TEMPERATURE: f32 = 0.2;

pub struct Triage {
    provider: Arc<dyn LlmProvider>,
    model: String,
}

impl Triage {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self { provider, model: model.into() }
    }

    pub async fn run(&self, signals: &[GapSignal]) -> Vec<TriageItem> {
        if signals.is_empty() {
            return Vec::new();
        }

        let prompt = build_prompt(signals);
        let mut req = ChatRequest::new(self.model.clone(), vec![Message::user_text(prompt)]);
        req.temperature = Some(TRIAGE_TEMPERATURE);

        let response = match self.provider.complete(&req).await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "triage LLM call failed, dropping batch");
                return Vec::new();
            }
        };

        parse_items(&response.text())
    }
}

fn build_prompt(signals: &[GapSignal]) -> String {
    let mut lines = String::from(
        "You are deciding which of the following signals about a user are worth a brief, \
         unprompted check-in message. Most signals should be skipped; only nudge for things \
         that are genuinely useful to surface unprompted. Respond with ONLY a JSON array, one \
         object per signal, in this shape:\n\
         [{\"index\": 0, \"action\": \"skip\"}, \
         {\"index\": 1, \"action\": \"nudge\", \"message\": \"...\", \"urgency\": \"low|medium|high\"}]\n\n\
         Signals:\n",
    );
    for (i, s) in signals.iter().enumerate() {
        lines.push_str(&format!("{}. [{}/{:?}] {}\n", i, s.signal_type, s.severity, s.description));
    }
    lines
}

fn parse_items(text: &str) -> Vec<TriageItem> {
    let json_str = extract_json(text);
    match serde_json::from_str::<Vec<TriageItem>>(json_str) {
        Ok(items) => items,
        Err(e) => {
            warn!(error = %e, response = %text, "failed to parse triage response");
            Vec::new()
        }
    }
}

/// Extract JSON from a response that may be wrapped in markdown code fences.
fn extract_json(text: &str) -> &str {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim();
        }
    }
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            return after[..end].trim();
        }
    }
    if let Some(start) = trimmed.find('[') {
        if let Some(end) = trimmed.rfind(']') {
            return &trimmed[start..=end];
        }
    }
    trimmed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Severity, TriageAction};

    #[test]
    fn extract_json_unwraps_code_fence() {
        let text = "here you go:\n```json\n[{\"index\":0,\"action\":\"skip\"}]\n```";
        let items = parse_items(text);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].action, TriageAction::Skip);
    }

    #[test]
    fn malformed_response_yields_empty_batch() {
        let items = parse_items("not json at all");
        assert!(items.is_empty());
    }

    #[test]
    fn nudge_item_carries_message_and_urgency() {
        let text = r#"[{"index":2,"action":"nudge","message":"hey, still on for the report?","urgency":"high"}]"#;
        let items = parse_items(text);
        assert_eq!(items[0].action, TriageAction::Nudge);
        assert_eq!(items[0].urgency, Some(Severity::High));
        assert!(items[0].message.is_some());
    }

    #[test]
    fn empty_signal_batch_builds_no_prompt_lines() {
        let prompt = build_prompt(&[]);
        assert!(prompt.ends_with("Signals:\n"));
    }
}
