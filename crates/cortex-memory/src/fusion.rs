use async_trait::async_trait;
use serde::Deserialize;

use cortex_providers::{ChatRequest, LlmProvider, Message};

use crate::types::MemoryCategory;

/// Output of summarizing a dormant cluster into a single derived memory
/// (spec.md §4.5.5).
#[derive(Debug, Clone)]
pub struct FusionSummary {
    pub summary: String,
    pub importance: u8,
    pub category: MemoryCategory,
}

/// Summarizes a cluster of dormant, related memories into one derived
/// memory. On LLM failure or unparsable output the cluster is left
/// untouched — fusion is best-effort, never a hard requirement of a
/// gardener tick.
#[async_trait]
pub trait FusionSummarizer: Send + Sync {
    async fn summarize(&self, contents: &[String]) -> Option<FusionSummary>;
}

pub struct LlmFusionSummarizer {
    provider: std::sync::Arc<dyn LlmProvider>,
    model: String,
}

impl LlmFusionSummarizer {
    pub fn new(provider: std::sync::Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self { provider, model: model.into() }
    }
}

#[derive(Deserialize)]
struct RawSummary {
    summary: String,
    importance: u8,
    category: String,
}

#[async_trait]
impl FusionSummarizer for LlmFusionSummarizer {
    async fn summarize(&self, contents: &[String]) -> Option<FusionSummary> {
        if contents.len() < 2 {
            return None;
        }
        let listing = contents.iter().enumerate().map(|(i, c)| format!("{i}. {c}")).collect::<Vec<_>>().join("\n");
        let prompt = format!(
            "These related memories have gone dormant:\n{listing}\n\nWrite a single consolidated \
             memory that captures what's still true across all of them. Respond with JSON: \
             {{\"summary\": \"...\", \"importance\": 1-10, \"category\": \
             \"preference\"|\"fact\"|\"event\"|\"relationship\"|\"insight\"}}"
        );
        let req = ChatRequest::new(&self.model, vec![Message::user_text(prompt)]);
        let resp = self.provider.complete(&req).await.ok()?;
        parse_summary(&resp.text())
    }
}

fn parse_summary(text: &str) -> Option<FusionSummary> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    let raw: RawSummary = serde_json::from_str(&text[start..=end]).ok()?;
    let category: MemoryCategory = raw.category.parse().ok()?;
    Some(FusionSummary { summary: raw.summary, importance: raw.importance.clamp(1, 10), category })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_wrapped_summary_json() {
        let text = "Here's the fused memory:\n{\"summary\": \"lives in Cork\", \"importance\": 6, \"category\": \"fact\"}\nDone.";
        let summary = parse_summary(text).unwrap();
        assert_eq!(summary.summary, "lives in Cork");
        assert_eq!(summary.importance, 6);
    }

    #[test]
    fn unparsable_output_yields_none() {
        assert!(parse_summary("I couldn't summarize that.").is_none());
    }
}
