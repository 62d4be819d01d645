use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use cortex_providers::{ChatRequest, LlmProvider, Message};

use crate::types::RelationType;

/// Result of inferring whether a new memory relates to an existing one.
#[derive(Debug, Clone)]
pub struct InferredRelation {
    pub target_id: String,
    pub relation_type: RelationType,
    pub confidence: f64,
    #[allow(dead_code)]
    pub reason: String,
}

/// Classifies whether a new memory UPDATES, EXTENDS, or has NONE relation to
/// a candidate neighbor. Prefers an LLM judgment; falls back to a regex
/// heuristic on provider error or unparsable output — a soft failure per
/// spec.md §7, never surfaced to the caller.
#[async_trait]
pub trait RelationInferrer: Send + Sync {
    async fn infer(&self, new_content: &str, candidate_id: &str, candidate_content: &str) -> Option<InferredRelation>;
}

pub struct LlmRelationInferrer {
    provider: std::sync::Arc<dyn LlmProvider>,
    model: String,
}

impl LlmRelationInferrer {
    pub fn new(provider: std::sync::Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self { provider, model: model.into() }
    }
}

#[derive(Deserialize)]
struct RawRelation {
    relation: String,
    confidence: f64,
    #[serde(default)]
    reason: String,
}

#[async_trait]
impl RelationInferrer for LlmRelationInferrer {
    async fn infer(&self, new_content: &str, candidate_id: &str, candidate_content: &str) -> Option<InferredRelation> {
        let prompt = format!(
            "Existing memory: \"{candidate_content}\"\nNew memory: \"{new_content}\"\n\n\
             Does the new memory UPDATE the existing one (replaces a fact), EXTEND it (adds \
             detail without contradicting), or is there NONE relation? Respond with JSON: \
             {{\"relation\": \"UPDATES\"|\"EXTENDS\"|\"NONE\", \"confidence\": 0.0-1.0, \"reason\": \"...\"}}"
        );
        let req = ChatRequest::new(&self.model, vec![Message::user_text(prompt)]);
        match self.provider.complete(&req).await {
            Ok(resp) => match parse_relation(&resp.text(), candidate_id) {
                Some(r) => Some(r),
                None => {
                    warn!("relation inference response unparsable, falling back to heuristic");
                    heuristic_infer(new_content, candidate_id, candidate_content)
                }
            },
            Err(e) => {
                warn!(error = %e, "relation inference provider call failed, falling back to heuristic");
                heuristic_infer(new_content, candidate_id, candidate_content)
            }
        }
    }
}

fn parse_relation(text: &str, candidate_id: &str) -> Option<InferredRelation> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    let raw: RawRelation = serde_json::from_str(&text[start..=end]).ok()?;
    let relation_type = match raw.relation.to_uppercase().as_str() {
        "UPDATES" => RelationType::Updates,
        "EXTENDS" => RelationType::Extends,
        _ => return None,
    };
    Some(InferredRelation {
        target_id: candidate_id.to_string(),
        relation_type,
        confidence: raw.confidence.clamp(0.0, 1.0),
        reason: raw.reason,
    })
}

/// Regex-free heuristic fallback: same leading subject words plus a changed
/// trailing object implies UPDATES; same subject with extra trailing words
/// implies EXTENDS. Crude but deterministic and cheap.
fn heuristic_infer(new_content: &str, candidate_id: &str, candidate_content: &str) -> Option<InferredRelation> {
    let new_words: Vec<&str> = new_content.split_whitespace().collect();
    let old_words: Vec<&str> = candidate_content.split_whitespace().collect();
    if new_words.is_empty() || old_words.is_empty() {
        return None;
    }
    let shared_prefix = new_words
        .iter()
        .zip(old_words.iter())
        .take_while(|(a, b)| a.to_lowercase() == b.to_lowercase())
        .count();
    if shared_prefix == 0 {
        return None;
    }
    let new_suffix = &new_words[shared_prefix..];
    let old_suffix = &old_words[shared_prefix..];

    if !new_suffix.is_empty() && !old_suffix.is_empty() && new_suffix != old_suffix {
        return Some(InferredRelation {
            target_id: candidate_id.to_string(),
            relation_type: RelationType::Updates,
            confidence: 0.55,
            reason: "heuristic: same subject, changed trailing detail".to_string(),
        });
    }
    if new_suffix.len() > old_suffix.len() && new_suffix.starts_with(old_suffix) {
        return Some(InferredRelation {
            target_id: candidate_id.to_string(),
            relation_type: RelationType::Extends,
            confidence: 0.5,
            reason: "heuristic: same subject, added qualifier".to_string(),
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_update_on_changed_object() {
        let r = heuristic_infer("lives in Cork", "mem-1", "lives in Dublin").unwrap();
        assert_eq!(r.relation_type, RelationType::Updates);
    }

    #[test]
    fn detects_extend_on_added_qualifier() {
        let r = heuristic_infer("likes coffee in the morning", "mem-1", "likes coffee").unwrap();
        assert_eq!(r.relation_type, RelationType::Extends);
    }

    #[test]
    fn unrelated_content_infers_none() {
        assert!(heuristic_infer("enjoys hiking", "mem-1", "works as a pilot").is_none());
    }
}
