use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use cortex_providers::{ChatRequest, LlmProvider, Message};

use crate::error::Result;
use crate::types::{RerankCandidate, RerankScore};

/// Re-scores retrieval candidates against the query using an LLM judge. A
/// cheap-tier model call per spec.md §4.5.2; candidates the reranker omits
/// from its response keep their original score untouched.
#[async_trait]
pub trait MemoryReranker: Send + Sync {
    async fn rerank(&self, query: &str, candidates: &[RerankCandidate<'_>]) -> Result<Vec<RerankScore>>;
}

pub struct LlmReranker {
    provider: std::sync::Arc<dyn LlmProvider>,
    model: String,
}

impl LlmReranker {
    pub fn new(provider: std::sync::Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self { provider, model: model.into() }
    }
}

#[derive(Deserialize)]
struct RawScore {
    index: usize,
    score: f64,
}

#[async_trait]
impl MemoryReranker for LlmReranker {
    async fn rerank(&self, query: &str, candidates: &[RerankCandidate<'_>]) -> Result<Vec<RerankScore>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        let listing = candidates
            .iter()
            .map(|c| format!("{}: {}", c.index, c.content))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Query: {query}\n\nCandidates:\n{listing}\n\nRate how relevant each candidate is to \
             the query on a 0.0-1.0 scale. Respond with a JSON array of \
             {{\"index\": <candidate index>, \"score\": <0.0-1.0>}}. Omit candidates you judge \
             irrelevant."
        );
        let req = ChatRequest::new(&self.model, vec![Message::user_text(prompt)]);
        let resp = self.provider.complete(&req).await?;
        let text = resp.text();
        match parse_scores(&text) {
            Some(scores) => Ok(scores),
            None => {
                warn!("reranker response was not valid JSON, keeping original scores");
                Ok(Vec::new())
            }
        }
    }
}

fn parse_scores(text: &str) -> Option<Vec<RerankScore>> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    let slice = &text[start..=end];
    let raw: Vec<RawScore> = serde_json::from_str(slice).ok()?;
    Some(raw.into_iter().map(|r| RerankScore { index: r.index, score: r.score.clamp(0.0, 1.0) }).collect())
}

/// Blend original retrieval score with the reranker's judgment:
/// `0.4 * original + 0.6 * llm`. Candidates the reranker didn't score keep
/// their original score untouched (spec.md §4.5.2).
pub fn blend_scores(original: &[(usize, f64)], llm: &[RerankScore]) -> Vec<(usize, f64)> {
    let llm_by_index: std::collections::HashMap<usize, f64> =
        llm.iter().map(|s| (s.index, s.score)).collect();
    original
        .iter()
        .map(|(idx, orig)| match llm_by_index.get(idx) {
            Some(llm_score) => (*idx, 0.4 * orig + 0.6 * llm_score),
            None => (*idx, *orig),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unscored_candidates_keep_original_score() {
        let original = vec![(0, 0.8), (1, 0.5)];
        let llm = vec![RerankScore { index: 0, score: 0.2 }];
        let blended = blend_scores(&original, &llm);
        assert_eq!(blended[0].1, 0.4 * 0.8 + 0.6 * 0.2);
        assert_eq!(blended[1].1, 0.5);
    }

    #[test]
    fn parses_loosely_wrapped_json() {
        let text = "Sure, here you go:\n[{\"index\":0,\"score\":0.9}]\nThanks!";
        let scores = parse_scores(text).unwrap();
        assert_eq!(scores.len(), 1);
        assert_eq!(scores[0].index, 0);
    }
}
