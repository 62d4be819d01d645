use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Trivial,
    Simple,
    Moderate,
    Complex,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Trivial => "trivial",
            Tier::Simple => "simple",
            Tier::Moderate => "moderate",
            Tier::Complex => "complex",
        }
    }

    /// One tier cheaper, or `None` if already at the floor. Used by the
    /// router's budget-downshift loop (spec.md §4.4 step 5).
    pub fn downshift(&self) -> Option<Tier> {
        match self {
            Tier::Complex => Some(Tier::Moderate),
            Tier::Moderate => Some(Tier::Simple),
            Tier::Simple => Some(Tier::Trivial),
            Tier::Trivial => None,
        }
    }
}

const ARCHITECTURE_KEYWORDS: &[&str] = &[
    "architecture", "refactor", "design pattern", "scalability", "microservice",
    "distributed", "concurrency", "race condition", "deadlock", "migration",
];
const DEBUG_KEYWORDS: &[&str] = &[
    "debug", "stack trace", "segfault", "panic", "traceback", "exception",
    "crash", "memory leak", "undefined behavior",
];
const GREETING_WORDS: &[&str] = &[
    "hi", "hello", "hey", "thanks", "thank you", "ok", "okay", "yep", "yes",
    "no", "bye", "goodbye", "sure", "cool", "nice", "great",
];

/// A heuristic token counter. The exact function is an explicit Open Question
/// in spec.md §9 ("tiktoken vs heuristic... results must only remain within
/// the configured budget") — this whitespace+punctuation split is deliberately
/// swappable behind the `TokenCounter` trait without touching call sites.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicTokenCounter;

impl TokenCounter for HeuristicTokenCounter {
    fn count(&self, text: &str) -> usize {
        let mut count = 0usize;
        let mut in_word = false;
        for ch in text.chars() {
            if ch.is_whitespace() {
                in_word = false;
            } else if ch.is_alphanumeric() {
                if !in_word {
                    count += 1;
                    in_word = true;
                }
            } else {
                // Punctuation counts as its own token (rough approximation
                // of sub-word tokenizer behavior around symbols).
                count += 1;
                in_word = false;
            }
        }
        count
    }
}

fn has_code_fence_or_identifiers(text: &str) -> bool {
    text.contains("```")
        || text.contains("fn ")
        || text.contains("def ")
        || text.contains("function ")
        || text.contains("class ")
        || text.contains("import ")
        || text.contains("::")
        || text.contains("=>")
}

fn looks_like_greeting(text: &str) -> bool {
    let normalized = text.trim().trim_end_matches(['.', '!', '?']).to_lowercase();
    GREETING_WORDS.contains(&normalized.as_str())
        || normalized
            .split_whitespace()
            .all(|w| GREETING_WORDS.contains(&w))
}

/// Maps `(input, recentHistory)` to a complexity tier. Deterministic, no LLM
/// call — spec.md §4.3.
pub fn classify(
    input: &str,
    predicted_tool_count: usize,
    counter: &dyn TokenCounter,
) -> Tier {
    let tokens = counter.count(input);
    let lower = input.to_lowercase();
    let has_architecture_kw = ARCHITECTURE_KEYWORDS.iter().any(|k| lower.contains(k));
    let has_debug_kw = DEBUG_KEYWORDS.iter().any(|k| lower.contains(k));
    let has_code = has_code_fence_or_identifiers(input);

    if tokens < 20 && !has_code && looks_like_greeting(input) {
        return Tier::Trivial;
    }
    if has_architecture_kw || has_debug_kw || tokens > 500 {
        return Tier::Complex;
    }
    if has_code || predicted_tool_count > 2 {
        return Tier::Moderate;
    }
    Tier::Simple
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trivial_greeting() {
        assert_eq!(classify("hi", 0, &HeuristicTokenCounter), Tier::Trivial);
    }

    #[test]
    fn complex_on_architecture_keyword() {
        assert_eq!(
            classify("how should I refactor this for better scalability", 0, &HeuristicTokenCounter),
            Tier::Complex
        );
    }

    #[test]
    fn complex_on_long_input() {
        let long = "word ".repeat(600);
        assert_eq!(classify(&long, 0, &HeuristicTokenCounter), Tier::Complex);
    }

    #[test]
    fn moderate_on_code_fence() {
        assert_eq!(
            classify("explain this: ```fn main() {}```", 0, &HeuristicTokenCounter),
            Tier::Moderate
        );
    }

    #[test]
    fn moderate_on_predicted_tools() {
        assert_eq!(classify("do three things for me", 3, &HeuristicTokenCounter), Tier::Moderate);
    }

    #[test]
    fn simple_fallback() {
        assert_eq!(
            classify("what's the capital of France", 0, &HeuristicTokenCounter),
            Tier::Simple
        );
    }

    #[test]
    fn downshift_floors_at_trivial() {
        assert_eq!(Tier::Trivial.downshift(), None);
        assert_eq!(Tier::Complex.downshift(), Some(Tier::Moderate));
    }
}
