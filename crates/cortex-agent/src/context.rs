//! Context Builder — assembles the message list sent to the provider on
//! each `CALL_LLM` step (spec.md §4.7). Grounded on the teacher's
//! `skynet-agent::pipeline::compact` (LLM-based compression of the oldest
//! turns), generalized from "extract facts into user_memory" into "produce
//! a single system-role summary message".

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use dashmap::DashMap;

use cortex_memory::MemoryStore;
use cortex_providers::{ChatRequest, ContentBlock, Message, ProviderPool, Role};
use cortex_sessions::{MessageRole, SessionMessage, SessionStore};

use crate::error::Result;
use crate::progress::{emit, ProgressEvent, ProgressSender};

pub const HOT_WINDOW_SIZE: usize = 5;
const TOOL_OUTPUT_TRUNCATE_TOKENS: usize = 2000;
const HEAD_LINES: usize = 50;
const TAIL_LINES: usize = 20;
const COMPRESSION_TRIGGER_FRACTION: f64 = 0.7;
const COMPRESSED_SUMMARY_MAX_TOKENS: u32 = 500;

pub type RecallCache = Arc<DashMap<String, String>>;

pub struct ContextBuilder {
    sessions: Arc<SessionStore>,
    memory: Arc<MemoryStore>,
    /// Full text for truncated tool outputs, keyed by content hash. Shared
    /// with the `recall` tool so the model can pull back what it truncated;
    /// scoped to the owning `AgentLoop` instance, matching the teacher's
    /// preference for `dashmap` over `Mutex<HashMap>` on concurrent paths.
    recall_cache: RecallCache,
}

impl ContextBuilder {
    pub fn new(sessions: Arc<SessionStore>, memory: Arc<MemoryStore>) -> Self {
        Self { sessions, memory, recall_cache: Arc::new(DashMap::new()) }
    }

    /// Shared handle used to wire up the `recall` tool.
    pub fn cache_handle(&self) -> RecallCache {
        self.recall_cache.clone()
    }

    /// Replaces a tool output longer than the token threshold with a
    /// head/tail excerpt and a recall hash, keeping the full text available
    /// via `recall()`.
    pub fn truncate_tool_output(&self, output: &str, counter: &dyn cortex_providers::classifier::TokenCounter) -> String {
        if counter.count(output) <= TOOL_OUTPUT_TRUNCATE_TOKENS {
            return output.to_string();
        }
        let lines: Vec<&str> = output.lines().collect();
        let head: Vec<&str> = lines.iter().take(HEAD_LINES).copied().collect();
        let tail: Vec<&str> = lines.iter().rev().take(TAIL_LINES).rev().copied().collect();

        let mut hasher = DefaultHasher::new();
        output.hash(&mut hasher);
        let hash = format!("{:x}", hasher.finish());
        self.recall_cache.insert(hash.clone(), output.to_string());

        format!("{}\n…truncated, use recall({hash})…\n{}", head.join("\n"), tail.join("\n"))
    }

    pub fn recall(&self, hash: &str) -> Option<String> {
        self.recall_cache.get(hash).map(|v| v.clone())
    }

    /// Builds the message list for one `CALL_LLM` step: hot window verbatim,
    /// older turns compressed into a single summary once the context budget
    /// is threatened, and a system block of retrieved memory snippets
    /// prepended before the newest user message.
    pub async fn build(
        &self,
        session_id: &str,
        user_id: &str,
        model: &str,
        max_context_tokens: u32,
        providers: &ProviderPool,
        compress_provider: &str,
        compress_model: &str,
        counter: &dyn cortex_providers::classifier::TokenCounter,
        latest_user_text: &str,
        progress: Option<&ProgressSender>,
    ) -> Result<Vec<Message>> {
        let page = self.sessions.get_session_messages_paginated(session_id, 500, None)?;
        let mut history = page.messages;
        history.reverse(); // oldest first

        let hot_start = history.len().saturating_sub(HOT_WINDOW_SIZE);
        let (older, hot) = history.split_at(hot_start);

        let mut messages = Vec::new();

        let total_tokens: usize = history.iter().map(|m| counter.count(&render_text(m))).sum();
        let budget = (max_context_tokens as f64 * COMPRESSION_TRIGGER_FRACTION) as usize;

        if !older.is_empty() && total_tokens > budget {
            if let Some(summary) = self.compress(older, providers, compress_provider, compress_model).await {
                messages.push(Message {
                    role: Role::System,
                    content: vec![ContentBlock::Text { text: summary }],
                });
            } else {
                for m in older {
                    messages.push(self.to_provider_message(m, counter));
                }
            }
        } else {
            for m in older {
                messages.push(self.to_provider_message(m, counter));
            }
        }

        for m in hot {
            messages.push(self.to_provider_message(m, counter));
        }

        if let Some(snippets) = self.memory_snippets(user_id, latest_user_text, progress).await {
            messages.push(Message { role: Role::System, content: vec![ContentBlock::Text { text: snippets }] });
        }

        messages.push(Message::user_text(latest_user_text));
        let _ = model;
        Ok(messages)
    }

    async fn compress(&self, older: &[SessionMessage], providers: &ProviderPool, compress_provider: &str, compress_model: &str) -> Option<String> {
        let transcript = older
            .iter()
            .map(|m| format!("{}: {}", m.role, render_text(m)))
            .collect::<Vec<_>>()
            .join("\n\n");

        let req = ChatRequest {
            model: compress_model.to_string(),
            messages: vec![Message::user_text(format!(
                "Summarize the key facts, decisions, and open threads from this earlier part \
                 of the conversation in under {COMPRESSED_SUMMARY_MAX_TOKENS} tokens:\n\n{transcript}"
            ))],
            system: Some("You compress conversation history into a terse system-role summary.".to_string()),
            tools: Vec::new(),
            temperature: Some(0.0),
            max_tokens: Some(COMPRESSED_SUMMARY_MAX_TOKENS),
        };

        match providers.call(compress_provider, &req).await {
            Ok(resp) => Some(resp.text()),
            Err(_) => None,
        }
    }

    async fn memory_snippets(&self, user_id: &str, query: &str, progress: Option<&ProgressSender>) -> Option<String> {
        let results = self.memory.search(user_id, query, 8).await.ok()?;
        if results.is_empty() {
            return None;
        }
        let mut sorted = results;
        sorted.sort_by(|a, b| b.memory.prominence.partial_cmp(&a.memory.prominence).unwrap_or(std::cmp::Ordering::Equal));
        let lines = sorted
            .iter()
            .map(|r| format!("- [{}] {}", r.memory.category, r.memory.content))
            .collect::<Vec<_>>()
            .join("\n");

        emit(
            progress,
            ProgressEvent::Memory {
                action: "recall".to_string(),
                count: sorted.len(),
                items: Some(sorted.iter().map(|r| r.memory.content.clone()).collect()),
            },
        );

        Some(format!("Relevant memory:\n{lines}"))
    }

    fn to_provider_message(&self, m: &SessionMessage, counter: &dyn cortex_providers::classifier::TokenCounter) -> Message {
        let role = match m.role {
            MessageRole::User => Role::User,
            MessageRole::Assistant => Role::Assistant,
            MessageRole::Tool => Role::User,
        };
        let content = m
            .content
            .iter()
            .map(|b| match b {
                ContentBlock::ToolResult { id, output, is_error } => {
                    ContentBlock::ToolResult { id: id.clone(), output: self.truncate_tool_output(output, counter), is_error: *is_error }
                }
                other => other.clone(),
            })
            .collect();
        Message { role, content }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_providers::classifier::HeuristicTokenCounter;

    fn builder() -> ContextBuilder {
        let clock = std::sync::Arc::new(cortex_core::SystemClock);
        let sessions = Arc::new(SessionStore::open_in_memory(clock.clone()).unwrap());
        let memory = Arc::new(MemoryStore::open_in_memory(Arc::new(cortex_memory::HashEmbedder::default()), None, None, clock).unwrap());
        ContextBuilder::new(sessions, memory)
    }

    #[test]
    fn short_output_is_not_truncated() {
        let cb = builder();
        let text = "a short tool result";
        assert_eq!(cb.truncate_tool_output(text, &HeuristicTokenCounter), text);
    }

    #[test]
    fn long_output_is_truncated_and_recallable() {
        let cb = builder();
        let lines: Vec<String> = (0..200).map(|i| format!("line {i}")).collect();
        let text = lines.join("\n");
        let truncated = cb.truncate_tool_output(&text, &HeuristicTokenCounter);
        assert!(truncated.contains("truncated, use recall("));
        assert_ne!(truncated, text);

        let hash = truncated.split("recall(").nth(1).unwrap().split(')').next().unwrap();
        assert_eq!(cb.recall(hash).unwrap(), text);
    }
}

fn render_text(m: &SessionMessage) -> String {
    m.content
        .iter()
        .filter_map(|b| match b {
            ContentBlock::Text { text } => Some(text.clone()),
            ContentBlock::ToolUse { name, .. } => Some(format!("[tool_use: {name}]")),
            ContentBlock::ToolResult { output, .. } => Some(output.clone()),
        })
        .collect::<Vec<_>>()
        .join("\n")
}
