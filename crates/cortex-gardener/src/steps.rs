//! Deep-tick pipeline steps 1-4 and 7, 9 (spec.md §4.9). Steps 5/6 live in
//! [`crate::behavioral`], step 8 is delegated straight to `cortex-proactive`
//! from [`crate::engine`]. Every function here returns a `StepOutcome`
//! instead of propagating — the caller never needs a `?` to keep the tick
//! going on a failing step.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cortex_core::GoalSource;
use cortex_memory::MemoryStore;
use cortex_providers::{ChatRequest, LlmProvider, Message};
use cortex_scheduler::{NewScheduledItem, ScheduledItemKind, ScheduledItemQueue, ScheduledItemSource};
use cortex_sessions::SessionStore;
use std::sync::Arc;

use crate::types::StepOutcome;

/// Retrieval-audit penalty: memories untouched for this long lose 5% of
/// their prominence (spec.md §4.9 step 4a).
pub const RETRIEVAL_AUDIT_STALE_DAYS: i64 = 30;
pub const RETRIEVAL_AUDIT_PENALTY_FACTOR: f64 = 0.95;
pub const ARCHIVAL_CAP_PER_RUN: usize = 50;
pub const HARD_PRUNE_SESSION_AGE_DAYS: i64 = 30;
pub const HARD_PRUNE_PROMINENCE_FLOOR: f64 = 0.01;
/// How far ahead of a goal's due date the check-in window opens.
pub const GOAL_DEADLINE_BAND_DAYS: i64 = 3;

pub fn full_decay(memory: &MemoryStore) -> StepOutcome {
    match memory.process_full_decay() {
        Ok(result) => StepOutcome::ok(format!("updated={} archived={}", result.updated, result.archived)),
        Err(e) => StepOutcome::failed(e),
    }
}

pub async fn fusion(memory: &MemoryStore, summarizer: &dyn cortex_memory::FusionSummarizer, max_clusters: usize) -> StepOutcome {
    match memory.run_fusion(max_clusters, summarizer).await {
        Ok(result) => StepOutcome::ok(format!("examined={} derived={}", result.clusters_examined, result.derived_memories.len())),
        Err(e) => StepOutcome::failed(e),
    }
}

/// Summarizes one session's transcript into a short standing summary.
/// Implementations are best-effort: on failure the session is left
/// unsummarized and picked up again on the next deep tick.
#[async_trait]
pub trait SessionSummarizer: Send + Sync {
    async fn summarize(&self, transcript: &str) -> Option<String>;
}

pub struct LlmSessionSummarizer {
    provider: Arc<dyn LlmProvider>,
    model: String,
}

impl LlmSessionSummarizer {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self { provider, model: model.into() }
    }
}

#[async_trait]
impl SessionSummarizer for LlmSessionSummarizer {
    async fn summarize(&self, transcript: &str) -> Option<String> {
        let prompt = format!(
            "Summarize this conversation in 2-3 sentences, focused on unresolved \
             questions or follow-ups the user might expect a reply to later:\n\n{transcript}"
        );
        let req = ChatRequest::new(&self.model, vec![Message::user_text(prompt)]);
        let resp = self.provider.complete(&req).await.ok()?;
        let text = resp.text();
        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

/// Step 3 — session summarization. Skips sessions flagged as sub-agent
/// sessions via `metadata.sub_agent == true` (no sub-agent registry exists
/// outside the session store, so this is the narrowest marker available).
pub async fn session_summarization(sessions: &SessionStore, summarizer: &dyn SessionSummarizer, min_age_days: i64) -> StepOutcome {
    let ids = match sessions.unsummarized_stale_session_ids(min_age_days) {
        Ok(ids) => ids,
        Err(e) => return StepOutcome::failed(e),
    };

    let mut summarized = 0u32;
    let mut skipped = 0u32;
    for id in ids {
        let Ok(Some(session)) = sessions.get_session(&id) else { continue };
        if session.metadata.get("sub_agent").and_then(|v| v.as_bool()).unwrap_or(false) {
            skipped += 1;
            continue;
        }

        let page = match sessions.get_session_messages_paginated(&id, 500, None) {
            Ok(p) => p,
            Err(_) => continue,
        };
        if page.messages.is_empty() {
            continue;
        }
        let transcript = page.messages.iter().map(|m| format!("{}: {}", m.role, m.text())).collect::<Vec<_>>().join("\n");

        if let Some(summary) = summarizer.summarize(&transcript).await {
            if sessions.put_summary(&id, &summary).is_ok() {
                summarized += 1;
            }
        }
    }

    StepOutcome::ok(format!("summarized={summarized} skipped_sub_agent={skipped}"))
}

/// Step 4 — enhanced forgetting, sub-steps a-d. `disable_archival` lets an
/// operator keep retrieval-audit decay and hard pruning running while
/// pausing step 4b, e.g. while tuning `archival_utility_threshold`.
pub fn enhanced_forgetting(
    memory: &MemoryStore,
    sessions: &SessionStore,
    archival_utility_threshold: f64,
    archival_min_age_days: i64,
    disable_archival: bool,
) -> StepOutcome {
    let penalized = match memory.apply_retrieval_audit_penalty(RETRIEVAL_AUDIT_STALE_DAYS, RETRIEVAL_AUDIT_PENALTY_FACTOR) {
        Ok(n) => n,
        Err(e) => return StepOutcome::failed(format!("retrieval_audit: {e}")),
    };

    let archived = if disable_archival {
        0
    } else {
        match memory.archive_low_utility(archival_utility_threshold, archival_min_age_days, ARCHIVAL_CAP_PER_RUN) {
            Ok(n) => n,
            Err(e) => return StepOutcome::failed(format!("archival: {e}")),
        }
    };

    let stale_sessions = match sessions.stale_session_ids(HARD_PRUNE_SESSION_AGE_DAYS) {
        Ok(ids) => ids,
        Err(e) => return StepOutcome::failed(format!("hard_prune session scan: {e}")),
    };
    let mut pruned_sessions = 0u64;
    for id in stale_sessions {
        if sessions.delete_session(&id).is_ok() {
            pruned_sessions += 1;
        }
    }

    let pruned_memories = match memory.hard_prune_archived(HARD_PRUNE_PROMINENCE_FLOOR) {
        Ok(n) => n,
        Err(e) => return StepOutcome::failed(format!("hard_prune memories: {e}")),
    };

    let orphans = match memory.cleanup_orphan_edges() {
        Ok(n) => n,
        Err(e) => return StepOutcome::failed(format!("orphan_edges: {e}")),
    };

    StepOutcome::ok(format!(
        "penalized={penalized} archived={archived} pruned_sessions={pruned_sessions} \
         pruned_memories={pruned_memories} orphan_edges={orphans}"
    ))
}

/// Step 7 — for every active goal whose due date falls within
/// `GOAL_DEADLINE_BAND_DAYS`, enqueue a `goal_checkin` item unless a
/// similar one is already pending.
pub fn goal_deadline_check(goals: &dyn GoalSource, queue: &ScheduledItemQueue, user_id: &str, now: DateTime<Utc>) -> StepOutcome {
    let due_soon: Vec<_> = goals
        .active_goals_with_deadlines(user_id)
        .into_iter()
        .filter(|g| {
            let until = g.due_at.signed_duration_since(now);
            until >= chrono::Duration::zero() && until <= chrono::Duration::days(GOAL_DEADLINE_BAND_DAYS)
        })
        .collect();

    let mut enqueued = 0u32;
    for goal in &due_soon {
        let message = format!("Checking in: \"{}\" is due soon.", goal.title);
        let already_pending = match queue.has_similar_or_same_source(user_id, &message, Some(&goal.id)) {
            Ok(v) => v,
            Err(e) => return StepOutcome::failed(e),
        };
        if already_pending {
            continue;
        }
        let item = NewScheduledItem {
            user_id: user_id.to_string(),
            message,
            trigger_at: now,
            source: ScheduledItemSource::Proactive,
            kind: ScheduledItemKind::Nudge,
            item_type: "goal_checkin".to_string(),
            session_id: None,
            context: None,
            recurring: None,
            source_memory_id: Some(goal.id.clone()),
        };
        if queue.enqueue(item).is_ok() {
            enqueued += 1;
        }
    }

    StepOutcome::ok(format!("due_soon={} enqueued={enqueued}", due_soon.len()))
}

/// Step 9 — delete sub-agent sessions (and their messages/summaries) older
/// than `max_age_days`. Sub-agent sessions are the only kind of "run"
/// modeled so far; a dedicated sub-agent run table would own this instead
/// if one existed.
pub fn sub_agent_cleanup(sessions: &SessionStore, max_age_days: i64) -> StepOutcome {
    let stale = match sessions.stale_session_ids(max_age_days) {
        Ok(ids) => ids,
        Err(e) => return StepOutcome::failed(e),
    };

    let mut deleted = 0u32;
    for id in stale {
        let Ok(Some(session)) = sessions.get_session(&id) else { continue };
        if !session.metadata.get("sub_agent").and_then(|v| v.as_bool()).unwrap_or(false) {
            continue;
        }
        if sessions.delete_session(&id).is_ok() {
            deleted += 1;
        }
    }

    StepOutcome::ok(format!("deleted={deleted}"))
}
