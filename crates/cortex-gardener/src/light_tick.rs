//! Light tick (~5 min, spec.md §4.9): hot-memory decay, usage-ledger
//! checkpoint, stuck-session timeout. Cheap enough to run far more often
//! than the deep tick's 9-step pipeline.

use chrono::{DateTime, Utc};
use cortex_memory::MemoryStore;
use cortex_providers::UsageLedger;
use cortex_sessions::{MessageRole, SessionStore};

use crate::types::{LightTickReport, StepOutcome};

/// How long an unanswered user turn sits before it's considered stuck.
pub const STUCK_SESSION_TIMEOUT_MINUTES: i64 = 10;

fn hot_decay(memory: &MemoryStore, hot_window_size: usize) -> StepOutcome {
    match memory.process_hot_decay(hot_window_size) {
        Ok(result) => StepOutcome::ok(format!("updated={} archived={}", result.updated, result.archived)),
        Err(e) => StepOutcome::failed(e),
    }
}

fn flush_ledger(ledger: &UsageLedger) -> StepOutcome {
    match ledger.checkpoint() {
        Ok(()) => StepOutcome::ok("checkpointed"),
        Err(e) => StepOutcome::failed(e),
    }
}

/// Closes out sessions whose last message is an unanswered user turn older
/// than `STUCK_SESSION_TIMEOUT_MINUTES`, appending a synthetic assistant
/// reply so the next user message starts a fresh turn instead of piling on
/// top of a dead one.
fn timeout_stuck_sessions(sessions: &SessionStore) -> StepOutcome {
    let stuck = match sessions.stuck_session_ids(STUCK_SESSION_TIMEOUT_MINUTES) {
        Ok(ids) => ids,
        Err(e) => return StepOutcome::failed(e),
    };

    let mut timed_out = 0u32;
    for id in &stuck {
        let result = sessions.append_message(
            id,
            MessageRole::Assistant,
            vec![cortex_providers::ContentBlock::Text {
                text: "[turn timed out and was closed by the gardener]".to_string(),
            }],
        );
        if result.is_ok() {
            timed_out += 1;
        }
    }

    StepOutcome::ok(format!("timed_out={timed_out}"))
}

pub fn run(memory: &MemoryStore, sessions: &SessionStore, ledger: &UsageLedger, hot_window_size: usize, now: DateTime<Utc>) -> LightTickReport {
    LightTickReport {
        at: now,
        hot_decayed: hot_decay(memory, hot_window_size),
        stuck_sessions_timed_out: {
            let ledger_outcome = flush_ledger(ledger);
            if !ledger_outcome.is_ok() {
                tracing::warn!(?ledger_outcome, "usage ledger checkpoint failed during light tick");
            }
            timeout_stuck_sessions(sessions)
        },
    }
}
