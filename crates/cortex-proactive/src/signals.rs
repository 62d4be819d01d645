//! Step 2 — deterministic signal collection (spec.md §4.10 step 2). Every
//! function here is pure given its inputs; nothing calls an LLM until
//! `triage::run` in the next step.

use chrono::{DateTime, Duration, Utc};
use cortex_core::{BehavioralPatterns, BoardSource, GoalSource};
use cortex_sessions::SessionStore;

use crate::types::{GapSignal, Severity};

const UNRESOLVED_WINDOW_HOURS: i64 = 6;
const UNRESOLVED_MIN_MESSAGES: usize = 3;
const SUMMARY_LOOKBACK_DAYS: i64 = 3;
const UNRESOLVED_SUMMARY_MARKERS: &[&str] = &[
    "let me know", "follow up", "followed up", "get back to", "tbd", "pending", "still need",
];
const ENGAGEMENT_DROP_THRESHOLD: f64 = 1.5;

pub fn goal_deadline_signals(goals: &dyn GoalSource, user_id: &str, now: DateTime<Utc>, band_days: i64) -> Vec<GapSignal> {
    goals
        .active_goals_with_deadlines(user_id)
        .into_iter()
        .filter_map(|g| {
            let until = g.due_at.signed_duration_since(now);
            if until < Duration::zero() || until > Duration::days(band_days) {
                return None;
            }
            let severity = if until <= Duration::days(1) { Severity::High } else { Severity::Medium };
            Some(GapSignal {
                signal_type: "goal_deadline".to_string(),
                severity,
                description: format!("\"{}\" is due {}", g.title, format_relative(until)),
                source_id: Some(g.id),
            })
        })
        .collect()
}

pub fn stalled_board_signals(board: &dyn BoardSource, user_id: &str) -> Vec<GapSignal> {
    board
        .stalled_items(user_id)
        .into_iter()
        .map(|item| GapSignal {
            signal_type: "stalled_board_item".to_string(),
            severity: if item.stalled_days >= 7 { Severity::High } else { Severity::Low },
            description: format!("\"{}\" has had no movement in {} days", item.title, item.stalled_days),
            source_id: Some(item.id),
        })
        .collect()
}

/// Session summaries from the last `SUMMARY_LOOKBACK_DAYS` whose text hints
/// at an open loop (keyword heuristic, same register as the classifier's
/// keyword lists — no sentiment model is part of this crate's stack).
pub fn unresolved_summary_signals(sessions: &SessionStore, user_id: &str, now: DateTime<Utc>) -> Vec<GapSignal> {
    let since = now - Duration::days(SUMMARY_LOOKBACK_DAYS);
    let recent = match sessions.sessions_for_user_since(user_id, since) {
        Ok(s) => s,
        Err(_) => return Vec::new(),
    };

    let mut signals = Vec::new();
    for session in recent {
        let Ok(Some(summary)) = sessions.get_summary(&session.id) else { continue };
        let lower = summary.summary.to_lowercase();
        if UNRESOLVED_SUMMARY_MARKERS.iter().any(|m| lower.contains(m)) {
            signals.push(GapSignal {
                signal_type: "unresolved_summary".to_string(),
                severity: Severity::Low,
                description: summary.summary,
                source_id: Some(session.id),
            });
        }
    }
    signals
}

/// Synthetic `unresolved_thread` signal (spec.md §4.10 step 2): a recent
/// session within `UNRESOLVED_WINDOW_HOURS` with at least
/// `UNRESOLVED_MIN_MESSAGES` messages is treated as an open conversational
/// thread worth checking in on, independent of whether it has a summary yet.
pub fn synthetic_unresolved_thread(sessions: &SessionStore, user_id: &str, now: DateTime<Utc>) -> Option<GapSignal> {
    let since = now - Duration::hours(UNRESOLVED_WINDOW_HOURS);
    let recent = sessions.sessions_for_user_since(user_id, since).ok()?;
    for session in recent {
        let page = sessions.get_session_messages_paginated(&session.id, UNRESOLVED_MIN_MESSAGES, None).ok()?;
        if page.messages.len() >= UNRESOLVED_MIN_MESSAGES {
            return Some(GapSignal {
                signal_type: "unresolved_thread".to_string(),
                severity: Severity::Low,
                description: "a conversation from the last few hours may still be open".to_string(),
                source_id: Some(session.id),
            });
        }
    }
    None
}

/// A crude behavioral anomaly: session engagement (messages/session) has
/// dropped below `ENGAGEMENT_DROP_THRESHOLD`, suggesting the user is
/// disengaging rather than just being busy.
pub fn behavioral_anomaly_signals(patterns: &BehavioralPatterns) -> Vec<GapSignal> {
    let mut signals = Vec::new();
    if patterns.session_engagement.is_some_and(|e| e < ENGAGEMENT_DROP_THRESHOLD) {
        signals.push(GapSignal {
            signal_type: "engagement_drop".to_string(),
            severity: Severity::Low,
            description: "recent sessions have been unusually short".to_string(),
            source_id: None,
        });
    }
    signals
}

fn format_relative(until: Duration) -> String {
    if until <= Duration::hours(24) {
        "within a day".to_string()
    } else {
        format!("in {} days", until.num_days())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_core::clock::FakeClock;
    use cortex_core::{Clock, Goal, NullBoardSource, NullGoalSource};
    use cortex_providers::ContentBlock;
    use cortex_sessions::MessageRole;

    struct OneGoal(Goal);
    impl GoalSource for OneGoal {
        fn active_goals_with_deadlines(&self, _user_id: &str) -> Vec<Goal> {
            vec![self.0.clone()]
        }
    }

    #[test]
    fn goal_within_band_becomes_a_signal() {
        let now = Utc::now();
        let goal = Goal { id: "g1".into(), user_id: "u1".into(), title: "ship the report".into(), due_at: now + Duration::hours(12) };
        let signals = goal_deadline_signals(&OneGoal(goal), "u1", now, 3);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].severity, Severity::High);
    }

    #[test]
    fn null_sources_yield_no_signals() {
        let now = Utc::now();
        assert!(goal_deadline_signals(&NullGoalSource, "u1", now, 3).is_empty());
        assert!(stalled_board_signals(&NullBoardSource, "u1").is_empty());
    }

    #[test]
    fn synthetic_thread_requires_minimum_message_count() {
        let clock = FakeClock::new(Utc::now());
        let store = SessionStore::open_in_memory(clock.clone()).unwrap();
        let session = store.create_session("u1", "telegram:1", None).unwrap();
        store.append_message(&session.id, MessageRole::User, vec![ContentBlock::Text { text: "hey".into() }]).unwrap();
        assert!(synthetic_unresolved_thread(&store, "u1", clock.now()).is_none());

        store.append_message(&session.id, MessageRole::Assistant, vec![ContentBlock::Text { text: "hi, what's up?".into() }]).unwrap();
        store.append_message(&session.id, MessageRole::User, vec![ContentBlock::Text { text: "need help with something".into() }]).unwrap();
        assert!(synthetic_unresolved_thread(&store, "u1", clock.now()).is_some());
    }
}
