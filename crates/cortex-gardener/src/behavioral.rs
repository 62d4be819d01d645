//! Step 5 — behavioral inference. Recomputes the smoothed signals on
//! `cortex_core::BehavioralPatterns` from a user's recent sessions, applying
//! each new sample through an EMA with a 7-day half-life (spec.md §4.9 step
//! 5). Signals stay `None` until their cold-start sample threshold is met
//! (`cortex_core::profile::{MESSAGE_FREQUENCY,SESSION_ENGAGEMENT,TOPIC_SWITCH}_MIN_SAMPLES`).

use chrono::{DateTime, Duration, Timelike, Utc};
use cortex_core::profile::{
    MESSAGE_FREQUENCY_MIN_SAMPLES, SESSION_ENGAGEMENT_MIN_SAMPLES, TOPIC_SWITCH_MIN_SAMPLES,
};
use cortex_core::{BehavioralPatterns, ProactivenessDial, ProfileStore};
use cortex_sessions::{MessageRole, SessionStore};

use crate::types::StepOutcome;

const LOOKBACK_DAYS: i64 = 30;
const HALF_LIFE_DAYS: f64 = 7.0;

const DISTRESS_KEYWORDS: &[&str] = &[
    "overwhelmed", "hopeless", "can't cope", "give up", "exhausted",
    "worthless", "anxious", "panic", "breaking down", "can't handle this",
];
const POSITIVE_KEYWORDS: &[&str] = &["great", "thanks", "awesome", "love this", "excited", "good news"];

/// Blends a new sample into an existing EMA with `HALF_LIFE_DAYS`, or seeds
/// it outright if this is the first sample.
fn ema(previous: Option<f64>, sample: f64, elapsed_days: f64) -> f64 {
    match previous {
        None => sample,
        Some(prev) => {
            let decay = 0.5_f64.powf(elapsed_days.max(0.0) / HALF_LIFE_DAYS);
            prev * decay + sample * (1.0 - decay)
        }
    }
}

/// Recomputes `patterns` in place from `user_id`'s sessions over the last
/// `LOOKBACK_DAYS`. Returns `true` if anything changed (so the caller can
/// skip a write for users with no recent activity).
pub fn infer(sessions: &SessionStore, patterns: &mut BehavioralPatterns, user_id: &str, now: DateTime<Utc>) -> bool {
    let since = now - Duration::days(LOOKBACK_DAYS);
    let recent = match sessions.sessions_for_user_since(user_id, since) {
        Ok(s) => s,
        Err(_) => return false,
    };
    if recent.is_empty() {
        return false;
    }

    let elapsed_days = (now - patterns.updated_at).num_seconds() as f64 / 86_400.0;

    let mut message_count = 0u32;
    let mut total_len = 0u64;
    let mut hours_seen = Vec::new();
    let mut distress_hits = 0u32;
    let mut positive_hits = 0u32;
    let mut topic_switch_samples = 0u32;
    let mut topic_switches = 0u32;

    for session in &recent {
        let page = match sessions.get_session_messages_paginated(&session.id, 200, None) {
            Ok(p) => p,
            Err(_) => continue,
        };
        let mut prev_words: Option<Vec<String>> = None;
        for message in page.messages.iter().filter(|m| m.role == MessageRole::User) {
            let text = message.text();
            message_count += 1;
            total_len += text.chars().count() as u64;
            hours_seen.push(message.created_at.hour() as u8);

            let lower = text.to_lowercase();
            if DISTRESS_KEYWORDS.iter().any(|k| lower.contains(k)) {
                distress_hits += 1;
            }
            if POSITIVE_KEYWORDS.iter().any(|k| lower.contains(k)) {
                positive_hits += 1;
            }

            let words: Vec<String> = lower.split_whitespace().map(String::from).collect();
            if let Some(prev) = &prev_words {
                topic_switch_samples += 1;
                if jaccard_overlap(prev, &words) < 0.15 {
                    topic_switches += 1;
                }
            }
            prev_words = Some(words);
        }
    }

    if message_count == 0 {
        return false;
    }

    patterns.message_sample_count += message_count;
    patterns.session_sample_count += recent.len() as u32;
    patterns.embedded_sample_count += topic_switch_samples;

    let frequency_sample = recent.len() as f64 / LOOKBACK_DAYS as f64;
    let length_sample = total_len as f64 / message_count as f64;
    let engagement_sample = message_count as f64 / recent.len() as f64;

    if patterns.message_sample_count >= MESSAGE_FREQUENCY_MIN_SAMPLES {
        patterns.message_frequency = Some(ema(patterns.message_frequency, frequency_sample, elapsed_days));
        patterns.response_length = Some(ema(patterns.response_length, length_sample, elapsed_days));
    }
    if patterns.session_sample_count >= SESSION_ENGAGEMENT_MIN_SAMPLES {
        patterns.session_engagement = Some(ema(patterns.session_engagement, engagement_sample, elapsed_days));
    }
    if patterns.embedded_sample_count >= TOPIC_SWITCH_MIN_SAMPLES && topic_switch_samples > 0 {
        let switch_sample = topic_switches as f64 / topic_switch_samples as f64;
        patterns.topic_switch = Some(ema(patterns.topic_switch, switch_sample, elapsed_days));
    }

    let affect_sample = ((positive_hits as f64 - 2.0 * distress_hits as f64) / message_count as f64).clamp(-1.0, 1.0);
    patterns.smoothed_affect = Some(ema(patterns.smoothed_affect, affect_sample, elapsed_days));

    hours_seen.sort_unstable();
    hours_seen.dedup();
    patterns.active_hours = hours_seen;
    patterns.updated_at = now;
    true
}

fn jaccard_overlap(a: &[String], b: &[String]) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 1.0;
    }
    let set_a: std::collections::HashSet<&String> = a.iter().collect();
    let set_b: std::collections::HashSet<&String> = b.iter().collect();
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    if union == 0 {
        1.0
    } else {
        intersection as f64 / union as f64
    }
}

/// Runs inference for every known user and persists the ones that changed.
pub fn run_for_all_users(sessions: &SessionStore, profiles: &ProfileStore, now: DateTime<Utc>) -> crate::error::Result<usize> {
    let mut updated = 0usize;
    for user_id in sessions.all_user_ids()? {
        let mut patterns = profiles.get_or_create(&user_id)?;
        if infer(sessions, &mut patterns, &user_id, now) {
            profiles.save(&patterns)?;
            updated += 1;
        }
    }
    Ok(updated)
}

/// Step 6 — trust-score reconciliation. `ProfileStore::record_proactive_feedback`
/// updates `trust_score` and re-derives the dial the moment feedback comes in,
/// so there is nothing to accumulate here; this step just catches profiles
/// whose dial no longer matches their trust score (e.g. after a threshold
/// change in `ProactivenessDial::from_trust_score`) and re-saves them.
pub fn reconcile_trust_scores(profiles: &ProfileStore) -> StepOutcome {
    let user_ids = match profiles.all_user_ids() {
        Ok(ids) => ids,
        Err(e) => return StepOutcome::failed(e),
    };

    let mut reconciled = 0u32;
    for user_id in user_ids {
        let mut patterns = match profiles.get_or_create(&user_id) {
            Ok(p) => p,
            Err(_) => continue,
        };
        let expected: ProactivenessDial = ProactivenessDial::from_trust_score(patterns.trust_score);
        if expected != patterns.proactiveness_dial {
            patterns.proactiveness_dial = expected;
            if profiles.save(&patterns).is_ok() {
                reconciled += 1;
            }
        }
    }

    StepOutcome::ok(format!("reconciled={reconciled}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_core::clock::FakeClock;
    use cortex_core::Clock;
    use cortex_providers::ContentBlock;

    #[test]
    fn cold_start_keeps_signals_none_below_threshold() {
        let clock = FakeClock::new(Utc::now());
        let sessions = SessionStore::open_in_memory(clock.clone()).unwrap();
        let profiles = ProfileStore::open_in_memory().unwrap();
        let session = sessions.create_session("u1", "telegram:1", None).unwrap();
        sessions.append_message(&session.id, MessageRole::User, vec![ContentBlock::Text { text: "hello there".into() }]).unwrap();

        let mut patterns = profiles.get_or_create("u1").unwrap();
        let changed = infer(&sessions, &mut patterns, "u1", clock.now());
        assert!(changed);
        assert!(patterns.message_frequency.is_none());
        assert!(patterns.smoothed_affect.is_some());
    }

    #[test]
    fn distress_keywords_pull_affect_negative() {
        let clock = FakeClock::new(Utc::now());
        let sessions = SessionStore::open_in_memory(clock.clone()).unwrap();
        let profiles = ProfileStore::open_in_memory().unwrap();
        let session = sessions.create_session("u1", "telegram:1", None).unwrap();
        sessions
            .append_message(&session.id, MessageRole::User, vec![ContentBlock::Text { text: "I feel completely overwhelmed and hopeless".into() }])
            .unwrap();

        let mut patterns = profiles.get_or_create("u1").unwrap();
        infer(&sessions, &mut patterns, "u1", clock.now());
        assert!(patterns.smoothed_affect.unwrap() < 0.0);
    }
}
