//! Step 1 — skip gate (spec.md §4.10 step 1). Runs before any signal
//! collection or LLM call; each check is cheap and purely local to the
//! user's stored profile and today's fired count.

use chrono::{DateTime, Duration, Utc};
use cortex_core::config::{DialBudgets, ProactiveConfig};
use cortex_core::profile::{BehavioralPatterns, ProactivenessDial};

pub enum SkipReason {
    Cooldown,
    Distress,
    DailyCapReached,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Cooldown => "cooldown",
            SkipReason::Distress => "distress",
            SkipReason::DailyCapReached => "daily_cap_reached",
        }
    }
}

fn dial_budget(dial: ProactivenessDial, budgets: &DialBudgets) -> u32 {
    match dial {
        ProactivenessDial::Conservative => budgets.conservative,
        ProactivenessDial::Moderate => budgets.moderate,
        ProactivenessDial::Eager => budgets.eager,
    }
}

/// Returns `Some(reason)` if evaluation should stop here, `None` to proceed
/// to signal collection.
pub fn check(patterns: &BehavioralPatterns, config: &ProactiveConfig, now: DateTime<Utc>, fired_today: u32) -> Option<SkipReason> {
    if let Some(last) = patterns.last_proactive_fired_at {
        let cooldown = Duration::milliseconds(config.cooldown_ms as i64);
        if now.signed_duration_since(last) < cooldown {
            return Some(SkipReason::Cooldown);
        }
    }

    if patterns.is_distressed() {
        return Some(SkipReason::Distress);
    }

    let cap = dial_budget(patterns.proactiveness_dial, &config.dial_budgets);
    if fired_today >= cap {
        return Some(SkipReason::DailyCapReached);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_core::profile::ProfileStore;

    fn patterns_for(user_id: &str) -> BehavioralPatterns {
        let store = ProfileStore::open_in_memory().unwrap();
        store.get_or_create(user_id).unwrap()
    }

    #[test]
    fn fresh_profile_passes() {
        let patterns = patterns_for("u1");
        let config = ProactiveConfig::default();
        assert!(check(&patterns, &config, Utc::now(), 0).is_none());
    }

    #[test]
    fn recently_fired_triggers_cooldown() {
        let mut patterns = patterns_for("u1");
        patterns.last_proactive_fired_at = Some(Utc::now() - Duration::hours(1));
        let config = ProactiveConfig::default();
        assert!(matches!(check(&patterns, &config, Utc::now(), 0), Some(SkipReason::Cooldown)));
    }

    #[test]
    fn distressed_user_is_skipped() {
        let mut patterns = patterns_for("u1");
        patterns.smoothed_affect = Some(-0.9);
        let config = ProactiveConfig::default();
        assert!(matches!(check(&patterns, &config, Utc::now(), 0), Some(SkipReason::Distress)));
    }

    #[test]
    fn daily_cap_respects_dial() {
        let mut patterns = patterns_for("u1");
        patterns.proactiveness_dial = ProactivenessDial::Conservative;
        let config = ProactiveConfig::default();
        let cap = config.dial_budgets.conservative;
        assert!(matches!(check(&patterns, &config, Utc::now(), cap), Some(SkipReason::DailyCapReached)));
        assert!(check(&patterns, &config, Utc::now(), cap.saturating_sub(1)).is_none());
    }
}
