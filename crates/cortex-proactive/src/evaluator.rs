//! Top-level orchestration of spec.md §4.10's four steps, invoked by the
//! gardener's deep tick once per known user.

use std::sync::Arc;

use chrono::{DateTime, Duration, Timelike, Utc};
use cortex_core::config::{ProactiveConfig, QuietHours};
use cortex_core::profile::ProfileStore;
use cortex_core::{BoardSource, GoalSource};
use cortex_scheduler::{NewScheduledItem, ScheduledItemKind, ScheduledItemQueue, ScheduledItemSource};
use cortex_sessions::SessionStore;
use serde_json::json;

use crate::prefilter;
use crate::signals;
use crate::triage::Triage;
use crate::types::{EvaluationSummary, GapSignal, TriageAction};

const GOAL_DEADLINE_BAND_DAYS: i64 = 3;

pub struct ProactiveEvaluator {
    sessions: Arc<SessionStore>,
    profiles: Arc<ProfileStore>,
    queue: Arc<ScheduledItemQueue>,
    goals: Arc<dyn GoalSource>,
    board: Arc<dyn BoardSource>,
    triage: Triage,
    config: ProactiveConfig,
}

impl ProactiveEvaluator {
    pub fn new(
        sessions: Arc<SessionStore>,
        profiles: Arc<ProfileStore>,
        queue: Arc<ScheduledItemQueue>,
        goals: Arc<dyn GoalSource>,
        board: Arc<dyn BoardSource>,
        triage: Triage,
        config: ProactiveConfig,
    ) -> Self {
        Self { sessions, profiles, queue, goals, board, triage, config }
    }

    pub async fn evaluate_user(&self, user_id: &str, now: DateTime<Utc>) -> crate::error::Result<EvaluationSummary> {
        let patterns = self.profiles.get_or_create(user_id)?;

        let fired_today = self.queue.count_proactive_fired_since(user_id, now - Duration::hours(24))?;
        if let Some(reason) = prefilter::check(&patterns, &self.config, now, fired_today) {
            return Ok(EvaluationSummary::skipped(user_id, reason.as_str()));
        }

        let gaps = self.collect_signals(user_id, now, &patterns);
        if gaps.is_empty() {
            return Ok(EvaluationSummary { user_id: user_id.to_string(), skipped_reason: None, signals_collected: 0, nudges_scheduled: 0, dropped_as_duplicate: 0 });
        }

        let triaged = self.triage.run(&gaps).await;

        let mut scheduled = 0;
        let mut duplicates = 0;
        for item in triaged {
            if item.action != TriageAction::Nudge {
                continue;
            }
            let Some(message) = item.message else { continue };
            let Some(gap) = gaps.get(item.index) else { continue };

            let is_dup = self.queue.has_similar_or_same_source(user_id, &message, gap.source_id.as_deref())?;
            if is_dup {
                duplicates += 1;
                continue;
            }

            let trigger_at = respect_quiet_hours(now, self.config.quiet_hours.as_ref());
            self.queue.enqueue(NewScheduledItem {
                user_id: user_id.to_string(),
                message,
                trigger_at,
                source: ScheduledItemSource::Proactive,
                kind: ScheduledItemKind::Nudge,
                item_type: gap.signal_type.clone(),
                session_id: None,
                context: Some(json!({ "severity": item.urgency.unwrap_or(gap.severity) })),
                recurring: None,
                source_memory_id: gap.source_id.clone(),
            })?;
            scheduled += 1;
        }

        Ok(EvaluationSummary {
            user_id: user_id.to_string(),
            skipped_reason: None,
            signals_collected: gaps.len(),
            nudges_scheduled: scheduled,
            dropped_as_duplicate: duplicates,
        })
    }

    fn collect_signals(&self, user_id: &str, now: DateTime<Utc>, patterns: &cortex_core::profile::BehavioralPatterns) -> Vec<GapSignal> {
        let mut gaps = Vec::new();
        gaps.extend(signals::goal_deadline_signals(self.goals.as_ref(), user_id, now, GOAL_DEADLINE_BAND_DAYS));
        gaps.extend(signals::stalled_board_signals(self.board.as_ref(), user_id));
        gaps.extend(signals::unresolved_summary_signals(&self.sessions, user_id, now));
        if let Some(thread) = signals::synthetic_unresolved_thread(&self.sessions, user_id, now) {
            gaps.push(thread);
        }
        gaps.extend(signals::behavioral_anomaly_signals(patterns));
        gaps
    }
}

/// If `now` falls inside the configured quiet window, push the trigger time
/// to the window's end (same day, or the next day if the window wraps past
/// midnight); otherwise fire immediately.
fn respect_quiet_hours(now: DateTime<Utc>, quiet: Option<&QuietHours>) -> DateTime<Utc> {
    let Some(quiet) = quiet else { return now };
    let hour = now.hour();
    let in_window = if quiet.start <= quiet.end {
        hour >= quiet.start && hour < quiet.end
    } else {
        hour >= quiet.start || hour < quiet.end
    };
    if !in_window {
        return now;
    }
    let end_today = now.date_naive().and_hms_opt(quiet.end % 24, 0, 0).unwrap().and_utc();
    if end_today > now {
        end_today
    } else {
        end_today + Duration::days(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn outside_quiet_window_fires_immediately() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 14, 0, 0).unwrap();
        let quiet = QuietHours { start: 22, end: 7 };
        assert_eq!(respect_quiet_hours(now, Some(&quiet)), now);
    }

    #[test]
    fn inside_wraparound_window_defers_to_window_end() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 23, 30, 0).unwrap();
        let quiet = QuietHours { start: 22, end: 7 };
        let deferred = respect_quiet_hours(now, Some(&quiet));
        assert_eq!(deferred.hour(), 7);
        assert!(deferred > now);
    }

    #[test]
    fn no_quiet_hours_configured_is_a_no_op() {
        let now = Utc::now();
        assert_eq!(respect_quiet_hours(now, None), now);
    }
}
