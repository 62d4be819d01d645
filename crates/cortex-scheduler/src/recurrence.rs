use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use tracing::warn;

use crate::types::RecurrenceRule;

/// Compute the next UTC fire time for `rule` starting *after* `from`.
///
/// Returns `None` when the rule is not yet supported (`Cron`) — in which
/// case the item fires once and is not rescheduled.
pub fn compute_next_trigger(rule: &RecurrenceRule, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match rule {
        RecurrenceRule::Interval { every_secs } => Some(from + Duration::seconds(*every_secs as i64)),

        RecurrenceRule::Daily { hour, minute } => {
            let candidate = Utc
                .with_ymd_and_hms(from.year(), from.month(), from.day(), *hour as u32, *minute as u32, 0)
                .single()?;
            if candidate > from {
                Some(candidate)
            } else {
                Some(candidate + Duration::days(1))
            }
        }

        RecurrenceRule::Weekly { day, hour, minute } => {
            let today_dow = from.weekday().num_days_from_monday() as i64;
            let target_dow = (*day as i64).clamp(0, 6);
            let days_ahead = target_dow - today_dow;

            let candidate_day = if days_ahead < 0 { from + Duration::days(7 + days_ahead) } else { from + Duration::days(days_ahead) };

            let candidate = Utc
                .with_ymd_and_hms(candidate_day.year(), candidate_day.month(), candidate_day.day(), *hour as u32, *minute as u32, 0)
                .single()?;

            if candidate > from {
                Some(candidate)
            } else {
                let push = if days_ahead <= 0 { 7 } else { 7 - days_ahead };
                Some(candidate + Duration::days(push))
            }
        }

        RecurrenceRule::Cron { .. } => {
            warn!("cron recurrence is not yet supported; item will not be rescheduled");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_advances_by_fixed_seconds() {
        let from = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let next = compute_next_trigger(&RecurrenceRule::Interval { every_secs: 3600 }, from).unwrap();
        assert_eq!(next, from + Duration::hours(1));
    }

    #[test]
    fn daily_rolls_to_tomorrow_once_todays_window_passed() {
        let from = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let next = compute_next_trigger(&RecurrenceRule::Daily { hour: 9, minute: 0 }, from).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 2, 9, 0, 0).unwrap());
    }

    #[test]
    fn cron_recurrence_returns_none() {
        let from = Utc::now();
        assert!(compute_next_trigger(&RecurrenceRule::Cron { expression: "*/5 * * * *".to_string() }, from).is_none());
    }
}
