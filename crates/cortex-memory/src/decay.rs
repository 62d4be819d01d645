use chrono::{DateTime, Utc};

use crate::types::MemoryType;

/// Decay time constant per memory type, in days. `static_profile` never
/// decays (spec.md §4.5.4: τ = ∞).
fn tau_days(memory_type: MemoryType) -> Option<f64> {
    match memory_type {
        MemoryType::StaticProfile => None,
        MemoryType::Regular => Some(30.0),
        MemoryType::Derived => Some(60.0),
        MemoryType::Superseded | MemoryType::Archived => Some(30.0),
    }
}

/// Access-count boost saturates so repeated accesses can't push prominence
/// past a bounded ceiling. Simple diminishing-returns curve: `1 - 1/(1+n)`.
fn access_boost(access_count: u32) -> f64 {
    let n = access_count as f64;
    n / (1.0 + n)
}

/// `prominence = base * exp(-Δt/τ) * (1 + boost(accessCount))`, clamped to
/// `[0.0, 1.0]`. `base` is the prominence recorded at the last access (or
/// creation); `Δt` is elapsed time since then.
pub fn decayed_prominence(
    base: f64,
    memory_type: MemoryType,
    reference_time: DateTime<Utc>,
    now: DateTime<Utc>,
    access_count: u32,
) -> f64 {
    let Some(tau) = tau_days(memory_type) else {
        return 1.0;
    };
    let delta_days = (now - reference_time).num_seconds() as f64 / 86_400.0;
    let delta_days = delta_days.max(0.0);
    let decayed = base * (-delta_days / tau).exp() * (1.0 + access_boost(access_count));
    decayed.clamp(0.0, 1.0)
}

/// A memory is eligible for archival once its prominence has decayed below
/// the floor and it has aged past the minimum archival window, preventing a
/// momentary dip right after creation from archiving a brand-new memory.
pub fn is_archivable(prominence: f64, created_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    const PROMINENCE_FLOOR: f64 = 0.01;
    const MIN_AGE_DAYS: i64 = 14;
    prominence < PROMINENCE_FLOOR && (now - created_at).num_days() > MIN_AGE_DAYS
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn static_profile_never_decays() {
        let now = Utc::now();
        let p = decayed_prominence(1.0, MemoryType::StaticProfile, now - Duration::days(365), now, 0);
        assert_eq!(p, 1.0);
    }

    #[test]
    fn decay_is_monotone_over_time() {
        let created = Utc::now() - Duration::days(40);
        let at_10 = decayed_prominence(1.0, MemoryType::Regular, created, created + Duration::days(10), 0);
        let at_20 = decayed_prominence(1.0, MemoryType::Regular, created, created + Duration::days(20), 0);
        assert!(at_20 <= at_10);
    }

    #[test]
    fn recent_access_boosts_prominence() {
        let created = Utc::now() - Duration::days(10);
        let now = created + Duration::days(10);
        let unaccessed = decayed_prominence(1.0, MemoryType::Regular, created, now, 0);
        let accessed = decayed_prominence(1.0, MemoryType::Regular, created, now, 20);
        assert!(accessed > unaccessed);
    }

    #[test]
    fn archivable_requires_low_prominence_and_age() {
        let now = Utc::now();
        assert!(!is_archivable(0.005, now - Duration::days(5), now));
        assert!(is_archivable(0.005, now - Duration::days(20), now));
        assert!(!is_archivable(0.5, now - Duration::days(20), now));
    }
}
