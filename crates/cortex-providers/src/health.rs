//! Provider health tracking — per-provider state machine with cooldown.
//!
//! Adapted from the rolling-window tracker pattern: health is still a
//! concurrent, lock-free `DashMap<String, _>` updated from many in-flight
//! requests, but the derived value is a deterministic cooldown clock rather
//! than a success-ratio window, since the router needs a hard skip/don't-skip
//! decision rather than a fuzzy ratio.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;

use crate::provider::ProviderError;

/// Consecutive failures within the tracking window before a provider trips to `down`.
const FAILURE_THRESHOLD: u32 = 3;
/// Base cooldown for the first trip.
const COOLDOWN_BASE: Duration = Duration::from_secs(3);
/// Cooldown never grows past this.
const COOLDOWN_CAP: Duration = Duration::from_secs(5 * 60);
/// Consecutive failures at/above this (but below `FAILURE_THRESHOLD`) read as degraded.
const DEGRADED_THRESHOLD: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Degraded,
    Down,
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Down => write!(f, "down"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderHealthEntry {
    pub name: String,
    pub state: HealthState,
    pub consecutive_failures: u32,
    #[serde(skip)]
    pub cooldown_until: Option<Instant>,
    pub last_error: Option<String>,
}

struct InternalEntry {
    consecutive_failures: u32,
    cooldown_until: Option<Instant>,
    last_error: Option<String>,
}

impl InternalEntry {
    fn new() -> Self {
        Self {
            consecutive_failures: 0,
            cooldown_until: None,
            last_error: None,
        }
    }

    fn state(&self) -> HealthState {
        if let Some(until) = self.cooldown_until {
            if Instant::now() < until {
                return HealthState::Down;
            }
        }
        if self.consecutive_failures >= DEGRADED_THRESHOLD {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        }
    }

    fn to_entry(&self, name: &str) -> ProviderHealthEntry {
        ProviderHealthEntry {
            name: name.to_string(),
            state: self.state(),
            consecutive_failures: self.consecutive_failures,
            cooldown_until: self.cooldown_until,
            last_error: self.last_error.clone(),
        }
    }
}

/// Concurrent health tracker for all providers in the pool.
pub struct HealthTracker {
    entries: DashMap<String, InternalEntry>,
}

impl HealthTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: DashMap::new(),
        })
    }

    /// One successful call restores `healthy` immediately, per spec.md §4.2.
    pub fn record_success(&self, provider: &str) {
        let mut entry = self.entries.entry(provider.to_string()).or_insert_with(InternalEntry::new);
        entry.consecutive_failures = 0;
        entry.cooldown_until = None;
        entry.last_error = None;
    }

    pub fn record_failure(&self, provider: &str, err: &ProviderError) {
        let mut entry = self.entries.entry(provider.to_string()).or_insert_with(InternalEntry::new);
        entry.consecutive_failures += 1;
        entry.last_error = Some(err.to_string());

        if entry.consecutive_failures >= FAILURE_THRESHOLD {
            let trips = entry.consecutive_failures - FAILURE_THRESHOLD;
            let backoff = COOLDOWN_BASE.saturating_mul(1u32 << trips.min(10));
            let cooldown = backoff.min(COOLDOWN_CAP);
            entry.cooldown_until = Some(Instant::now() + cooldown);
        }
    }

    /// Whether the router should skip this provider right now.
    pub fn is_down(&self, provider: &str) -> bool {
        self.entries
            .get(provider)
            .map(|e| e.state() == HealthState::Down)
            .unwrap_or(false)
    }

    pub fn entry(&self, provider: &str) -> ProviderHealthEntry {
        self.entries
            .get(provider)
            .map(|e| e.to_entry(provider))
            .unwrap_or_else(|| ProviderHealthEntry {
                name: provider.to_string(),
                state: HealthState::Healthy,
                consecutive_failures: 0,
                cooldown_until: None,
                last_error: None,
            })
    }

    pub fn all_entries(&self) -> Vec<ProviderHealthEntry> {
        self.entries.iter().map(|e| e.value().to_entry(e.key())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn healthy_until_threshold() {
        let tracker = HealthTracker::new();
        tracker.record_failure("p", &ProviderError::Unavailable("x".into()));
        tracker.record_failure("p", &ProviderError::Unavailable("x".into()));
        assert_eq!(tracker.entry("p").state, HealthState::Degraded);
        assert!(!tracker.is_down("p"));
    }

    #[test]
    fn trips_down_after_threshold_failures() {
        let tracker = HealthTracker::new();
        for _ in 0..FAILURE_THRESHOLD {
            tracker.record_failure("p", &ProviderError::Unavailable("x".into()));
        }
        assert!(tracker.is_down("p"));
    }

    #[test]
    fn success_restores_healthy() {
        let tracker = HealthTracker::new();
        for _ in 0..FAILURE_THRESHOLD {
            tracker.record_failure("p", &ProviderError::Unavailable("x".into()));
        }
        assert!(tracker.is_down("p"));
        // Cooldown hasn't expired yet, but a success clears it immediately —
        // a provider isn't forced to wait out a cooldown it has already recovered from.
        tracker.record_success("p");
        assert!(!tracker.is_down("p"));
        assert_eq!(tracker.entry("p").state, HealthState::Healthy);
    }

    #[test]
    fn unknown_provider_reads_healthy() {
        let tracker = HealthTracker::new();
        assert!(!tracker.is_down("never-seen"));
        assert_eq!(tracker.entry("never-seen").state, HealthState::Healthy);
    }
}
