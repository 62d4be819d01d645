//! Per-user behavioral patterns and the trust score / proactiveness dial
//! derived from them. Lives in `cortex-core` rather than in the Gardener or
//! the Proactive Evaluator because both read and write it: the Gardener's
//! deep-tick steps 5-6 recompute and update it, the Proactive Evaluator's
//! pre-filter reads it, and the Gardener calls the Proactive Evaluator as
//! its own step 8 — putting this store in either of those crates would
//! create a dependency cycle.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Number of data points required before a cold-start-protected signal is
/// surfaced instead of reported as absent.
pub const MESSAGE_FREQUENCY_MIN_SAMPLES: u32 = 10;
pub const SESSION_ENGAGEMENT_MIN_SAMPLES: u32 = 3;
pub const TOPIC_SWITCH_MIN_SAMPLES: u32 = 5;

/// Asymmetric trust-score EMA step sizes: an accepted proactive item moves
/// the score up by `TRUST_ACCEPT_ALPHA`, a dismissed one moves it down by
/// the larger `TRUST_DISMISS_BETA` — dismissals are weighted harder than
/// acceptances so the dial backs off faster than it ramps up.
pub const TRUST_ACCEPT_ALPHA: f64 = 0.05;
pub const TRUST_DISMISS_BETA: f64 = 0.1;
pub const TRUST_SCORE_INITIAL: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProactivenessDial {
    Conservative,
    Moderate,
    Eager,
}

impl ProactivenessDial {
    /// Items per 24h window a user at this dial setting may receive,
    /// per spec.md §4.10 step 1 / §9 `DialBudgets`.
    pub fn daily_budget(&self) -> u32 {
        match self {
            ProactivenessDial::Conservative => 1,
            ProactivenessDial::Moderate => 3,
            ProactivenessDial::Eager => 6,
        }
    }

    /// Maps a trust score to a dial setting. Thresholds are this
    /// implementation's choice (spec.md leaves the mapping open) — chosen so
    /// the initial 0.5 score lands on `moderate`, the middle tier.
    pub fn from_trust_score(score: f64) -> Self {
        if score >= 0.7 {
            ProactivenessDial::Eager
        } else if score >= 0.35 {
            ProactivenessDial::Moderate
        } else {
            ProactivenessDial::Conservative
        }
    }
}

impl std::fmt::Display for ProactivenessDial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProactivenessDial::Conservative => "conservative",
            ProactivenessDial::Moderate => "moderate",
            ProactivenessDial::Eager => "eager",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ProactivenessDial {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "conservative" => Ok(Self::Conservative),
            "moderate" => Ok(Self::Moderate),
            "eager" => Ok(Self::Eager),
            other => Err(format!("unknown proactiveness dial: {other}")),
        }
    }
}

/// Per-user smoothed behavioral signals. Each `Option` field is `None` until
/// its cold-start sample threshold is met.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehavioralPatterns {
    pub user_id: String,
    pub message_frequency: Option<f64>,
    pub session_engagement: Option<f64>,
    pub topic_switch: Option<f64>,
    pub response_length: Option<f64>,
    pub smoothed_affect: Option<f64>,
    pub active_hours: Vec<u8>,
    pub trust_score: f64,
    pub proactiveness_dial: ProactivenessDial,
    pub message_sample_count: u32,
    pub session_sample_count: u32,
    pub embedded_sample_count: u32,
    pub last_proactive_fired_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl BehavioralPatterns {
    fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            message_frequency: None,
            session_engagement: None,
            topic_switch: None,
            response_length: None,
            smoothed_affect: None,
            active_hours: Vec::new(),
            trust_score: TRUST_SCORE_INITIAL,
            proactiveness_dial: ProactivenessDial::from_trust_score(TRUST_SCORE_INITIAL),
            message_sample_count: 0,
            session_sample_count: 0,
            embedded_sample_count: 0,
            last_proactive_fired_at: None,
            updated_at: Utc::now(),
        }
    }

    /// True if `smoothedAffect` indicates distress, per spec.md's proactive
    /// pre-filter ("smoothed affect indicates user distress"). Modeled as a
    /// threshold on the signed affect scale (negative = distressed).
    pub fn is_distressed(&self) -> bool {
        self.smoothed_affect.is_some_and(|a| a < -0.5)
    }
}

/// Single-writer SQLite-backed store for [`BehavioralPatterns`].
pub struct ProfileStore {
    conn: Mutex<Connection>,
}

impl ProfileStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn init(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS behavioral_patterns (
                user_id                 TEXT NOT NULL PRIMARY KEY,
                message_frequency       REAL,
                session_engagement      REAL,
                topic_switch            REAL,
                response_length         REAL,
                smoothed_affect         REAL,
                active_hours            TEXT NOT NULL DEFAULT '[]',
                trust_score             REAL NOT NULL,
                proactiveness_dial      TEXT NOT NULL,
                message_sample_count    INTEGER NOT NULL DEFAULT 0,
                session_sample_count    INTEGER NOT NULL DEFAULT 0,
                embedded_sample_count   INTEGER NOT NULL DEFAULT 0,
                last_proactive_fired_at TEXT,
                updated_at              TEXT NOT NULL
            ) STRICT;",
        )?;
        Ok(())
    }

    pub fn get_or_create(&self, user_id: &str) -> Result<BehavioralPatterns> {
        let conn = self.conn.lock().unwrap();
        if let Some(p) = fetch(&conn, user_id)? {
            return Ok(p);
        }
        let fresh = BehavioralPatterns::new(user_id);
        insert(&conn, &fresh)?;
        Ok(fresh)
    }

    /// Persists a full snapshot, e.g. after the Gardener recomputes smoothed
    /// signals or after a trust-score update.
    pub fn save(&self, patterns: &BehavioralPatterns) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        insert(&conn, patterns)
    }

    pub fn all_user_ids(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT user_id FROM behavioral_patterns")?;
        let ids: Vec<String> = stmt.query_map([], |row| row.get::<_, String>(0))?.filter_map(|r| r.ok()).collect();
        Ok(ids)
    }

    /// Applies the asymmetric trust-score EMA rule (spec.md §4.9 step 6) and
    /// re-derives the dial, returning the updated record.
    pub fn record_proactive_feedback(&self, user_id: &str, accepted: bool, now: DateTime<Utc>) -> Result<BehavioralPatterns> {
        let mut patterns = self.get_or_create(user_id)?;
        if accepted {
            patterns.trust_score = (patterns.trust_score + TRUST_ACCEPT_ALPHA).min(1.0);
        } else {
            patterns.trust_score = (patterns.trust_score - TRUST_DISMISS_BETA).max(0.0);
        }
        patterns.proactiveness_dial = ProactivenessDial::from_trust_score(patterns.trust_score);
        patterns.updated_at = now;
        self.save(&patterns)?;
        Ok(patterns)
    }

    pub fn record_proactive_fired(&self, user_id: &str, now: DateTime<Utc>) -> Result<()> {
        let mut patterns = self.get_or_create(user_id)?;
        patterns.last_proactive_fired_at = Some(now);
        patterns.updated_at = now;
        self.save(&patterns)
    }
}

fn insert(conn: &Connection, p: &BehavioralPatterns) -> Result<()> {
    let active_hours = serde_json::to_string(&p.active_hours)?;
    conn.execute(
        "INSERT INTO behavioral_patterns
         (user_id, message_frequency, session_engagement, topic_switch, response_length,
          smoothed_affect, active_hours, trust_score, proactiveness_dial,
          message_sample_count, session_sample_count, embedded_sample_count,
          last_proactive_fired_at, updated_at)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)
         ON CONFLICT(user_id) DO UPDATE SET
            message_frequency=excluded.message_frequency,
            session_engagement=excluded.session_engagement,
            topic_switch=excluded.topic_switch,
            response_length=excluded.response_length,
            smoothed_affect=excluded.smoothed_affect,
            active_hours=excluded.active_hours,
            trust_score=excluded.trust_score,
            proactiveness_dial=excluded.proactiveness_dial,
            message_sample_count=excluded.message_sample_count,
            session_sample_count=excluded.session_sample_count,
            embedded_sample_count=excluded.embedded_sample_count,
            last_proactive_fired_at=excluded.last_proactive_fired_at,
            updated_at=excluded.updated_at",
        params![
            p.user_id,
            p.message_frequency,
            p.session_engagement,
            p.topic_switch,
            p.response_length,
            p.smoothed_affect,
            active_hours,
            p.trust_score,
            p.proactiveness_dial.to_string(),
            p.message_sample_count,
            p.session_sample_count,
            p.embedded_sample_count,
            p.last_proactive_fired_at.map(|t| t.to_rfc3339()),
            p.updated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn fetch(conn: &Connection, user_id: &str) -> Result<Option<BehavioralPatterns>> {
    let row = conn
        .query_row(
            "SELECT user_id, message_frequency, session_engagement, topic_switch, response_length,
                    smoothed_affect, active_hours, trust_score, proactiveness_dial,
                    message_sample_count, session_sample_count, embedded_sample_count,
                    last_proactive_fired_at, updated_at
             FROM behavioral_patterns WHERE user_id = ?1",
            [user_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<f64>>(1)?,
                    row.get::<_, Option<f64>>(2)?,
                    row.get::<_, Option<f64>>(3)?,
                    row.get::<_, Option<f64>>(4)?,
                    row.get::<_, Option<f64>>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, f64>(7)?,
                    row.get::<_, String>(8)?,
                    row.get::<_, u32>(9)?,
                    row.get::<_, u32>(10)?,
                    row.get::<_, u32>(11)?,
                    row.get::<_, Option<String>>(12)?,
                    row.get::<_, String>(13)?,
                ))
            },
        )
        .optional()?;

    let Some((
        user_id,
        message_frequency,
        session_engagement,
        topic_switch,
        response_length,
        smoothed_affect,
        active_hours_json,
        trust_score,
        dial_str,
        message_sample_count,
        session_sample_count,
        embedded_sample_count,
        last_proactive_fired_at,
        updated_at,
    )) = row
    else {
        return Ok(None);
    };

    Ok(Some(BehavioralPatterns {
        user_id,
        message_frequency,
        session_engagement,
        topic_switch,
        response_length,
        smoothed_affect,
        active_hours: serde_json::from_str(&active_hours_json).unwrap_or_default(),
        trust_score,
        proactiveness_dial: dial_str.parse().unwrap_or(ProactivenessDial::Moderate),
        message_sample_count,
        session_sample_count,
        embedded_sample_count,
        last_proactive_fired_at: last_proactive_fired_at
            .map(|s| DateTime::parse_from_rfc3339(&s).map(|dt| dt.with_timezone(&Utc)))
            .transpose()
            .unwrap_or(None),
        updated_at: DateTime::parse_from_rfc3339(&updated_at).map(|dt| dt.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now()),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_or_create_seeds_defaults() {
        let store = ProfileStore::open_in_memory().unwrap();
        let p = store.get_or_create("u1").unwrap();
        assert_eq!(p.trust_score, TRUST_SCORE_INITIAL);
        assert_eq!(p.proactiveness_dial, ProactivenessDial::Moderate);
        assert!(p.message_frequency.is_none());
    }

    #[test]
    fn trust_feedback_is_asymmetric() {
        let store = ProfileStore::open_in_memory().unwrap();
        store.get_or_create("u1").unwrap();
        let now = Utc::now();

        let accepted = store.record_proactive_feedback("u1", true, now).unwrap();
        assert!((accepted.trust_score - (TRUST_SCORE_INITIAL + TRUST_ACCEPT_ALPHA)).abs() < 1e-9);

        let dismissed = store.record_proactive_feedback("u1", false, now).unwrap();
        let expected = accepted.trust_score - TRUST_DISMISS_BETA;
        assert!((dismissed.trust_score - expected).abs() < 1e-9);
        assert!(TRUST_DISMISS_BETA > TRUST_ACCEPT_ALPHA);
    }

    #[test]
    fn distress_threshold_flags_negative_affect() {
        let mut p = BehavioralPatterns::new("u1");
        assert!(!p.is_distressed());
        p.smoothed_affect = Some(-0.8);
        assert!(p.is_distressed());
    }
}
