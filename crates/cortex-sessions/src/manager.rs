use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::instrument;

use cortex_core::{Clock, SessionId};
use cortex_providers::ContentBlock;

use crate::db::init_db;
use crate::error::{Result, SessionError};
use crate::types::{MessagePage, MessageRole, Session, SessionMessage, SessionSummary};

/// Durable, append-only session log. Grounded on the teacher's
/// `SessionManager`'s single-`Mutex<Connection>` pattern — sessions are a
/// lighter-weight resource than the memory graph, so one writer connection
/// covers both reads and writes without a separate read path.
pub struct SessionStore {
    db: Mutex<Connection>,
    clock: Arc<dyn Clock>,
}

impl SessionStore {
    pub fn open(path: &str, clock: Arc<dyn Clock>) -> Result<Self> {
        let conn = Connection::open(path)?;
        init_db(&conn)?;
        Ok(Self { db: Mutex::new(conn), clock })
    }

    pub fn open_in_memory(clock: Arc<dyn Clock>) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_db(&conn)?;
        Ok(Self { db: Mutex::new(conn), clock })
    }

    #[instrument(skip(self))]
    pub fn create_session(&self, user_id: &str, channel_id: &str, id: Option<String>) -> Result<Session> {
        let id = id.unwrap_or_else(|| SessionId::new().to_string());
        let now = self.clock.now();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO sessions (id, user_id, channel_id, metadata, created_at, updated_at) \
             VALUES (?1, ?2, ?3, '{}', ?4, ?4)",
            params![id, user_id, channel_id, now.to_rfc3339()],
        )?;
        Ok(Session {
            id,
            user_id: user_id.to_string(),
            channel_id: channel_id.to_string(),
            created_at: now,
            updated_at: now,
            metadata: serde_json::json!({}),
        })
    }

    #[instrument(skip(self))]
    pub fn get_session(&self, id: &str) -> Result<Option<Session>> {
        let db = self.db.lock().unwrap();
        row_query_session(&db, id)
    }

    /// Finds a session whose id starts with the given prefix. Channel
    /// adapters pass a platform-qualified prefix (e.g. a short external
    /// reference) to resolve it back to a full session id.
    #[instrument(skip(self))]
    pub fn find_session_by_user_id(&self, prefixed_id: &str) -> Result<Option<Session>> {
        let db = self.db.lock().unwrap();
        let pattern = format!("{prefixed_id}%");
        let id: Option<String> = db
            .query_row("SELECT id FROM sessions WHERE id LIKE ?1 ORDER BY updated_at DESC LIMIT 1", params![pattern], |row| row.get(0))
            .optional()?;
        match id {
            Some(id) => row_query_session(&db, &id),
            None => Ok(None),
        }
    }

    /// Appends a message and bumps `updated_at` in the same transaction, so
    /// a session's freshness always reflects its last durable message.
    #[instrument(skip(self, content))]
    pub fn append_message(&self, session_id: &str, role: MessageRole, content: Vec<ContentBlock>) -> Result<SessionMessage> {
        let now = self.clock.now();
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;

        let exists: bool = tx.query_row("SELECT 1 FROM sessions WHERE id = ?1", params![session_id], |_| Ok(true)).optional()?.unwrap_or(false);
        if !exists {
            return Err(SessionError::NotFound(session_id.to_string()));
        }

        let content_json = serde_json::to_string(&content)?;
        tx.execute(
            "INSERT INTO session_messages (session_id, role, content, created_at) VALUES (?1,?2,?3,?4)",
            params![session_id, role.to_string(), content_json, now.to_rfc3339()],
        )?;
        let id = tx.last_insert_rowid();
        tx.execute("UPDATE sessions SET updated_at = ?2 WHERE id = ?1", params![session_id, now.to_rfc3339()])?;
        tx.commit()?;

        Ok(SessionMessage { id, session_id: session_id.to_string(), role, content, created_at: now })
    }

    #[instrument(skip(self))]
    pub fn get_session_messages_paginated(&self, session_id: &str, limit: usize, before: Option<i64>) -> Result<MessagePage> {
        let db = self.db.lock().unwrap();
        let mut stmt = match before {
            Some(_) => db.prepare(
                "SELECT id, session_id, role, content, created_at FROM session_messages \
                 WHERE session_id = ?1 AND id < ?2 ORDER BY id DESC LIMIT ?3",
            )?,
            None => db.prepare(
                "SELECT id, session_id, role, content, created_at FROM session_messages \
                 WHERE session_id = ?1 ORDER BY id DESC LIMIT ?2",
            )?,
        };

        let mut messages: Vec<SessionMessage> = match before {
            Some(cursor) => stmt
                .query_map(params![session_id, cursor, (limit + 1) as i64], row_to_message)?
                .collect::<rusqlite::Result<_>>()?,
            None => stmt
                .query_map(params![session_id, (limit + 1) as i64], row_to_message)?
                .collect::<rusqlite::Result<_>>()?,
        };

        let next_before = if messages.len() > limit {
            messages.truncate(limit);
            messages.last().map(|m| m.id)
        } else {
            None
        };
        messages.reverse();
        Ok(MessagePage { messages, next_before })
    }

    #[instrument(skip(self))]
    pub fn delete_session(&self, id: &str) -> Result<()> {
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;
        let rows = tx.execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
        if rows == 0 {
            return Err(SessionError::NotFound(id.to_string()));
        }
        tx.execute("DELETE FROM session_messages WHERE session_id = ?1", params![id])?;
        tx.execute("DELETE FROM session_summaries WHERE session_id = ?1", params![id])?;
        tx.commit()?;
        Ok(())
    }

    /// Writes a gardener-produced summary (spec.md §4.9 step 3). Only the
    /// gardener calls this; regular agent-loop traffic never writes summaries.
    pub fn put_summary(&self, session_id: &str, summary: &str) -> Result<()> {
        let now = self.clock.now();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO session_summaries (session_id, summary, created_at) VALUES (?1,?2,?3) \
             ON CONFLICT(session_id) DO UPDATE SET summary = excluded.summary, created_at = excluded.created_at",
            params![session_id, summary, now.to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn get_summary(&self, session_id: &str) -> Result<Option<SessionSummary>> {
        let db = self.db.lock().unwrap();
        db.query_row(
            "SELECT session_id, summary, created_at FROM session_summaries WHERE session_id = ?1",
            params![session_id],
            |row| {
                let created_at: String = row.get(2)?;
                Ok(SessionSummary {
                    session_id: row.get(0)?,
                    summary: row.get(1)?,
                    created_at: parse_rfc3339(&created_at),
                })
            },
        )
        .optional()
        .map_err(SessionError::from)
    }

    /// Sessions whose last update is older than `max_age_days`, used by the
    /// gardener's hard-prune step (spec.md §4.9 step 4c).
    pub fn stale_session_ids(&self, max_age_days: i64) -> Result<Vec<String>> {
        let cutoff = self.clock.now() - chrono::Duration::days(max_age_days);
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare("SELECT id FROM sessions WHERE updated_at < ?1")?;
        let ids = stmt.query_map(params![cutoff.to_rfc3339()], |row| row.get(0))?.collect::<rusqlite::Result<_>>()?;
        Ok(ids)
    }

    /// Sessions older than `min_age_days` with no row in `session_summaries`
    /// yet, used by the gardener's session-summarization step (spec.md
    /// §4.9 step 3).
    pub fn unsummarized_stale_session_ids(&self, min_age_days: i64) -> Result<Vec<String>> {
        let cutoff = self.clock.now() - chrono::Duration::days(min_age_days);
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT s.id FROM sessions s \
             LEFT JOIN session_summaries sm ON sm.session_id = s.id \
             WHERE s.updated_at < ?1 AND sm.session_id IS NULL",
        )?;
        let ids = stmt.query_map(params![cutoff.to_rfc3339()], |row| row.get(0))?.collect::<rusqlite::Result<_>>()?;
        Ok(ids)
    }

    /// Sessions whose most recent message is from the user and has sat
    /// unanswered for longer than `timeout_minutes` — the agent loop died
    /// or was killed mid-turn without appending a reply. Used by the
    /// gardener's light tick (spec.md §4.9 light tick: "times out stuck
    /// sessions").
    pub fn stuck_session_ids(&self, timeout_minutes: i64) -> Result<Vec<String>> {
        let cutoff = self.clock.now() - chrono::Duration::minutes(timeout_minutes);
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT s.id FROM sessions s \
             JOIN session_messages m ON m.id = ( \
                 SELECT id FROM session_messages WHERE session_id = s.id ORDER BY id DESC LIMIT 1 \
             ) \
             WHERE m.role = 'user' AND m.created_at < ?1",
        )?;
        let ids = stmt.query_map(params![cutoff.to_rfc3339()], |row| row.get(0))?.collect::<rusqlite::Result<_>>()?;
        Ok(ids)
    }

    /// Distinct user ids with at least one session, used by the gardener to
    /// drive per-user steps (behavioral inference, proactive evaluation)
    /// without a separate user registry.
    pub fn all_user_ids(&self) -> Result<Vec<String>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare("SELECT DISTINCT user_id FROM sessions")?;
        let ids = stmt.query_map([], |row| row.get(0))?.collect::<rusqlite::Result<_>>()?;
        Ok(ids)
    }

    /// Sessions for `user_id` updated at or after `since`, most recent
    /// first. Used by behavioral inference and the proactive evaluator's
    /// recent-session signal, neither of which needs the full history.
    pub fn sessions_for_user_since(&self, user_id: &str, since: DateTime<Utc>) -> Result<Vec<Session>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, user_id, channel_id, metadata, created_at, updated_at FROM sessions \
             WHERE user_id = ?1 AND updated_at >= ?2 ORDER BY updated_at DESC",
        )?;
        let sessions = stmt.query_map(params![user_id, since.to_rfc3339()], row_to_session)?.collect::<rusqlite::Result<_>>()?;
        Ok(sessions)
    }
}

fn row_query_session(conn: &Connection, id: &str) -> Result<Option<Session>> {
    conn.query_row(
        "SELECT id, user_id, channel_id, metadata, created_at, updated_at FROM sessions WHERE id = ?1",
        params![id],
        row_to_session,
    )
    .optional()
    .map_err(SessionError::from)
}

fn row_to_session(row: &rusqlite::Row) -> rusqlite::Result<Session> {
    let metadata_str: String = row.get(3)?;
    let created_at: String = row.get(4)?;
    let updated_at: String = row.get(5)?;
    Ok(Session {
        id: row.get(0)?,
        user_id: row.get(1)?,
        channel_id: row.get(2)?,
        metadata: serde_json::from_str(&metadata_str).unwrap_or(serde_json::json!({})),
        created_at: parse_rfc3339(&created_at),
        updated_at: parse_rfc3339(&updated_at),
    })
}

fn row_to_message(row: &rusqlite::Row) -> rusqlite::Result<SessionMessage> {
    let role_str: String = row.get(2)?;
    let content_str: String = row.get(3)?;
    let created_at: String = row.get(4)?;
    Ok(SessionMessage {
        id: row.get(0)?,
        session_id: row.get(1)?,
        role: role_str.parse().unwrap_or(MessageRole::User),
        content: serde_json::from_str(&content_str).unwrap_or_default(),
        created_at: parse_rfc3339(&created_at),
    })
}

fn parse_rfc3339(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map(|d| d.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_core::clock::FakeClock;

    fn store() -> SessionStore {
        SessionStore::open_in_memory(FakeClock::new(Utc::now())).unwrap()
    }

    #[test]
    fn create_then_get_round_trips() {
        let store = store();
        let session = store.create_session("u1", "telegram:1", None).unwrap();
        let fetched = store.get_session(&session.id).unwrap().unwrap();
        assert_eq!(fetched.user_id, "u1");
    }

    #[test]
    fn append_message_updates_session_timestamp() {
        let clock = FakeClock::new(Utc::now());
        let store = SessionStore::open_in_memory(clock.clone()).unwrap();
        let session = store.create_session("u1", "telegram:1", None).unwrap();
        clock.advance(chrono::Duration::seconds(5));
        store.append_message(&session.id, MessageRole::User, vec![ContentBlock::Text { text: "hi".into() }]).unwrap();
        let updated = store.get_session(&session.id).unwrap().unwrap();
        assert!(updated.updated_at > session.created_at);
    }

    #[test]
    fn pagination_returns_oldest_first_within_page() {
        let store = store();
        let session = store.create_session("u1", "telegram:1", None).unwrap();
        for i in 0..5 {
            store.append_message(&session.id, MessageRole::User, vec![ContentBlock::Text { text: format!("msg{i}") }]).unwrap();
        }
        let page = store.get_session_messages_paginated(&session.id, 2, None).unwrap();
        assert_eq!(page.messages.len(), 2);
        assert_eq!(page.messages[0].content[0], ContentBlock::Text { text: "msg3".into() });
        assert!(page.next_before.is_some());
    }

    #[test]
    fn delete_removes_messages_too() {
        let store = store();
        let session = store.create_session("u1", "telegram:1", None).unwrap();
        store.append_message(&session.id, MessageRole::User, vec![ContentBlock::Text { text: "hi".into() }]).unwrap();
        store.delete_session(&session.id).unwrap();
        assert!(store.get_session(&session.id).unwrap().is_none());
    }

    #[test]
    fn stuck_session_detected_only_when_last_message_is_unanswered_user_turn() {
        let clock = FakeClock::new(Utc::now());
        let store = SessionStore::open_in_memory(clock.clone()).unwrap();
        let stuck = store.create_session("u1", "telegram:1", None).unwrap();
        store.append_message(&stuck.id, MessageRole::User, vec![ContentBlock::Text { text: "hi".into() }]).unwrap();

        let answered = store.create_session("u1", "telegram:1", None).unwrap();
        store.append_message(&answered.id, MessageRole::User, vec![ContentBlock::Text { text: "hi".into() }]).unwrap();
        store.append_message(&answered.id, MessageRole::Assistant, vec![ContentBlock::Text { text: "hello".into() }]).unwrap();

        clock.advance(chrono::Duration::minutes(15));

        let timed_out = store.stuck_session_ids(10).unwrap();
        assert!(timed_out.contains(&stuck.id));
        assert!(!timed_out.contains(&answered.id));
    }

    #[test]
    fn unsummarized_stale_excludes_sessions_with_a_summary() {
        let clock = FakeClock::new(Utc::now());
        let store = SessionStore::open_in_memory(clock.clone()).unwrap();
        let old = store.create_session("u1", "telegram:1", None).unwrap();
        let summarized = store.create_session("u1", "telegram:1", None).unwrap();
        store.put_summary(&summarized.id, "already summarized").unwrap();
        clock.advance(chrono::Duration::days(2));
        let fresh = store.create_session("u1", "telegram:1", None).unwrap();

        let stale = store.unsummarized_stale_session_ids(1).unwrap();
        assert!(stale.contains(&old.id));
        assert!(!stale.contains(&summarized.id));
        assert!(!stale.contains(&fresh.id));
    }

    #[test]
    fn all_user_ids_and_since_filter() {
        let clock = FakeClock::new(Utc::now());
        let store = SessionStore::open_in_memory(clock.clone()).unwrap();
        store.create_session("u1", "telegram:1", None).unwrap();
        clock.advance(chrono::Duration::hours(1));
        let s2 = store.create_session("u2", "telegram:2", None).unwrap();

        let users = store.all_user_ids().unwrap();
        assert_eq!(users.len(), 2);

        let recent = store.sessions_for_user_since("u2", clock.now() - chrono::Duration::minutes(5)).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id, s2.id);
    }
}
