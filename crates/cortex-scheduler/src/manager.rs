use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;
use uuid::Uuid;

use crate::db::init_db;
use crate::error::{Result, SchedulerError};
use crate::recurrence::compute_next_trigger;
use crate::types::{NewScheduledItem, RecurrenceRule, ScheduledItem, ScheduledItemKind, ScheduledItemSource, ScheduledItemStatus};

/// Similarity threshold above which two messages are considered duplicates
/// for `has_similar_pending` (normalized Levenshtein similarity, 1.0 = identical).
pub const SIMILARITY_THRESHOLD: f64 = 0.85;

/// Default window after a `fired` item's delivery is considered lost and the
/// item transitions to `expired`.
pub const DEFAULT_SEND_WINDOW: Duration = Duration::hours(6);

/// Durable min-heap (by `trigger_at`) over scheduled items, backed by a
/// single-writer SQLite table. Reads go through the same connection — unlike
/// the memory/session stores this queue has no high-volume read path of its
/// own, so a dedicated read connection buys nothing.
pub struct ScheduledItemQueue {
    conn: Mutex<Connection>,
}

impl ScheduledItemQueue {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        init_db(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_db(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn enqueue(&self, item: NewScheduledItem) -> Result<ScheduledItem> {
        let conn = self.conn.lock().unwrap();
        let id = Uuid::new_v4().to_string();
        let created_at = Utc::now();

        let context_json = item.context.as_ref().map(serde_json::to_string).transpose()?;
        let recurring_json = item.recurring.as_ref().map(serde_json::to_string).transpose()?;

        conn.execute(
            "INSERT INTO scheduled_items
             (id, user_id, message, trigger_at, source, kind, item_type, status,
              session_id, context, recurring, source_memory_id, created_at, fired_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,'pending',?8,?9,?10,?11,?12,NULL)",
            params![
                id,
                item.user_id,
                item.message,
                item.trigger_at.to_rfc3339(),
                item.source.to_string(),
                item.kind.to_string(),
                item.item_type,
                item.session_id,
                context_json,
                recurring_json,
                item.source_memory_id,
                created_at.to_rfc3339(),
            ],
        )?;

        info!(item_id = %id, user_id = %item.user_id, kind = %item.kind, "scheduled item enqueued");

        Ok(ScheduledItem {
            id,
            user_id: item.user_id,
            message: item.message,
            trigger_at: item.trigger_at,
            source: item.source,
            kind: item.kind,
            item_type: item.item_type,
            status: ScheduledItemStatus::Pending,
            session_id: item.session_id,
            context: item.context,
            recurring: item.recurring,
            source_memory_id: item.source_memory_id,
            created_at,
            fired_at: None,
        })
    }

    /// Claims every pending item whose `trigger_at` is at or before
    /// `now_upper_bound`, transitioning each to `fired` with a per-row
    /// compare-and-swap so two concurrent pollers can never both claim the
    /// same item.
    pub fn due_items(&self, now_upper_bound: DateTime<Utc>) -> Result<Vec<ScheduledItem>> {
        let candidate_ids: Vec<String> = {
            let conn = self.conn.lock().unwrap();
            let mut stmt = conn.prepare(
                "SELECT id FROM scheduled_items
                 WHERE status = 'pending' AND trigger_at <= ?1
                 ORDER BY trigger_at",
            )?;
            let ids: Vec<String> = stmt.query_map([now_upper_bound.to_rfc3339()], |row| row.get::<_, String>(0))?
                .filter_map(|r| r.ok())
                .collect();
            ids
        };

        let mut claimed = Vec::with_capacity(candidate_ids.len());
        for id in candidate_ids {
            if let Some(item) = self.try_claim(&id)? {
                claimed.push(item);
            }
        }
        Ok(claimed)
    }

    /// Claims a single item by id, returning `Ok(None)` if it was already
    /// claimed by another poller (or no longer pending) between the caller
    /// observing it and this call.
    pub fn try_claim(&self, id: &str) -> Result<Option<ScheduledItem>> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        let affected = conn.execute(
            "UPDATE scheduled_items SET status = 'fired', fired_at = ?1
             WHERE id = ?2 AND status = 'pending'",
            params![now, id],
        )?;
        if affected == 0 {
            return Ok(None);
        }
        Ok(Some(fetch_by_id(&conn, id)?))
    }

    /// Explicit claim used outside the poller tick (e.g. a channel adapter
    /// firing a reminder immediately on user request). Errors if the item
    /// does not exist or is no longer pending.
    pub fn mark_fired(&self, id: &str) -> Result<ScheduledItem> {
        self.try_claim(id)?.ok_or_else(|| SchedulerError::ItemNotFound { id: id.to_string() })
    }

    pub fn mark_acted(&self, id: &str) -> Result<()> {
        self.set_status(id, ScheduledItemStatus::Acted)
    }

    pub fn mark_dismissed(&self, id: &str) -> Result<()> {
        self.set_status(id, ScheduledItemStatus::Dismissed)
    }

    fn set_status(&self, id: &str, status: ScheduledItemStatus) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute("UPDATE scheduled_items SET status = ?1 WHERE id = ?2", params![status.to_string(), id])?;
        if n == 0 {
            return Err(SchedulerError::ItemNotFound { id: id.to_string() });
        }
        Ok(())
    }

    /// If `item` carries a recurrence rule, enqueues the next occurrence.
    /// Call after firing; a `Cron` rule or an exhausted `Daily`/`Weekly`
    /// computation yields `Ok(None)` and the item is not rescheduled.
    pub fn requeue_recurring(&self, item: &ScheduledItem) -> Result<Option<ScheduledItem>> {
        let Some(rule) = &item.recurring else { return Ok(None) };
        let Some(next_trigger) = compute_next_trigger(rule, item.trigger_at) else { return Ok(None) };

        let next = self.enqueue(NewScheduledItem {
            user_id: item.user_id.clone(),
            message: item.message.clone(),
            trigger_at: next_trigger,
            source: item.source,
            kind: item.kind,
            item_type: item.item_type.clone(),
            session_id: item.session_id.clone(),
            context: item.context.clone(),
            recurring: Some(rule.clone()),
            source_memory_id: item.source_memory_id.clone(),
        })?;
        Ok(Some(next))
    }

    /// True if `user_id` already has a pending item whose message is a near
    /// duplicate of `message` (normalized Levenshtein similarity above
    /// [`SIMILARITY_THRESHOLD`]), used by the proactive evaluator's dedup step.
    pub fn has_similar_pending(&self, user_id: &str, message: &str) -> Result<bool> {
        for item in self.list_pending_for_user(user_id)? {
            if strsim::normalized_levenshtein(&item.message, message) >= SIMILARITY_THRESHOLD {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// As [`has_similar_pending`] but also matches on `sourceMemoryId`,
    /// catching the case where the same underlying fact produced two
    /// differently-worded nudges.
    pub fn has_similar_or_same_source(&self, user_id: &str, message: &str, source_memory_id: Option<&str>) -> Result<bool> {
        for item in self.list_pending_for_user(user_id)? {
            if strsim::normalized_levenshtein(&item.message, message) >= SIMILARITY_THRESHOLD {
                return Ok(true);
            }
            if let (Some(a), Some(b)) = (source_memory_id, item.source_memory_id.as_deref()) {
                if a == b {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    pub fn list_pending_for_user(&self, user_id: &str) -> Result<Vec<ScheduledItem>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id FROM scheduled_items WHERE user_id = ?1 AND status = 'pending' ORDER BY trigger_at",
        )?;
        let ids: Vec<String> = stmt.query_map([user_id], |row| row.get::<_, String>(0))?.filter_map(|r| r.ok()).collect();
        ids.into_iter().map(|id| fetch_by_id(&conn, &id)).collect()
    }

    /// Nulls out `session_id` on items referencing a session that no longer
    /// exists, so a later dispatch does not try to deliver into a dead
    /// session. `existing_session_ids` is supplied by the caller (the
    /// session store) rather than queried directly — the queue has no
    /// dependency on `cortex-sessions`.
    pub fn clean_stale_session_refs(&self, existing_session_ids: &HashSet<String>) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let referenced: Vec<(String, Option<String>)> = {
            let mut stmt = conn.prepare("SELECT id, session_id FROM scheduled_items WHERE session_id IS NOT NULL")?;
            let rows: Vec<(String, Option<String>)> = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?)))?
                .filter_map(|r| r.ok())
                .collect();
            rows
        };

        let mut cleared = 0;
        for (id, session_id) in referenced {
            if let Some(sid) = session_id {
                if !existing_session_ids.contains(&sid) {
                    conn.execute("UPDATE scheduled_items SET session_id = NULL WHERE id = ?1", [&id])?;
                    cleared += 1;
                }
            }
        }
        Ok(cleared)
    }

    /// Transitions `fired` items whose `fired_at` is older than `send_window`
    /// to `expired` — the delivery channel never acknowledged them in time.
    pub fn expire_overdue(&self, now: DateTime<Utc>, send_window: Duration) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let cutoff = (now - send_window).to_rfc3339();
        let n = conn.execute(
            "UPDATE scheduled_items SET status = 'expired'
             WHERE status = 'fired' AND fired_at IS NOT NULL AND fired_at < ?1",
            [&cutoff],
        )?;
        Ok(n)
    }

    pub fn get(&self, id: &str) -> Result<ScheduledItem> {
        let conn = self.conn.lock().unwrap();
        fetch_by_id(&conn, id)
    }

    /// Count of `source = proactive` items fired (or further along) to
    /// `user_id` at or after `since`. The proactive evaluator's pre-filter
    /// checks this against the per-dial daily cap (spec.md §4.10 step 1).
    pub fn count_proactive_fired_since(&self, user_id: &str, since: DateTime<Utc>) -> Result<u32> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM scheduled_items
             WHERE user_id = ?1 AND source = 'proactive' AND fired_at IS NOT NULL AND fired_at >= ?2",
            params![user_id, since.to_rfc3339()],
            |row| row.get(0),
        )?;
        Ok(count as u32)
    }
}

fn fetch_by_id(conn: &Connection, id: &str) -> Result<ScheduledItem> {
    let row: Option<ScheduledItemRow> = conn
        .query_row(
            "SELECT id, user_id, message, trigger_at, source, kind, item_type, status,
                    session_id, context, recurring, source_memory_id, created_at, fired_at
             FROM scheduled_items WHERE id = ?1",
            [id],
            |row| {
                Ok(ScheduledItemRow {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    message: row.get(2)?,
                    trigger_at: row.get(3)?,
                    source: row.get(4)?,
                    kind: row.get(5)?,
                    item_type: row.get(6)?,
                    status: row.get(7)?,
                    session_id: row.get(8)?,
                    context: row.get(9)?,
                    recurring: row.get(10)?,
                    source_memory_id: row.get(11)?,
                    created_at: row.get(12)?,
                    fired_at: row.get(13)?,
                })
            },
        )
        .optional()?;

    row.ok_or_else(|| SchedulerError::ItemNotFound { id: id.to_string() })?.into_item()
}

struct ScheduledItemRow {
    id: String,
    user_id: String,
    message: String,
    trigger_at: String,
    source: String,
    kind: String,
    item_type: String,
    status: String,
    session_id: Option<String>,
    context: Option<String>,
    recurring: Option<String>,
    source_memory_id: Option<String>,
    created_at: String,
    fired_at: Option<String>,
}

impl ScheduledItemRow {
    fn into_item(self) -> Result<ScheduledItem> {
        Ok(ScheduledItem {
            id: self.id,
            user_id: self.user_id,
            message: self.message,
            trigger_at: parse_ts(&self.trigger_at)?,
            source: self.source.parse().map_err(SchedulerError::InvalidPayload)?,
            kind: self.kind.parse().map_err(SchedulerError::InvalidPayload)?,
            item_type: self.item_type,
            status: self.status.parse().map_err(SchedulerError::InvalidPayload)?,
            session_id: self.session_id,
            context: self.context.as_deref().map(serde_json::from_str).transpose()?,
            recurring: self.recurring.as_deref().map(serde_json::from_str::<RecurrenceRule>).transpose()?,
            source_memory_id: self.source_memory_id,
            created_at: parse_ts(&self.created_at)?,
            fired_at: self.fired_at.as_deref().map(parse_ts).transpose()?,
        })
    }
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SchedulerError::InvalidPayload(format!("bad timestamp '{s}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(user_id: &str, message: &str, trigger_at: DateTime<Utc>) -> NewScheduledItem {
        NewScheduledItem {
            user_id: user_id.to_string(),
            message: message.to_string(),
            trigger_at,
            source: ScheduledItemSource::Proactive,
            kind: ScheduledItemKind::Nudge,
            item_type: "unresolved_thread".to_string(),
            session_id: None,
            context: None,
            recurring: None,
            source_memory_id: None,
        }
    }

    #[test]
    fn enqueue_and_claim_due_item() {
        let queue = ScheduledItemQueue::open_in_memory().unwrap();
        let past = Utc::now() - Duration::minutes(1);
        let item = queue.enqueue(sample("u1", "check in on the board", past)).unwrap();
        assert_eq!(item.status, ScheduledItemStatus::Pending);

        let due = queue.due_items(Utc::now()).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, item.id);
        assert_eq!(due[0].status, ScheduledItemStatus::Fired);

        // Second poll finds nothing left to claim.
        assert!(queue.due_items(Utc::now()).unwrap().is_empty());
    }

    #[test]
    fn concurrent_claim_only_succeeds_once() {
        let queue = ScheduledItemQueue::open_in_memory().unwrap();
        let item = queue.enqueue(sample("u1", "ping", Utc::now() - Duration::seconds(1))).unwrap();

        let first = queue.try_claim(&item.id).unwrap();
        let second = queue.try_claim(&item.id).unwrap();
        assert!(first.is_some());
        assert!(second.is_none());
    }

    #[test]
    fn has_similar_pending_matches_near_duplicate_message() {
        let queue = ScheduledItemQueue::open_in_memory().unwrap();
        let future = Utc::now() + Duration::hours(1);
        queue.enqueue(sample("u1", "don't forget to review the proposal", future)).unwrap();

        assert!(queue.has_similar_pending("u1", "don't forget to review the proposal!").unwrap());
        assert!(!queue.has_similar_pending("u1", "what's the weather like today").unwrap());
        assert!(!queue.has_similar_pending("u2", "don't forget to review the proposal").unwrap());
    }

    #[test]
    fn recurring_item_requeues_after_firing() {
        let queue = ScheduledItemQueue::open_in_memory().unwrap();
        let past = Utc::now() - Duration::minutes(1);
        let mut new_item = sample("u1", "standup reminder", past);
        new_item.source = ScheduledItemSource::Cron;
        new_item.kind = ScheduledItemKind::Reminder;
        new_item.recurring = Some(RecurrenceRule::Interval { every_secs: 3600 });
        let item = queue.enqueue(new_item).unwrap();

        let fired = queue.mark_fired(&item.id).unwrap();
        let next = queue.requeue_recurring(&fired).unwrap().unwrap();
        assert_eq!(next.status, ScheduledItemStatus::Pending);
        assert_eq!(next.trigger_at, fired.trigger_at + Duration::hours(1));
    }

    #[test]
    fn expire_overdue_moves_stale_fired_items() {
        let queue = ScheduledItemQueue::open_in_memory().unwrap();
        let past = Utc::now() - Duration::hours(8);
        let item = queue.enqueue(sample("u1", "send the report", past)).unwrap();
        queue.mark_fired(&item.id).unwrap();

        let n = queue.expire_overdue(Utc::now(), DEFAULT_SEND_WINDOW).unwrap();
        assert_eq!(n, 1);
        assert_eq!(queue.get(&item.id).unwrap().status, ScheduledItemStatus::Expired);
    }

    #[test]
    fn count_proactive_fired_since_only_counts_fired_items_in_window() {
        let queue = ScheduledItemQueue::open_in_memory().unwrap();
        let past = Utc::now() - Duration::minutes(1);
        let fired = queue.enqueue(sample("u1", "nudge one", past)).unwrap();
        queue.mark_fired(&fired.id).unwrap();
        queue.enqueue(sample("u1", "nudge two, still pending", Utc::now() + Duration::hours(1))).unwrap();

        let count = queue.count_proactive_fired_since("u1", Utc::now() - Duration::hours(1)).unwrap();
        assert_eq!(count, 1);

        let count_far_back = queue.count_proactive_fired_since("u1", Utc::now() - Duration::seconds(5)).unwrap();
        assert_eq!(count_far_back, 0);
    }
}
