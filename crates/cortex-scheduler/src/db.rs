use rusqlite::Connection;

use crate::error::Result;

/// Initialise the scheduled-item queue schema in `conn`.
///
/// The `(user_id, trigger_at, status)` index matches the persisted-layout
/// requirement for the poller's due-item scan and for `has_similar_pending`'s
/// per-user lookup.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;

        CREATE TABLE IF NOT EXISTS scheduled_items (
            id               TEXT    NOT NULL PRIMARY KEY,
            user_id          TEXT    NOT NULL,
            message          TEXT    NOT NULL,
            trigger_at       TEXT    NOT NULL,
            source           TEXT    NOT NULL,
            kind             TEXT    NOT NULL,
            item_type        TEXT    NOT NULL,
            status           TEXT    NOT NULL DEFAULT 'pending',
            session_id       TEXT,
            context          TEXT,
            recurring        TEXT,
            source_memory_id TEXT,
            created_at       TEXT    NOT NULL,
            fired_at         TEXT
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_scheduled_items_poll
            ON scheduled_items (status, trigger_at);

        CREATE INDEX IF NOT EXISTS idx_scheduled_items_user
            ON scheduled_items (user_id, trigger_at, status);
        ",
    )?;
    Ok(())
}
