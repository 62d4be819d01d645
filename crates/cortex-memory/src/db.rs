use rusqlite::Connection;

use crate::error::Result;

/// Initialise memory tables. Safe to call on every startup (idempotent).
/// Adapted from the teacher's `user_memory`/`user_memory_fts` pair,
/// generalized into a content-addressed graph with a `relations` table and
/// an embedding column.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    create_memories_table(conn)?;
    create_fts_index(conn)?;
    create_relations_table(conn)?;
    Ok(())
}

fn create_memories_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS memories (
            id              TEXT PRIMARY KEY,
            user_id         TEXT NOT NULL,
            content         TEXT NOT NULL,
            category        TEXT NOT NULL,
            memory_type     TEXT NOT NULL DEFAULT 'regular',
            importance      INTEGER NOT NULL DEFAULT 5,
            confidence      REAL NOT NULL DEFAULT 0.8,
            prominence      REAL NOT NULL DEFAULT 1.0,
            is_latest       INTEGER NOT NULL DEFAULT 1,
            source          TEXT NOT NULL DEFAULT 'user_said',
            document_date   TEXT NOT NULL,
            event_date      TEXT,
            last_accessed   TEXT,
            access_count    INTEGER NOT NULL DEFAULT 0,
            embedding       BLOB,
            source_chunk    TEXT,
            learned_from    TEXT NOT NULL DEFAULT '',
            times_confirmed INTEGER NOT NULL DEFAULT 1,
            created_at      TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_memories_latest
            ON memories(user_id, is_latest, memory_type);
        CREATE INDEX IF NOT EXISTS idx_memories_prominence
            ON memories(user_id, prominence DESC);
        CREATE INDEX IF NOT EXISTS idx_memories_created
            ON memories(created_at);",
    )?;
    Ok(())
}

/// FTS5 virtual table for the BM25 keyword signal. content='' makes it an
/// external-content table — synced manually on write, same as the teacher's
/// `user_memory_fts`.
fn create_fts_index(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE VIRTUAL TABLE IF NOT EXISTS memories_fts
            USING fts5(content, content='', content_rowid='rowid');",
    )?;
    Ok(())
}

fn create_relations_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS relations (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            source_id       TEXT NOT NULL,
            target_id       TEXT NOT NULL,
            relation_type   TEXT NOT NULL,
            confidence      REAL NOT NULL,
            created_at      TEXT NOT NULL,
            UNIQUE(source_id, target_id, relation_type)
        );
        CREATE INDEX IF NOT EXISTS idx_relations_target ON relations(target_id);
        CREATE INDEX IF NOT EXISTS idx_relations_source ON relations(source_id);",
    )?;
    Ok(())
}

