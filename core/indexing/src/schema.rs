use anyhow::Result;
use chrono::{SecondsFormat, Utc};
use rusqlite::Connection;

/// Tables shared by the ingestion (write) and retrieval (read) paths.
const KNOWLEDGE_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS knowledge_scopes (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        name TEXT NOT NULL,
        description TEXT,
        color TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE (user_id, name)
    );

    CREATE TABLE IF NOT EXISTS knowledge_entries (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        scope_id TEXT NOT NULL,
        title TEXT NOT NULL,
        content TEXT NOT NULL,
        source_url TEXT,
        processed_content TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        FOREIGN KEY (scope_id) REFERENCES knowledge_scopes(id) ON DELETE CASCADE
    );

    CREATE TABLE IF NOT EXISTS knowledge_embeddings (
        id TEXT PRIMARY KEY,
        entry_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        content_chunk TEXT NOT NULL,
        embedding TEXT NOT NULL,
        chunk_index INTEGER NOT NULL,
        created_at TEXT NOT NULL,
        UNIQUE (entry_id, chunk_index),
        FOREIGN KEY (entry_id) REFERENCES knowledge_entries(id) ON DELETE CASCADE
    );

    CREATE INDEX IF NOT EXISTS idx_entries_user_created ON knowledge_entries(user_id, created_at DESC);
    CREATE INDEX IF NOT EXISTS idx_entries_scope ON knowledge_entries(scope_id);
    CREATE INDEX IF NOT EXISTS idx_embeddings_user ON knowledge_embeddings(user_id);
    CREATE INDEX IF NOT EXISTS idx_embeddings_entry ON knowledge_embeddings(entry_id);
";

/// Enable foreign keys and create the knowledge tables if missing.
pub fn ensure_schema(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.execute_batch(KNOWLEDGE_SCHEMA)?;
    Ok(())
}

/// Fixed-width RFC3339 (microseconds, `Z`) so stored timestamps sort as text.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();
        ensure_schema(&conn).unwrap();

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name LIKE 'knowledge_%'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 3);
    }

    #[test]
    fn test_timestamps_sort_lexicographically() {
        let a = now_rfc3339();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = now_rfc3339();
        assert!(a < b);
        assert!(a.ends_with('Z'));
        assert_eq!(a.len(), b.len());
    }
}
