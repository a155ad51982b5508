//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the Waymark database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Track program runs, mostly so a changed config can be detected
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL
);

-- Every discovered snapshot and its lifecycle state
CREATE TABLE IF NOT EXISTS snapshots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    url_key TEXT NOT NULL,
    host TEXT NOT NULL,
    domain TEXT NOT NULL,
    parent_id INTEGER REFERENCES snapshots(id) ON DELETE SET NULL,
    state INTEGER NOT NULL,
    depth INTEGER NOT NULL DEFAULT 0,
    priority INTEGER NOT NULL DEFAULT 0,
    is_media INTEGER NOT NULL DEFAULT 0,
    media_extension TEXT,
    is_sensitive INTEGER,
    points INTEGER,
    title TEXT,
    page_language TEXT,
    uses_plugins INTEGER NOT NULL DEFAULT 0,
    oldest_year INTEGER,
    last_modified TEXT,
    options TEXT,
    error_message TEXT,
    discovered_at TEXT NOT NULL,
    scouted_at TEXT,
    claimed_at TEXT,
    UNIQUE(url, timestamp)
);

CREATE INDEX IF NOT EXISTS idx_snapshots_state ON snapshots(state);
CREATE INDEX IF NOT EXISTS idx_snapshots_url_key ON snapshots(url_key);
CREATE INDEX IF NOT EXISTS idx_snapshots_host ON snapshots(host);
CREATE INDEX IF NOT EXISTS idx_snapshots_priority ON snapshots(priority);

-- Link graph between snapshots
CREATE TABLE IF NOT EXISTS topology (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    from_snapshot_id INTEGER NOT NULL REFERENCES snapshots(id) ON DELETE CASCADE,
    to_snapshot_id INTEGER NOT NULL REFERENCES snapshots(id) ON DELETE CASCADE,
    UNIQUE(from_snapshot_id, to_snapshot_id)
);

CREATE INDEX IF NOT EXISTS idx_topology_from ON topology(from_snapshot_id);
CREATE INDEX IF NOT EXISTS idx_topology_to ON topology(to_snapshot_id);

-- Distinct words and tags seen during scouting
CREATE TABLE IF NOT EXISTS words (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    word TEXT NOT NULL,
    is_tag INTEGER NOT NULL,
    UNIQUE(word, is_tag)
);

-- Per-snapshot word tallies; points are always recomputed from these
CREATE TABLE IF NOT EXISTS snapshot_words (
    snapshot_id INTEGER NOT NULL REFERENCES snapshots(id) ON DELETE CASCADE,
    word_id INTEGER NOT NULL REFERENCES words(id),
    count INTEGER NOT NULL,
    PRIMARY KEY (snapshot_id, word_id)
);

-- Finished captures awaiting approval or publication, one per snapshot.
-- A re-record replaces the row and resets approval.
CREATE TABLE IF NOT EXISTS recordings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    snapshot_id INTEGER NOT NULL UNIQUE REFERENCES snapshots(id) ON DELETE CASCADE,
    path TEXT NOT NULL,
    has_audio INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    approved INTEGER NOT NULL DEFAULT 0,
    published_at TEXT,
    publish_url TEXT
);

-- URLs already submitted to save-on-demand, so they are never resubmitted
CREATE TABLE IF NOT EXISTS saved_urls (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL UNIQUE,
    saved_at TEXT NOT NULL
);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_schema_initializes() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(initialize_schema(&conn).is_ok());
    }

    #[test]
    fn test_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        assert!(initialize_schema(&conn).is_ok());
    }

    #[test]
    fn test_tables_exist_after_init() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        for table in [
            "runs",
            "snapshots",
            "topology",
            "words",
            "snapshot_words",
            "recordings",
            "saved_urls",
        ] {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "Table {} should exist", table);
        }
    }
}
