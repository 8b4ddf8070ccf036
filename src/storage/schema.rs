//! Database schema definitions.

use rusqlite::{Connection, Result};

pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// The complete SQL schema for the tangle database.
pub const SCHEMA_SQL: &str = r"
    -- Issues table
    CREATE TABLE IF NOT EXISTS issues (
        id TEXT PRIMARY KEY,
        content_hash TEXT,
        title TEXT NOT NULL,
        description TEXT,
        design TEXT,
        acceptance_criteria TEXT,
        notes TEXT,
        status TEXT NOT NULL,
        priority INTEGER NOT NULL,
        issue_type TEXT NOT NULL,
        assignee TEXT,
        owner TEXT,
        created_at TEXT NOT NULL,
        created_by TEXT,
        updated_at TEXT NOT NULL,
        closed_at TEXT,
        close_reason TEXT,
        external_ref TEXT,
        deleted_at TEXT,
        CHECK (length(title) >= 1 AND length(title) <= 500),
        CHECK (priority >= 0 AND priority <= 4)
    );

    CREATE INDEX IF NOT EXISTS idx_issues_status ON issues(status);
    CREATE INDEX IF NOT EXISTS idx_issues_priority ON issues(priority);
    CREATE INDEX IF NOT EXISTS idx_issues_updated_at ON issues(updated_at);
    CREATE INDEX IF NOT EXISTS idx_issues_content_hash ON issues(content_hash);
    CREATE UNIQUE INDEX IF NOT EXISTS idx_issues_external_ref ON issues(external_ref) WHERE external_ref IS NOT NULL;

    -- Dependencies
    CREATE TABLE IF NOT EXISTS dependencies (
        issue_id TEXT NOT NULL,
        depends_on_id TEXT NOT NULL,
        type TEXT NOT NULL,
        created_at TEXT NOT NULL,
        metadata TEXT,
        PRIMARY KEY (issue_id, depends_on_id)
    );
    CREATE INDEX IF NOT EXISTS idx_dependencies_issue_id ON dependencies(issue_id);
    CREATE INDEX IF NOT EXISTS idx_dependencies_depends_on_id ON dependencies(depends_on_id);

    -- Labels
    CREATE TABLE IF NOT EXISTS labels (
        issue_id TEXT NOT NULL,
        label TEXT NOT NULL,
        PRIMARY KEY (issue_id, label),
        FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE
    );
    CREATE INDEX IF NOT EXISTS idx_labels_label ON labels(label);

    -- Events (append-only audit log)
    CREATE TABLE IF NOT EXISTS events (
        id INTEGER PRIMARY KEY,
        issue_id TEXT NOT NULL,
        event_type TEXT NOT NULL,
        actor TEXT NOT NULL,
        old_value TEXT,
        new_value TEXT,
        comment TEXT,
        created_at TEXT NOT NULL,
        FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE
    );
    CREATE INDEX IF NOT EXISTS idx_events_issue_id ON events(issue_id);
    CREATE INDEX IF NOT EXISTS idx_events_created_at ON events(created_at);

    -- Config (runtime key/value)
    CREATE TABLE IF NOT EXISTS config (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );

    -- Metadata (sync bookkeeping: jsonl_content_hash, last_export_time, ...)
    CREATE TABLE IF NOT EXISTS metadata (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );

    -- Dirty issues (changed since last export)
    CREATE TABLE IF NOT EXISTS dirty_issues (
        issue_id TEXT PRIMARY KEY,
        marked_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_dirty_issues_marked_at ON dirty_issues(marked_at);

    -- Export hashes (content hash at last export, for incremental export)
    CREATE TABLE IF NOT EXISTS export_hashes (
        issue_id TEXT PRIMARY KEY,
        content_hash TEXT NOT NULL,
        exported_at TEXT NOT NULL
    );
";

/// Apply the schema to the database.
///
/// Idempotent: all statements use `IF NOT EXISTS`.
///
/// # Errors
///
/// Returns an error if the SQL execution fails or pragmas cannot be set.
pub fn apply_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    // WAL for cross-process concurrency
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_apply_schema() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).expect("Failed to apply schema");

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table'")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        for expected in [
            "issues",
            "dependencies",
            "labels",
            "events",
            "config",
            "metadata",
            "dirty_issues",
            "export_hashes",
        ] {
            assert!(tables.iter().any(|t| t == expected), "missing {expected}");
        }
    }

    #[test]
    fn test_apply_schema_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();
        apply_schema(&conn).unwrap();
    }

    #[test]
    fn test_title_length_check() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();
        let err = conn.execute(
            "INSERT INTO issues (id, title, status, priority, issue_type, created_at, updated_at)
             VALUES ('tg-1', '', 'open', 2, 'task', '2026-01-01', '2026-01-01')",
            [],
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_priority_range_check() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();
        let err = conn.execute(
            "INSERT INTO issues (id, title, status, priority, issue_type, created_at, updated_at)
             VALUES ('tg-1', 'x', 'open', 9, 'task', '2026-01-01', '2026-01-01')",
            [],
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_external_ref_unique_when_present() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();
        let insert = "INSERT INTO issues (id, title, status, priority, issue_type, created_at, updated_at, external_ref)
             VALUES (?1, 'x', 'open', 2, 'task', '2026-01-01', '2026-01-01', ?2)";
        conn.execute(insert, ["tg-1", "gh-1"]).unwrap();
        assert!(conn.execute(insert, ["tg-2", "gh-1"]).is_err());
        // NULL external_ref never collides
        let insert_null = "INSERT INTO issues (id, title, status, priority, issue_type, created_at, updated_at)
             VALUES (?1, 'x', 'open', 2, 'task', '2026-01-01', '2026-01-01')";
        conn.execute(insert_null, ["tg-3"]).unwrap();
        conn.execute(insert_null, ["tg-4"]).unwrap();
    }
}
