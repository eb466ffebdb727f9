//! Database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.

use crate::error::Error;
use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: pattern memory and run history
    r#"
    -- One row per handled problem. slug is the dedup key.
    CREATE TABLE IF NOT EXISTS processed_patterns (
        slug             TEXT PRIMARY KEY,
        status           TEXT NOT NULL
                         CHECK (status IN ('fix_opened', 'notified_benign', 'duplicate_ignored')),
        pr_url           TEXT,
        branch           TEXT,

        -- Context for semantic comparison
        summary          TEXT NOT NULL DEFAULT '',
        module           TEXT NOT NULL DEFAULT '',
        sample_message   TEXT NOT NULL DEFAULT '',

        created_at       DATETIME NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_processed_patterns_status ON processed_patterns(status);

    -- One row per completed invocation, written once with every field set
    CREATE TABLE IF NOT EXISTS runs (
        id               TEXT PRIMARY KEY,
        started_at       DATETIME NOT NULL,
        duration_seconds REAL NOT NULL,
        clusters_found   INTEGER NOT NULL,
        prs_created      INTEGER NOT NULL,
        errors           INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_runs_started ON runs(started_at DESC);
    "#,
    // Version 2: per-run cluster snapshots
    r#"
    CREATE TABLE IF NOT EXISTS log_snapshots (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        run_id           TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
        cluster_slug     TEXT NOT NULL,
        occurrence_count INTEGER NOT NULL,
        modules          JSON NOT NULL,
        severity         TEXT NOT NULL,
        outcome          TEXT NOT NULL,
        sample_messages  JSON NOT NULL,
        created_at       DATETIME NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_log_snapshots_run ON log_snapshots(run_id);
    CREATE INDEX IF NOT EXISTS idx_log_snapshots_slug ON log_snapshots(cluster_slug);
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version = get_schema_version(conn)?;

    if current_version > SCHEMA_VERSION {
        return Err(Error::StoreCorruption(format!(
            "schema version {} is newer than supported version {}",
            current_version, SCHEMA_VERSION
        )));
    }

    tracing::info!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking database migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            let tx = conn.unchecked_transaction()?;
            tx.execute_batch(migration)?;
            tx.pragma_update(None, "user_version", version)?;
            tx.commit()?;
        }
    }

    if current_version < SCHEMA_VERSION {
        tracing::info!(
            from = current_version,
            to = SCHEMA_VERSION,
            "Migrations complete"
        );
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let version = get_schema_version(&conn).unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_tables_created() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        for table in ["processed_patterns", "runs", "log_snapshots"] {
            let exists: i32 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?",
                    [table],
                    |r| r.get(0),
                )
                .unwrap();
            assert_eq!(exists, 1, "Table {} should exist", table);
        }
    }

    #[test]
    fn test_status_check_constraint() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let result = conn.execute(
            "INSERT INTO processed_patterns (slug, status, created_at) VALUES ('x', 'open', '2026-01-01T00:00:00Z')",
            [],
        );
        assert!(result.is_err(), "unknown status should be rejected");
    }

    #[test]
    fn test_newer_schema_is_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "user_version", SCHEMA_VERSION + 1)
            .unwrap();

        let err = run_migrations(&conn).unwrap_err();
        assert!(matches!(err, Error::StoreCorruption(_)));
    }
}
