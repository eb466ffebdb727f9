//! Database repository layer
//!
//! The Pattern Store: single writer of [`ProcessedPattern`], [`RunRecord`]
//! and [`LogSnapshot`] rows.

use crate::error::{Error, Result};
use crate::types::*;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Database handle (single connection)
pub struct Database {
    conn: Mutex<Connection>,
}

/// Map low-level errors that mean "this file is not a usable store".
fn classify(err: rusqlite::Error) -> Error {
    match err.sqlite_error_code() {
        Some(ErrorCode::NotADatabase) | Some(ErrorCode::DatabaseCorrupt) => {
            Error::StoreCorruption(err.to_string())
        }
        _ => Error::Database(err),
    }
}

fn parse_ts(row: &Row, column: &str) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(column)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

fn parse_enum<T: std::str::FromStr<Err = String>>(row: &Row, column: &str) -> rusqlite::Result<T> {
    let raw: String = row.get(column)?;
    raw.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            e.into(),
        )
    })
}

fn parse_json_list(row: &Row, column: &str) -> rusqlite::Result<Vec<String>> {
    let raw: String = row.get(column)?;
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

impl Database {
    /// Open or create a database at the given path
    ///
    /// Fails with [`Error::StoreCorruption`] when the file exists but is not
    /// a readable SQLite database.
    pub fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path).map_err(classify)?;

        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = FULL;
            PRAGMA busy_timeout = 5000;
            ",
        )
        .map_err(classify)?;

        let check: String = conn
            .query_row("PRAGMA quick_check", [], |r| r.get(0))
            .map_err(classify)?;
        if check != "ok" {
            return Err(Error::StoreCorruption(format!(
                "integrity check failed for {}: {}",
                path.display(),
                check
            )));
        }

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.lock()?;
        super::schema::run_migrations(&conn).map_err(|e| match e {
            Error::Database(inner) => classify(inner),
            other => other,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::StoreCorruption("database mutex poisoned".to_string()))
    }

    // ============================================
    // Pattern operations
    // ============================================

    /// Record a resolved pattern.
    ///
    /// Insert-if-absent: returns `false` when the slug was already stored, in
    /// which case the existing row is left untouched.
    pub fn record_pattern(&self, pattern: &ProcessedPattern) -> Result<bool> {
        let conn = self.lock()?;
        let inserted = conn.execute(
            r#"
            INSERT INTO processed_patterns
                (slug, status, pr_url, branch, summary, module, sample_message, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(slug) DO NOTHING
            "#,
            params![
                pattern.slug,
                pattern.status.as_str(),
                pattern.pr_url,
                pattern.branch,
                pattern.summary,
                pattern.module,
                pattern.sample_message,
                pattern.created_at.to_rfc3339(),
            ],
        )?;
        Ok(inserted > 0)
    }

    /// Get a pattern by slug
    pub fn get_pattern(&self, slug: &str) -> Result<Option<ProcessedPattern>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT * FROM processed_patterns WHERE slug = ?",
            [slug],
            Self::row_to_pattern,
        )
        .optional()
        .map_err(Error::from)
    }

    /// All stored patterns, oldest first
    pub fn list_patterns(&self) -> Result<Vec<ProcessedPattern>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT * FROM processed_patterns ORDER BY created_at ASC, slug ASC")?;
        let patterns = stmt
            .query_map([], Self::row_to_pattern)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(patterns)
    }

    /// Pattern counts keyed by status string
    pub fn count_patterns_by_status(&self) -> Result<HashMap<String, i64>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT status, COUNT(*) FROM processed_patterns GROUP BY status")?;
        let counts = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<rusqlite::Result<HashMap<_, _>>>()?;
        Ok(counts)
    }

    /// Administrative reset of one pattern, making it eligible for reprocessing
    pub fn delete_pattern(&self, slug: &str) -> Result<()> {
        let conn = self.lock()?;
        let removed = conn.execute("DELETE FROM processed_patterns WHERE slug = ?", [slug])?;
        if removed == 0 {
            return Err(Error::PatternNotFound(slug.to_string()));
        }
        tracing::info!(slug, "Pattern reset");
        Ok(())
    }

    /// Administrative reset of every pattern. Returns the number removed.
    pub fn delete_all_patterns(&self) -> Result<usize> {
        let conn = self.lock()?;
        let removed = conn.execute("DELETE FROM processed_patterns", [])?;
        tracing::info!(removed, "All patterns reset");
        Ok(removed)
    }

    fn row_to_pattern(row: &Row) -> rusqlite::Result<ProcessedPattern> {
        Ok(ProcessedPattern {
            slug: row.get("slug")?,
            status: parse_enum(row, "status")?,
            pr_url: row.get("pr_url")?,
            branch: row.get("branch")?,
            summary: row.get("summary")?,
            module: row.get("module")?,
            sample_message: row.get("sample_message")?,
            created_at: parse_ts(row, "created_at")?,
        })
    }

    // ============================================
    // Run operations
    // ============================================

    /// Write a finished run and its cluster snapshots in one transaction.
    ///
    /// Either the complete run row (and every snapshot) becomes visible, or
    /// nothing does.
    pub fn record_run(&self, run: &RunRecord, snapshots: &[LogSnapshot]) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        tx.execute(
            r#"
            INSERT INTO runs (id, started_at, duration_seconds, clusters_found, prs_created, errors)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                run.id,
                run.started_at.to_rfc3339(),
                run.duration_seconds,
                run.clusters_found,
                run.prs_created,
                run.errors,
            ],
        )?;

        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO log_snapshots
                    (run_id, cluster_slug, occurrence_count, modules, severity, outcome,
                     sample_messages, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
            )?;
            let now = Utc::now().to_rfc3339();
            for snapshot in snapshots {
                stmt.execute(params![
                    run.id,
                    snapshot.cluster_slug,
                    snapshot.occurrence_count,
                    serde_json::to_string(&snapshot.modules)?,
                    snapshot.severity.as_str(),
                    snapshot.outcome,
                    serde_json::to_string(&snapshot.sample_messages)?,
                    now,
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Get a run by id
    pub fn get_run(&self, id: &str) -> Result<Option<RunRecord>> {
        let conn = self.lock()?;
        conn.query_row("SELECT * FROM runs WHERE id = ?", [id], Self::row_to_run)
            .optional()
            .map_err(Error::from)
    }

    /// Most recent runs first
    pub fn list_runs(&self, limit: usize) -> Result<Vec<RunRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT * FROM runs ORDER BY started_at DESC LIMIT ?")?;
        let runs = stmt
            .query_map([limit as i64], Self::row_to_run)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(runs)
    }

    /// Snapshots written with a run, in insertion order
    pub fn snapshots_for_run(&self, run_id: &str) -> Result<Vec<LogSnapshot>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT * FROM log_snapshots WHERE run_id = ? ORDER BY id ASC")?;
        let snapshots = stmt
            .query_map([run_id], |row| {
                Ok(LogSnapshot {
                    cluster_slug: row.get("cluster_slug")?,
                    occurrence_count: row.get("occurrence_count")?,
                    modules: parse_json_list(row, "modules")?,
                    severity: parse_enum(row, "severity")?,
                    outcome: row.get("outcome")?,
                    sample_messages: parse_json_list(row, "sample_messages")?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(snapshots)
    }

    fn row_to_run(row: &Row) -> rusqlite::Result<RunRecord> {
        Ok(RunRecord {
            id: row.get("id")?,
            started_at: parse_ts(row, "started_at")?,
            duration_seconds: row.get("duration_seconds")?,
            clusters_found: row.get("clusters_found")?,
            prs_created: row.get("prs_created")?,
            errors: row.get("errors")?,
        })
    }
}
