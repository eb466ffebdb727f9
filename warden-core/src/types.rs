//! Core domain types for warden
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **LogEntry** | One warning/error/fatal line observed in the log store |
//! | **LogCluster** | Entries from one run judged to be the same underlying problem |
//! | **Slug** | Stable, content-derived identifier of a problem; the dedup key |
//! | **ProcessedPattern** | Durable record that a slug has been handled |
//! | **Run** | One invocation's summary |
//! | **CodeFix** | Proposed patch plus rationale, transient |
//!
//! Clusters and fixes never outlive a run. Only their outcomes are persisted,
//! as [`ProcessedPattern`], [`RunRecord`] and [`LogSnapshot`] rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================
// Log entries
// ============================================

/// Severity of an observed log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
    Fatal,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Fatal => "fatal",
        }
    }

    /// Sort rank, most severe first.
    pub fn rank(&self) -> u8 {
        match self {
            Severity::Fatal => 0,
            Severity::Error => 1,
            Severity::Warning => 2,
        }
    }

    /// The more severe of two severities.
    pub fn max(self, other: Severity) -> Severity {
        if other.rank() < self.rank() {
            other
        } else {
            self
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "warning" | "warn" => Ok(Severity::Warning),
            "error" | "err" => Ok(Severity::Error),
            "fatal" | "critical" | "crit" => Ok(Severity::Fatal),
            _ => Err(format!("unknown severity: {}", s)),
        }
    }
}

/// One observed log line. Produced per run, never persisted individually.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// When the line was emitted
    pub timestamp: DateTime<Utc>,
    /// Node that emitted it
    pub hostname: String,
    /// Node class (validator, rpc, archive)
    pub service_type: String,
    /// Daemon module / log partition
    pub module: String,
    /// Severity label
    pub severity: Severity,
    /// Raw message text
    pub message: String,
}

// ============================================
// Clusters
// ============================================

/// A group of entries representing one underlying problem within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogCluster {
    /// Stable, content-derived identifier
    pub slug: String,
    /// One-line title
    pub title: String,
    /// Short description of the suspected root cause
    pub summary: String,
    /// The message that best represents the cluster
    pub representative_message: String,
    /// Up to a handful of raw samples
    pub sample_messages: Vec<String>,
    /// Number of contributing entries
    pub occurrence_count: usize,
    /// Contributing modules, first-seen order
    pub modules: Vec<String>,
    /// Highest severity among contributing entries
    pub severity: Severity,
}

impl LogCluster {
    /// The module that contributed first; used for source hints.
    pub fn primary_module(&self) -> &str {
        self.modules.first().map(String::as_str).unwrap_or("unknown")
    }
}

// ============================================
// Durable records
// ============================================

/// How a stored pattern was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternStatus {
    /// A pull request was opened (or found already open)
    FixOpened,
    /// Classified benign / not fixable and a human was notified
    NotifiedBenign,
    /// Matched another pattern or an orphaned branch; no action taken
    DuplicateIgnored,
}

impl PatternStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternStatus::FixOpened => "fix_opened",
            PatternStatus::NotifiedBenign => "notified_benign",
            PatternStatus::DuplicateIgnored => "duplicate_ignored",
        }
    }
}

impl std::str::FromStr for PatternStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fix_opened" => Ok(PatternStatus::FixOpened),
            "notified_benign" => Ok(PatternStatus::NotifiedBenign),
            "duplicate_ignored" => Ok(PatternStatus::DuplicateIgnored),
            _ => Err(format!("unknown pattern status: {}", s)),
        }
    }
}

/// Durable memory of one previously handled problem.
///
/// Written once by the orchestrator after the cluster's outcome is known and
/// never updated; only an administrative reset removes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedPattern {
    /// Unique slug
    pub slug: String,
    /// Resolution
    pub status: PatternStatus,
    /// Pull request URL, when one exists
    pub pr_url: Option<String>,
    /// Branch name, when one was published
    pub branch: Option<String>,
    /// Summary used for semantic comparison
    pub summary: String,
    /// Primary module
    pub module: String,
    /// Representative message
    pub sample_message: String,
    /// When the pattern was recorded
    pub created_at: DateTime<Utc>,
}

impl ProcessedPattern {
    /// Build a pattern record for a resolved cluster.
    pub fn from_cluster(
        cluster: &LogCluster,
        status: PatternStatus,
        pr_url: Option<String>,
        branch: Option<String>,
    ) -> Self {
        Self {
            slug: cluster.slug.clone(),
            status,
            pr_url,
            branch,
            summary: cluster.summary.clone(),
            module: cluster.primary_module().to_string(),
            sample_message: cluster.representative_message.clone(),
            created_at: Utc::now(),
        }
    }
}

/// One invocation's summary. Written exactly once, complete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Run id (UUID)
    pub id: String,
    /// Start time
    pub started_at: DateTime<Utc>,
    /// Wall-clock duration
    pub duration_seconds: f64,
    /// Clusters produced by the extractor
    pub clusters_found: i64,
    /// Pull requests newly opened
    pub prs_created: i64,
    /// Errors encountered (per-cluster and whole-run)
    pub errors: i64,
}

/// Per-run record of one cluster and what happened to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogSnapshot {
    pub cluster_slug: String,
    pub occurrence_count: i64,
    pub modules: Vec<String>,
    pub severity: Severity,
    pub outcome: String,
    pub sample_messages: Vec<String>,
}

// ============================================
// Fixes
// ============================================

/// Whether a generated fix is worth publishing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fixability {
    Fixable,
    NotFixable,
}

/// A source file handed to the fix generator as context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextFile {
    /// Path relative to the checkout root
    pub path: String,
    /// File content (possibly truncated)
    pub content: String,
    /// Whether `content` was cut short; such files cannot be patched
    pub truncated: bool,
}

/// A full-file replacement within a [`CodeFix`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    /// Path relative to the checkout root
    pub path: String,
    /// Content before the fix
    pub original: String,
    /// Content after the fix
    pub modified: String,
}

impl FileChange {
    /// Count of lines that differ, positionally. Used for PR summaries only.
    pub fn changed_lines(&self) -> usize {
        let before: Vec<&str> = self.original.lines().collect();
        let after: Vec<&str> = self.modified.lines().collect();
        let common = before.len().min(after.len());
        let differing = (0..common).filter(|&i| before[i] != after[i]).count();
        differing + before.len().max(after.len()) - common
    }
}

/// A proposed patch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeFix {
    /// Applicability flag
    pub fixability: Fixability,
    /// Pull request title
    pub title: String,
    /// Why the change fixes the problem (or why no change was produced)
    pub rationale: String,
    /// Confidence reported by the generator, 0.0-1.0
    pub confidence: f64,
    /// File replacements
    pub changes: Vec<FileChange>,
}

impl CodeFix {
    /// A `not_fixable` result carrying the reason.
    pub fn not_fixable(rationale: impl Into<String>) -> Self {
        Self {
            fixability: Fixability::NotFixable,
            title: String::new(),
            rationale: rationale.into(),
            confidence: 0.0,
            changes: Vec::new(),
        }
    }

    pub fn is_fixable(&self) -> bool {
        self.fixability == Fixability::Fixable
    }

    /// Paths touched by this fix.
    pub fn target_files(&self) -> Vec<&str> {
        self.changes.iter().map(|c| c.path.as_str()).collect()
    }
}
