//! Semantic judgment capability.
//!
//! Every nondeterministic decision in a run (grouping, similarity, fixability,
//! file selection, patch generation) goes through [`SemanticJudge`]. The
//! production implementation is [`crate::llm::LlmJudge`]; tests substitute a
//! deterministic replay double.

use crate::types::{CodeFix, ContextFile, LogCluster, ProcessedPattern, Severity};
use crate::Result;
use serde::{Deserialize, Serialize};

/// Near-identical messages grouped structurally (after normalization).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageGroup {
    /// Normalized message text
    pub key: String,
    /// Module of the first contributing entry
    pub module: String,
    /// Highest severity seen in the group
    pub severity: Severity,
    /// Number of contributing entries
    pub count: usize,
    /// Raw samples, first-seen order
    pub samples: Vec<String>,
}

/// The judge's proposal for one cluster: which groups belong together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterDraft {
    pub slug: String,
    pub title: String,
    pub summary: String,
    /// Indexes into the `groups` slice passed to [`SemanticJudge::cluster`]
    pub groups: Vec<usize>,
}

/// What two problems are compared on.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PatternDigest {
    pub summary: String,
    pub module: String,
    pub sample_message: String,
    pub slug: String,
}

impl PatternDigest {
    pub fn from_cluster(cluster: &LogCluster) -> Self {
        Self {
            summary: cluster.summary.clone(),
            module: cluster.primary_module().to_string(),
            sample_message: cluster.representative_message.clone(),
            slug: cluster.slug.clone(),
        }
    }

    pub fn from_pattern(pattern: &ProcessedPattern) -> Self {
        Self {
            summary: pattern.summary.clone(),
            module: pattern.module.clone(),
            sample_message: pattern.sample_message.clone(),
            slug: pattern.slug.clone(),
        }
    }
}

/// Planner-facing classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixabilityVerdict {
    pub fixable: bool,
    pub rationale: String,
}

/// Semantic judgment service.
///
/// Implementations fail with [`crate::Error::ModelUnavailable`] or
/// [`crate::Error::ModelRefused`]; callers treat both as per-cluster errors.
pub trait SemanticJudge: Send + Sync {
    /// Merge or split structural groups into problem clusters.
    fn cluster(&self, groups: &[MessageGroup]) -> Result<Vec<ClusterDraft>>;

    /// Similarity of two problems, 0.0 (unrelated) to 1.0 (same root cause).
    fn similarity(&self, a: &PatternDigest, b: &PatternDigest) -> Result<f64>;

    /// Whether a source change could plausibly address the cluster.
    fn classify_fixability(&self, cluster: &LogCluster) -> Result<FixabilityVerdict>;

    /// Pick the most relevant candidate files, best first.
    fn select_files(
        &self,
        _cluster: &LogCluster,
        candidates: &[String],
        limit: usize,
    ) -> Result<Vec<String>> {
        Ok(candidates.iter().take(limit).cloned().collect())
    }

    /// Propose a minimal patch confined to `files`.
    fn generate_fix(
        &self,
        cluster: &LogCluster,
        files: &[ContextFile],
        architecture: Option<&str>,
    ) -> Result<CodeFix>;
}
