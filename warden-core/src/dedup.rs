//! Deduplicator.
//!
//! Exact slug matches are duplicates outright. Otherwise the stored patterns
//! are ranked by a cheap lexical score (same primary module, shared words of
//! the normalized sample message) and only the best few are compared through
//! the [`SemanticJudge`], so model calls per cluster stay constant as the
//! store grows. Only scores at or above the configured threshold count as
//! duplicates, and near-misses are logged for human review.

use crate::cluster::normalize_message;
use crate::judge::{PatternDigest, SemanticJudge};
use crate::types::{LogCluster, ProcessedPattern};
use crate::Result;
use std::collections::BTreeSet;

/// Outcome of a duplicate check.
#[derive(Debug, Clone, PartialEq)]
pub enum DedupDecision {
    New,
    Duplicate {
        existing_slug: String,
        /// `None` for an exact slug match
        score: Option<f64>,
    },
}

impl DedupDecision {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, DedupDecision::Duplicate { .. })
    }
}

fn words(text: &str) -> BTreeSet<String> {
    normalize_message(text)
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| w.len() > 2)
        .map(str::to_ascii_lowercase)
        .collect()
}

/// Cheap pre-filter score in `0.0..=2.0`: one point for the same primary
/// module plus the Jaccard overlap of sample-message words.
fn lexical_score(a: &PatternDigest, b: &PatternDigest) -> f64 {
    let module = if a.module == b.module { 1.0 } else { 0.0 };
    let (wa, wb) = (words(&a.sample_message), words(&b.sample_message));
    let union = wa.union(&wb).count();
    let overlap = if union == 0 {
        0.0
    } else {
        wa.intersection(&wb).count() as f64 / union as f64
    };
    module + overlap
}

pub struct Deduplicator<'a> {
    judge: &'a dyn SemanticJudge,
    threshold: f64,
    borderline_margin: f64,
    max_candidates: usize,
}

impl<'a> Deduplicator<'a> {
    pub fn new(
        judge: &'a dyn SemanticJudge,
        threshold: f64,
        borderline_margin: f64,
        max_candidates: usize,
    ) -> Self {
        Self {
            judge,
            threshold,
            borderline_margin,
            max_candidates: max_candidates.max(1),
        }
    }

    /// Stored patterns worth a model comparison, best lexical match first.
    fn shortlist<'p>(
        &self,
        candidate: &PatternDigest,
        patterns: &'p [ProcessedPattern],
    ) -> Vec<(PatternDigest, &'p ProcessedPattern)> {
        let mut ranked: Vec<(f64, PatternDigest, &ProcessedPattern)> = patterns
            .iter()
            .map(|p| {
                let digest = PatternDigest::from_pattern(p);
                (lexical_score(candidate, &digest), digest, p)
            })
            .collect();
        ranked.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.2.slug.cmp(&b.2.slug)));
        if ranked.len() > self.max_candidates {
            tracing::debug!(
                stored = ranked.len(),
                compared = self.max_candidates,
                "Narrowed semantic comparison candidates"
            );
            ranked.truncate(self.max_candidates);
        }
        ranked.into_iter().map(|(_, d, p)| (d, p)).collect()
    }

    /// Similarity of two digests, independent of argument order.
    pub fn compare(&self, a: &PatternDigest, b: &PatternDigest) -> Result<f64> {
        let (first, second) = if a <= b { (a, b) } else { (b, a) };
        self.judge.similarity(first, second)
    }

    pub fn check(
        &self,
        cluster: &LogCluster,
        patterns: &[ProcessedPattern],
    ) -> Result<DedupDecision> {
        if let Some(existing) = patterns.iter().find(|p| p.slug == cluster.slug) {
            tracing::info!(slug = %cluster.slug, status = existing.status.as_str(), "Exact slug match");
            return Ok(DedupDecision::Duplicate {
                existing_slug: existing.slug.clone(),
                score: None,
            });
        }

        let candidate = PatternDigest::from_cluster(cluster);
        for (digest, pattern) in self.shortlist(&candidate, patterns) {
            let score = self.compare(&candidate, &digest)?;

            if score >= self.threshold {
                tracing::info!(
                    slug = %cluster.slug,
                    existing = %pattern.slug,
                    score,
                    "Semantic duplicate"
                );
                return Ok(DedupDecision::Duplicate {
                    existing_slug: pattern.slug.clone(),
                    score: Some(score),
                });
            }

            if score >= self.threshold - self.borderline_margin {
                tracing::warn!(
                    slug = %cluster.slug,
                    existing = %pattern.slug,
                    score,
                    threshold = self.threshold,
                    "Borderline duplicate score, treating as new"
                );
            }
        }

        Ok(DedupDecision::New)
    }
}
