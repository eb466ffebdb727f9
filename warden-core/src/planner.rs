//! Fix Planner.
//!
//! Routes a new cluster either to fix generation or to a benign notification.
//! Two cheap local rules run before the model is consulted: a cluster whose
//! modules have no mapped source location is benign, and so is one whose
//! messages carry a transient/environmental marker.

use crate::config::{ModuleHintsConfig, PlannerConfig};
use crate::judge::SemanticJudge;
use crate::types::LogCluster;
use crate::Result;

#[derive(Debug, Clone, PartialEq)]
pub enum PlanDecision {
    Fixable {
        rationale: String,
        /// Candidate source directories, primary module first
        hint_dirs: Vec<String>,
    },
    Benign {
        rationale: String,
    },
}

impl PlanDecision {
    pub fn is_fixable(&self) -> bool {
        matches!(self, PlanDecision::Fixable { .. })
    }

    pub fn rationale(&self) -> &str {
        match self {
            PlanDecision::Fixable { rationale, .. } | PlanDecision::Benign { rationale } => {
                rationale
            }
        }
    }
}

/// Directories mapped for any of the cluster's modules, deduplicated.
pub fn hint_dirs(hints: &ModuleHintsConfig, cluster: &LogCluster) -> Vec<String> {
    let mut dirs: Vec<String> = Vec::new();
    for module in &cluster.modules {
        for dir in hints.paths.get(module).into_iter().flatten() {
            if !dirs.contains(dir) {
                dirs.push(dir.clone());
            }
        }
    }
    dirs
}

/// First transient marker found in the cluster's raw messages.
pub fn transient_marker<'m>(markers: &'m [String], cluster: &LogCluster) -> Option<&'m str> {
    let texts: Vec<String> = std::iter::once(&cluster.representative_message)
        .chain(cluster.sample_messages.iter())
        .map(|m| m.to_lowercase())
        .collect();
    markers
        .iter()
        .map(String::as_str)
        .find(|marker| {
            let marker = marker.to_lowercase();
            texts.iter().any(|t| t.contains(&marker))
        })
}

pub struct FixPlanner<'a> {
    judge: &'a dyn SemanticJudge,
    hints: &'a ModuleHintsConfig,
    planner: &'a PlannerConfig,
}

impl<'a> FixPlanner<'a> {
    pub fn new(
        judge: &'a dyn SemanticJudge,
        hints: &'a ModuleHintsConfig,
        planner: &'a PlannerConfig,
    ) -> Self {
        Self {
            judge,
            hints,
            planner,
        }
    }

    pub fn plan(&self, cluster: &LogCluster) -> Result<PlanDecision> {
        let dirs = hint_dirs(self.hints, cluster);
        if dirs.is_empty() {
            return Ok(PlanDecision::Benign {
                rationale: format!(
                    "No source location is mapped for module(s) {}, so there is not enough \
                     context to attempt a code change.",
                    cluster.modules.join(", ")
                ),
            });
        }

        if let Some(marker) = transient_marker(&self.planner.transient_markers, cluster) {
            return Ok(PlanDecision::Benign {
                rationale: format!(
                    "The messages indicate a transient or environmental condition (\"{}\") \
                     rather than a code defect.",
                    marker
                ),
            });
        }

        let verdict = self.judge.classify_fixability(cluster)?;
        tracing::debug!(slug = %cluster.slug, fixable = verdict.fixable, "Fixability verdict");
        if verdict.fixable {
            Ok(PlanDecision::Fixable {
                rationale: verdict.rationale,
                hint_dirs: dirs,
            })
        } else {
            Ok(PlanDecision::Benign {
                rationale: verdict.rationale,
            })
        }
    }
}
