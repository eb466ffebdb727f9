//! Cluster Extractor.
//!
//! Raw entries are normalized and grouped structurally first (cheap, local),
//! then the [`SemanticJudge`] merges or splits those groups into problem
//! clusters and names them. Output order is stable for the same input:
//! severity first, then occurrence count, then first-seen order.

use crate::judge::{ClusterDraft, MessageGroup, SemanticJudge};
use crate::types::{LogCluster, LogEntry, Severity};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::OnceLock;

/// Raw samples kept per group and per cluster.
pub const MAX_SAMPLES: usize = 5;

/// Longest slug accepted anywhere (it becomes part of a branch name).
pub const MAX_SLUG_LEN: usize = 60;

const TITLE_CHARS: usize = 80;

fn masks() -> &'static [(Regex, &'static str)] {
    static MASKS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    MASKS.get_or_init(|| {
        [
            (r"0x[0-9a-fA-F]+", "<hex>"),
            (r"seq=\d+", "seq=<N>"),
            (r"\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(\.\d+)?Z?", "<timestamp>"),
            (r"\b[0-9a-fA-F]{40,64}\b", "<hash>"),
            (r"\b\d{1,3}(\.\d{1,3}){3}(:\d+)?\b", "<endpoint>"),
            (r"\b\d{6,}\b", "<N>"),
        ]
        .into_iter()
        .map(|(pattern, replacement)| {
            (
                Regex::new(pattern).expect("static normalization pattern"),
                replacement,
            )
        })
        .collect()
    })
}

/// Mask dynamic values so near-identical messages share a key.
pub fn normalize_message(message: &str) -> String {
    let mut normalized = message.to_string();
    for (regex, replacement) in masks() {
        normalized = regex.replace_all(&normalized, *replacement).into_owned();
    }
    normalized.trim().to_string()
}

/// Lowercase, hyphen-separated, URL-safe, at most [`MAX_SLUG_LEN`] chars.
pub fn sanitize_slug(raw: &str) -> String {
    let mut slug = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_matches('-');
    let mut slug = slug[..slug.len().min(MAX_SLUG_LEN)].to_string();
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

/// Locally derived slug for a group the judge could not name.
pub fn fallback_slug(module: &str, key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(module.as_bytes());
    hasher.update([0u8]);
    hasher.update(key.as_bytes());
    let digest = hex::encode(hasher.finalize());

    let stem = sanitize_slug(&format!("{} {}", module, key));
    let stem = &stem[..stem.len().min(MAX_SLUG_LEN - 9)];
    let stem = stem.trim_end_matches('-');
    if stem.is_empty() {
        digest[..8].to_string()
    } else {
        format!("{}-{}", stem, &digest[..8])
    }
}

/// Group entries by normalized message and module, first-seen order.
pub fn group_entries(entries: &[LogEntry]) -> Vec<MessageGroup> {
    let mut groups: Vec<MessageGroup> = Vec::new();
    let mut index: HashMap<(String, String), usize> = HashMap::new();

    for entry in entries {
        let key = normalize_message(&entry.message);
        let slot = *index
            .entry((key.clone(), entry.module.clone()))
            .or_insert_with(|| {
                groups.push(MessageGroup {
                    key,
                    module: entry.module.clone(),
                    severity: entry.severity,
                    count: 0,
                    samples: Vec::new(),
                });
                groups.len() - 1
            });

        let group = &mut groups[slot];
        group.count += 1;
        group.severity = group.severity.max(entry.severity);
        if group.samples.len() < MAX_SAMPLES {
            group.samples.push(entry.message.clone());
        }
    }

    groups
}

/// Result of one extraction.
#[derive(Debug, Default)]
pub struct Extraction {
    pub clusters: Vec<LogCluster>,
    /// Judgment failures absorbed by falling back to structural groups
    pub errors: usize,
}

/// Turns a window of entries into a small, ordered set of clusters.
pub struct ClusterExtractor<'a> {
    judge: &'a dyn SemanticJudge,
    max_clusters: usize,
}

impl<'a> ClusterExtractor<'a> {
    pub fn new(judge: &'a dyn SemanticJudge, max_clusters: usize) -> Self {
        Self {
            judge,
            max_clusters,
        }
    }

    pub fn extract(&self, entries: &[LogEntry]) -> Extraction {
        let groups = group_entries(entries);
        if groups.is_empty() {
            return Extraction::default();
        }

        tracing::info!(
            entries = entries.len(),
            groups = groups.len(),
            "Grouped log entries"
        );

        let (mut clusters, errors) = match self.judge.cluster(&groups) {
            Ok(drafts) => (assemble(&groups, drafts), 0),
            Err(e) => {
                tracing::warn!(error = %e, "Semantic clustering failed, using structural groups");
                (assemble(&groups, Vec::new()), 1)
            }
        };

        // Stable: equal keys keep first-seen order.
        clusters.sort_by_key(|c| (c.severity.rank(), std::cmp::Reverse(c.occurrence_count)));
        if clusters.len() > self.max_clusters {
            tracing::info!(
                dropped = clusters.len() - self.max_clusters,
                "Cluster limit reached"
            );
            clusters.truncate(self.max_clusters);
        }

        Extraction { clusters, errors }
    }
}

struct PendingCluster {
    slug: String,
    title: String,
    summary: String,
    members: Vec<usize>,
}

/// Validate the judge's drafts against the groups and build clusters.
///
/// Each group lands in exactly one cluster: out-of-range and repeated
/// indexes are ignored, unassigned groups become clusters of their own, and
/// drafts sharing a slug are merged. Clusters come out in first-seen order.
fn assemble(groups: &[MessageGroup], drafts: Vec<ClusterDraft>) -> Vec<LogCluster> {
    let mut assigned = vec![false; groups.len()];
    let mut pending: Vec<PendingCluster> = Vec::new();

    for draft in drafts {
        let members: Vec<usize> = draft
            .groups
            .iter()
            .copied()
            .filter(|&i| {
                if i < groups.len() && !assigned[i] {
                    assigned[i] = true;
                    true
                } else {
                    false
                }
            })
            .collect();
        if members.is_empty() {
            continue;
        }

        let mut slug = sanitize_slug(&draft.slug);
        if slug.is_empty() {
            let first = &groups[members[0]];
            slug = fallback_slug(&first.module, &first.key);
        }

        match pending.iter_mut().find(|p| p.slug == slug) {
            Some(existing) => existing.members.extend(members),
            None => pending.push(PendingCluster {
                slug,
                title: draft.title,
                summary: draft.summary,
                members,
            }),
        }
    }

    for (i, group) in groups.iter().enumerate() {
        if !assigned[i] {
            pending.push(PendingCluster {
                slug: fallback_slug(&group.module, &group.key),
                title: group.key.chars().take(TITLE_CHARS).collect(),
                summary: group.key.clone(),
                members: vec![i],
            });
        }
    }

    for p in &mut pending {
        p.members.sort_unstable();
    }
    pending.sort_by_key(|p| p.members[0]);

    pending
        .into_iter()
        .map(|p| build_cluster(groups, p))
        .collect()
}

fn build_cluster(groups: &[MessageGroup], pending: PendingCluster) -> LogCluster {
    let members: Vec<&MessageGroup> = pending.members.iter().map(|&i| &groups[i]).collect();

    let mut modules: Vec<String> = Vec::new();
    let mut samples: Vec<String> = Vec::new();
    let mut severity = Severity::Warning;
    let mut occurrence_count = 0;
    for group in &members {
        if !modules.contains(&group.module) {
            modules.push(group.module.clone());
        }
        for sample in &group.samples {
            if samples.len() < MAX_SAMPLES {
                samples.push(sample.clone());
            }
        }
        severity = severity.max(group.severity);
        occurrence_count += group.count;
    }

    // Largest group wins; first-seen breaks ties.
    let representative = members
        .iter()
        .fold(None::<&&MessageGroup>, |best, g| match best {
            Some(b) if b.count >= g.count => Some(b),
            _ => Some(g),
        })
        .and_then(|g| g.samples.first().cloned())
        .unwrap_or_default();

    let summary = if pending.summary.trim().is_empty() {
        representative.clone()
    } else {
        pending.summary
    };
    let title = if pending.title.trim().is_empty() {
        pending.slug.replace('-', " ")
    } else {
        pending.title
    };

    LogCluster {
        slug: pending.slug,
        title,
        summary,
        representative_message: representative,
        sample_messages: samples,
        occurrence_count,
        modules,
        severity,
    }
}
