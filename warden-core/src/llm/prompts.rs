//! Prompt text for the language-model judge.
//!
//! Every system prompt asks for a single JSON object; the shapes are parsed
//! in [`super::judge`].

use crate::judge::{MessageGroup, PatternDigest};
use crate::types::{ContextFile, LogCluster};
use std::fmt::Write;

/// Candidate paths listed in a file-selection prompt.
const MAX_CANDIDATES_LISTED: usize = 200;

pub const CLUSTER_SYSTEM: &str = "\
You are a log analysis expert for a blockchain ledger daemon (an XRPL fork).

Group the numbered log message groups into distinct problem clusters. Messages \
that differ only by dynamic values (ids, hashes, sequence numbers, peers) belong \
to the same cluster; messages with different root causes do not.

Every group index must appear in exactly one cluster.

Slug format: lowercase, hyphens, URL-safe, at most 60 characters, derived from \
the root cause rather than literal wording (e.g. \"shamap-missing-node\").

Return only JSON: {\"clusters\": [{\"slug\": str, \"title\": str, \"summary\": str, \
\"groups\": [int]}]}";

pub const SIMILARITY_SYSTEM: &str = "\
You compare two problems observed in ledger daemon logs and judge whether they \
share the same root cause. Wording, dynamic values and minor module differences \
do not matter; the underlying defect does.

Return only JSON: {\"score\": number between 0.0 and 1.0, \"reason\": str}";

pub const CLASSIFY_SYSTEM: &str = "\
You triage problems observed in ledger daemon logs.

Set fixable=true for genuine bugs, persistent errors or recurring issues that \
indicate a code problem. Set fixable=false for transient or environmental issues: \
one-time startup noise, expected warnings during provisioning, infrequent \
non-actionable warnings, network-level issues outside the codebase (remote peer \
disconnects, timeouts).

Return only JSON: {\"fixable\": bool, \"rationale\": str}";

pub const SELECT_FILES_SYSTEM: &str = "\
You are a C++ source code expert for a ledger daemon (an XRPL fork).

Given a log error cluster and a list of candidate source files, select the most \
relevant files for diagnosing and fixing the issue: files that emit the log \
messages, contain the logic that could cause the error, or would need modification \
to fix it. Only choose paths from the list.

Return only JSON: {\"files\": [{\"path\": str, \"reason\": str}]}";

pub const GENERATE_FIX_SYSTEM: &str = "\
You are an expert C++20 developer working on a ledger daemon (an XRPL fork).

Generate a minimal, safe fix for the described problem:
- Make the smallest change necessary to fix the root cause.
- Only modify the files provided; never invent new paths.
- Preserve existing code style (JLOG macros for logging, RAII, C++20 features).
- Do not introduce new dependencies or change unrelated code.
- Do not attempt to compile or run anything.
- If no safe fix is possible, set fixable=false and explain why.

Each change carries the complete new content of the file.

Return only JSON: {\"fixable\": bool, \"title\": str (imperative PR title), \
\"rationale\": str, \"confidence\": number between 0.0 and 1.0, \
\"changes\": [{\"path\": str, \"modified\": str}]}";

fn push_cluster(out: &mut String, cluster: &LogCluster) {
    let _ = writeln!(out, "Slug: {}", cluster.slug);
    let _ = writeln!(out, "Title: {}", cluster.title);
    let _ = writeln!(out, "Modules: {}", cluster.modules.join(", "));
    let _ = writeln!(out, "Severity: {}", cluster.severity);
    let _ = writeln!(out, "Occurrences: {}", cluster.occurrence_count);
    let _ = writeln!(out, "Summary: {}", cluster.summary);
    out.push_str("Sample messages:\n");
    for sample in &cluster.sample_messages {
        let _ = writeln!(out, "  - {}", sample);
    }
}

pub fn cluster_prompt(groups: &[MessageGroup]) -> String {
    let mut out = String::from("Log message groups:\n\n");
    for (index, group) in groups.iter().enumerate() {
        let _ = writeln!(
            out,
            "[{}] [{}] module={} occurrences={}",
            index,
            group.severity.as_str().to_uppercase(),
            group.module,
            group.count
        );
        for sample in &group.samples {
            let _ = writeln!(out, "  | {}", sample);
        }
        out.push('\n');
    }
    out
}

pub fn similarity_prompt(a: &PatternDigest, b: &PatternDigest) -> String {
    let mut out = String::new();
    for (label, digest) in [("A", a), ("B", b)] {
        let _ = writeln!(out, "Problem {}:", label);
        let _ = writeln!(out, "  Module: {}", digest.module);
        let _ = writeln!(out, "  Summary: {}", digest.summary);
        let _ = writeln!(out, "  Sample: {}", digest.sample_message);
        out.push('\n');
    }
    out
}

pub fn classify_prompt(cluster: &LogCluster) -> String {
    let mut out = String::from("Problem cluster:\n");
    push_cluster(&mut out, cluster);
    out
}

pub fn select_files_prompt(cluster: &LogCluster, candidates: &[String], limit: usize) -> String {
    let mut out = format!("Select at most {} files.\n\nProblem cluster:\n", limit);
    push_cluster(&mut out, cluster);
    out.push_str("\nCandidate source files:\n");
    for path in candidates.iter().take(MAX_CANDIDATES_LISTED) {
        let _ = writeln!(out, "{}", path);
    }
    out
}

pub fn generate_fix_prompt(
    environment: &str,
    cluster: &LogCluster,
    files: &[ContextFile],
    architecture: Option<&str>,
) -> String {
    let mut out = format!(
        "Environment: {}\nBranch: agent-{}/{}\n\n",
        environment, environment, cluster.slug
    );
    out.push_str("Architecture context:\n");
    out.push_str(architecture.unwrap_or("(architecture document not found)"));
    out.push_str("\n\nProblem cluster:\n");
    push_cluster(&mut out, cluster);
    out.push_str("\nSource files:\n");
    for file in files {
        let _ = writeln!(out, "--- {} ---", file.path);
        out.push_str(&file.content);
        if file.truncated {
            out.push_str("\n... (truncated; do not modify this file)");
        }
        out.push('\n');
    }
    out
}
