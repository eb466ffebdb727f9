//! Fix Generator.
//!
//! Collects candidate files under the planner's hinted directories, lets the
//! judge pick the most relevant few, and asks for a minimal patch. The result
//! is validated before it leaves this module: every change must target a
//! supplied, untruncated file and actually change it, and the reported
//! confidence must reach the configured minimum. Anything else comes back as
//! `not_fixable`.

use crate::config::{CheckoutConfig, RunConfig};
use crate::judge::SemanticJudge;
use crate::types::{CodeFix, ContextFile, LogCluster};
use crate::Result;
use std::collections::HashMap;
use std::path::Path;

pub const ARCHITECTURE_DOC_MAX_CHARS: usize = 8000;

/// Cut `text` to at most `max` characters.
pub fn truncate_chars(text: &str, max: usize) -> (String, bool) {
    match text.char_indices().nth(max) {
        Some((byte, _)) => (text[..byte].to_string(), true),
        None => (text.to_string(), false),
    }
}

/// Source files under `dirs` (relative to `root`) with one of `extensions`.
///
/// Returned paths are relative to `root`, `/`-separated, sorted and unique.
pub fn candidate_files(root: &Path, dirs: &[String], extensions: &[String]) -> Vec<String> {
    let escaped_root = glob::Pattern::escape(&root.to_string_lossy());
    let mut found = Vec::new();

    for dir in dirs {
        let dir = dir.trim_matches('/');
        for ext in extensions {
            let pattern = format!(
                "{}/{}/**/*.{}",
                escaped_root,
                glob::Pattern::escape(dir),
                ext.trim_start_matches('.')
            );
            let paths = match glob::glob(&pattern) {
                Ok(paths) => paths,
                Err(e) => {
                    tracing::warn!(pattern = %pattern, error = %e, "Invalid candidate pattern");
                    continue;
                }
            };
            for path in paths.flatten() {
                if !path.is_file() {
                    continue;
                }
                if let Ok(relative) = path.strip_prefix(root) {
                    let relative: Vec<String> = relative
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy().into_owned())
                        .collect();
                    found.push(relative.join("/"));
                }
            }
        }
    }

    found.sort();
    found.dedup();
    found
}

pub struct FixGenerator<'a> {
    judge: &'a dyn SemanticJudge,
    checkout: &'a CheckoutConfig,
    run: &'a RunConfig,
}

impl<'a> FixGenerator<'a> {
    pub fn new(
        judge: &'a dyn SemanticJudge,
        checkout: &'a CheckoutConfig,
        run: &'a RunConfig,
    ) -> Self {
        Self {
            judge,
            checkout,
            run,
        }
    }

    fn architecture_doc(&self) -> Option<String> {
        let path = self.checkout.path.join(&self.checkout.architecture_doc);
        let content = std::fs::read_to_string(&path).ok()?;
        let (mut text, truncated) = truncate_chars(&content, ARCHITECTURE_DOC_MAX_CHARS);
        if truncated {
            text.push_str("\n... (truncated)");
        }
        Some(text)
    }

    pub fn generate(&self, cluster: &LogCluster, hint_dirs: &[String]) -> Result<CodeFix> {
        let root = &self.checkout.path;
        let candidates = candidate_files(root, hint_dirs, &self.checkout.source_extensions);
        if candidates.is_empty() {
            return Ok(CodeFix::not_fixable(format!(
                "No source files were found under {}.",
                hint_dirs.join(", ")
            )));
        }

        let selected =
            self.judge
                .select_files(cluster, &candidates, self.run.max_context_files.max(1))?;
        tracing::info!(
            slug = %cluster.slug,
            candidates = candidates.len(),
            selected = selected.len(),
            "Selected context files"
        );

        let mut files = Vec::new();
        let mut originals: HashMap<String, String> = HashMap::new();
        for path in selected {
            match std::fs::read_to_string(root.join(&path)) {
                Ok(content) => {
                    let (text, truncated) = truncate_chars(&content, self.run.max_file_chars);
                    files.push(ContextFile {
                        path: path.clone(),
                        content: text,
                        truncated,
                    });
                    originals.insert(path, content);
                }
                Err(e) => tracing::warn!(path = %path, error = %e, "Skipping unreadable file"),
            }
        }
        if files.is_empty() {
            return Ok(CodeFix::not_fixable(
                "None of the relevant source files could be read.",
            ));
        }

        let architecture = self.architecture_doc();
        let fix = self
            .judge
            .generate_fix(cluster, &files, architecture.as_deref())?;

        Ok(self.validate(fix, &files, &originals))
    }

    fn validate(
        &self,
        mut fix: CodeFix,
        files: &[ContextFile],
        originals: &HashMap<String, String>,
    ) -> CodeFix {
        if !fix.is_fixable() {
            return fix;
        }
        if fix.confidence < self.run.min_fix_confidence {
            return CodeFix::not_fixable(format!(
                "Generated fix confidence {:.2} is below the minimum {:.2}. {}",
                fix.confidence, self.run.min_fix_confidence, fix.rationale
            ));
        }

        let mut seen = Vec::new();
        for change in &mut fix.changes {
            let Some(file) = files.iter().find(|f| f.path == change.path) else {
                return CodeFix::not_fixable(format!(
                    "The generated patch touches {}, which was not supplied as context.",
                    change.path
                ));
            };
            if file.truncated {
                return CodeFix::not_fixable(format!(
                    "The generated patch touches {}, which was too large to supply in full.",
                    change.path
                ));
            }
            if seen.contains(&change.path) {
                return CodeFix::not_fixable(format!(
                    "The generated patch changes {} more than once.",
                    change.path
                ));
            }
            seen.push(change.path.clone());
            if let Some(original) = originals.get(&change.path) {
                change.original = original.clone();
            }
        }

        fix.changes.retain(|c| c.original != c.modified);
        if fix.changes.is_empty() {
            return CodeFix::not_fixable(format!(
                "The model produced no effective change. {}",
                fix.rationale
            ));
        }
        if fix.title.trim().is_empty() {
            fix.title = "Fix recurring log error".to_string();
        }
        fix
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::judge::{ClusterDraft, FixabilityVerdict, MessageGroup, PatternDigest};
    use crate::types::{FileChange, Fixability, Severity};
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct PatchJudge {
        fix: CodeFix,
        supplied: Mutex<Vec<ContextFile>>,
        architecture: Mutex<Option<String>>,
    }

    impl PatchJudge {
        fn new(fix: CodeFix) -> Self {
            Self {
                fix,
                supplied: Mutex::new(Vec::new()),
                architecture: Mutex::new(None),
            }
        }
    }

    impl SemanticJudge for PatchJudge {
        fn cluster(&self, _groups: &[MessageGroup]) -> Result<Vec<ClusterDraft>> {
            unreachable!()
        }

        fn similarity(&self, _a: &PatternDigest, _b: &PatternDigest) -> Result<f64> {
            unreachable!()
        }

        fn classify_fixability(&self, _cluster: &LogCluster) -> Result<FixabilityVerdict> {
            unreachable!()
        }

        fn generate_fix(
            &self,
            _cluster: &LogCluster,
            files: &[ContextFile],
            architecture: Option<&str>,
        ) -> Result<CodeFix> {
            *self.supplied.lock().unwrap() = files.to_vec();
            *self.architecture.lock().unwrap() = architecture.map(str::to_string);
            Ok(self.fix.clone())
        }
    }

    fn cluster() -> LogCluster {
        LogCluster {
            slug: "null-ledger".to_string(),
            title: "Null ledger".to_string(),
            summary: "Null ledger".to_string(),
            representative_message: "null ledger".to_string(),
            sample_messages: vec!["null ledger".to_string()],
            occurrence_count: 1,
            modules: vec!["NetworkOPs".to_string()],
            severity: Severity::Error,
        }
    }

    fn fix_for(path: &str, modified: &str, confidence: f64) -> CodeFix {
        CodeFix {
            fixability: Fixability::Fixable,
            title: "Guard null ledger".to_string(),
            rationale: "pointer may be null".to_string(),
            confidence,
            changes: vec![FileChange {
                path: path.to_string(),
                original: String::new(),
                modified: modified.to_string(),
            }],
        }
    }

    fn checkout() -> (TempDir, CheckoutConfig) {
        let dir = TempDir::new().unwrap();
        let misc = dir.path().join("src/app/misc");
        std::fs::create_dir_all(misc.join("detail")).unwrap();
        std::fs::write(misc.join("NetworkOPs.cpp"), "use(ledger);\n").unwrap();
        std::fs::write(misc.join("detail/Helper.h"), "#pragma once\n").unwrap();
        std::fs::write(misc.join("notes.txt"), "ignore me").unwrap();
        std::fs::create_dir_all(dir.path().join("docs")).unwrap();
        std::fs::write(dir.path().join("docs/Architecture.md"), "# Layout").unwrap();

        let config = CheckoutConfig {
            path: dir.path().to_path_buf(),
            ..CheckoutConfig::default()
        };
        (dir, config)
    }

    #[test]
    fn finds_candidates_by_extension() {
        let (_dir, config) = checkout();
        let files = candidate_files(
            &config.path,
            &["src/app/misc/".to_string()],
            &config.source_extensions,
        );
        assert_eq!(
            files,
            vec!["src/app/misc/NetworkOPs.cpp", "src/app/misc/detail/Helper.h"]
        );
        assert!(candidate_files(&config.path, &["missing/".to_string()], &config.source_extensions)
            .is_empty());
    }

    #[test]
    fn accepted_fix_carries_original_content() {
        let (_dir, config) = checkout();
        let run = RunConfig::default();
        let judge = PatchJudge::new(fix_for(
            "src/app/misc/NetworkOPs.cpp",
            "if (ledger) use(ledger);\n",
            0.9,
        ));

        let fix = FixGenerator::new(&judge, &config, &run)
            .generate(&cluster(), &["src/app/misc/".to_string()])
            .unwrap();

        assert!(fix.is_fixable());
        assert_eq!(fix.changes[0].original, "use(ledger);\n");
        assert_eq!(judge.supplied.lock().unwrap().len(), 2);
        assert_eq!(judge.architecture.lock().unwrap().as_deref(), Some("# Layout"));
    }

    #[test]
    fn patch_outside_context_is_rejected() {
        let (_dir, config) = checkout();
        let run = RunConfig::default();
        let judge = PatchJudge::new(fix_for("src/other/Evil.cpp", "boom", 0.9));

        let fix = FixGenerator::new(&judge, &config, &run)
            .generate(&cluster(), &["src/app/misc/".to_string()])
            .unwrap();
        assert!(!fix.is_fixable());
        assert!(fix.rationale.contains("src/other/Evil.cpp"));
    }

    #[test]
    fn low_confidence_is_not_fixable() {
        let (_dir, config) = checkout();
        let run = RunConfig::default();
        let judge = PatchJudge::new(fix_for("src/app/misc/NetworkOPs.cpp", "x", 0.2));

        let fix = FixGenerator::new(&judge, &config, &run)
            .generate(&cluster(), &["src/app/misc/".to_string()])
            .unwrap();
        assert!(!fix.is_fixable());
    }

    #[test]
    fn unchanged_file_is_not_fixable() {
        let (_dir, config) = checkout();
        let run = RunConfig::default();
        let judge = PatchJudge::new(fix_for("src/app/misc/NetworkOPs.cpp", "use(ledger);\n", 0.9));

        let fix = FixGenerator::new(&judge, &config, &run)
            .generate(&cluster(), &["src/app/misc/".to_string()])
            .unwrap();
        assert!(!fix.is_fixable());
    }

    #[test]
    fn truncated_file_cannot_be_patched() {
        let (_dir, config) = checkout();
        let run = RunConfig {
            max_file_chars: 4,
            ..RunConfig::default()
        };
        let judge = PatchJudge::new(fix_for("src/app/misc/NetworkOPs.cpp", "fixed", 0.9));

        let fix = FixGenerator::new(&judge, &config, &run)
            .generate(&cluster(), &["src/app/misc/".to_string()])
            .unwrap();
        assert!(!fix.is_fixable());
        assert!(judge.supplied.lock().unwrap()[0].truncated);
    }

    #[test]
    fn no_candidates_is_not_fixable() {
        let (_dir, config) = checkout();
        let run = RunConfig::default();
        let judge = PatchJudge::new(fix_for("a", "b", 0.9));
        let fix = FixGenerator::new(&judge, &config, &run)
            .generate(&cluster(), &["src/nowhere/".to_string()])
            .unwrap();
        assert!(!fix.is_fixable());
        assert!(judge.supplied.lock().unwrap().is_empty());
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), ("hé".to_string(), true));
        assert_eq!(truncate_chars("hi", 5), ("hi".to_string(), false));
    }
}
