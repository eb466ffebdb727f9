//! End-to-end tests for the run orchestrator
//!
//! Every collaborator is an in-process double: a fixed log window, a replay
//! judge with scripted answers, and recording source-control and notifier
//! fakes. The Pattern Store is a real in-memory SQLite database.

use chrono::Utc;
use std::collections::BTreeMap;
use std::fs;
use std::sync::Mutex;
use tempfile::TempDir;
use warden_core::judge::{ClusterDraft, FixabilityVerdict, MessageGroup, PatternDigest};
use warden_core::logs::{LogQuery, LogSource};
use warden_core::notify::Notifier;
use warden_core::source_control::{PullRequest, SourceControl};
use warden_core::{
    ClusterOutcome, CodeFix, Config, ContextFile, Database, Error, FileChange, Fixability,
    LogCluster, LogEntry, Orchestrator, PatternStatus, ProcessedPattern, Result, RunSummary,
    SemanticJudge, Severity,
};

const NULL_LEDGER_SLUG: &str = "ledgermaster-null-ledger-deref";

// ============================================
// Doubles
// ============================================

struct StaticSource(Vec<LogEntry>);

impl LogSource for StaticSource {
    fn query(&self, _query: &LogQuery) -> Result<Vec<LogEntry>> {
        Ok(self.0.clone())
    }
}

struct DownSource;

impl LogSource for DownSource {
    fn query(&self, _query: &LogQuery) -> Result<Vec<LogEntry>> {
        Err(Error::SourceUnavailable("connection refused".to_string()))
    }
}

/// Scripted judge: message substrings map to slugs, slug pairs map to scores.
#[derive(Default)]
struct ReplayJudge {
    slugs: Vec<(&'static str, &'static str)>,
    scores: Vec<(&'static str, &'static str, f64)>,
    benign: Vec<&'static str>,
    calls: Mutex<Vec<String>>,
}

impl ReplayJudge {
    fn with_slugs(slugs: Vec<(&'static str, &'static str)>) -> Self {
        Self {
            slugs,
            ..Default::default()
        }
    }

    fn calls_to(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }
}

impl SemanticJudge for ReplayJudge {
    fn cluster(&self, groups: &[MessageGroup]) -> Result<Vec<ClusterDraft>> {
        self.calls.lock().unwrap().push("cluster".to_string());
        let mut drafts: Vec<ClusterDraft> = Vec::new();
        for (i, group) in groups.iter().enumerate() {
            let Some((_, slug)) = self.slugs.iter().find(|(needle, _)| group.key.contains(needle))
            else {
                continue;
            };
            match drafts.iter_mut().find(|d| d.slug == *slug) {
                Some(draft) => draft.groups.push(i),
                None => drafts.push(ClusterDraft {
                    slug: slug.to_string(),
                    title: slug.replace('-', " "),
                    summary: format!("{} in {}", slug, group.module),
                    groups: vec![i],
                }),
            }
        }
        Ok(drafts)
    }

    fn similarity(&self, a: &PatternDigest, b: &PatternDigest) -> Result<f64> {
        self.calls.lock().unwrap().push("similarity".to_string());
        Ok(self
            .scores
            .iter()
            .find(|(x, y, _)| (a.slug == *x && b.slug == *y) || (a.slug == *y && b.slug == *x))
            .map(|(_, _, score)| *score)
            .unwrap_or(0.0))
    }

    fn classify_fixability(&self, cluster: &LogCluster) -> Result<FixabilityVerdict> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("classify:{}", cluster.slug));
        let fixable = !self.benign.iter().any(|b| *b == cluster.slug);
        Ok(FixabilityVerdict {
            fixable,
            rationale: if fixable {
                "missing null check".to_string()
            } else {
                "expected during bootstrap".to_string()
            },
        })
    }

    fn generate_fix(
        &self,
        cluster: &LogCluster,
        files: &[ContextFile],
        _architecture: Option<&str>,
    ) -> Result<CodeFix> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("fix:{}", cluster.slug));
        let file = &files[0];
        Ok(CodeFix {
            fixability: Fixability::Fixable,
            title: format!("Guard against {}", cluster.title),
            rationale: "Check the pointer before use.".to_string(),
            confidence: 0.9,
            changes: vec![FileChange {
                path: file.path.clone(),
                original: file.content.clone(),
                modified: format!("{}// guard for {}\n", file.content, cluster.slug),
            }],
        })
    }
}

#[derive(Default)]
struct RecordingScm {
    branches: Mutex<Vec<String>>,
    open_prs: Mutex<Vec<(String, String)>>,
    requests: Mutex<Vec<PullRequest>>,
    reject_credentials: bool,
    /// Reject the commit with a conflict-shaped error and create nothing
    reject_commit: bool,
}

impl RecordingScm {
    fn with_open_pr(branch: &str, url: &str) -> Self {
        let scm = Self::default();
        scm.branches.lock().unwrap().push(branch.to_string());
        scm.open_prs
            .lock()
            .unwrap()
            .push((branch.to_string(), url.to_string()));
        scm
    }

    fn with_branch(branch: &str) -> Self {
        let scm = Self::default();
        scm.branches.lock().unwrap().push(branch.to_string());
        scm
    }

    fn requests(&self) -> Vec<PullRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl SourceControl for RecordingScm {
    fn branch_exists(&self, branch: &str) -> Result<bool> {
        Ok(self.branches.lock().unwrap().iter().any(|b| b == branch))
    }

    fn open_pr_for_branch(&self, branch: &str) -> Result<Option<String>> {
        if self.reject_credentials {
            return Err(Error::Auth("401 Bad credentials".to_string()));
        }
        Ok(self
            .open_prs
            .lock()
            .unwrap()
            .iter()
            .find(|(b, _)| b == branch)
            .map(|(_, url)| url.clone()))
    }

    fn create_branch_and_commit(
        &self,
        branch: &str,
        _base: &str,
        _message: &str,
        _changes: &[FileChange],
    ) -> Result<()> {
        if self.reject_commit {
            return Err(Error::Conflict(
                "create tree returned 422: Invalid tree info".to_string(),
            ));
        }
        let mut branches = self.branches.lock().unwrap();
        if branches.iter().any(|b| b == branch) {
            return Err(Error::Conflict("Reference already exists".to_string()));
        }
        branches.push(branch.to_string());
        Ok(())
    }

    fn open_pull_request(&self, request: &PullRequest) -> Result<String> {
        let mut requests = self.requests.lock().unwrap();
        let url = format!(
            "https://github.com/postfiatorg/postfiatd/pull/{}",
            100 + requests.len()
        );
        requests.push(request.clone());
        self.open_prs
            .lock()
            .unwrap()
            .push((request.branch.clone(), url.clone()));
        Ok(url)
    }
}

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<(String, String)>>,
    fail: bool,
}

impl Notifier for RecordingNotifier {
    fn send(&self, to: &str, subject: &str, _html: &str) -> Result<()> {
        if self.fail {
            return Err(Error::SendFailure("503 from mailer".to_string()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), subject.to_string()));
        Ok(())
    }
}

// ============================================
// Harness
// ============================================

struct Harness {
    _checkout: TempDir,
    config: Config,
    db: Database,
}

impl Harness {
    fn new() -> Self {
        warden_core::logging::init_test();

        let checkout = TempDir::new().unwrap();
        let root = checkout.path();
        fs::create_dir_all(root.join("src/ledger")).unwrap();
        fs::create_dir_all(root.join("src/overlay")).unwrap();
        fs::write(
            root.join("src/ledger/LedgerMaster.cpp"),
            "void LedgerMaster::getClosedLedger() {\n    use(ledger_);\n}\n",
        )
        .unwrap();
        fs::write(
            root.join("src/overlay/PeerImp.cpp"),
            "void PeerImp::close() {}\n",
        )
        .unwrap();

        let mut config = Config::default();
        config.checkout.path = root.to_path_buf();
        config.checkout.sync_before_run = false;
        config.module_hints.paths = BTreeMap::from([
            ("LedgerMaster".to_string(), vec!["src/ledger/".to_string()]),
            ("Overlay".to_string(), vec!["src/overlay/".to_string()]),
        ]);
        config.notify.enabled = true;
        config.notify.to = Some("ops@postfiat.org".to_string());
        config.run.max_clusters = 10;
        config.run.max_prs_per_run = 3;

        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();

        Self {
            _checkout: checkout,
            config,
            db,
        }
    }

    fn run(
        &self,
        source: &dyn LogSource,
        judge: &ReplayJudge,
        scm: &RecordingScm,
        notifier: &RecordingNotifier,
    ) -> Result<RunSummary> {
        Orchestrator::new(&self.config, &self.db, source, judge, scm, Some(notifier)).run_once()
    }

    fn status(&self, slug: &str) -> Option<PatternStatus> {
        self.db.get_pattern(slug).unwrap().map(|p| p.status)
    }
}

fn entry(module: &str, severity: Severity, message: &str) -> LogEntry {
    LogEntry {
        timestamp: Utc::now(),
        hostname: "val-1".to_string(),
        service_type: "validator".to_string(),
        module: module.to_string(),
        severity,
        message: message.to_string(),
    }
}

fn rpc_timeouts() -> StaticSource {
    StaticSource(
        (0..50)
            .map(|_| entry("Overlay", Severity::Warning, "RPC timeout to peer X"))
            .collect(),
    )
}

fn null_ledger_errors() -> StaticSource {
    StaticSource(
        (0..3)
            .map(|_| {
                entry(
                    "LedgerMaster",
                    Severity::Error,
                    "null ledger pointer dereferenced in getClosedLedger",
                )
            })
            .collect(),
    )
}

fn null_ledger_judge() -> ReplayJudge {
    ReplayJudge::with_slugs(vec![("null ledger", NULL_LEDGER_SLUG)])
}

fn null_ledger_branch() -> String {
    format!("agent-testnet/{}", NULL_LEDGER_SLUG)
}

// ============================================
// Scenarios
// ============================================

#[test]
fn benign_timeouts_notify_once_and_open_nothing() {
    let harness = Harness::new();
    let judge = ReplayJudge::with_slugs(vec![("RPC timeout", "rpc-timeout-to-peer")]);
    let scm = RecordingScm::default();
    let notifier = RecordingNotifier::default();

    let summary = harness
        .run(&rpc_timeouts(), &judge, &scm, &notifier)
        .unwrap();

    assert_eq!(summary.record.clusters_found, 1);
    assert_eq!(summary.record.prs_created, 0);
    assert_eq!(summary.record.errors, 0);
    assert_eq!(summary.clusters[0].outcome, ClusterOutcome::Notified);

    let sent = notifier.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "ops@postfiat.org");
    assert!(sent[0].1.ends_with("(no fix needed)"));

    assert!(scm.requests().is_empty());
    assert_eq!(
        harness.status("rpc-timeout-to-peer"),
        Some(PatternStatus::NotifiedBenign)
    );
    // transient markers decide before the model is asked
    assert_eq!(judge.calls_to("classify"), 0);

    let snapshots = harness.db.snapshots_for_run(&summary.record.id).unwrap();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].occurrence_count, 50);
    assert_eq!(snapshots[0].outcome, "notified");
}

#[test]
fn new_fixable_error_opens_one_pull_request() {
    let harness = Harness::new();
    let judge = null_ledger_judge();
    let scm = RecordingScm::default();
    let notifier = RecordingNotifier::default();

    let summary = harness
        .run(&null_ledger_errors(), &judge, &scm, &notifier)
        .unwrap();

    assert_eq!(summary.record.prs_created, 1);
    assert_eq!(summary.clusters[0].outcome, ClusterOutcome::PrOpened);

    let requests = scm.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].branch, null_ledger_branch());
    assert_eq!(requests[0].base, "main");
    assert!(requests[0].body.contains(NULL_LEDGER_SLUG));
    assert!(requests[0].body.contains("src/ledger/LedgerMaster.cpp"));

    let pattern = harness.db.get_pattern(NULL_LEDGER_SLUG).unwrap().unwrap();
    assert_eq!(pattern.status, PatternStatus::FixOpened);
    assert_eq!(pattern.pr_url.as_deref(), summary.clusters[0].pr_url.as_deref());
    assert_eq!(pattern.branch, Some(null_ledger_branch()));
    assert!(notifier.sent.lock().unwrap().is_empty());
}

#[test]
fn recurring_error_is_a_duplicate_on_the_next_run() {
    let harness = Harness::new();
    let judge = null_ledger_judge();
    let scm = RecordingScm::default();
    let notifier = RecordingNotifier::default();

    harness
        .run(&null_ledger_errors(), &judge, &scm, &notifier)
        .unwrap();
    let second = harness
        .run(&null_ledger_errors(), &judge, &scm, &notifier)
        .unwrap();

    assert_eq!(second.clusters[0].outcome, ClusterOutcome::Duplicate);
    assert_eq!(second.record.prs_created, 0);
    assert_eq!(scm.requests().len(), 1);
    assert_eq!(scm.branches.lock().unwrap().len(), 1);
    assert!(notifier.sent.lock().unwrap().is_empty());
    assert_eq!(judge.calls_to("fix:"), 1);
    // exact slug matches never reach the model
    assert_eq!(judge.calls_to("similarity"), 0);
}

#[test]
fn pr_cap_defers_the_remaining_fixable_clusters() {
    let harness = Harness::new();
    let judge = ReplayJudge::default();
    let scm = RecordingScm::default();
    let notifier = RecordingNotifier::default();
    let source = StaticSource(
        ['A', 'B', 'C', 'D', 'E']
            .iter()
            .map(|c| {
                entry(
                    "LedgerMaster",
                    Severity::Error,
                    &format!("ledger invariant {} violated", c),
                )
            })
            .collect(),
    );

    let summary = harness.run(&source, &judge, &scm, &notifier).unwrap();

    assert_eq!(summary.record.clusters_found, 5);
    assert_eq!(summary.record.prs_created, 3);
    assert_eq!(summary.count(ClusterOutcome::PrOpened), 3);
    assert_eq!(summary.count(ClusterOutcome::Deferred), 2);
    assert_eq!(scm.requests().len(), 3);
    assert_eq!(harness.db.list_patterns().unwrap().len(), 3);

    for report in &summary.clusters {
        let recorded = harness.status(&report.slug).is_some();
        assert_eq!(recorded, report.outcome == ClusterOutcome::PrOpened);
    }

    let snapshots = harness.db.snapshots_for_run(&summary.record.id).unwrap();
    assert_eq!(snapshots.len(), 5);
    assert_eq!(
        snapshots.iter().filter(|s| s.outcome == "deferred").count(),
        2
    );

    // deferred clusters are picked up by the next run
    let next = harness.run(&source, &judge, &scm, &notifier).unwrap();
    assert_eq!(next.record.prs_created, 2);
    assert_eq!(next.count(ClusterOutcome::Duplicate), 3);
    assert_eq!(harness.db.list_patterns().unwrap().len(), 5);
}

#[test]
fn run_record_is_written_complete() {
    let harness = Harness::new();
    let judge = null_ledger_judge();
    let scm = RecordingScm::default();
    let notifier = RecordingNotifier::default();

    let summary = harness
        .run(&null_ledger_errors(), &judge, &scm, &notifier)
        .unwrap();

    let stored = harness.db.get_run(&summary.record.id).unwrap();
    assert_eq!(stored, Some(summary.record.clone()));
    assert!(summary.record.duration_seconds >= 0.0);
    assert_eq!(harness.db.list_runs(10).unwrap().len(), 1);
}

#[test]
fn empty_window_records_an_empty_run() {
    let harness = Harness::new();
    let judge = ReplayJudge::default();
    let scm = RecordingScm::default();
    let notifier = RecordingNotifier::default();

    let summary = harness
        .run(&StaticSource(Vec::new()), &judge, &scm, &notifier)
        .unwrap();

    assert_eq!(summary.record.clusters_found, 0);
    assert_eq!(summary.record.errors, 0);
    assert_eq!(judge.calls_to("cluster"), 0);
    assert!(harness.db.get_run(&summary.record.id).unwrap().is_some());
}

#[test]
fn existing_open_pr_is_reused_without_regenerating() {
    let harness = Harness::new();
    let judge = null_ledger_judge();
    let existing_url = "https://github.com/postfiatorg/postfiatd/pull/7";
    let scm = RecordingScm::with_open_pr(&null_ledger_branch(), existing_url);
    let notifier = RecordingNotifier::default();

    let summary = harness
        .run(&null_ledger_errors(), &judge, &scm, &notifier)
        .unwrap();

    assert_eq!(summary.clusters[0].outcome, ClusterOutcome::PrExisting);
    assert_eq!(summary.record.prs_created, 0);
    assert!(scm.requests().is_empty());
    assert_eq!(judge.calls_to("fix:"), 0);

    let pattern = harness.db.get_pattern(NULL_LEDGER_SLUG).unwrap().unwrap();
    assert_eq!(pattern.status, PatternStatus::FixOpened);
    assert_eq!(pattern.pr_url.as_deref(), Some(existing_url));
}

#[test]
fn orphaned_branch_is_not_republished() {
    let harness = Harness::new();
    let judge = null_ledger_judge();
    let scm = RecordingScm::with_branch(&null_ledger_branch());
    let notifier = RecordingNotifier::default();

    let summary = harness
        .run(&null_ledger_errors(), &judge, &scm, &notifier)
        .unwrap();

    assert_eq!(summary.clusters[0].outcome, ClusterOutcome::BranchOrphaned);
    assert!(scm.requests().is_empty());
    assert_eq!(
        harness.status(NULL_LEDGER_SLUG),
        Some(PatternStatus::DuplicateIgnored)
    );
}

#[test]
fn rejected_commit_without_branch_stays_unrecorded() {
    let harness = Harness::new();
    let judge = null_ledger_judge();
    let scm = RecordingScm {
        reject_commit: true,
        ..Default::default()
    };
    let notifier = RecordingNotifier::default();

    let summary = harness
        .run(&null_ledger_errors(), &judge, &scm, &notifier)
        .unwrap();

    assert_eq!(summary.clusters[0].outcome, ClusterOutcome::Failed);
    assert_eq!(summary.record.errors, 1);
    assert_eq!(summary.record.prs_created, 0);
    assert_eq!(harness.status(NULL_LEDGER_SLUG), None);

    // the next run with a healthy host publishes the fix
    let healthy = RecordingScm::default();
    let retry = harness
        .run(&null_ledger_errors(), &judge, &healthy, &notifier)
        .unwrap();
    assert_eq!(retry.clusters[0].outcome, ClusterOutcome::PrOpened);
    assert_eq!(
        harness.status(NULL_LEDGER_SLUG),
        Some(PatternStatus::FixOpened)
    );
}

#[test]
fn semantic_match_against_stored_pattern_is_a_duplicate() {
    let harness = Harness::new();
    harness
        .db
        .record_pattern(&ProcessedPattern {
            slug: "ledger-null-deref-old".to_string(),
            status: PatternStatus::FixOpened,
            pr_url: Some("https://github.com/postfiatorg/postfiatd/pull/3".to_string()),
            branch: Some("agent-testnet/ledger-null-deref-old".to_string()),
            summary: "Null ledger dereference while closing".to_string(),
            module: "LedgerMaster".to_string(),
            sample_message: "null ledger pointer dereferenced".to_string(),
            created_at: Utc::now(),
        })
        .unwrap();

    let mut judge = null_ledger_judge();
    judge.scores = vec![(NULL_LEDGER_SLUG, "ledger-null-deref-old", 0.93)];
    let scm = RecordingScm::default();
    let notifier = RecordingNotifier::default();

    let summary = harness
        .run(&null_ledger_errors(), &judge, &scm, &notifier)
        .unwrap();

    assert_eq!(summary.clusters[0].outcome, ClusterOutcome::Duplicate);
    assert!(scm.requests().is_empty());
    assert_eq!(
        harness.status(NULL_LEDGER_SLUG),
        Some(PatternStatus::DuplicateIgnored)
    );
}

#[test]
fn model_benign_verdict_sends_notification() {
    let harness = Harness::new();
    let mut judge = null_ledger_judge();
    judge.benign = vec![NULL_LEDGER_SLUG];
    let scm = RecordingScm::default();
    let notifier = RecordingNotifier::default();

    let summary = harness
        .run(&null_ledger_errors(), &judge, &scm, &notifier)
        .unwrap();

    assert_eq!(summary.clusters[0].outcome, ClusterOutcome::Notified);
    assert_eq!(notifier.sent.lock().unwrap().len(), 1);
    assert_eq!(judge.calls_to("fix:"), 0);
    assert_eq!(
        harness.status(NULL_LEDGER_SLUG),
        Some(PatternStatus::NotifiedBenign)
    );
}

#[test]
fn failed_notification_leaves_pattern_for_retry() {
    let harness = Harness::new();
    let judge = ReplayJudge::with_slugs(vec![("RPC timeout", "rpc-timeout-to-peer")]);
    let scm = RecordingScm::default();
    let notifier = RecordingNotifier {
        fail: true,
        ..Default::default()
    };

    let summary = harness
        .run(&rpc_timeouts(), &judge, &scm, &notifier)
        .unwrap();

    assert_eq!(summary.clusters[0].outcome, ClusterOutcome::Failed);
    assert_eq!(summary.record.errors, 1);
    assert_eq!(harness.status("rpc-timeout-to-peer"), None);
}

#[test]
fn deadline_leaves_clusters_unreached() {
    let mut harness = Harness::new();
    harness.config.run.deadline_secs = 0;
    let judge = null_ledger_judge();
    let scm = RecordingScm::default();
    let notifier = RecordingNotifier::default();

    let summary = harness
        .run(&null_ledger_errors(), &judge, &scm, &notifier)
        .unwrap();

    assert!(summary.deadline_reached);
    assert_eq!(summary.record.clusters_found, 1);
    assert_eq!(summary.count(ClusterOutcome::NotReached), 1);
    assert!(harness.db.list_patterns().unwrap().is_empty());
    assert!(scm.requests().is_empty());

    let snapshots = harness.db.snapshots_for_run(&summary.record.id).unwrap();
    assert_eq!(snapshots[0].outcome, "not_reached");
}

#[test]
fn unreachable_log_store_aborts_with_a_run_record() {
    let harness = Harness::new();
    let judge = ReplayJudge::default();
    let scm = RecordingScm::default();
    let notifier = RecordingNotifier::default();

    let err = harness
        .run(&DownSource, &judge, &scm, &notifier)
        .unwrap_err();
    assert!(matches!(err, Error::SourceUnavailable(_)));

    let runs = harness.db.list_runs(10).unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].errors, 1);
    assert_eq!(runs[0].clusters_found, 0);
    assert_eq!(judge.calls_to("cluster"), 0);
}

#[test]
fn rejected_credentials_abort_the_run() {
    let harness = Harness::new();
    let judge = null_ledger_judge();
    let scm = RecordingScm {
        reject_credentials: true,
        ..Default::default()
    };
    let notifier = RecordingNotifier::default();

    let err = harness
        .run(&null_ledger_errors(), &judge, &scm, &notifier)
        .unwrap_err();
    assert!(matches!(err, Error::Auth(_)));

    let runs = harness.db.list_runs(10).unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].errors, 1);
    let snapshots = harness.db.snapshots_for_run(&runs[0].id).unwrap();
    assert_eq!(snapshots[0].outcome, "error");
    assert_eq!(harness.status(NULL_LEDGER_SLUG), None);
}
