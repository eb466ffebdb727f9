//! Run Orchestrator.
//!
//! One call to [`Orchestrator::run_once`] is one full cycle:
//!
//! ```text
//! EXTRACTED ─┬─ DUPLICATE                                   (terminal)
//!            └─ NEW ── PLANNED ─┬─ FIXABLE ── FIX_GENERATED ── PR_OPENED
//!                               └─ BENIGN ── NOTIFIED
//! ```
//!
//! Clusters are handled one at a time in extractor order. A pattern is
//! recorded only after its cluster's action has been carried out; clusters
//! deferred by the PR cap, cut off by the deadline, or failed with a
//! per-cluster error stay unrecorded and are reconsidered next run. The run
//! record and its snapshots are written once, together, at the end.

use crate::checkout;
use crate::cluster::ClusterExtractor;
use crate::config::Config;
use crate::db::Database;
use crate::dedup::{DedupDecision, Deduplicator};
use crate::fixgen::FixGenerator;
use crate::judge::SemanticJudge;
use crate::logs::{LogQuery, LogSource};
use crate::notify::Notifier;
use crate::planner::{FixPlanner, PlanDecision};
use crate::publisher::{ExistingPublication, PublishOutcome, PublishSettings, Publisher};
use crate::source_control::SourceControl;
use crate::types::{LogCluster, LogSnapshot, PatternStatus, ProcessedPattern, RunRecord};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

/// Terminal state of one cluster within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterOutcome {
    /// Matched a stored pattern; nothing done
    Duplicate,
    /// A pull request was opened by this run
    PrOpened,
    /// An open pull request for the slug already existed
    PrExisting,
    /// The slug's branch exists without an open pull request
    BranchOrphaned,
    /// Benign or not fixable; a human was notified
    Notified,
    /// Fixable, but the per-run PR cap was reached
    Deferred,
    /// The soft deadline passed before this cluster was reached
    NotReached,
    /// Processing failed; counted as a run error
    Failed,
}

impl ClusterOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterOutcome::Duplicate => "duplicate",
            ClusterOutcome::PrOpened => "pr_opened",
            ClusterOutcome::PrExisting => "pr_existing",
            ClusterOutcome::BranchOrphaned => "branch_orphaned",
            ClusterOutcome::Notified => "notified",
            ClusterOutcome::Deferred => "deferred",
            ClusterOutcome::NotReached => "not_reached",
            ClusterOutcome::Failed => "error",
        }
    }
}

impl std::fmt::Display for ClusterOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-cluster line of a [`RunSummary`].
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterReport {
    pub slug: String,
    pub outcome: ClusterOutcome,
    pub pr_url: Option<String>,
}

/// What a completed run did.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// The record as written to the store
    pub record: RunRecord,
    pub clusters: Vec<ClusterReport>,
    /// The soft deadline cut the run short
    pub deadline_reached: bool,
}

impl RunSummary {
    pub fn count(&self, outcome: ClusterOutcome) -> usize {
        self.clusters.iter().filter(|c| c.outcome == outcome).count()
    }
}

/// Accumulated while a run progresses; becomes the run record.
struct RunState {
    id: String,
    started_at: DateTime<Utc>,
    clock: Instant,
    clusters_found: usize,
    prs_created: usize,
    errors: usize,
    snapshots: Vec<LogSnapshot>,
    reports: Vec<ClusterReport>,
}

impl RunState {
    fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            clock: Instant::now(),
            clusters_found: 0,
            prs_created: 0,
            errors: 0,
            snapshots: Vec::new(),
            reports: Vec::new(),
        }
    }

    fn note(&mut self, cluster: &LogCluster, outcome: ClusterOutcome, pr_url: Option<String>) {
        self.snapshots.push(LogSnapshot {
            cluster_slug: cluster.slug.clone(),
            occurrence_count: cluster.occurrence_count as i64,
            modules: cluster.modules.clone(),
            severity: cluster.severity,
            outcome: outcome.as_str().to_string(),
            sample_messages: cluster.sample_messages.clone(),
        });
        self.reports.push(ClusterReport {
            slug: cluster.slug.clone(),
            outcome,
            pr_url,
        });
    }

    fn record(&self) -> RunRecord {
        RunRecord {
            id: self.id.clone(),
            started_at: self.started_at,
            duration_seconds: self.clock.elapsed().as_secs_f64(),
            clusters_found: self.clusters_found as i64,
            prs_created: self.prs_created as i64,
            errors: self.errors as i64,
        }
    }
}

/// The pipeline stages, borrowed for one run.
struct Stages<'r> {
    dedup: Deduplicator<'r>,
    planner: FixPlanner<'r>,
    fixgen: FixGenerator<'r>,
    publisher: Publisher<'r>,
}

/// Drives one run against explicit collaborators.
pub struct Orchestrator<'a> {
    config: &'a Config,
    store: &'a Database,
    logs: &'a dyn LogSource,
    judge: &'a dyn SemanticJudge,
    scm: &'a dyn SourceControl,
    notifier: Option<&'a dyn Notifier>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        config: &'a Config,
        store: &'a Database,
        logs: &'a dyn LogSource,
        judge: &'a dyn SemanticJudge,
        scm: &'a dyn SourceControl,
        notifier: Option<&'a dyn Notifier>,
    ) -> Self {
        Self {
            config,
            store,
            logs,
            judge,
            scm,
            notifier,
        }
    }

    /// Execute exactly one cycle.
    ///
    /// Returns `Err` only for whole-run failures (see [`Error::is_fatal`]);
    /// in that case a run record reflecting partial progress is written on a
    /// best-effort basis first.
    pub fn run_once(&self) -> Result<RunSummary> {
        let mut state = RunState::new();
        let span = tracing::info_span!("run", run_id = %state.id);
        let _enter = span.enter();
        tracing::info!(environment = %self.config.environment, "Run started");

        if self.config.checkout.sync_before_run {
            if let Err(e) =
                checkout::sync_checkout(&self.config.checkout.path, &self.config.github.base_branch)
            {
                tracing::warn!(error = %e, "Checkout refresh failed, continuing with current tree");
                state.errors += 1;
            }
        }

        let query = LogQuery::trailing(&self.config.logs, state.started_at);
        let entries = match self.logs.query(&query) {
            Ok(entries) => entries,
            Err(e) => return self.abort(state, e),
        };

        let extraction =
            ClusterExtractor::new(self.judge, self.config.run.max_clusters).extract(&entries);
        state.errors += extraction.errors;
        state.clusters_found = extraction.clusters.len();
        tracing::info!(
            entries = entries.len(),
            clusters = state.clusters_found,
            "Clusters extracted"
        );

        let stages = Stages {
            dedup: Deduplicator::new(
                self.judge,
                self.config.run.similarity_threshold,
                self.config.run.borderline_margin,
                self.config.run.max_semantic_candidates,
            ),
            planner: FixPlanner::new(self.judge, &self.config.module_hints, &self.config.planner),
            fixgen: FixGenerator::new(self.judge, &self.config.checkout, &self.config.run),
            publisher: Publisher::new(
                self.scm,
                self.notifier,
                PublishSettings::from_config(self.config),
            ),
        };

        let deadline = Duration::from_secs(self.config.run.deadline_secs);
        let mut deadline_reached = false;

        for cluster in &extraction.clusters {
            if deadline_reached || state.clock.elapsed() >= deadline {
                if !deadline_reached {
                    tracing::warn!(
                        elapsed_secs = state.clock.elapsed().as_secs(),
                        "Run deadline reached, leaving remaining clusters for next run"
                    );
                }
                deadline_reached = true;
                state.note(cluster, ClusterOutcome::NotReached, None);
                continue;
            }

            let _cluster_span = tracing::info_span!("cluster", slug = %cluster.slug).entered();
            match self.handle_cluster(&stages, cluster, state.prs_created) {
                Ok((outcome, pr_url)) => {
                    if outcome == ClusterOutcome::PrOpened {
                        state.prs_created += 1;
                    }
                    tracing::info!(outcome = outcome.as_str(), "Cluster resolved");
                    state.note(cluster, outcome, pr_url);
                }
                Err(e) if e.is_fatal() => {
                    state.note(cluster, ClusterOutcome::Failed, None);
                    return self.abort(state, e);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Cluster failed");
                    state.errors += 1;
                    state.note(cluster, ClusterOutcome::Failed, None);
                }
            }
        }

        let record = state.record();
        self.store.record_run(&record, &state.snapshots)?;
        tracing::info!(
            clusters_found = record.clusters_found,
            prs_created = record.prs_created,
            errors = record.errors,
            duration_secs = record.duration_seconds,
            "Run finished"
        );

        Ok(RunSummary {
            record,
            clusters: state.reports,
            deadline_reached,
        })
    }

    /// Whole-run failure: best-effort record, then propagate.
    fn abort(&self, mut state: RunState, err: Error) -> Result<RunSummary> {
        state.errors += 1;
        tracing::error!(error = %err, "Run aborted");

        if !matches!(err, Error::StoreCorruption(_)) {
            if let Err(store_err) = self.store.record_run(&state.record(), &state.snapshots) {
                tracing::error!(error = %store_err, "Could not write run record");
            }
        }
        Err(err)
    }

    fn record(
        &self,
        cluster: &LogCluster,
        status: PatternStatus,
        pr_url: Option<String>,
        branch: Option<String>,
    ) -> Result<()> {
        let pattern = ProcessedPattern::from_cluster(cluster, status, pr_url, branch);
        if !self.store.record_pattern(&pattern)? {
            tracing::debug!(slug = %cluster.slug, "Pattern already recorded");
        }
        Ok(())
    }

    fn resolve_benign(
        &self,
        stages: &Stages<'_>,
        cluster: &LogCluster,
        rationale: &str,
    ) -> Result<(ClusterOutcome, Option<String>)> {
        stages.publisher.notify_benign(cluster, rationale)?;
        self.record(cluster, PatternStatus::NotifiedBenign, None, None)?;
        Ok((ClusterOutcome::Notified, None))
    }

    fn handle_cluster(
        &self,
        stages: &Stages<'_>,
        cluster: &LogCluster,
        prs_created: usize,
    ) -> Result<(ClusterOutcome, Option<String>)> {
        let patterns = self.store.list_patterns()?;
        if let DedupDecision::Duplicate { existing_slug, .. } =
            stages.dedup.check(cluster, &patterns)?
        {
            if existing_slug != cluster.slug {
                self.record(cluster, PatternStatus::DuplicateIgnored, None, None)?;
            }
            return Ok((ClusterOutcome::Duplicate, None));
        }

        let hint_dirs = match stages.planner.plan(cluster)? {
            PlanDecision::Benign { rationale } => {
                return self.resolve_benign(stages, cluster, &rationale)
            }
            PlanDecision::Fixable { hint_dirs, .. } => hint_dirs,
        };

        if prs_created >= self.config.run.max_prs_per_run {
            tracing::info!(
                cap = self.config.run.max_prs_per_run,
                "PR cap reached, deferring cluster"
            );
            return Ok((ClusterOutcome::Deferred, None));
        }

        match stages.publisher.existing_publication(&cluster.slug)? {
            Some(ExistingPublication::OpenPr { branch, url }) => {
                tracing::info!(pr = %url, "Open PR already exists for slug");
                self.record(cluster, PatternStatus::FixOpened, Some(url.clone()), Some(branch))?;
                return Ok((ClusterOutcome::PrExisting, Some(url)));
            }
            Some(ExistingPublication::BranchOnly { branch }) => {
                tracing::warn!(branch = %branch, "Branch exists without open PR, not regenerating");
                self.record(cluster, PatternStatus::DuplicateIgnored, None, Some(branch))?;
                return Ok((ClusterOutcome::BranchOrphaned, None));
            }
            None => {}
        }

        let fix = stages.fixgen.generate(cluster, &hint_dirs)?;
        if !fix.is_fixable() {
            tracing::info!(rationale = %fix.rationale, "No acceptable fix produced");
            return self.resolve_benign(stages, cluster, &fix.rationale);
        }

        match stages.publisher.publish_fix(cluster, &fix)? {
            PublishOutcome::Opened { branch, url } => {
                self.record(cluster, PatternStatus::FixOpened, Some(url.clone()), Some(branch))?;
                Ok((ClusterOutcome::PrOpened, Some(url)))
            }
            PublishOutcome::Reused { branch, url } => {
                self.record(cluster, PatternStatus::FixOpened, Some(url.clone()), Some(branch))?;
                Ok((ClusterOutcome::PrExisting, Some(url)))
            }
            PublishOutcome::Skipped { branch } => {
                self.record(cluster, PatternStatus::DuplicateIgnored, None, Some(branch))?;
                Ok((ClusterOutcome::BranchOrphaned, None))
            }
        }
    }
}
