//! Publisher.
//!
//! Turns a fix into a branch plus pull request, or a benign decision into an
//! email. External side effects are at-least-once; every write is guarded by
//! a branch/PR existence check so repeated or overlapping runs never open a
//! second pull request for the same slug.

use crate::config::Config;
use crate::notify::{benign_html, benign_subject, Notifier};
use crate::source_control::{PullRequest, SourceControl};
use crate::types::{CodeFix, LogCluster};
use crate::{Error, Result};
use std::fmt::Write;

/// Something already published for a slug.
#[derive(Debug, Clone, PartialEq)]
pub enum ExistingPublication {
    /// An open pull request exists
    OpenPr { branch: String, url: String },
    /// The branch exists but no open pull request does
    BranchOnly { branch: String },
}

/// Result of [`Publisher::publish_fix`].
#[derive(Debug, Clone, PartialEq)]
pub enum PublishOutcome {
    /// A new pull request was opened by this call
    Opened { branch: String, url: String },
    /// An open pull request already existed and was reused
    Reused { branch: String, url: String },
    /// The branch exists without an open pull request; nothing was done
    Skipped { branch: String },
}

impl PublishOutcome {
    pub fn url(&self) -> Option<&str> {
        match self {
            PublishOutcome::Opened { url, .. } | PublishOutcome::Reused { url, .. } => Some(url),
            PublishOutcome::Skipped { .. } => None,
        }
    }

    pub fn branch(&self) -> &str {
        match self {
            PublishOutcome::Opened { branch, .. }
            | PublishOutcome::Reused { branch, .. }
            | PublishOutcome::Skipped { branch } => branch,
        }
    }
}

/// Publication settings drawn from [`Config`].
#[derive(Debug, Clone)]
pub struct PublishSettings {
    pub environment: String,
    pub base_branch: String,
    pub reviewer: Option<String>,
    /// Recipient of benign notifications; `None` disables email
    pub notify_to: Option<String>,
}

impl PublishSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            environment: config.environment.clone(),
            base_branch: config.github.base_branch.clone(),
            reviewer: config.github.reviewer.clone(),
            notify_to: if config.notify.enabled {
                config.notify.to.clone()
            } else {
                None
            },
        }
    }
}

/// Pull request description.
pub fn pr_body(environment: &str, cluster: &LogCluster, fix: &CodeFix) -> String {
    let mut body = String::new();
    let _ = writeln!(body, "## Summary\n\n{}\n", cluster.summary);
    let _ = writeln!(body, "## Observed in logs ({})\n", environment);
    let _ = writeln!(body, "- **Slug:** `{}`", cluster.slug);
    let _ = writeln!(body, "- **Severity:** {}", cluster.severity);
    let _ = writeln!(body, "- **Occurrences:** {}", cluster.occurrence_count);
    let _ = writeln!(body, "- **Modules:** {}\n", cluster.modules.join(", "));
    body.push_str("Sample messages:\n\n```\n");
    for sample in &cluster.sample_messages {
        let _ = writeln!(body, "{}", sample);
    }
    body.push_str("```\n\n");
    let _ = writeln!(body, "## Fix\n\n{}\n", fix.rationale);
    for change in &fix.changes {
        let _ = writeln!(
            body,
            "- `{}` ({} lines changed)",
            change.path,
            change.changed_lines()
        );
    }
    let _ = write!(
        body,
        "\nConfidence: {:.2}\n\n---\nGenerated automatically from production logs. \
         Review carefully before merging.\n",
        fix.confidence
    );
    body
}

pub struct Publisher<'a> {
    scm: &'a dyn SourceControl,
    notifier: Option<&'a dyn Notifier>,
    settings: PublishSettings,
}

impl<'a> Publisher<'a> {
    pub fn new(
        scm: &'a dyn SourceControl,
        notifier: Option<&'a dyn Notifier>,
        settings: PublishSettings,
    ) -> Self {
        Self {
            scm,
            notifier,
            settings,
        }
    }

    /// Deterministic branch for a slug: `agent-{environment}/{slug}`.
    pub fn branch_name(&self, slug: &str) -> String {
        format!("agent-{}/{}", self.settings.environment, slug)
    }

    /// Safety-net lookup for a slug's branch.
    pub fn existing_publication(&self, slug: &str) -> Result<Option<ExistingPublication>> {
        let branch = self.branch_name(slug);
        if let Some(url) = self.scm.open_pr_for_branch(&branch)? {
            return Ok(Some(ExistingPublication::OpenPr { branch, url }));
        }
        if self.scm.branch_exists(&branch)? {
            return Ok(Some(ExistingPublication::BranchOnly { branch }));
        }
        Ok(None)
    }

    /// A conflict is only trusted once the branch is seen on the host; a
    /// conflict without the branch is passed back as a failure so the
    /// cluster stays unrecorded.
    fn after_conflict(&self, branch: String, err: Error) -> Result<PublishOutcome> {
        tracing::info!(branch = %branch, error = %err, "Publication conflict, checking for existing PR");
        if let Some(url) = self.scm.open_pr_for_branch(&branch)? {
            return Ok(PublishOutcome::Reused { branch, url });
        }
        if self.scm.branch_exists(&branch)? {
            return Ok(PublishOutcome::Skipped { branch });
        }
        tracing::warn!(branch = %branch, "Conflict reported but branch does not exist");
        Err(Error::SourceControl(format!(
            "conflict reported for {} but the branch does not exist: {}",
            branch, err
        )))
    }

    /// Create the branch, commit the patch and open the pull request.
    pub fn publish_fix(&self, cluster: &LogCluster, fix: &CodeFix) -> Result<PublishOutcome> {
        match self.existing_publication(&cluster.slug)? {
            Some(ExistingPublication::OpenPr { branch, url }) => {
                tracing::info!(slug = %cluster.slug, pr = %url, "Open PR already exists");
                return Ok(PublishOutcome::Reused { branch, url });
            }
            Some(ExistingPublication::BranchOnly { branch }) => {
                tracing::warn!(slug = %cluster.slug, branch = %branch, "Branch exists without open PR, skipping");
                return Ok(PublishOutcome::Skipped { branch });
            }
            None => {}
        }

        let branch = self.branch_name(&cluster.slug);
        let message = format!(
            "{}\n\nAutomated fix for log pattern `{}` ({} occurrences).",
            fix.title, cluster.slug, cluster.occurrence_count
        );

        match self.scm.create_branch_and_commit(
            &branch,
            &self.settings.base_branch,
            &message,
            &fix.changes,
        ) {
            Ok(()) => {}
            Err(e @ Error::Conflict(_)) => return self.after_conflict(branch, e),
            Err(e) => return Err(e),
        }

        let request = PullRequest {
            branch: branch.clone(),
            base: self.settings.base_branch.clone(),
            title: fix.title.clone(),
            body: pr_body(&self.settings.environment, cluster, fix),
            reviewer: self.settings.reviewer.clone(),
        };
        match self.scm.open_pull_request(&request) {
            Ok(url) => {
                tracing::info!(slug = %cluster.slug, pr = %url, "Pull request opened");
                Ok(PublishOutcome::Opened { branch, url })
            }
            Err(e @ Error::Conflict(_)) => self.after_conflict(branch, e),
            Err(e) => Err(e),
        }
    }

    /// Email a human explaining why no code change was produced.
    pub fn notify_benign(&self, cluster: &LogCluster, rationale: &str) -> Result<()> {
        let (Some(notifier), Some(to)) = (self.notifier, self.settings.notify_to.as_deref())
        else {
            tracing::info!(
                slug = %cluster.slug,
                rationale,
                "Notifications disabled, benign decision logged only"
            );
            return Ok(());
        };

        let subject = benign_subject(&self.settings.environment, cluster);
        let html = benign_html(&self.settings.environment, cluster, rationale);
        notifier.send(to, &subject, &html)
    }
}
