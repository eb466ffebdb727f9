//! Source-control host access.
//!
//! [`SourceControl`] is what the publisher needs from the host; the
//! [`GitHubClient`] implementation talks to the GitHub REST API (git data API
//! for the branch and commit, pulls API for the pull request and reviewer).

use crate::config::GitHubConfig;
use crate::types::FileChange;
use crate::{Error, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, RETRY_AFTER, USER_AGENT};
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;

/// A pull request to open.
#[derive(Debug, Clone, PartialEq)]
pub struct PullRequest {
    pub branch: String,
    pub base: String,
    pub title: String,
    pub body: String,
    pub reviewer: Option<String>,
}

/// Source-control client.
///
/// Fails with [`Error::Auth`] when credentials are rejected (fatal to the
/// run) and [`Error::Conflict`] when a branch or pull request already exists.
pub trait SourceControl: Send + Sync {
    fn branch_exists(&self, branch: &str) -> Result<bool>;

    /// URL of the open pull request whose head is `branch`, if any.
    fn open_pr_for_branch(&self, branch: &str) -> Result<Option<String>>;

    /// Create `branch` from `base` with one commit applying `changes`.
    fn create_branch_and_commit(
        &self,
        branch: &str,
        base: &str,
        message: &str,
        changes: &[FileChange],
    ) -> Result<()>;

    /// Open a pull request and request the reviewer. Returns its URL.
    fn open_pull_request(&self, request: &PullRequest) -> Result<String>;
}

fn encode_ref(name: &str) -> String {
    name.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Whether a GitHub error body says the thing being created already exists.
///
/// Checks the top-level `message` ("Reference already exists") and the
/// validation `errors[].message` entries ("A pull request already exists for ...").
fn says_already_exists(body: &Value) -> bool {
    let top = body.get("message").and_then(|m| m.as_str());
    let nested = body
        .get("errors")
        .and_then(|e| e.as_array())
        .into_iter()
        .flatten()
        .filter_map(|e| e.get("message").and_then(|m| m.as_str()));
    top.into_iter()
        .chain(nested)
        .any(|m| m.to_ascii_lowercase().contains("already exists"))
}

/// Map a non-success response to the error taxonomy.
///
/// Only "already exists" answers to ref and pull creation are conflicts; any
/// other 422 is a validation failure. A 403 caused by rate limiting is
/// retryable next run and does not abort the run.
fn status_error(what: &str, status: StatusCode, body: &Value, rate_limited: bool) -> Error {
    let message = body
        .get("message")
        .and_then(|m| m.as_str())
        .unwrap_or_default();
    let detail = format!("{} returned {}: {}", what, status.as_u16(), message);
    match status {
        StatusCode::FORBIDDEN
            if rate_limited || message.to_ascii_lowercase().contains("rate limit") =>
        {
            Error::SourceControl(detail)
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::Auth(detail),
        StatusCode::UNPROCESSABLE_ENTITY
            if matches!(what, "create ref" | "create pull") && says_already_exists(body) =>
        {
            Error::Conflict(detail)
        }
        _ => Error::SourceControl(detail),
    }
}

/// Status, parsed body (or `null`) and rate-limit hint of one response.
struct Reply {
    status: StatusCode,
    body: Value,
    rate_limited: bool,
}

impl Reply {
    fn error(&self, what: &str) -> Error {
        status_error(what, self.status, &self.body, self.rate_limited)
    }
}

fn json_str<'v>(value: &'v Value, pointer: &str, what: &str) -> Result<&'v str> {
    value
        .pointer(pointer)
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::SourceControl(format!("{what} response missing {pointer}")))
}

/// GitHub REST API client.
pub struct GitHubClient {
    api_url: String,
    repo: String,
    owner: String,
    runtime: tokio::runtime::Runtime,
    http: reqwest::Client,
}

impl GitHubClient {
    pub fn new(config: &GitHubConfig) -> Result<Self> {
        let token = config
            .resolved_token()
            .ok_or_else(|| Error::Config("github.token (or GITHUB_TOKEN) is required".to_string()))?;

        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| Error::Config(format!("invalid github token header: {e}")))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert(USER_AGENT, HeaderValue::from_static("warden"));
        headers.insert("X-GitHub-Api-Version", HeaderValue::from_static("2022-11-28"));

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::SourceControl(format!("failed to build tokio runtime: {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .default_headers(headers)
            .build()
            .map_err(|e| Error::SourceControl(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            api_url: config.api_url.trim_end_matches('/').to_string(),
            repo: config.repo.clone(),
            owner: config.owner().to_string(),
            runtime,
            http,
        })
    }

    fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<Value>,
    ) -> Result<Reply> {
        let url = format!("{}/repos/{}/{}", self.api_url, self.repo, path);
        self.runtime.block_on(async {
            let mut request = self.http.request(method, &url).query(query);
            if let Some(body) = body {
                request = request.json(&body);
            }
            let resp = request
                .send()
                .await
                .map_err(|e| Error::SourceControl(format!("request to {url} failed: {e}")))?;
            let status = resp.status();
            let headers = resp.headers();
            let rate_limited = headers.contains_key(RETRY_AFTER)
                || headers
                    .get("x-ratelimit-remaining")
                    .and_then(|v| v.to_str().ok())
                    == Some("0");
            let text = resp
                .text()
                .await
                .map_err(|e| Error::SourceControl(format!("read body from {url} failed: {e}")))?;
            let value = if text.trim().is_empty() {
                Value::Null
            } else {
                serde_json::from_str(&text).unwrap_or(Value::String(text))
            };
            Ok(Reply {
                status,
                body: value,
                rate_limited,
            })
        })
    }

    fn expect_ok(
        &self,
        what: &str,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value> {
        let reply = self.send(method, path, &[], body)?;
        if reply.status.is_success() {
            Ok(reply.body)
        } else {
            Err(reply.error(what))
        }
    }
}

impl SourceControl for GitHubClient {
    fn branch_exists(&self, branch: &str) -> Result<bool> {
        let path = format!("git/ref/heads/{}", encode_ref(branch));
        let reply = self.send(Method::GET, &path, &[], None)?;
        match reply.status {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(reply.error("get ref")),
        }
    }

    fn open_pr_for_branch(&self, branch: &str) -> Result<Option<String>> {
        let head = format!("{}:{}", self.owner, branch);
        let reply = self.send(
            Method::GET,
            "pulls",
            &[("head", head.as_str()), ("state", "open")],
            None,
        )?;
        if !reply.status.is_success() {
            return Err(reply.error("list pulls"));
        }
        Ok(reply
            .body
            .as_array()
            .and_then(|prs| prs.first())
            .and_then(|pr| pr.get("html_url"))
            .and_then(|u| u.as_str())
            .map(ToString::to_string))
    }

    fn create_branch_and_commit(
        &self,
        branch: &str,
        base: &str,
        message: &str,
        changes: &[FileChange],
    ) -> Result<()> {
        let base_ref = self.expect_ok(
            "get base ref",
            Method::GET,
            &format!("git/ref/heads/{}", encode_ref(base)),
            None,
        )?;
        let base_sha = json_str(&base_ref, "/object/sha", "get base ref")?.to_string();

        let base_commit = self.expect_ok(
            "get base commit",
            Method::GET,
            &format!("git/commits/{}", base_sha),
            None,
        )?;
        let base_tree = json_str(&base_commit, "/tree/sha", "get base commit")?.to_string();

        let entries: Vec<Value> = changes
            .iter()
            .map(|c| {
                json!({
                    "path": c.path,
                    "mode": "100644",
                    "type": "blob",
                    "content": c.modified,
                })
            })
            .collect();
        let tree = self.expect_ok(
            "create tree",
            Method::POST,
            "git/trees",
            Some(json!({ "base_tree": base_tree, "tree": entries })),
        )?;
        let tree_sha = json_str(&tree, "/sha", "create tree")?.to_string();

        let commit = self.expect_ok(
            "create commit",
            Method::POST,
            "git/commits",
            Some(json!({ "message": message, "tree": tree_sha, "parents": [base_sha] })),
        )?;
        let commit_sha = json_str(&commit, "/sha", "create commit")?.to_string();

        self.expect_ok(
            "create ref",
            Method::POST,
            "git/refs",
            Some(json!({ "ref": format!("refs/heads/{}", branch), "sha": commit_sha })),
        )?;

        tracing::info!(branch, commit = %commit_sha, files = changes.len(), "Created branch");
        Ok(())
    }

    fn open_pull_request(&self, request: &PullRequest) -> Result<String> {
        let pr = self.expect_ok(
            "create pull",
            Method::POST,
            "pulls",
            Some(json!({
                "title": request.title,
                "head": request.branch,
                "base": request.base,
                "body": request.body,
            })),
        )?;
        let url = json_str(&pr, "/html_url", "create pull")?.to_string();

        if let (Some(reviewer), Some(number)) =
            (request.reviewer.as_deref(), pr.get("number").and_then(|n| n.as_u64()))
        {
            let result = self.expect_ok(
                "request reviewers",
                Method::POST,
                &format!("pulls/{}/requested_reviewers", number),
                Some(json!({ "reviewers": [reviewer] })),
            );
            if let Err(e) = result {
                tracing::warn!(pr = %url, reviewer, error = %e, "Failed to request reviewer");
            }
        }

        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        let body = json!({ "message": "Bad credentials" });
        assert!(matches!(
            status_error("x", StatusCode::UNAUTHORIZED, &body, false),
            Error::Auth(_)
        ));
        assert!(matches!(
            status_error("x", StatusCode::FORBIDDEN, &body, false),
            Error::Auth(_)
        ));
        assert!(matches!(
            status_error(
                "create ref",
                StatusCode::UNPROCESSABLE_ENTITY,
                &json!({"message": "Reference already exists"}),
                false
            ),
            Error::Conflict(_)
        ));
        let other = status_error("x", StatusCode::BAD_GATEWAY, &Value::Null, false);
        assert!(matches!(other, Error::SourceControl(_)));
        assert!(!other.is_fatal());
    }

    #[test]
    fn existing_pull_request_is_a_conflict() {
        let body = json!({
            "message": "Validation Failed",
            "errors": [{
                "resource": "PullRequest",
                "code": "custom",
                "message": "A pull request already exists for acme:agent-testnet/x."
            }]
        });
        assert!(matches!(
            status_error("create pull", StatusCode::UNPROCESSABLE_ENTITY, &body, false),
            Error::Conflict(_)
        ));
    }

    #[test]
    fn validation_failures_are_not_conflicts() {
        let invalid_tree = json!({ "message": "Invalid tree info" });
        let err = status_error("create tree", StatusCode::UNPROCESSABLE_ENTITY, &invalid_tree, false);
        assert!(matches!(err, Error::SourceControl(_)));

        let no_commits = json!({
            "message": "Validation Failed",
            "errors": [{ "resource": "PullRequest", "code": "custom",
                         "message": "No commits between main and agent-testnet/x" }]
        });
        let err = status_error("create pull", StatusCode::UNPROCESSABLE_ENTITY, &no_commits, false);
        assert!(matches!(err, Error::SourceControl(_)));

        // "already exists" only counts for ref and pull creation
        let err = status_error(
            "create commit",
            StatusCode::UNPROCESSABLE_ENTITY,
            &json!({ "message": "Object already exists" }),
            false,
        );
        assert!(matches!(err, Error::SourceControl(_)));
    }

    #[test]
    fn rate_limited_forbidden_is_not_fatal() {
        let secondary = json!({
            "message": "You have exceeded a secondary rate limit. Please wait a few minutes before you try again."
        });
        let err = status_error("create tree", StatusCode::FORBIDDEN, &secondary, false);
        assert!(matches!(err, Error::SourceControl(_)));
        assert!(!err.is_fatal());

        let err = status_error("list pulls", StatusCode::FORBIDDEN, &json!({ "message": "Forbidden" }), true);
        assert!(matches!(err, Error::SourceControl(_)));

        let err = status_error("list pulls", StatusCode::FORBIDDEN, &json!({ "message": "Resource not accessible by integration" }), false);
        assert!(err.is_fatal());
    }

    #[test]
    fn refs_are_encoded_per_segment() {
        assert_eq!(encode_ref("agent-testnet/shamap-node"), "agent-testnet/shamap-node");
        assert_eq!(encode_ref("a b/c#d"), "a%20b/c%23d");
    }

    #[test]
    fn client_requires_token() {
        let config = GitHubConfig {
            token: Some(String::new()),
            ..GitHubConfig::default()
        };
        if std::env::var("GITHUB_TOKEN").map_or(true, |t| t.trim().is_empty()) {
            assert!(matches!(GitHubClient::new(&config), Err(Error::Config(_))));
        }
    }
}
