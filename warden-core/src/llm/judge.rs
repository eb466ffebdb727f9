use super::{extract_json_object, prompts, CompletionClient};
use crate::judge::{ClusterDraft, FixabilityVerdict, MessageGroup, PatternDigest, SemanticJudge};
use crate::types::{CodeFix, ContextFile, FileChange, Fixability, LogCluster};
use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;

/// [`SemanticJudge`] backed by a language model.
pub struct LlmJudge {
    client: Box<dyn CompletionClient>,
    environment: String,
}

#[derive(Deserialize)]
struct ClusterResponse {
    clusters: Vec<ClusterDraft>,
}

#[derive(Deserialize)]
struct SimilarityResponse {
    score: f64,
}

#[derive(Deserialize)]
struct FileChoice {
    path: String,
}

#[derive(Deserialize)]
struct FileSelectionResponse {
    files: Vec<FileChoice>,
}

#[derive(Deserialize)]
struct ChangeResponse {
    path: String,
    modified: String,
}

#[derive(Deserialize)]
struct FixResponse {
    fixable: bool,
    #[serde(default)]
    title: String,
    #[serde(default)]
    rationale: String,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    changes: Vec<ChangeResponse>,
}

impl LlmJudge {
    pub fn new(client: Box<dyn CompletionClient>, environment: impl Into<String>) -> Self {
        Self {
            client,
            environment: environment.into(),
        }
    }

    fn ask<T: DeserializeOwned>(&self, system: &str, prompt: &str) -> Result<T> {
        let raw = self.client.complete(system, prompt)?;
        let value = extract_json_object(&raw)?;
        serde_json::from_value(value)
            .map_err(|e| Error::ModelRefused(format!("unexpected response shape: {e}")))
    }
}

impl SemanticJudge for LlmJudge {
    fn cluster(&self, groups: &[MessageGroup]) -> Result<Vec<ClusterDraft>> {
        let response: ClusterResponse =
            self.ask(prompts::CLUSTER_SYSTEM, &prompts::cluster_prompt(groups))?;
        Ok(response.clusters)
    }

    fn similarity(&self, a: &PatternDigest, b: &PatternDigest) -> Result<f64> {
        let response: SimilarityResponse =
            self.ask(prompts::SIMILARITY_SYSTEM, &prompts::similarity_prompt(a, b))?;
        if !response.score.is_finite() {
            return Err(Error::ModelRefused("similarity score is not a number".to_string()));
        }
        Ok(response.score.clamp(0.0, 1.0))
    }

    fn classify_fixability(&self, cluster: &LogCluster) -> Result<FixabilityVerdict> {
        self.ask(prompts::CLASSIFY_SYSTEM, &prompts::classify_prompt(cluster))
    }

    fn select_files(
        &self,
        cluster: &LogCluster,
        candidates: &[String],
        limit: usize,
    ) -> Result<Vec<String>> {
        let response: FileSelectionResponse = self.ask(
            prompts::SELECT_FILES_SYSTEM,
            &prompts::select_files_prompt(cluster, candidates, limit),
        )?;
        let mut chosen: Vec<String> = Vec::new();
        for choice in response.files {
            if candidates.contains(&choice.path) && !chosen.contains(&choice.path) {
                chosen.push(choice.path);
            } else {
                tracing::debug!(path = %choice.path, "Ignoring file outside candidate list");
            }
            if chosen.len() == limit {
                break;
            }
        }
        Ok(chosen)
    }

    fn generate_fix(
        &self,
        cluster: &LogCluster,
        files: &[ContextFile],
        architecture: Option<&str>,
    ) -> Result<CodeFix> {
        let prompt = prompts::generate_fix_prompt(&self.environment, cluster, files, architecture);
        let response: FixResponse = self.ask(prompts::GENERATE_FIX_SYSTEM, &prompt)?;

        if !response.fixable {
            return Ok(CodeFix::not_fixable(response.rationale));
        }

        let changes = response
            .changes
            .into_iter()
            .map(|change| {
                let original = files
                    .iter()
                    .find(|f| f.path == change.path)
                    .map(|f| f.content.clone())
                    .unwrap_or_default();
                FileChange {
                    path: change.path,
                    original,
                    modified: change.modified,
                }
            })
            .collect();

        Ok(CodeFix {
            fixability: Fixability::Fixable,
            title: response.title,
            rationale: response.rationale,
            confidence: response.confidence.clamp(0.0, 1.0),
            changes,
        })
    }
}
