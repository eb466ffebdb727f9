//! Language-model plumbing.
//!
//! [`CompletionClient`] is the raw text-in/text-out seam. [`LlmJudge`] builds
//! the strict-JSON prompts and implements [`SemanticJudge`] on top of it.
//!
//! [`SemanticJudge`]: crate::judge::SemanticJudge

mod judge;
pub mod prompts;

pub use judge::LlmJudge;

use crate::config::{LlmConfig, LlmProvider};
use crate::{Error, Result};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde_json::json;
use std::time::Duration;

const CLAUDE_MAX_TOKENS: u32 = 16_000;

/// LLM completion interface.
pub trait CompletionClient: Send + Sync {
    fn complete(&self, system: &str, prompt: &str) -> Result<String>;
}

/// Create the default HTTP-backed completion client.
pub fn create_completion_client(llm: &LlmConfig) -> Result<Box<dyn CompletionClient>> {
    Ok(Box::new(HttpCompletionClient::new(llm)?))
}

/// Run `op` until it succeeds, sleeping between attempts.
///
/// One attempt per entry in `delays`; the final delay is never slept. Only
/// [`Error::ModelUnavailable`] is retried; refusals come back immediately.
pub fn with_retry<T>(delays: &[Duration], mut op: impl FnMut() -> Result<T>) -> Result<T> {
    let attempts = delays.len().max(1);
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(Error::ModelUnavailable(msg)) if attempt < attempts => {
                let delay = delays[attempt - 1];
                tracing::warn!(
                    attempt,
                    attempts,
                    delay_secs = delay.as_secs(),
                    error = %msg,
                    "Model request failed, retrying"
                );
                std::thread::sleep(delay);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Pull the outermost JSON object out of a model reply (tolerates code fences
/// and prose around it).
pub fn extract_json_object(raw: &str) -> Result<serde_json::Value> {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(raw) {
        if value.is_object() {
            return Ok(value);
        }
    }

    let start = raw
        .find('{')
        .ok_or_else(|| Error::ModelRefused("response did not contain a JSON object".to_string()))?;
    let end = raw
        .rfind('}')
        .ok_or_else(|| Error::ModelRefused("response did not contain a JSON object".to_string()))?;
    if end <= start {
        return Err(Error::ModelRefused(
            "response JSON bounds are invalid".to_string(),
        ));
    }

    let value: serde_json::Value = serde_json::from_str(&raw[start..=end])
        .map_err(|e| Error::ModelRefused(format!("response was not valid JSON: {e}")))?;
    if !value.is_object() {
        return Err(Error::ModelRefused(
            "response must be a JSON object".to_string(),
        ));
    }
    Ok(value)
}

/// Map a non-success HTTP status to the model error taxonomy.
fn status_error(provider: &str, status: reqwest::StatusCode, body: &str) -> Error {
    let msg = format!("{provider} returned {}: {}", status.as_u16(), body);
    if status.is_server_error() || status.as_u16() == 429 || status.as_u16() == 408 {
        Error::ModelUnavailable(msg)
    } else {
        Error::ModelRefused(msg)
    }
}

/// HTTP client for OpenAI, Claude and Ollama.
///
/// Owns a current-thread runtime so callers stay synchronous.
pub struct HttpCompletionClient {
    model: String,
    provider: LlmProvider,
    endpoint: String,
    api_key: Option<String>,
    retry_delays: Vec<Duration>,
    runtime: tokio::runtime::Runtime,
    http: reqwest::Client,
}

impl HttpCompletionClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let endpoint = config
            .endpoint
            .clone()
            .unwrap_or_else(|| config.provider.default_endpoint().to_string());
        let api_key = config.resolved_api_key();

        if config.provider.requires_api_key() && api_key.is_none() {
            return Err(Error::Config(
                "llm.api_key (or provider env var) is required".to_string(),
            ));
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::ModelUnavailable(format!("failed to build tokio runtime: {e}")))?;
        let timeout_secs = config.timeout_secs.max(1);
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| Error::ModelUnavailable(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            model: config.model.clone(),
            provider: config.provider,
            endpoint,
            api_key,
            retry_delays: config
                .retry_delays_secs
                .iter()
                .map(|s| Duration::from_secs(*s))
                .collect(),
            runtime,
            http,
        })
    }

    async fn post(
        &self,
        provider: &str,
        url: String,
        headers: HeaderMap,
        body: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let resp = self
            .http
            .post(url)
            .headers(headers)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::ModelUnavailable(format!("{provider} request failed: {e}")))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| Error::ModelUnavailable(format!("{provider} read body failed: {e}")))?;
        if !status.is_success() {
            return Err(status_error(provider, status, &text));
        }
        serde_json::from_str(&text)
            .map_err(|e| Error::ModelUnavailable(format!("{provider} returned invalid JSON: {e}")))
    }

    fn complete_once(&self, system: &str, prompt: &str) -> Result<String> {
        self.runtime.block_on(async {
            match self.provider {
                LlmProvider::Ollama => {
                    let url = format!("{}/api/generate", self.endpoint.trim_end_matches('/'));
                    let json = self
                        .post(
                            "ollama",
                            url,
                            HeaderMap::new(),
                            json!({
                                "model": self.model,
                                "system": system,
                                "prompt": prompt,
                                "format": "json",
                                "stream": false,
                            }),
                        )
                        .await?;
                    json.get("response")
                        .and_then(|v| v.as_str())
                        .filter(|s| !s.trim().is_empty())
                        .map(ToString::to_string)
                        .ok_or_else(|| {
                            Error::ModelRefused("ollama response missing `response`".to_string())
                        })
                }
                LlmProvider::Claude => {
                    let url = format!("{}/v1/messages", self.endpoint.trim_end_matches('/'));
                    let mut headers = HeaderMap::new();
                    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                    headers.insert(
                        "x-api-key",
                        HeaderValue::from_str(self.api_key.as_deref().unwrap_or_default())
                            .map_err(|e| Error::Config(format!("invalid claude api key header: {e}")))?,
                    );
                    headers.insert("anthropic-version", HeaderValue::from_static("2023-06-01"));

                    let json = self
                        .post(
                            "claude",
                            url,
                            headers,
                            json!({
                                "model": self.model,
                                "max_tokens": CLAUDE_MAX_TOKENS,
                                "temperature": 0,
                                "system": system,
                                "messages": [{ "role": "user", "content": prompt }],
                            }),
                        )
                        .await?;
                    if json.get("stop_reason").and_then(|v| v.as_str()) == Some("refusal") {
                        return Err(Error::ModelRefused("claude refused the request".to_string()));
                    }
                    json.get("content")
                        .and_then(|v| v.as_array())
                        .and_then(|arr| arr.first())
                        .and_then(|v| v.get("text"))
                        .and_then(|v| v.as_str())
                        .map(ToString::to_string)
                        .ok_or_else(|| {
                            Error::ModelRefused("claude response missing content[0].text".to_string())
                        })
                }
                LlmProvider::OpenAI => {
                    let url = format!(
                        "{}/v1/chat/completions",
                        self.endpoint.trim_end_matches('/')
                    );
                    let mut headers = HeaderMap::new();
                    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                    headers.insert(
                        AUTHORIZATION,
                        HeaderValue::from_str(&format!(
                            "Bearer {}",
                            self.api_key.as_deref().unwrap_or_default()
                        ))
                        .map_err(|e| Error::Config(format!("invalid auth header: {e}")))?,
                    );

                    let json = self
                        .post(
                            "openai",
                            url,
                            headers,
                            json!({
                                "model": self.model,
                                "response_format": { "type": "json_object" },
                                "messages": [
                                    { "role": "system", "content": system },
                                    { "role": "user", "content": prompt }
                                ]
                            }),
                        )
                        .await?;
                    let message = json
                        .get("choices")
                        .and_then(|v| v.as_array())
                        .and_then(|arr| arr.first())
                        .and_then(|v| v.get("message"));
                    if let Some(refusal) = message
                        .and_then(|m| m.get("refusal"))
                        .and_then(|v| v.as_str())
                    {
                        return Err(Error::ModelRefused(format!("openai refused: {refusal}")));
                    }
                    message
                        .and_then(|v| v.get("content"))
                        .and_then(|v| v.as_str())
                        .map(ToString::to_string)
                        .ok_or_else(|| {
                            Error::ModelRefused(
                                "openai response missing choices[0].message.content".to_string(),
                            )
                        })
                }
            }
        })
    }
}

impl CompletionClient for HttpCompletionClient {
    fn complete(&self, system: &str, prompt: &str) -> Result<String> {
        with_retry(&self.retry_delays, || self.complete_once(system, prompt))
    }
}
