use super::{LogQuery, LogSource};
use crate::config::LogStoreConfig;
use crate::types::{LogEntry, Severity};
use crate::{Error, Result};
use chrono::{TimeZone, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Loki `query_range` client.
pub struct LokiClient {
    base_url: String,
    runtime: tokio::runtime::Runtime,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct QueryResponse {
    data: QueryData,
}

#[derive(Deserialize)]
struct QueryData {
    #[serde(default)]
    result: Vec<Stream>,
}

#[derive(Deserialize)]
struct Stream {
    #[serde(default)]
    stream: HashMap<String, String>,
    #[serde(default)]
    values: Vec<(String, String)>,
}

impl LokiClient {
    pub fn new(config: &LogStoreConfig) -> Result<Self> {
        let base_url = config
            .url
            .clone()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| Error::Config("logs.url is required".to_string()))?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::SourceUnavailable(format!("failed to build tokio runtime: {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| Error::SourceUnavailable(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            runtime,
            http,
        })
    }
}

/// LogQL stream selector for a query.
pub(crate) fn build_logql(query: &LogQuery) -> String {
    let mut matchers = Vec::new();
    if !query.service_types.is_empty() {
        matchers.push(format!(
            "service_type=~\"{}\"",
            query.service_types.join("|")
        ));
    }
    if !query.severities.is_empty() {
        let levels: Vec<&str> = query.severities.iter().map(|s| s.as_str()).collect();
        matchers.push(format!("level=~\"{}\"", levels.join("|")));
    }
    if !query.modules.is_empty() {
        matchers.push(format!("module=~\"{}\"", query.modules.join("|")));
    }
    format!("{{{}}}", matchers.join(", "))
}

/// Flatten streams into chronologically ordered entries.
fn parse_streams(response: QueryResponse) -> Vec<LogEntry> {
    let mut entries = Vec::new();
    for stream in response.data.result {
        let label = |name: &str| {
            stream
                .stream
                .get(name)
                .cloned()
                .unwrap_or_else(|| "unknown".to_string())
        };
        let severity = match label("level").parse::<Severity>() {
            Ok(severity) => severity,
            Err(e) => {
                tracing::debug!(error = %e, "Skipping stream with unrecognized level");
                continue;
            }
        };
        let hostname = label("hostname");
        let service_type = label("service_type");
        let module = label("module");

        for (ts, message) in &stream.values {
            let Ok(nanos) = ts.parse::<i64>() else {
                tracing::debug!(ts = %ts, "Skipping entry with unparseable timestamp");
                continue;
            };
            entries.push(LogEntry {
                timestamp: Utc.timestamp_nanos(nanos),
                hostname: hostname.clone(),
                service_type: service_type.clone(),
                module: module.clone(),
                severity,
                message: message.clone(),
            });
        }
    }
    // Loki returns newest first (direction=backward); stable sort keeps
    // same-instant entries in stream order.
    entries.sort_by_key(|e| e.timestamp);
    entries
}

impl LogSource for LokiClient {
    fn query(&self, query: &LogQuery) -> Result<Vec<LogEntry>> {
        let url = format!("{}/loki/api/v1/query_range", self.base_url);
        let logql = build_logql(query);
        let start = query.start.timestamp_nanos_opt().unwrap_or_default().to_string();
        let end = query.end.timestamp_nanos_opt().unwrap_or_default().to_string();
        let limit = query.limit.to_string();

        tracing::info!(url = %url, query = %logql, "Querying log store");

        let response: QueryResponse = self.runtime.block_on(async {
            let resp = self
                .http
                .get(&url)
                .query(&[
                    ("query", logql.as_str()),
                    ("start", start.as_str()),
                    ("end", end.as_str()),
                    ("limit", limit.as_str()),
                    ("direction", "backward"),
                ])
                .send()
                .await
                .map_err(|e| Error::SourceUnavailable(format!("log store request failed: {e}")))?;
            let status = resp.status();
            let body = resp
                .text()
                .await
                .map_err(|e| Error::SourceUnavailable(format!("log store read failed: {e}")))?;
            if !status.is_success() {
                return Err(Error::SourceUnavailable(format!(
                    "log store returned {}: {}",
                    status.as_u16(),
                    body
                )));
            }
            serde_json::from_str(&body).map_err(|e| {
                Error::SourceUnavailable(format!("log store returned invalid JSON: {e}"))
            })
        })?;

        let entries = parse_streams(response);
        tracing::info!(entries = entries.len(), "Parsed log entries");
        Ok(entries)
    }
}
