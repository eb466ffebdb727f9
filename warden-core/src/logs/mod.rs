//! Log store access.
//!
//! [`LogSource`] is the seam the orchestrator reads entries through;
//! [`LokiClient`] is the production implementation.

mod loki;

pub use loki::LokiClient;

use crate::config::LogStoreConfig;
use crate::types::{LogEntry, Severity};
use crate::Result;
use chrono::{DateTime, Duration, Utc};

/// One window query.
#[derive(Debug, Clone, PartialEq)]
pub struct LogQuery {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub severities: Vec<Severity>,
    /// Node classes; empty means all
    pub service_types: Vec<String>,
    /// Modules; empty means all
    pub modules: Vec<String>,
    pub limit: usize,
}

impl LogQuery {
    /// The trailing window ending at `now`, as configured.
    pub fn trailing(config: &LogStoreConfig, now: DateTime<Utc>) -> Self {
        let severities = config
            .levels
            .iter()
            .filter_map(|level| match level.parse::<Severity>() {
                Ok(severity) => Some(severity),
                Err(e) => {
                    tracing::warn!(level = %level, error = %e, "Ignoring unknown log level");
                    None
                }
            })
            .collect();

        Self {
            start: now - Duration::minutes(i64::from(config.window_minutes)),
            end: now,
            severities,
            service_types: config.service_types.clone(),
            modules: Vec::new(),
            limit: config.max_entries,
        }
    }
}

/// Source of log entries for a window.
///
/// Implementations return entries in chronological order and fail with
/// [`crate::Error::SourceUnavailable`] on connectivity or timeout errors.
pub trait LogSource: Send + Sync {
    fn query(&self, query: &LogQuery) -> Result<Vec<LogEntry>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_window_uses_config() {
        let config = LogStoreConfig {
            window_minutes: 15,
            levels: vec!["error".to_string(), "bogus".to_string()],
            ..LogStoreConfig::default()
        };
        let now = Utc::now();
        let query = LogQuery::trailing(&config, now);

        assert_eq!(query.end, now);
        assert_eq!(query.end - query.start, Duration::minutes(15));
        assert_eq!(query.severities, vec![Severity::Error]);
        assert_eq!(query.limit, 5000);
        assert!(query.modules.is_empty());
    }
}
