//! Error types for warden-core

use thiserror::Error;

/// Main error type for the warden-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Durable store is unreadable or not a warden database
    #[error("state store is corrupt or unreadable: {0}")]
    StoreCorruption(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Log store unreachable or timed out
    #[error("log store unavailable: {0}")]
    SourceUnavailable(String),

    /// Language-model service unreachable, timed out or returned a server error
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    /// Language model declined or produced an unusable answer
    #[error("model refused: {0}")]
    ModelRefused(String),

    /// Branch or pull request already exists on the source-control host
    #[error("conflict: {0}")]
    Conflict(String),

    /// Source-control credentials rejected
    #[error("source control authentication failed: {0}")]
    Auth(String),

    /// Any other source-control host failure
    #[error("source control error: {0}")]
    SourceControl(String),

    /// Local checkout refresh failed
    #[error("git error: {0}")]
    Git(String),

    /// Outbound notification could not be delivered
    #[error("notification failed: {0}")]
    SendFailure(String),

    /// Pattern not found in the store
    #[error("pattern not found: {0}")]
    PatternNotFound(String),
}

impl Error {
    /// Whether this error aborts the whole run rather than a single cluster.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::SourceUnavailable(_)
                | Error::Auth(_)
                | Error::StoreCorruption(_)
                | Error::Database(_)
        )
    }
}

/// Result type alias for warden-core
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(Error::SourceUnavailable("down".into()).is_fatal());
        assert!(Error::Auth("bad token".into()).is_fatal());
        assert!(Error::StoreCorruption("not a db".into()).is_fatal());

        assert!(!Error::ModelUnavailable("503".into()).is_fatal());
        assert!(!Error::ModelRefused("no".into()).is_fatal());
        assert!(!Error::Conflict("exists".into()).is_fatal());
        assert!(!Error::SendFailure("smtp".into()).is_fatal());
    }
}
