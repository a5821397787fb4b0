//! Error types for the reconnaissance library.

use thiserror::Error;

/// Result type alias for reconnaissance operations.
pub type Result<T> = std::result::Result<T, ReconError>;

/// Errors that can occur while probing platforms.
#[derive(Error, Debug)]
pub enum ReconError {
    /// The identifier failed validation; nothing was probed.
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// A requested category is not present in the registry.
    #[error("Unknown category: {0}")]
    UnknownCategory(String),

    /// None of the requested categories has a configured platform.
    #[error("No platforms configured for the requested categories")]
    NoPlatforms,

    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Network failure outside of the HTTP client itself.
    #[error("Transport failure: {0}")]
    Transport(String),

    /// A probe or category deadline was exceeded.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The proxy pool has no records to hand out.
    #[error("Proxy pool is empty")]
    ProxyExhausted,

    /// Failed to parse response.
    #[error("Failed to parse response: {0}")]
    Parse(String),

    /// Invalid configuration input.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Filesystem error while loading configuration.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parsing error.
    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// Generic error.
    #[error("{0}")]
    Other(String),
}

impl ReconError {
    /// Returns true for transport failures, which count against the proxy
    /// that carried the attempt.
    ///
    /// Parse or configuration problems say nothing about proxy health.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ReconError::Http(_) | ReconError::Transport(_) | ReconError::Timeout(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_invalid_identifier() {
        let err = ReconError::InvalidIdentifier("missing @".to_string());
        assert_eq!(err.to_string(), "Invalid identifier: missing @");
    }

    #[test]
    fn test_error_display_unknown_category() {
        let err = ReconError::UnknownCategory("forums".to_string());
        assert_eq!(err.to_string(), "Unknown category: forums");
    }

    #[test]
    fn test_error_display_no_platforms() {
        let err = ReconError::NoPlatforms;
        assert_eq!(
            err.to_string(),
            "No platforms configured for the requested categories"
        );
    }

    #[test]
    fn test_error_display_timeout_mentions_timeout() {
        let err = ReconError::Timeout("probe exceeded 60s".to_string());
        assert!(err.to_string().contains("timeout"));
    }

    #[test]
    fn test_error_display_parse() {
        let err = ReconError::Parse("invalid selector".to_string());
        assert_eq!(err.to_string(), "Failed to parse response: invalid selector");
    }

    #[test]
    fn test_error_display_other() {
        let err = ReconError::Other("something went wrong".to_string());
        assert_eq!(err.to_string(), "something went wrong");
    }

    #[test]
    fn test_is_transport() {
        assert!(ReconError::Transport("reset".into()).is_transport());
        assert!(ReconError::Timeout("slow".into()).is_transport());
        assert!(!ReconError::Parse("bad".into()).is_transport());
        assert!(!ReconError::NoPlatforms.is_transport());
        assert!(!ReconError::Config("bad proxy".into()).is_transport());
        assert!(!ReconError::InvalidIdentifier("x".into()).is_transport());
    }

    #[test]
    fn test_error_from_json() {
        let err: ReconError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, ReconError::Json(_)));
    }
}
