//! Plugin error taxonomy
//!
//! Every external call made by a plugin funnels its failures through
//! `PluginError`. The variants mirror the upstream HTTP status classes so the
//! retry layer can decide what is worth retrying.

use thiserror::Error;

/// Error types for plugin operations
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl PluginError {
    /// Map an upstream HTTP status to an error variant
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            400 | 404 | 422 => PluginError::BadRequest(message),
            401 | 403 => PluginError::Authentication(message),
            429 => PluginError::RateLimit(message),
            502 | 503 | 504 => PluginError::Unavailable(message),
            _ => PluginError::Api { status, message },
        }
    }

    /// Map a reqwest transport failure to an error variant
    pub fn from_transport(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() {
            PluginError::Connection(e.to_string())
        } else {
            PluginError::Unexpected(e.to_string())
        }
    }

    /// Whether a retry attempt is worthwhile for this kind of failure
    ///
    /// API errors, authentication failures, and rate limits get retried;
    /// authentication additionally forces a credential refresh first.
    /// Everything else fails immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PluginError::Api { .. } | PluginError::Authentication(_) | PluginError::RateLimit(_)
        )
    }

    /// Render the error as the chat-visible response string
    pub fn user_message(&self) -> String {
        format!("Error: {}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            PluginError::from_status(401, "x".into()),
            PluginError::Authentication(_)
        ));
        assert!(matches!(
            PluginError::from_status(429, "x".into()),
            PluginError::RateLimit(_)
        ));
        assert!(matches!(
            PluginError::from_status(400, "x".into()),
            PluginError::BadRequest(_)
        ));
        assert!(matches!(
            PluginError::from_status(503, "x".into()),
            PluginError::Unavailable(_)
        ));
        assert!(matches!(
            PluginError::from_status(500, "x".into()),
            PluginError::Api { status: 500, .. }
        ));
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(PluginError::Authentication("x".into()).is_retryable());
        assert!(PluginError::RateLimit("x".into()).is_retryable());
        assert!(
            PluginError::Api {
                status: 500,
                message: "x".into()
            }
            .is_retryable()
        );
        assert!(!PluginError::BadRequest("x".into()).is_retryable());
        assert!(!PluginError::Connection("x".into()).is_retryable());
        assert!(!PluginError::Unavailable("x".into()).is_retryable());
        assert!(!PluginError::Unexpected("x".into()).is_retryable());
    }

    #[test]
    fn test_user_message_format() {
        let err = PluginError::BadRequest("missing field".into());
        assert_eq!(err.user_message(), "Error: Bad request: missing field");
    }
}
