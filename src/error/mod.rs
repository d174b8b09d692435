//! Error taxonomy for rendering and delivering notifications.

use thiserror::Error;

use crate::template::TemplateError;

#[derive(Error, Debug)]
pub enum NotifyError {
    /// Template compilation or rendering failed
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// Icon is neither an emoji reference nor an http(s) URL
    #[error("Invalid icon: '{0}' is not a valid emoji reference or http(s) URL")]
    InvalidIcon(String),

    /// Attachments or blocks did not decode as a JSON array
    #[error("Malformed {field}: {reason}")]
    MalformedPayload { field: &'static str, reason: String },

    /// The chat API could not be reached
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The chat API rejected the request
    #[error("Delivery failed: {0}")]
    Delivery(String),

    /// No service is registered for the destination
    #[error("Unknown notification service: {0}")]
    UnknownService(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl NotifyError {
    /// Whether the caller may retry the same request later
    pub fn is_retryable(&self) -> bool {
        matches!(self, NotifyError::Transport(_))
    }
}

pub type Result<T> = std::result::Result<T, NotifyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_error_is_transparent() {
        let err: NotifyError = TemplateError::NotFound("alert".to_string()).into();
        assert_eq!(err.to_string(), "Template not found: alert");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_malformed_payload_display() {
        let err = NotifyError::MalformedPayload {
            field: "attachments",
            reason: "expected value at line 1 column 1".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Malformed attachments: expected value at line 1 column 1"
        );
    }
}
