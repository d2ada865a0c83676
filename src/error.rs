//! Top-level error type and log sanitization
//!
//! Only configuration and credential failures are fatal; everything that
//! happens after startup is logged. Messages coming from the transport may
//! quote credential paths or secrets, so they are sanitized before logging.

use crate::config::ConfigError;
use crate::shadow::ShadowError;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Longest error message written to the log
const MAX_LOGGED_ERROR_LEN: usize = 500;

static SECRET_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(password|token|key|secret)[=:]\s*\S+").unwrap());

static CREDENTIAL_PATH_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"/[a-zA-Z0-9._/-]+/(certs?|secrets?|\.ssh|\.aws)/[a-zA-Z0-9._/-]+").unwrap()
});

/// Main error type for agent startup and shutdown
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    ConfigError(#[from] ConfigError),

    #[error("Shadow client error: {0}")]
    ShadowError(#[from] ShadowError),

    #[error("Signal handling error: {0}")]
    SignalError(#[source] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Result type for agent operations
pub type AgentResult<T> = Result<T, AgentError>;

/// Redact secrets and credential paths, and bound the length of an error message
pub fn sanitize_error_message(message: &str) -> String {
    let sanitized = SECRET_PATTERN.replace_all(message, "${1}=***");
    let mut sanitized = CREDENTIAL_PATH_PATTERN
        .replace_all(&sanitized, "/***REDACTED***/")
        .to_string();

    if sanitized.len() > MAX_LOGGED_ERROR_LEN {
        let truncate_suffix = "...[truncated]";
        let mut cut = MAX_LOGGED_ERROR_LEN - truncate_suffix.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized = format!("{}{}", &sanitized[..cut], truncate_suffix);
    }

    sanitized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secrets_redacted() {
        let sanitized = sanitize_error_message("TLS failed: password=hunter2 token: abc456");

        assert!(!sanitized.contains("hunter2"));
        assert!(!sanitized.contains("abc456"));
        assert!(sanitized.contains("password=***"));
        assert!(sanitized.contains("token=***"));
    }

    #[test]
    fn test_credential_paths_redacted() {
        let sanitized =
            sanitize_error_message("Failed to read /home/pi/certs/rpi-01.private.key: denied");

        assert!(sanitized.contains("/***REDACTED***/"));
        assert!(!sanitized.contains("rpi-01.private.key"));
    }

    #[test]
    fn test_plain_message_unchanged() {
        let message = "I/O error: connection reset by peer (os error 104)";
        assert_eq!(sanitize_error_message(message), message);
        assert_eq!(sanitize_error_message(""), "");
    }

    #[test]
    fn test_long_message_truncation() {
        let sanitized = sanitize_error_message(&"x".repeat(600));
        assert!(sanitized.len() <= MAX_LOGGED_ERROR_LEN);
        assert!(sanitized.ends_with("...[truncated]"));

        let exact = "x".repeat(MAX_LOGGED_ERROR_LEN);
        assert_eq!(sanitize_error_message(&exact), exact);
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let sanitized = sanitize_error_message(&"é".repeat(400));
        assert!(sanitized.len() <= MAX_LOGGED_ERROR_LEN);
        assert!(sanitized.ends_with("...[truncated]"));
    }

    #[test]
    fn test_error_conversions() {
        let config_error: AgentError = ConfigError::EmptyField("Host").into();
        assert_eq!(
            config_error.to_string(),
            "Configuration error: Required field is empty: Host"
        );

        let shadow_error: AgentError = ShadowError::NotConnected {
            state: crate::shadow::ConnectionState::Connecting,
        }
        .into();
        assert!(shadow_error.to_string().starts_with("Shadow client error"));
    }
}
