//! Error types for callguard.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CallguardError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Boundary decoding errors
    #[error("Malformed event: {message}")]
    MalformedEvent { message: String },

    // Scoring errors
    #[error("Scoring failed: {message}")]
    Scoring { message: String },

    #[error("Contract violation: {message}")]
    ContractViolation { message: String },

    // Session lifecycle errors
    #[error("Session is closed and accepts no further events")]
    SessionClosed,

    #[error("Session aborted: {reason}")]
    SessionAborted { reason: String },

    #[error("Invalid session transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    // Diagnostics errors
    #[error("Window recording failed: {message}")]
    Recording { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for CallguardError {
    fn from(err: serde_json::Error) -> Self {
        CallguardError::MalformedEvent {
            message: err.to_string(),
        }
    }
}

impl From<hound::Error> for CallguardError {
    fn from(err: hound::Error) -> Self {
        CallguardError::Recording {
            message: err.to_string(),
        }
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, CallguardError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_config_file_not_found_display() {
        let error = CallguardError::ConfigFileNotFound {
            path: "/etc/callguard.toml".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Configuration file not found at /etc/callguard.toml"
        );
    }

    #[test]
    fn test_config_invalid_value_display() {
        let error = CallguardError::ConfigInvalidValue {
            key: "audio.frame_bytes".to_string(),
            message: "must be positive".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid configuration value for audio.frame_bytes: must be positive"
        );
    }

    #[test]
    fn test_malformed_event_display() {
        let error = CallguardError::MalformedEvent {
            message: "missing field `media`".to_string(),
        };
        assert_eq!(error.to_string(), "Malformed event: missing field `media`");
    }

    #[test]
    fn test_contract_violation_display() {
        let error = CallguardError::ContractViolation {
            message: "window has 10 samples, expected 32000".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Contract violation: window has 10 samples, expected 32000"
        );
    }

    #[test]
    fn test_session_errors_display() {
        assert_eq!(
            CallguardError::SessionClosed.to_string(),
            "Session is closed and accepts no further events"
        );
        let aborted = CallguardError::SessionAborted {
            reason: "scoring stage exited".to_string(),
        };
        assert_eq!(aborted.to_string(), "Session aborted: scoring stage exited");
        let transition = CallguardError::InvalidTransition {
            from: "closed".to_string(),
            to: "active".to_string(),
        };
        assert_eq!(
            transition.to_string(),
            "Invalid session transition from closed to active"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error: CallguardError = io_error.into();
        assert!(matches!(error, CallguardError::Io(_)));
        assert!(error.to_string().starts_with("I/O error:"));
    }

    #[test]
    fn test_json_error_becomes_malformed_event() {
        let json_error = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let error: CallguardError = json_error.into();
        assert!(matches!(error, CallguardError::MalformedEvent { .. }));
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_ok() -> Result<u32> {
            Ok(42)
        }

        fn returns_err() -> Result<u32> {
            Err(CallguardError::Other("boom".to_string()))
        }

        assert_eq!(returns_ok().unwrap(), 42);
        assert_eq!(returns_err().unwrap_err().to_string(), "boom");
    }
}
