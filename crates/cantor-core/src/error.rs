//! Error types for the Cantor REPL bridge.
//!
//! The variants follow the three failure scopes of a session: transport
//! errors are fatal to the whole session, evaluation errors only concern one
//! expression (and are reported through the expression, not through this
//! type), and caller errors such as unknown ids or bad configuration.

use thiserror::Error;

use crate::{ExpressionId, SessionId};

/// Main error type for Cantor operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Session not found
    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    /// Expression not found (or already released)
    #[error("Expression not found: {0}")]
    ExpressionNotFound(ExpressionId),

    /// Backend profile not found by name
    #[error("Backend not found: {0}")]
    BackendNotFound(String),

    /// The interpreter executable could not be started
    #[error("Failed to start interpreter: {0}")]
    SpawnFailed(String),

    /// Transport-level failure (pipe, PTY or signal delivery)
    #[error("Transport error: {0}")]
    Transport(String),

    /// The interpreter exited while the session was in use
    #[error("Interpreter exited unexpectedly (exit code: {code:?})")]
    ProcessExited {
        /// Exit code, when the platform reports one
        code: Option<i32>,
    },

    /// The interpreter never presented its first boundary
    #[error("Login timed out after {0}ms")]
    LoginTimeout(u64),

    /// Session is not logged in
    #[error("Session is disabled")]
    SessionDisabled,

    /// The session task is gone
    #[error("Session closed")]
    SessionClosed,

    /// Timeout waiting for an expression to finish
    #[error("Timeout waiting for expression after {0}ms")]
    WaitTimeout(u64),

    /// Session limit reached
    #[error("Session limit reached (max: {0})")]
    SessionLimitReached(usize),

    /// A prompt or marker pattern does not compile
    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// The offending pattern
        pattern: String,
        /// Compiler message
        reason: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid input or parameters (generic)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Generic error with custom message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error leaves the session unusable until the next login.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            Error::SpawnFailed(_)
                | Error::Transport(_)
                | Error::ProcessExited { .. }
                | Error::LoginTimeout(_)
        )
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_not_found_error() {
        let session_id = SessionId::new();
        let err = Error::SessionNotFound(session_id);
        let display = err.to_string();
        assert!(display.starts_with("Session not found:"));
    }

    #[test]
    fn test_expression_not_found_error() {
        let err = Error::ExpressionNotFound(ExpressionId::new(7));
        assert_eq!(err.to_string(), "Expression not found: 7");
    }

    #[test]
    fn test_spawn_failed_error() {
        let err = Error::SpawnFailed("octave-cli: not found".to_string());
        assert_eq!(
            err.to_string(),
            "Failed to start interpreter: octave-cli: not found"
        );
        assert!(err.is_session_fatal());
    }

    #[test]
    fn test_process_exited_error() {
        let err = Error::ProcessExited { code: Some(139) };
        assert_eq!(
            err.to_string(),
            "Interpreter exited unexpectedly (exit code: Some(139))"
        );
        assert!(err.is_session_fatal());
    }

    #[test]
    fn test_login_timeout_error() {
        let err = Error::LoginTimeout(10000);
        assert_eq!(err.to_string(), "Login timed out after 10000ms");
    }

    #[test]
    fn test_wait_timeout_error() {
        let err = Error::WaitTimeout(5000);
        assert_eq!(err.to_string(), "Timeout waiting for expression after 5000ms");
        assert!(!err.is_session_fatal());
    }

    #[test]
    fn test_session_limit_reached_error() {
        let err = Error::SessionLimitReached(10);
        assert_eq!(err.to_string(), "Session limit reached (max: 10)");
    }

    #[test]
    fn test_invalid_pattern_error() {
        let err = Error::InvalidPattern {
            pattern: "([".to_string(),
            reason: "unclosed group".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid pattern '([': unclosed group");
    }

    #[test]
    fn test_session_disabled_error() {
        assert_eq!(Error::SessionDisabled.to_string(), "Session is disabled");
        assert!(!Error::SessionDisabled.is_session_fatal());
    }

    #[test]
    fn test_config_error() {
        let err = Error::Config("missing field: program".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: missing field: program"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_serialization_error_conversion() {
        let json_err = serde_json::from_str::<i32>("invalid json").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn test_error_debug() {
        let err = Error::InvalidInput("test".to_string());
        let debug_str = format!("{err:?}");
        assert!(debug_str.contains("InvalidInput"));
    }
}
