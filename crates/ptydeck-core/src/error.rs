//! Session-level error type with actionable suggestions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// What kind of session operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    SessionNotFound,
    CommandFailed,
    InvalidInput,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SessionNotFound => "SESSION_NOT_FOUND",
            Self::CommandFailed => "COMMAND_FAILED",
            Self::InvalidInput => "INVALID_INPUT",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error with a code, a message and a hint for the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    pub suggestion: Option<String>,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.message, self.code)?;
        match &self.suggestion {
            Some(suggestion) => write!(f, "; {}", suggestion),
            None => Ok(()),
        }
    }
}

impl std::error::Error for ApiError {}

impl ApiError {
    fn new(code: ErrorCode, message: String, suggestion: impl Into<String>) -> Self {
        Self {
            code,
            message,
            suggestion: Some(suggestion.into()),
        }
    }

    pub fn session_not_found(session_id: &str) -> Self {
        Self::new(
            ErrorCode::SessionNotFound,
            format!("Session '{}' not found", session_id),
            "The session may have been closed; list sessions to see what is open",
        )
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::InvalidInput,
            message.into(),
            "Check the arguments and try again",
        )
    }

    /// Refused launch once `max` sessions exist.
    pub fn session_limit_reached(max: usize) -> Self {
        Self::new(
            ErrorCode::CommandFailed,
            format!("Maximum session limit ({}) reached", max),
            "Close an existing session before launching a new one",
        )
    }

    /// A program could not be started. An empty `command` means the login shell.
    pub fn spawn_failed(command: &str, error: &str) -> Self {
        let (shown, program) = match command.split_whitespace().next() {
            Some(program) => (command, program),
            None => ("(login shell)", "the shell"),
        };
        Self::new(
            ErrorCode::CommandFailed,
            format!("Failed to start '{}': {}", shown, error),
            format!(
                "Verify '{}' exists in your PATH and is executable. Try running it directly in your terminal first.",
                program
            ),
        )
    }
}
