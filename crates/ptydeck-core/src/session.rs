//! Session data model.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// Generate a new unique session ID.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Whether the session's program is still considered live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Ended,
}

/// A user-visible launched command and its lifecycle.
///
/// The record is independent of process liveness: it exists from the launch
/// request until it is explicitly removed, and outlives the process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    /// Program to run. Empty means a plain login shell.
    pub command: String,
    pub args: Vec<String>,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub cwd: Option<PathBuf>,
    pub display_name: Option<String>,
    /// Slug of the tool this session was launched from, if any.
    pub tool_slug: Option<String>,
}

impl Session {
    /// A fresh running session record.
    pub fn new(command: impl Into<String>, args: Vec<String>, cwd: Option<PathBuf>) -> Self {
        Self {
            id: SessionId::new(),
            command: command.into(),
            args,
            status: SessionStatus::Running,
            started_at: Utc::now(),
            ended_at: None,
            cwd,
            display_name: None,
            tool_slug: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == SessionStatus::Running
    }

    /// True when this session runs the user's login shell rather than a tool.
    pub fn is_plain_shell(&self) -> bool {
        self.command.trim().is_empty()
    }

    /// Name shown for the session: the display name, else the command.
    pub fn label(&self) -> &str {
        match self.display_name.as_deref() {
            Some(name) => name,
            None if self.is_plain_shell() => "Terminal",
            None => self.command.as_str(),
        }
    }

    /// Transition to `Ended`. Returns false if it had already ended.
    pub fn end(&mut self, at: DateTime<Utc>) -> bool {
        if self.status == SessionStatus::Ended {
            return false;
        }
        self.status = SessionStatus::Ended;
        self.ended_at = Some(at);
        true
    }
}

/// A launchable command-line tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tool {
    pub slug: String,
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Tool {
    /// The tool's own args followed by the user's custom flags.
    pub fn merged_args(&self, custom_flags: &str) -> Vec<String> {
        let mut args = self.args.clone();
        args.extend(parse_flags(custom_flags));
        args
    }
}

/// Split a user-entered flag string on whitespace.
///
/// Quotes are kept as literal characters; no shell-style grouping happens.
pub fn parse_flags(flags: &str) -> Vec<String> {
    flags.split_whitespace().map(str::to_string).collect()
}
