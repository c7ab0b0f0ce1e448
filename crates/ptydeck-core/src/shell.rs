//! Shell description and command-line construction.
//!
//! A [`ShellInfo`] describes the interactive shell a session is launched
//! through. [`build_command_line`] turns a tool command into the argv that
//! shell needs, and [`path_with_extra_dirs`] prepends per-user tool
//! directories to the child's `PATH`.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Operating system family the shell was resolved on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OsKind {
    Linux,
    MacOs,
    Windows,
    Other,
}

impl OsKind {
    /// The OS this binary was compiled for.
    pub fn current() -> Self {
        if cfg!(target_os = "linux") {
            OsKind::Linux
        } else if cfg!(target_os = "macos") {
            OsKind::MacOs
        } else if cfg!(windows) {
            OsKind::Windows
        } else {
            OsKind::Other
        }
    }
}

/// Shell dialect, which decides how a command string is passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShellKind {
    /// sh, bash, zsh, fish and friends.
    Posix,
    /// Windows PowerShell or pwsh.
    PowerShell,
    /// Windows `cmd.exe`.
    Cmd,
}

impl ShellKind {
    /// Classify a shell from its executable path.
    pub fn from_path(shell_path: &str) -> Self {
        match shell_stem(shell_path).as_str() {
            "pwsh" | "powershell" => ShellKind::PowerShell,
            "cmd" => ShellKind::Cmd,
            _ => ShellKind::Posix,
        }
    }
}

/// Lowercased file stem of a shell path, accepting both separator styles.
fn shell_stem(shell_path: &str) -> String {
    let name = shell_path
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(shell_path)
        .to_ascii_lowercase();
    match name.strip_suffix(".exe") {
        Some(stem) => stem.to_string(),
        None => name,
    }
}

/// Arguments that start `shell_path` as a plain interactive session.
pub fn interactive_args(kind: ShellKind, shell_path: &str) -> Vec<String> {
    match kind {
        ShellKind::Posix => match shell_stem(shell_path).as_str() {
            "bash" | "zsh" | "fish" => vec!["--login".to_string()],
            _ => vec!["-l".to_string()],
        },
        ShellKind::PowerShell => vec!["-NoLogo".to_string()],
        ShellKind::Cmd => Vec::new(),
    }
}

/// The interactive shell a session is launched through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellInfo {
    pub os: OsKind,
    pub shell_path: String,
    pub shell_kind: ShellKind,
    pub interactive_args: Vec<String>,
    /// Directories prepended to `PATH` for spawned children.
    pub extra_path_dirs: Vec<PathBuf>,
}

impl ShellInfo {
    /// Describe `shell_path`, deriving kind and interactive args from its name.
    pub fn new(os: OsKind, shell_path: impl Into<String>) -> Self {
        let shell_path = shell_path.into();
        let shell_kind = ShellKind::from_path(&shell_path);
        let interactive_args = interactive_args(shell_kind, &shell_path);
        Self {
            os,
            shell_path,
            shell_kind,
            interactive_args,
            extra_path_dirs: Vec::new(),
        }
    }

    /// Attach extra search directories.
    pub fn with_extra_path_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.extra_path_dirs = dirs;
        self
    }

    /// Hardcoded shell used when probing fails.
    pub fn fallback() -> Self {
        let os = OsKind::current();
        if os == OsKind::Windows {
            Self::new(os, "cmd.exe")
        } else {
            Self::new(os, "/bin/sh")
        }
    }
}

/// Build the argv passed to `shell.shell_path` for `command` and `args`.
///
/// An empty command yields the shell's interactive args. Otherwise the
/// command and its args are joined with single spaces and handed to the
/// shell as one command string. Arguments are not quoted or escaped, so an
/// argument containing spaces or shell metacharacters is re-split or
/// interpreted by the shell.
pub fn build_command_line(shell: &ShellInfo, command: &str, args: &[String]) -> Vec<String> {
    if command.trim().is_empty() {
        return shell.interactive_args.clone();
    }

    let mut full_cmd = command.to_string();
    for arg in args {
        full_cmd.push(' ');
        full_cmd.push_str(arg);
    }

    match shell.shell_kind {
        ShellKind::Posix => vec!["--login".to_string(), "-c".to_string(), full_cmd],
        ShellKind::PowerShell => vec!["-NoLogo".to_string(), "-Command".to_string(), full_cmd],
        ShellKind::Cmd => vec!["/C".to_string(), full_cmd],
    }
}

/// Prepend `extra` to a `PATH` value, skipping directories already present.
///
/// Returns `None` when nothing needs to change or when a directory cannot be
/// represented in a path list (it contains the list separator).
pub fn path_with_extra_dirs(current: Option<&OsStr>, extra: &[PathBuf]) -> Option<OsString> {
    let existing: Vec<PathBuf> = current
        .map(|p| std::env::split_paths(p).collect())
        .unwrap_or_default();

    let mut missing: Vec<&Path> = Vec::new();
    for dir in extra {
        if !existing.iter().any(|e| e == dir) && !missing.iter().any(|m| *m == dir.as_path()) {
            missing.push(dir);
        }
    }
    if missing.is_empty() {
        return None;
    }

    let merged = missing
        .into_iter()
        .map(Path::to_path_buf)
        .chain(existing);
    std::env::join_paths(merged).ok()
}
