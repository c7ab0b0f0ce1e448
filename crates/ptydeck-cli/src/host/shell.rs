//! Shell resolution and tool detection.
//!
//! The shell is re-probed for every spawn. Probing never fails the caller:
//! [`resolve_shell`] logs the problem and falls back to a hardcoded default.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use ptydeck_core::shell::{OsKind, ShellInfo};
use serde::Serialize;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, warn};

/// How long a tool gets to answer `--version`.
const VERSION_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ShellProbeError {
    #[error("no shell configured ({0} is unset)")]
    NotConfigured(&'static str),
    #[error("shell '{0}' was not found")]
    NotFound(String),
    #[error("shell probe task failed: {0}")]
    Task(String),
}

/// Source of the default interactive shell.
#[async_trait]
pub trait ShellProbe: Send + Sync {
    async fn probe(&self) -> Result<ShellInfo, ShellProbeError>;
}

/// Probe the shell, falling back to the platform default on any error.
pub async fn resolve_shell(probe: &dyn ShellProbe) -> ShellInfo {
    match probe.probe().await {
        Ok(shell) => {
            debug!("Resolved shell {} ({:?})", shell.shell_path, shell.shell_kind);
            shell
        }
        Err(e) => {
            let fallback = ShellInfo::fallback();
            warn!(
                "Shell probe failed: {}, falling back to {}",
                e, fallback.shell_path
            );
            fallback
        }
    }
}

/// Probes the environment of the running system.
#[derive(Debug, Clone, Default)]
pub struct SystemShellProbe {
    shell_override: Option<String>,
    extra_path_dirs: Vec<PathBuf>,
}

impl SystemShellProbe {
    /// `shell_override` wins over the environment; `extra_path_dirs` are
    /// searched before the well-known tool directories.
    pub fn new(shell_override: Option<String>, extra_path_dirs: Vec<PathBuf>) -> Self {
        Self {
            shell_override,
            extra_path_dirs,
        }
    }
}

#[async_trait]
impl ShellProbe for SystemShellProbe {
    async fn probe(&self) -> Result<ShellInfo, ShellProbeError> {
        let shell_override = self.shell_override.clone();
        let configured = self.extra_path_dirs.clone();
        tokio::task::spawn_blocking(move || probe_system(shell_override.as_deref(), &configured))
            .await
            .map_err(|e| ShellProbeError::Task(e.to_string()))?
    }
}

fn probe_system(
    shell_override: Option<&str>,
    configured_dirs: &[PathBuf],
) -> Result<ShellInfo, ShellProbeError> {
    let os = OsKind::current();

    let shell_path = match shell_override.filter(|s| !s.trim().is_empty()) {
        Some(shell) => shell.to_string(),
        None => default_shell_path(os)?,
    };
    ensure_shell_exists(&shell_path)?;

    let mut extra: Vec<PathBuf> = Vec::new();
    for dir in configured_dirs.iter().cloned().chain(well_known_tool_dirs(os)) {
        if dir.is_dir() && !extra.contains(&dir) {
            extra.push(dir);
        }
    }

    Ok(ShellInfo::new(os, shell_path).with_extra_path_dirs(extra))
}

fn default_shell_path(os: OsKind) -> Result<String, ShellProbeError> {
    if os == OsKind::Windows {
        for candidate in ["pwsh.exe", "powershell.exe"] {
            if let Some(path) = find_executable(candidate, &[]) {
                return Ok(path.to_string_lossy().into_owned());
            }
        }
        return non_empty_env("COMSPEC").ok_or(ShellProbeError::NotConfigured("COMSPEC"));
    }
    non_empty_env("SHELL").ok_or(ShellProbeError::NotConfigured("SHELL"))
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn ensure_shell_exists(shell_path: &str) -> Result<(), ShellProbeError> {
    let path = Path::new(shell_path);
    let found = if path.is_absolute() {
        path.is_file()
    } else {
        find_executable(shell_path, &[]).is_some()
    };
    if found {
        Ok(())
    } else {
        Err(ShellProbeError::NotFound(shell_path.to_string()))
    }
}

/// Per-user install locations coding tools commonly land in.
fn well_known_tool_dirs(os: OsKind) -> Vec<PathBuf> {
    let mut dirs_out = Vec::new();

    if os == OsKind::Windows {
        if let Some(roaming) = dirs::data_dir() {
            dirs_out.push(roaming.join("npm"));
        }
        return dirs_out;
    }

    if let Some(home) = dirs::home_dir() {
        for sub in [".local/bin", ".cargo/bin", ".npm-global/bin", ".bun/bin"] {
            dirs_out.push(home.join(sub));
        }
    }
    if os == OsKind::MacOs {
        dirs_out.push(PathBuf::from("/opt/homebrew/bin"));
    }
    dirs_out.push(PathBuf::from("/usr/local/bin"));
    dirs_out
}

/// Locate `name` in `extra_dirs`, then on `PATH`.
///
/// Names containing a path separator are checked as-is.
pub fn find_executable(name: &str, extra_dirs: &[PathBuf]) -> Option<PathBuf> {
    if name.contains('/') || name.contains('\\') {
        let path = PathBuf::from(name);
        return is_executable(&path).then_some(path);
    }

    let path_dirs: Vec<PathBuf> = std::env::var_os("PATH")
        .map(|p| std::env::split_paths(&p).collect())
        .unwrap_or_default();

    extra_dirs
        .iter()
        .chain(path_dirs.iter())
        .flat_map(|dir| candidate_names(name).into_iter().map(move |n| dir.join(n)))
        .find(|candidate| is_executable(candidate))
}

#[cfg(windows)]
fn candidate_names(name: &str) -> Vec<String> {
    if Path::new(name).extension().is_some() {
        return vec![name.to_string()];
    }
    ["exe", "cmd", "bat"]
        .iter()
        .map(|ext| format!("{name}.{ext}"))
        .collect()
}

#[cfg(not(windows))]
fn candidate_names(name: &str) -> Vec<String> {
    vec![name.to_string()]
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Whether a tool is installed, and which version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolDetection {
    pub command: String,
    pub installed: bool,
    pub version: Option<String>,
    pub path: Option<PathBuf>,
}

/// Look `command` up and ask it for `--version`.
pub async fn detect_tool(command: &str, extra_dirs: &[PathBuf]) -> ToolDetection {
    let path = find_executable(command, extra_dirs);
    let version = match &path {
        Some(path) => probe_version(path).await,
        None => None,
    };

    ToolDetection {
        command: command.to_string(),
        installed: path.is_some(),
        version,
        path,
    }
}

/// First non-empty of stdout and stderr from a successful `--version` run.
async fn probe_version(path: &Path) -> Option<String> {
    let output = tokio::process::Command::new(path)
        .arg("--version")
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();

    let output = match timeout(VERSION_TIMEOUT, output).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            debug!("Failed to run {:?} --version: {}", path, e);
            return None;
        }
        Err(_) => {
            debug!("{:?} --version timed out", path);
            return None;
        }
    };

    if !output.status.success() {
        return None;
    }

    [output.stdout, output.stderr]
        .iter()
        .map(|bytes| String::from_utf8_lossy(bytes).trim().to_string())
        .find(|text| !text.is_empty())
}
