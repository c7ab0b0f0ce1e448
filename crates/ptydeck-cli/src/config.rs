//! Runtime configuration from environment variables.
//!
//! Every setting has a built-in default. Environment variables override it,
//! and command-line flags override both (applied in `main`):
//!
//! - `PTYDECK_SHELL`: shell used to launch sessions (default: probed)
//! - `PTYDECK_SCROLLBACK`: scrollback lines per surface (default: 5000)
//! - `PTYDECK_TERM`: `TERM` for child processes (default: `xterm-256color`)
//! - `PTYDECK_EXTRA_PATH`: extra directories prepended to the child `PATH`
//!
//! Empty values are ignored.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use crate::host::pty::TermSize;

pub const DEFAULT_SCROLLBACK: usize = 5000;
pub const DEFAULT_TERM: &str = "xterm-256color";

/// Default upper bound for delivering a launch's initial input.
pub const DEFAULT_INITIAL_INPUT_MAX_WAIT: Duration = Duration::from_millis(15_000);

/// Default delay before the first attempt to deliver initial input.
pub const DEFAULT_INITIAL_INPUT_MIN_DELAY: Duration = Duration::from_millis(2_000);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeckConfig {
    pub shell: Option<String>,
    pub scrollback: usize,
    pub term: String,
    pub extra_path_dirs: Vec<PathBuf>,
    pub size: TermSize,
    /// Working directory for sessions launched without one.
    pub default_cwd: Option<PathBuf>,
    pub initial_input_max_wait: Duration,
    pub initial_input_min_delay: Duration,
}

impl Default for DeckConfig {
    fn default() -> Self {
        Self {
            shell: None,
            scrollback: DEFAULT_SCROLLBACK,
            term: DEFAULT_TERM.to_string(),
            extra_path_dirs: Vec::new(),
            size: TermSize::default(),
            default_cwd: dirs::home_dir(),
            initial_input_max_wait: DEFAULT_INITIAL_INPUT_MAX_WAIT,
            initial_input_min_delay: DEFAULT_INITIAL_INPUT_MIN_DELAY,
        }
    }
}

impl DeckConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(shell) = non_empty("PTYDECK_SHELL") {
            config.shell = Some(shell);
        }

        if let Some(raw) = non_empty("PTYDECK_SCROLLBACK") {
            match raw.trim().parse::<usize>() {
                Ok(lines) => config.scrollback = lines,
                Err(_) => warn!(
                    "Ignoring invalid PTYDECK_SCROLLBACK '{}', using {}",
                    raw, DEFAULT_SCROLLBACK
                ),
            }
        }

        if let Some(term) = non_empty("PTYDECK_TERM") {
            config.term = term;
        }

        if let Some(raw) = env::var_os("PTYDECK_EXTRA_PATH") {
            config.extra_path_dirs = env::split_paths(&raw)
                .filter(|p| !p.as_os_str().is_empty())
                .collect();
        }

        config
    }
}

fn non_empty(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}
