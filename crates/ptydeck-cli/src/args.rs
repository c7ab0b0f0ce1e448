//! CLI argument parsing with clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Run command-line tools side by side, each on its own pseudo-terminal.
///
/// Sessions are launched through your login shell so tools find the same
/// PATH and environment they would in a normal terminal.
#[derive(Debug, Parser)]
#[command(name = "ptydeck", version)]
pub struct Cli {
    /// Shell used to launch sessions [env: PTYDECK_SHELL]
    #[arg(long, global = true, value_name = "PATH")]
    pub shell: Option<String>,

    /// Scrollback lines kept per session [env: PTYDECK_SCROLLBACK]
    #[arg(long, global = true, value_name = "LINES")]
    pub scrollback: Option<usize>,

    /// TERM value for launched programs [env: PTYDECK_TERM]
    #[arg(long, global = true, value_name = "TERM")]
    pub term: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run a tool (or your login shell) attached to this terminal
    #[command(after_help = "\
Examples:
  ptydeck run                                   # Plain login shell
  ptydeck run -- claude                         # A tool through the login shell
  ptydeck run --flags '--verbose' -- claude     # Extra flags appended to the tool
  ptydeck run --send 'explain this repo' -- claude
                                                # Type a prompt once it is ready")]
    Run(RunArgs),

    /// Run a command headless and print its final screen
    #[command(after_help = "\
Examples:
  ptydeck capture -- ls --color=always
  ptydeck capture --cols 120 --timeout 5000 -- git log --oneline")]
    Capture(CaptureArgs),

    /// Print the resolved shell as JSON
    Shell,

    /// Print the argv a command would be launched with, as JSON
    Argv(ArgvArgs),

    /// Check whether tools are installed and report their versions
    Detect(DetectArgs),
}

#[derive(Debug, clap::Args)]
pub struct RunArgs {
    /// Command and arguments; omit for a plain login shell
    #[arg(num_args = 0.., trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,

    /// Extra flags appended to the command, split on whitespace
    #[arg(long, value_name = "FLAGS", allow_hyphen_values = true)]
    pub flags: Option<String>,

    /// Working directory [default: home directory]
    #[arg(long, value_name = "DIR")]
    pub cwd: Option<PathBuf>,

    /// Display name for the session
    #[arg(short, long)]
    pub name: Option<String>,

    /// Text to type into the session once it accepts input
    #[arg(long, value_name = "TEXT")]
    pub send: Option<String>,

    /// Delay before the first attempt to send (milliseconds)
    #[arg(long, default_value_t = 2000, value_name = "MS")]
    pub send_delay: u64,

    /// Give up sending after this long (milliseconds)
    #[arg(long, default_value_t = 15000, value_name = "MS")]
    pub max_wait: u64,
}

#[derive(Debug, clap::Args)]
pub struct CaptureArgs {
    /// Command and arguments to run
    #[arg(
        required = true,
        num_args = 1..,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub command: Vec<String>,

    /// Working directory [default: home directory]
    #[arg(long, value_name = "DIR")]
    pub cwd: Option<PathBuf>,

    /// Screen width
    #[arg(long, default_value_t = 80)]
    pub cols: u16,

    /// Screen height
    #[arg(long, default_value_t = 24)]
    pub rows: u16,

    /// Kill the command if it runs longer than this (milliseconds)
    #[arg(short, long, default_value_t = 30000)]
    pub timeout: u64,
}

#[derive(Debug, clap::Args)]
pub struct ArgvArgs {
    /// Command and arguments; omit for a plain login shell
    #[arg(num_args = 0.., trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

#[derive(Debug, clap::Args)]
pub struct DetectArgs {
    /// Tool commands to look for (e.g. claude, codex, gemini)
    #[arg(required = true, num_args = 1..)]
    pub tools: Vec<String>,
}

/// Split `[command, args...]` into the command and its args.
pub fn split_command(words: &[String]) -> (String, Vec<String>) {
    match words.split_first() {
        Some((command, args)) => (command.clone(), args.to_vec()),
        None => (String::new(), Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::{split_command, Cli, Commands};
    use clap::Parser;

    #[test]
    fn test_run_parses_hyphenated_args() {
        let cli = Cli::parse_from(["ptydeck", "run", "--", "claude", "--model", "opus"]);

        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.command, vec!["claude", "--model", "opus"]);
                assert_eq!(args.send_delay, 2000);
                assert_eq!(args.max_wait, 15000);
            }
            _ => panic!("Expected run command"),
        }
    }

    #[test]
    fn test_run_without_command_is_login_shell() {
        let cli = Cli::parse_from(["ptydeck", "run", "--name", "scratch"]);
        match cli.command {
            Commands::Run(args) => {
                assert!(args.command.is_empty());
                assert_eq!(args.name.as_deref(), Some("scratch"));
            }
            _ => panic!("Expected run command"),
        }
    }

    #[test]
    fn test_run_flags_accept_leading_hyphen() {
        let cli = Cli::parse_from(["ptydeck", "run", "--flags", "--verbose", "--", "claude"]);
        match cli.command {
            Commands::Run(args) => assert_eq!(args.flags.as_deref(), Some("--verbose")),
            _ => panic!("Expected run command"),
        }
    }

    #[test]
    fn test_global_overrides() {
        let cli = Cli::parse_from(["ptydeck", "shell", "--shell", "/bin/bash", "--scrollback", "10"]);
        assert_eq!(cli.shell.as_deref(), Some("/bin/bash"));
        assert_eq!(cli.scrollback, Some(10));
        assert!(matches!(cli.command, Commands::Shell));
    }

    #[test]
    fn test_capture_requires_command() {
        assert!(Cli::try_parse_from(["ptydeck", "capture"]).is_err());
        let cli = Cli::parse_from(["ptydeck", "capture", "--cols", "120", "--", "ls", "-la"]);
        match cli.command {
            Commands::Capture(args) => {
                assert_eq!(args.cols, 120);
                assert_eq!(args.command, vec!["ls", "-la"]);
            }
            _ => panic!("Expected capture command"),
        }
    }

    #[test]
    fn test_split_command() {
        let words = vec!["git".to_string(), "status".to_string()];
        assert_eq!(split_command(&words), ("git".to_string(), vec!["status".to_string()]));
        assert_eq!(split_command(&[]), (String::new(), Vec::new()));
    }
}
