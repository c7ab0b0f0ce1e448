//! ptydeck CLI entry point.

mod args;

use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use clap::Parser;
use ptydeck_cli::config::DeckConfig;
use ptydeck_cli::host::pty::TermSize;
use ptydeck_cli::host::shell::{detect_tool, resolve_shell};
use ptydeck_cli::host::surface::SurfaceFactory;
use ptydeck_cli::host::terminal::{
    terminal_size, RawModeGuard, ScreenSurfaceFactory, StdoutSurface, StdoutSurfaceFactory,
};
use ptydeck_cli::host::{LaunchRequest, NativePtyBackend, SessionEvent, SystemShellProbe, Workspace};
use ptydeck_core::session::{SessionId, Tool};
use ptydeck_core::shell::build_command_line;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn, Level};

use crate::args::{split_command, ArgvArgs, CaptureArgs, Cli, Commands, DetectArgs, RunArgs};

fn main() {
    let cli = Cli::parse();

    // Logs go to stderr; an attached session owns stdout. Interactive runs
    // only surface warnings so they don't interleave with the program.
    let level = match cli.command {
        Commands::Run(_) => Level::WARN,
        _ => Level::INFO,
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            std::process::exit(1);
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    }
}

/// Dispatch a command. Returns the process exit code.
async fn run(cli: Cli) -> anyhow::Result<i32> {
    let config = load_config(&cli);

    match cli.command {
        Commands::Run(args) => run_attached(config, args).await,
        Commands::Capture(args) => capture(config, args).await,
        Commands::Shell => {
            let shell = resolve_shell(&probe_for(&config)).await;
            println!("{}", serde_json::to_string_pretty(&shell)?);
            Ok(0)
        }
        Commands::Argv(ArgvArgs { command }) => {
            let shell = resolve_shell(&probe_for(&config)).await;
            let (command, args) = split_command(&command);
            let argv = build_command_line(&shell, &command, &args);
            let out = json!({ "program": shell.shell_path, "argv": argv });
            println!("{}", serde_json::to_string_pretty(&out)?);
            Ok(0)
        }
        Commands::Detect(DetectArgs { tools }) => {
            let shell = resolve_shell(&probe_for(&config)).await;
            let mut found = Vec::with_capacity(tools.len());
            for tool in &tools {
                found.push(detect_tool(tool, &shell.extra_path_dirs).await);
            }
            println!("{}", serde_json::to_string_pretty(&found)?);
            Ok(0)
        }
    }
}

/// Environment first, then command-line flags on top.
fn load_config(cli: &Cli) -> DeckConfig {
    let mut config = DeckConfig::from_env();
    if let Some(shell) = &cli.shell {
        config.shell = Some(shell.clone());
    }
    if let Some(scrollback) = cli.scrollback {
        config.scrollback = scrollback;
    }
    if let Some(term) = &cli.term {
        config.term = term.clone();
    }
    config
}

fn probe_for(config: &DeckConfig) -> SystemShellProbe {
    SystemShellProbe::new(config.shell.clone(), config.extra_path_dirs.clone())
}

fn workspace_for(config: DeckConfig, factory: Arc<dyn SurfaceFactory>) -> Workspace {
    let probe = Arc::new(probe_for(&config));
    Workspace::new(config, Arc::new(NativePtyBackend), probe, factory)
}

/// Run one session attached to this terminal until it exits.
async fn run_attached(mut config: DeckConfig, args: RunArgs) -> anyhow::Result<i32> {
    if let Some(size) = terminal_size() {
        config.size = size;
    }
    let factory = StdoutSurfaceFactory::new();
    let workspace = workspace_for(config, factory.clone());
    let mut events = workspace.subscribe();

    let (command, command_args) = split_command(&args.command);
    let id = if command.is_empty() {
        workspace.launch(LaunchRequest {
            cwd: args.cwd,
            display_name: args.name,
            ..LaunchRequest::shell()
        })?
    } else {
        let tool = tool_for(&command, command_args);
        let id = workspace.launch_tool(&tool, args.flags.as_deref().unwrap_or_default(), args.cwd)?;
        if let Some(name) = &args.name {
            workspace.rename_session(&id, name)?;
        }
        id
    };

    if let Some(text) = args.send {
        workspace.write_to_active_session_when_ready(
            text,
            Duration::from_millis(args.max_wait),
            Duration::from_millis(args.send_delay),
        );
    }

    let surface = factory
        .surface(&id)
        .ok_or_else(|| anyhow!("No surface for session {}", id))?;
    let _raw = RawModeGuard::enable().context("Failed to put the terminal in raw mode")?;

    // Blocking stdin reads stay off the runtime.
    let input = surface.clone();
    std::thread::spawn(move || forward_input(std::io::stdin().lock(), &input));

    let resize_task = tokio::spawn(forward_resizes(surface.clone()));

    let outcome = tokio::select! {
        outcome = wait_for_end(&mut events, &id) => outcome,
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT, shutting down");
            Ok(None)
        }
        _ = sigterm() => {
            info!("Received SIGTERM, shutting down");
            Ok(None)
        }
    };

    resize_task.abort();
    workspace.shutdown();
    Ok(exit_code(outcome?))
}

/// Run a command on an in-memory screen and print what it left behind.
async fn capture(mut config: DeckConfig, args: CaptureArgs) -> anyhow::Result<i32> {
    config.size = TermSize {
        cols: args.cols,
        rows: args.rows,
    };
    let factory = ScreenSurfaceFactory::new();
    let workspace = workspace_for(config, factory.clone());
    let mut events = workspace.subscribe();

    let (command, command_args) = split_command(&args.command);
    let id = workspace.launch_session(&command, command_args, args.cwd)?;
    let screen = factory
        .surface(&id)
        .ok_or_else(|| anyhow!("No surface for session {}", id))?;

    let timeout = Duration::from_millis(args.timeout);
    let code = match tokio::time::timeout(timeout, wait_for_end(&mut events, &id)).await {
        Ok(outcome) => exit_code(outcome?),
        Err(_) => {
            warn!("'{}' still running after {}ms, killing it", command, args.timeout);
            workspace.close_session(&id)?;
            124
        }
    };

    println!("{}", screen.contents().trim_end());
    Ok(code)
}

/// Copy keystrokes into the surface until end of input or disposal.
///
/// Keystrokes typed while the session is still starting are held by the
/// surface, so the loop never stops just because nothing is bound yet.
fn forward_input(mut reader: impl Read, surface: &StdoutSurface) {
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if !surface.feed_input(&buf[..n]) {
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!("Stopped reading stdin: {}", e);
                break;
            }
        }
    }
}

fn tool_for(command: &str, args: Vec<String>) -> Tool {
    let name = Path::new(command)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| command.to_string());
    Tool {
        slug: name.to_lowercase(),
        name,
        command: command.to_string(),
        args,
    }
}

/// Wait until `id` exits. A failed spawn is an error.
async fn wait_for_end(
    events: &mut broadcast::Receiver<SessionEvent>,
    id: &SessionId,
) -> anyhow::Result<Option<u32>> {
    loop {
        match events.recv().await {
            Ok(SessionEvent::Exited(ended, code)) if &ended == id => return Ok(code),
            Ok(SessionEvent::Failed(failed, reason)) if &failed == id => {
                bail!("{}", reason)
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!("Missed {} session events", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => return Ok(None),
        }
    }
}

/// A process killed without an exit status counts as a failure.
fn exit_code(code: Option<u32>) -> i32 {
    code.map(|c| i32::try_from(c).unwrap_or(1)).unwrap_or(1)
}

/// Wait for SIGTERM signal (Unix only).
///
/// If signal registration fails, logs a warning and waits indefinitely.
#[cfg(unix)]
async fn sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!("Failed to register SIGTERM handler: {}, only SIGINT will stop the session", e);
            std::future::pending::<()>().await;
        }
    }
}

/// SIGTERM is not available on non-Unix platforms; use a never-completing future.
#[cfg(not(unix))]
async fn sigterm() {
    std::future::pending::<()>().await;
}

/// Push the terminal's new size to the session on every SIGWINCH.
#[cfg(unix)]
async fn forward_resizes(surface: Arc<StdoutSurface>) {
    use tokio::signal::unix::{signal, SignalKind};
    let mut winch = match signal(SignalKind::window_change()) {
        Ok(winch) => winch,
        Err(e) => {
            warn!("Failed to register SIGWINCH handler: {}", e);
            return;
        }
    };
    while winch.recv().await.is_some() {
        if let Some(size) = terminal_size() {
            surface.resize(size);
        }
    }
}

#[cfg(not(unix))]
async fn forward_resizes(_surface: Arc<StdoutSurface>) {}
