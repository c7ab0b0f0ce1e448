//! Runtime state of one session's pseudo-terminal process.
//!
//! A [`PtySession`] moves `Spawning -> Running -> Exited`, or
//! `Spawning -> Failed` when the backend cannot start the program. Input and
//! resize are only forwarded while `Running`; in every other state they are
//! quiet no-ops.

use std::sync::Arc;

use parking_lot::Mutex;
use ptydeck_core::session::SessionId;
use ptydeck_core::shell::ShellInfo;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::host::pty::{PtyBackend, PtyError, PtyEvent, PtyProcess, SpawnRequest, TermSize};

/// Observable state of a [`PtySession`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PtyState {
    Spawning,
    Running,
    Exited(Option<u32>),
    Failed(String),
}

enum Phase {
    Spawning,
    Running(Box<dyn PtyProcess>),
    Exited(Option<u32>),
    Failed(String),
}

impl Phase {
    fn state(&self) -> PtyState {
        match self {
            Phase::Spawning => PtyState::Spawning,
            Phase::Running(_) => PtyState::Running,
            Phase::Exited(code) => PtyState::Exited(*code),
            Phase::Failed(reason) => PtyState::Failed(reason.clone()),
        }
    }
}

/// Handle pairing a session id with its (eventual) process.
pub struct PtySession {
    id: SessionId,
    phase: Mutex<Phase>,
    cancel: CancellationToken,
}

impl PtySession {
    pub fn new(id: SessionId) -> Arc<Self> {
        Arc::new(Self {
            id,
            phase: Mutex::new(Phase::Spawning),
            cancel: CancellationToken::new(),
        })
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn state(&self) -> PtyState {
        self.phase.lock().state()
    }

    /// Token cancelled when the session is killed before or during spawn.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Spawn the program and return its event stream.
    ///
    /// The backend runs on the blocking pool. If [`kill`](Self::kill) was
    /// called while it ran, the new process is killed on the spot and
    /// `PtyError::Cancelled` is returned.
    pub async fn spawn(
        self: &Arc<Self>,
        backend: Arc<dyn PtyBackend>,
        request: SpawnRequest,
    ) -> Result<mpsc::Receiver<PtyEvent>, PtyError> {
        if self.cancel.is_cancelled() {
            return Err(PtyError::Cancelled);
        }

        let program = request.program.clone();
        let result = match tokio::task::spawn_blocking(move || backend.spawn(&request)).await {
            Ok(result) => result,
            Err(e) => Err(PtyError::Join(e.to_string())),
        };

        let mut phase = self.phase.lock();
        match result {
            Ok(spawned) => {
                if self.cancel.is_cancelled() || !matches!(*phase, Phase::Spawning) {
                    info!(
                        "Session {} was closed while spawning, killing pid {:?}",
                        self.id,
                        spawned.process.pid()
                    );
                    if let Err(e) = spawned.process.kill() {
                        debug!("Kill after cancelled spawn failed: {}", e);
                    }
                    return Err(PtyError::Cancelled);
                }
                info!(
                    "Session {} running {} (pid {:?})",
                    self.id,
                    program,
                    spawned.process.pid()
                );
                *phase = Phase::Running(spawned.process);
                Ok(spawned.events)
            }
            Err(e) => {
                if self.cancel.is_cancelled() {
                    debug!("Session {} was closed while its spawn failed: {}", self.id, e);
                    return Err(PtyError::Cancelled);
                }
                if matches!(*phase, Phase::Spawning) {
                    *phase = Phase::Failed(e.to_string());
                }
                Err(e)
            }
        }
    }

    /// Forward input to the process. Returns whether it was accepted.
    pub fn write(&self, data: &[u8]) -> bool {
        let phase = self.phase.lock();
        let Phase::Running(process) = &*phase else {
            return false;
        };
        match process.write(data) {
            Ok(()) => true,
            Err(e) => {
                debug!("Write to session {} dropped: {}", self.id, e);
                false
            }
        }
    }

    /// Resize the PTY. Errors from a process that is going away are ignored.
    pub fn resize(&self, size: TermSize) -> bool {
        let phase = self.phase.lock();
        let Phase::Running(process) = &*phase else {
            return false;
        };
        match process.resize(size) {
            Ok(()) => true,
            Err(e) => {
                debug!("Resize of session {} ignored: {}", self.id, e);
                false
            }
        }
    }

    /// Request termination. Safe to call in any state, any number of times.
    ///
    /// The exit event from the running process remains the completion
    /// signal; a session still spawning is cancelled instead.
    pub fn kill(&self) {
        self.cancel.cancel();
        let mut phase = self.phase.lock();
        match &*phase {
            Phase::Spawning => {
                debug!("Cancelling spawn of session {}", self.id);
                *phase = Phase::Exited(None);
            }
            Phase::Running(process) => {
                if let Err(e) = process.kill() {
                    debug!("Kill of session {} failed: {}", self.id, e);
                }
            }
            Phase::Exited(_) | Phase::Failed(_) => {}
        }
    }

    /// Record the exit. Returns true only for the first call.
    pub fn mark_exited(&self, code: Option<u32>) -> bool {
        let mut phase = self.phase.lock();
        match &*phase {
            Phase::Exited(_) | Phase::Failed(_) => false,
            Phase::Spawning | Phase::Running(_) => {
                *phase = Phase::Exited(code);
                true
            }
        }
    }
}

impl std::fmt::Debug for PtySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtySession")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

/// Dim line written to a surface when its process exits.
pub fn exit_diagnostic(code: Option<u32>) -> String {
    match code {
        Some(code) => format!("\r\n\x1b[2m[Process exited with code {code}]\x1b[0m\r\n"),
        None => "\r\n\x1b[2m[Process exited]\x1b[0m\r\n".to_string(),
    }
}

/// Red block written to a surface when its process could not be started.
pub fn spawn_diagnostic(shell: &ShellInfo, command: &str, args: &[String], error: &str) -> String {
    let command_line = if command.trim().is_empty() {
        "(login shell)".to_string()
    } else if args.is_empty() {
        command.to_string()
    } else {
        format!("{} {}", command, args.join(" "))
    };

    format!(
        "\r\n\x1b[31mFailed to start session\x1b[0m\r\n\
         \x1b[31m  shell:   {}\x1b[0m\r\n\
         \x1b[31m  command: {}\x1b[0m\r\n\
         \x1b[31m  error:   {}\x1b[0m\r\n",
        shell.shell_path, command_line, error
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::testing::FakeBackend;
    use ptydeck_core::shell::OsKind;
    use std::time::Duration;

    fn request() -> SpawnRequest {
        SpawnRequest {
            program: "/bin/sh".to_string(),
            argv: vec!["-l".to_string()],
            size: TermSize::default(),
            cwd: None,
            env: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_spawn_moves_to_running_and_forwards_io() {
        let backend = FakeBackend::new();
        let pty = PtySession::new(SessionId::from("s1"));
        assert_eq!(pty.state(), PtyState::Spawning);
        assert!(!pty.write(b"early"), "input before spawn must be dropped");

        let _events = pty.spawn(backend.clone(), request()).await.expect("spawn");
        assert_eq!(pty.state(), PtyState::Running);

        assert!(pty.write(b"ls\r"));
        assert!(pty.resize(TermSize { cols: 100, rows: 30 }));

        let process = backend.last_process().expect("process spawned");
        assert_eq!(process.written(), b"ls\r".to_vec());
        assert_eq!(process.sizes(), vec![TermSize { cols: 100, rows: 30 }]);
    }

    #[tokio::test]
    async fn test_spawn_failure_moves_to_failed() {
        let backend = FakeBackend::failing("no such file");
        let pty = PtySession::new(SessionId::from("s1"));

        let result = pty.spawn(backend, request()).await;
        assert!(matches!(result, Err(PtyError::Spawn { .. })));
        assert!(matches!(pty.state(), PtyState::Failed(reason) if reason.contains("no such file")));
        assert!(!pty.write(b"x"));
    }

    #[tokio::test]
    async fn test_exit_is_recorded_once_and_silences_io() {
        let backend = FakeBackend::new();
        let pty = PtySession::new(SessionId::from("s1"));
        let _events = pty.spawn(backend.clone(), request()).await.expect("spawn");

        assert!(pty.mark_exited(Some(0)));
        assert!(!pty.mark_exited(Some(1)));
        assert_eq!(pty.state(), PtyState::Exited(Some(0)));

        assert!(!pty.write(b"late"));
        assert!(!pty.resize(TermSize { cols: 10, rows: 10 }));
        pty.kill();

        let process = backend.last_process().expect("process");
        assert!(process.written().is_empty());
        assert_eq!(process.kill_count(), 0);
    }

    #[tokio::test]
    async fn test_kill_is_idempotent() {
        let backend = FakeBackend::new();
        let pty = PtySession::new(SessionId::from("s1"));
        let _events = pty.spawn(backend.clone(), request()).await.expect("spawn");

        pty.kill();
        pty.kill();
        let process = backend.last_process().expect("process");
        assert!(process.kill_count() >= 1);
        // Still Running until the exit event arrives.
        assert_eq!(pty.state(), PtyState::Running);
    }

    #[tokio::test]
    async fn test_failed_spawn_after_kill_reports_cancelled() {
        let backend = FakeBackend::failing_after(Duration::from_millis(100), "no such file");
        let pty = PtySession::new(SessionId::from("s1"));

        let spawning = {
            let pty = pty.clone();
            let backend = backend.clone();
            tokio::spawn(async move { pty.spawn(backend, request()).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        pty.kill();

        let result = spawning.await.expect("join");
        assert!(matches!(result, Err(PtyError::Cancelled)));
        assert_eq!(pty.state(), PtyState::Exited(None));
    }

    #[tokio::test]
    async fn test_kill_during_spawn_kills_new_process() {
        let backend = FakeBackend::with_delay(Duration::from_millis(100));
        let pty = PtySession::new(SessionId::from("s1"));

        let spawning = {
            let pty = pty.clone();
            let backend = backend.clone();
            tokio::spawn(async move { pty.spawn(backend, request()).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        pty.kill();
        assert!(pty.cancellation().is_cancelled());

        let result = spawning.await.expect("join");
        assert!(matches!(result, Err(PtyError::Cancelled)));

        let process = backend.last_process().expect("backend still spawned");
        assert_eq!(process.kill_count(), 1);
        assert!(!pty.write(b"x"));
        assert_eq!(pty.state(), PtyState::Exited(None));
    }

    #[tokio::test]
    async fn test_spawn_after_kill_does_not_start() {
        let backend = FakeBackend::new();
        let pty = PtySession::new(SessionId::from("s1"));
        pty.kill();

        let result = pty.spawn(backend.clone(), request()).await;
        assert!(matches!(result, Err(PtyError::Cancelled)));
        assert_eq!(backend.spawn_count(), 0);
    }

    #[test]
    fn test_exit_diagnostic_text() {
        assert_eq!(
            exit_diagnostic(Some(130)),
            "\r\n\x1b[2m[Process exited with code 130]\x1b[0m\r\n"
        );
        assert!(exit_diagnostic(None).contains("[Process exited]"));
    }

    #[test]
    fn test_spawn_diagnostic_names_shell_command_and_error() {
        let shell = ShellInfo::new(OsKind::Linux, "/bin/zsh");
        let text = spawn_diagnostic(&shell, "claude", &["--verbose".to_string()], "not found");
        assert!(text.contains("/bin/zsh"));
        assert!(text.contains("claude --verbose"));
        assert!(text.contains("not found"));
        assert!(text.contains("\x1b[31m"));

        let login = spawn_diagnostic(&shell, "", &[], "denied");
        assert!(login.contains("(login shell)"));
    }
}
