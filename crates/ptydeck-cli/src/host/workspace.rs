//! The session workspace: launching, switching, writing and closing.
//!
//! Each launched session gets a registry record, a surface and a background
//! task. The task resolves the shell, spawns the program through it, then
//! pumps decoded output into the session's surface until the process exits.
//!
//! Lock order is registry, then writer tokens, then bridge. None of them is
//! held across an `.await`.

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use ptydeck_core::decoder::ByteStreamDecoder;
use ptydeck_core::error::ApiError;
use ptydeck_core::session::{Session, SessionId, Tool};
use ptydeck_core::shell::{build_command_line, path_with_extra_dirs, ShellInfo};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::DeckConfig;
use crate::host::bridge::{ActiveWriterBridge, WriterToken};
use crate::host::pty::{PtyBackend, PtyError, PtyEvent, SpawnRequest};
use crate::host::registry::SessionRegistry;
use crate::host::session::{exit_diagnostic, spawn_diagnostic, PtySession, PtyState};
use crate::host::shell::{resolve_shell, ShellProbe};
use crate::host::surface::{Surface, SurfaceArena, SurfaceFactory, SurfaceOptions};

/// Capacity of the lifecycle event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Lifecycle notifications, in the order they happen for a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The process is running and bound to its surface.
    Started(SessionId),
    /// The process could not be started.
    Failed(SessionId, String),
    /// The process exited; the session is now `Ended`.
    Exited(SessionId, Option<u32>),
}

/// What to launch and how.
#[derive(Debug, Clone, Default)]
pub struct LaunchRequest {
    /// Program to run. Empty launches a plain login shell.
    pub command: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub display_name: Option<String>,
    pub tool_slug: Option<String>,
    /// Make the new session the active one.
    pub activate: bool,
    /// Text delivered to the session once it accepts input.
    pub initial_input: Option<String>,
}

impl LaunchRequest {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            activate: true,
            ..Self::default()
        }
    }

    /// A plain login shell.
    pub fn shell() -> Self {
        Self::new("", Vec::new())
    }
}

struct Inner {
    config: DeckConfig,
    registry: Mutex<SessionRegistry>,
    surfaces: SurfaceArena,
    bridge: Arc<ActiveWriterBridge>,
    writers: Mutex<HashMap<SessionId, WriterToken>>,
    backend: Arc<dyn PtyBackend>,
    probe: Arc<dyn ShellProbe>,
    events: broadcast::Sender<SessionEvent>,
}

/// Concurrently running PTY sessions with one active at a time.
///
/// Dropping the workspace kills every process it started.
pub struct Workspace {
    inner: Arc<Inner>,
}

impl Workspace {
    pub fn new(
        config: DeckConfig,
        backend: Arc<dyn PtyBackend>,
        probe: Arc<dyn ShellProbe>,
        factory: Arc<dyn SurfaceFactory>,
    ) -> Self {
        let options = SurfaceOptions {
            size: config.size,
            scrollback: config.scrollback,
        };
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                config,
                registry: Mutex::new(SessionRegistry::new()),
                surfaces: SurfaceArena::new(factory, options),
                bridge: ActiveWriterBridge::new(),
                writers: Mutex::new(HashMap::new()),
                backend,
                probe,
                events,
            }),
        }
    }

    /// Launch `command` in a new active session.
    pub fn launch_session(
        &self,
        command: &str,
        args: Vec<String>,
        cwd: Option<PathBuf>,
    ) -> Result<SessionId, ApiError> {
        let mut request = LaunchRequest::new(command, args);
        request.cwd = cwd;
        self.launch(request)
    }

    /// Launch a tool with the user's extra flags appended to its own args.
    pub fn launch_tool(
        &self,
        tool: &Tool,
        custom_flags: &str,
        cwd: Option<PathBuf>,
    ) -> Result<SessionId, ApiError> {
        let mut request = LaunchRequest::new(tool.command.clone(), tool.merged_args(custom_flags));
        request.cwd = cwd;
        request.display_name = Some(tool.name.clone());
        request.tool_slug = Some(tool.slug.clone());
        self.launch(request)
    }

    /// Create the session and its surface, then spawn in the background.
    ///
    /// Must be called from within a tokio runtime.
    pub fn launch(&self, request: LaunchRequest) -> Result<SessionId, ApiError> {
        let inner = &self.inner;
        let LaunchRequest {
            command,
            args,
            cwd,
            display_name,
            tool_slug,
            activate,
            initial_input,
        } = request;

        let cwd = cwd.or_else(|| inner.config.default_cwd.clone());
        let display_name = display_name.or_else(|| {
            command
                .trim()
                .is_empty()
                .then(|| "Terminal".to_string())
        });

        let (id, pty) = {
            let mut registry = inner.registry.lock();
            let session = registry.create(command.clone(), args.clone(), cwd.clone())?;
            let id = session.id.clone();
            if let Some(record) = registry.get_mut(&id) {
                record.display_name = display_name;
                record.tool_slug = tool_slug;
            }
            let pty = PtySession::new(id.clone());
            registry.attach(&id, pty.clone());
            if activate {
                registry.set_active(Some(&id));
                inner.sync_writer(&registry);
            }
            (id, pty)
        };

        let surface = inner.surfaces.create(&id);
        if activate {
            inner.surfaces.show_only(Some(&id));
        } else {
            surface.set_visible(false);
        }

        let task_inner = inner.clone();
        let task_id = id.clone();
        tokio::spawn(async move {
            task_inner.run_session(task_id, pty, command, args, cwd).await;
        });

        if let Some(text) = initial_input {
            if activate {
                inner.bridge.write_when_ready(
                    text,
                    inner.config.initial_input_max_wait,
                    inner.config.initial_input_min_delay,
                );
            } else {
                debug!("Initial input for background session {} dropped", id);
            }
        }

        Ok(id)
    }

    /// Switch focus. Nothing is killed or disposed.
    pub fn set_active_session(&self, id: Option<&SessionId>) -> Result<(), ApiError> {
        let inner = &self.inner;
        {
            let mut registry = inner.registry.lock();
            if !registry.set_active(id) {
                let missing = id.map(SessionId::as_str).unwrap_or_default();
                return Err(ApiError::session_not_found(missing));
            }
            inner.sync_writer(&registry);
        }
        inner.surfaces.show_only(id);
        Ok(())
    }

    /// Kill the session's process, then forget the session and its surface.
    pub fn close_session(&self, id: &SessionId) -> Result<Session, ApiError> {
        let inner = &self.inner;
        let (removed, active) = {
            let mut registry = inner.registry.lock();
            let removed = registry
                .remove(id)
                .ok_or_else(|| ApiError::session_not_found(id.as_str()))?;
            if let Some(token) = inner.writers.lock().remove(id) {
                inner.bridge.unregister(token);
            }
            inner.sync_writer(&registry);
            (removed, registry.active_id().cloned())
        };

        inner.surfaces.dispose(id);
        inner.surfaces.show_only(active.as_ref());
        Ok(removed)
    }

    pub fn rename_session(&self, id: &SessionId, label: &str) -> Result<(), ApiError> {
        self.inner.registry.lock().rename(id, label)
    }

    /// Send text to the active session. False when nothing accepts input.
    pub fn write_to_active_session(&self, text: &str) -> bool {
        self.inner.bridge.write(text)
    }

    /// Send text to the active session once it accepts input.
    pub fn write_to_active_session_when_ready(
        &self,
        text: impl Into<String>,
        max_wait: Duration,
        min_delay: Duration,
    ) -> JoinHandle<bool> {
        self.inner
            .bridge
            .write_when_ready(text.into(), max_wait, min_delay)
    }

    /// Sessions in launch order.
    pub fn sessions(&self) -> Vec<Session> {
        self.inner.registry.lock().list().to_vec()
    }

    pub fn session(&self, id: &SessionId) -> Option<Session> {
        self.inner.registry.lock().get(id).cloned()
    }

    pub fn active_session_id(&self) -> Option<SessionId> {
        self.inner.registry.lock().active_id().cloned()
    }

    /// State of the session's process handle, if it still has one.
    ///
    /// Handles are dropped once the session has ended.
    pub fn pty_state(&self, id: &SessionId) -> Option<PtyState> {
        self.inner.registry.lock().pty(id).map(|pty| pty.state())
    }

    pub fn surface(&self, id: &SessionId) -> Option<Arc<dyn Surface>> {
        self.inner.surfaces.get(id)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Kill every process and dispose every surface. Idempotent.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        self.inner.shutdown();
    }
}

impl Inner {
    /// Point the bridge at the active session if it accepts input, else
    /// clear it. Called with the registry locked so focus changes and
    /// readiness cannot interleave.
    fn sync_writer(&self, registry: &SessionRegistry) {
        let target = registry.active_id().and_then(|id| {
            registry
                .pty(id)
                .filter(|pty| pty.state() == PtyState::Running)
                .map(|pty| (id.clone(), pty))
        });

        let Some((id, pty)) = target else {
            self.bridge.clear();
            return;
        };
        if self.bridge.registered_session().as_ref() == Some(&id) {
            return;
        }

        let weak = Arc::downgrade(&pty);
        let token = self.bridge.register(
            id.clone(),
            Arc::new(move |text: &str| {
                if let Some(pty) = weak.upgrade() {
                    pty.write(text.as_bytes());
                }
            }),
        );
        self.writers.lock().insert(id, token);
    }

    async fn run_session(
        self: Arc<Self>,
        id: SessionId,
        pty: Arc<PtySession>,
        command: String,
        args: Vec<String>,
        cwd: Option<PathBuf>,
    ) {
        let shell = tokio::select! {
            _ = pty.cancellation().cancelled() => {
                debug!("Session {} closed before its shell was resolved", id);
                return;
            }
            shell = resolve_shell(self.probe.as_ref()) => shell,
        };

        let size = self
            .surfaces
            .get(&id)
            .map(|surface| surface.size())
            .unwrap_or(self.config.size);
        let request = SpawnRequest {
            program: shell.shell_path.clone(),
            argv: build_command_line(&shell, &command, &args),
            size,
            cwd,
            env: self.child_env(&shell),
        };
        debug!(
            "Session {}: {} {:?}",
            id, request.program, request.argv
        );

        let events = match pty.spawn(self.backend.clone(), request).await {
            Ok(events) => events,
            Err(PtyError::Cancelled) => {
                debug!("Spawn of session {} cancelled", id);
                return;
            }
            Err(e) => {
                let reason = e.to_string();
                let error = ApiError::spawn_failed(&command, &reason);
                warn!("Session {}: {}", id, error);
                self.surfaces
                    .write(&id, &spawn_diagnostic(&shell, &command, &args, &reason));
                self.registry.lock().mark_ended(&id);
                let _ = self.events.send(SessionEvent::Failed(id, error.message));
                return;
            }
        };

        {
            let registry = self.registry.lock();
            if !registry.contains(&id) {
                drop(registry);
                debug!("Session {} vanished during spawn", id);
                pty.kill();
                return;
            }
            self.surfaces.bind(&id, &pty);
            self.sync_writer(&registry);
        }
        let _ = self.events.send(SessionEvent::Started(id.clone()));

        let code = self.pump(&id, events).await;

        pty.mark_exited(code);
        self.surfaces.write(&id, &exit_diagnostic(code));
        {
            let mut registry = self.registry.lock();
            registry.mark_ended(&id);
            if let Some(token) = self.writers.lock().remove(&id) {
                self.bridge.unregister(token);
            }
        }
        info!("Session {} exited with {:?}", id, code);
        let _ = self.events.send(SessionEvent::Exited(id, code));
    }

    /// Decode output into the session's surface until the process exits.
    async fn pump(&self, id: &SessionId, mut events: mpsc::Receiver<PtyEvent>) -> Option<u32> {
        let mut decoder = ByteStreamDecoder::new();
        let mut code = None;

        while let Some(event) = events.recv().await {
            match event {
                PtyEvent::Data(bytes) => {
                    let text = decoder.decode(&bytes);
                    if !text.is_empty() {
                        self.surfaces.write(id, &text);
                    }
                }
                PtyEvent::Exit(exit_code) => {
                    code = exit_code;
                    break;
                }
            }
        }

        let tail = decoder.finish();
        if !tail.is_empty() {
            self.surfaces.write(id, &tail);
        }
        code
    }

    fn child_env(&self, shell: &ShellInfo) -> Vec<(String, OsString)> {
        let mut env = vec![
            ("TERM".to_string(), OsString::from(&self.config.term)),
            ("COLORTERM".to_string(), OsString::from("truecolor")),
        ];
        let current = std::env::var_os("PATH");
        if let Some(path) = path_with_extra_dirs(current.as_deref(), &shell.extra_path_dirs) {
            env.push(("PATH".to_string(), path));
        }
        env
    }

    fn shutdown(&self) {
        let ptys = self.registry.lock().drain_ptys();
        if !ptys.is_empty() {
            info!("Shutting down {} session(s)", ptys.len());
        }
        for pty in ptys {
            pty.kill();
        }
        self.bridge.clear();
        self.writers.lock().clear();
        self.surfaces.dispose_all();
    }
}
