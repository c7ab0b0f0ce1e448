//! In-memory stand-ins for the PTY backend, shell probe and surfaces.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use ptydeck_core::session::SessionId;
use ptydeck_core::shell::{OsKind, ShellInfo};
use tokio::sync::mpsc;

use crate::host::pty::{PtyBackend, PtyError, PtyEvent, PtyProcess, SpawnRequest, SpawnedPty, TermSize};
use crate::host::shell::{ShellProbe, ShellProbeError};
use crate::host::surface::{InputHandler, ResizeHandler, Surface, SurfaceFactory, SurfaceOptions};

/// Shared view of one fake process, kept by the backend for assertions.
pub struct FakeProcessState {
    pub request: SpawnRequest,
    written: Mutex<Vec<u8>>,
    sizes: Mutex<Vec<TermSize>>,
    kills: AtomicUsize,
    exited: AtomicBool,
    events: mpsc::Sender<PtyEvent>,
}

impl FakeProcessState {
    pub fn written(&self) -> Vec<u8> {
        self.written.lock().clone()
    }

    pub fn written_text(&self) -> String {
        String::from_utf8_lossy(&self.written.lock()).into_owned()
    }

    pub fn sizes(&self) -> Vec<TermSize> {
        self.sizes.lock().clone()
    }

    pub fn kill_count(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }

    /// Emit output as the child would.
    pub async fn emit(&self, bytes: &[u8]) {
        let _ = self.events.send(PtyEvent::Data(bytes.to_vec())).await;
    }

    /// Exit with `code`. Only the first exit is delivered.
    pub async fn exit(&self, code: Option<u32>) {
        if !self.exited.swap(true, Ordering::SeqCst) {
            let _ = self.events.send(PtyEvent::Exit(code)).await;
        }
    }
}

struct FakeProcess(Arc<FakeProcessState>);

impl PtyProcess for FakeProcess {
    fn write(&self, data: &[u8]) -> Result<(), PtyError> {
        if self.0.exited.load(Ordering::SeqCst) {
            return Err(PtyError::Exited);
        }
        self.0.written.lock().extend_from_slice(data);
        Ok(())
    }

    fn resize(&self, size: TermSize) -> Result<(), PtyError> {
        if self.0.exited.load(Ordering::SeqCst) {
            return Err(PtyError::Exited);
        }
        self.0.sizes.lock().push(size);
        Ok(())
    }

    /// Killing behaves like a hangup: the process exits without a code.
    fn kill(&self) -> Result<(), PtyError> {
        self.0.kills.fetch_add(1, Ordering::SeqCst);
        if !self.0.exited.swap(true, Ordering::SeqCst) {
            let _ = self.0.events.try_send(PtyEvent::Exit(None));
        }
        Ok(())
    }

    fn pid(&self) -> Option<u32> {
        Some(4242)
    }
}

/// Backend that records requests and hands out fake processes.
pub struct FakeBackend {
    delay: Duration,
    failure: Option<String>,
    /// Only fail spawns whose argv mentions this text.
    fail_marker: Option<String>,
    processes: Mutex<Vec<Arc<FakeProcessState>>>,
    attempts: AtomicUsize,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Self::build(Duration::ZERO, None)
    }

    /// Every spawn fails with `reason`.
    pub fn failing(reason: &str) -> Arc<Self> {
        Self::build(Duration::ZERO, Some(reason.to_string()))
    }

    /// Spawns whose argv mentions `marker` fail with `reason`.
    pub fn failing_for(marker: &str, reason: &str) -> Arc<Self> {
        let mut backend = Self::unshared(Duration::ZERO, Some(reason.to_string()));
        backend.fail_marker = Some(marker.to_string());
        Arc::new(backend)
    }

    /// Every spawn blocks for `delay`, then fails with `reason`.
    pub fn failing_after(delay: Duration, reason: &str) -> Arc<Self> {
        Self::build(delay, Some(reason.to_string()))
    }

    /// Every spawn blocks for `delay` before succeeding.
    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Self::build(delay, None)
    }

    fn build(delay: Duration, failure: Option<String>) -> Arc<Self> {
        Arc::new(Self::unshared(delay, failure))
    }

    fn unshared(delay: Duration, failure: Option<String>) -> Self {
        Self {
            delay,
            failure,
            fail_marker: None,
            processes: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Number of spawn calls, successful or not.
    pub fn spawn_count(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn processes(&self) -> Vec<Arc<FakeProcessState>> {
        self.processes.lock().clone()
    }

    pub fn last_process(&self) -> Option<Arc<FakeProcessState>> {
        self.processes.lock().last().cloned()
    }
}

impl PtyBackend for FakeBackend {
    fn spawn(&self, request: &SpawnRequest) -> Result<SpawnedPty, PtyError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        let targeted = match &self.fail_marker {
            Some(marker) => request.argv.iter().any(|arg| arg.contains(marker.as_str())),
            None => true,
        };
        if let Some(reason) = self.failure.as_ref().filter(|_| targeted) {
            return Err(PtyError::Spawn {
                program: request.program.clone(),
                reason: reason.clone(),
            });
        }

        let (tx, rx) = mpsc::channel(256);
        let state = Arc::new(FakeProcessState {
            request: request.clone(),
            written: Mutex::new(Vec::new()),
            sizes: Mutex::new(Vec::new()),
            kills: AtomicUsize::new(0),
            exited: AtomicBool::new(false),
            events: tx,
        });
        self.processes.lock().push(state.clone());

        Ok(SpawnedPty {
            process: Box::new(FakeProcess(state)),
            events: rx,
        })
    }
}

/// Probe that always reports the same shell.
pub struct FixedShellProbe {
    shell: ShellInfo,
    probes: AtomicUsize,
}

impl FixedShellProbe {
    pub fn new(shell: ShellInfo) -> Arc<Self> {
        Arc::new(Self {
            shell,
            probes: AtomicUsize::new(0),
        })
    }

    pub fn zsh() -> Arc<Self> {
        Self::new(ShellInfo::new(OsKind::Linux, "/bin/zsh"))
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ShellProbe for FixedShellProbe {
    async fn probe(&self) -> Result<ShellInfo, ShellProbeError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        Ok(self.shell.clone())
    }
}

/// Probe that always fails.
pub struct FailingShellProbe;

#[async_trait]
impl ShellProbe for FailingShellProbe {
    async fn probe(&self) -> Result<ShellInfo, ShellProbeError> {
        Err(ShellProbeError::NotConfigured("SHELL"))
    }
}

/// Surface that records everything done to it.
pub struct RecordingSurface {
    size: TermSize,
    output: Mutex<String>,
    visible: AtomicBool,
    focused: AtomicUsize,
    disposed: AtomicBool,
    input: Mutex<Option<InputHandler>>,
    resize: Mutex<Option<ResizeHandler>>,
}

impl RecordingSurface {
    pub fn new(size: TermSize) -> Self {
        Self {
            size,
            output: Mutex::new(String::new()),
            visible: AtomicBool::new(true),
            focused: AtomicUsize::new(0),
            disposed: AtomicBool::new(false),
            input: Mutex::new(None),
            resize: Mutex::new(None),
        }
    }

    pub fn output(&self) -> String {
        self.output.lock().clone()
    }

    pub fn is_visible(&self) -> bool {
        self.visible.load(Ordering::SeqCst)
    }

    pub fn focus_count(&self) -> usize {
        self.focused.load(Ordering::SeqCst)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Simulate a keystroke. Returns false when no handler is installed.
    pub fn type_input(&self, data: &[u8]) -> bool {
        let handler = self.input.lock().clone();
        match handler {
            Some(handler) => {
                handler(data);
                true
            }
            None => false,
        }
    }

    /// Simulate the user resizing the surface.
    pub fn trigger_resize(&self, size: TermSize) -> bool {
        let handler = self.resize.lock().clone();
        match handler {
            Some(handler) => {
                handler(size);
                true
            }
            None => false,
        }
    }
}

impl Surface for RecordingSurface {
    fn write(&self, text: &str) {
        self.output.lock().push_str(text);
    }

    fn size(&self) -> TermSize {
        self.size
    }

    fn on_input(&self, handler: Option<InputHandler>) {
        *self.input.lock() = handler;
    }

    fn on_resize(&self, handler: Option<ResizeHandler>) {
        *self.resize.lock() = handler;
    }

    fn set_visible(&self, visible: bool) {
        self.visible.store(visible, Ordering::SeqCst);
    }

    fn focus(&self) {
        self.focused.fetch_add(1, Ordering::SeqCst);
    }

    fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        *self.input.lock() = None;
        *self.resize.lock() = None;
    }
}

/// Factory keeping a typed handle to every surface it creates.
#[derive(Default)]
pub struct RecordingFactory {
    surfaces: Mutex<HashMap<SessionId, Arc<RecordingSurface>>>,
    created: AtomicUsize,
}

impl RecordingFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn surface(&self, id: &SessionId) -> Option<Arc<RecordingSurface>> {
        self.surfaces.lock().get(id).cloned()
    }

    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl SurfaceFactory for RecordingFactory {
    fn create(&self, id: &SessionId, options: &SurfaceOptions) -> Arc<dyn Surface> {
        self.created.fetch_add(1, Ordering::SeqCst);
        let surface = Arc::new(RecordingSurface::new(options.size));
        self.surfaces.lock().insert(id.clone(), surface.clone());
        surface
    }
}
