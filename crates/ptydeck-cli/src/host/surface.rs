//! Rendering surfaces and their binding to PTY sessions.
//!
//! Every session owns exactly one [`Surface`] for its whole life. Hiding a
//! session only toggles visibility, so background sessions keep their
//! scrollback and keep receiving output.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use ptydeck_core::session::SessionId;
use tracing::debug;

use crate::host::pty::TermSize;
use crate::host::session::PtySession;

/// Called with keystrokes typed into a surface.
pub type InputHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Called when a surface changes its dimensions.
pub type ResizeHandler = Arc<dyn Fn(TermSize) + Send + Sync>;

/// A terminal renderer owned by one session.
pub trait Surface: Send + Sync {
    fn write(&self, text: &str);
    fn size(&self) -> TermSize;
    /// Install (or remove) the keystroke handler.
    fn on_input(&self, handler: Option<InputHandler>);
    /// Install (or remove) the resize handler.
    fn on_resize(&self, handler: Option<ResizeHandler>);
    fn set_visible(&self, visible: bool);
    fn focus(&self);
    fn dispose(&self);
}

/// Creation parameters shared by all surfaces of a workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceOptions {
    pub size: TermSize,
    /// Lines of scrollback kept; this bounds memory for chatty processes.
    pub scrollback: usize,
}

impl Default for SurfaceOptions {
    fn default() -> Self {
        Self {
            size: TermSize::default(),
            scrollback: 5000,
        }
    }
}

pub trait SurfaceFactory: Send + Sync {
    fn create(&self, id: &SessionId, options: &SurfaceOptions) -> Arc<dyn Surface>;
}

struct Binding {
    surface: Arc<dyn Surface>,
    pty: Option<Arc<PtySession>>,
}

/// Surfaces keyed by session id.
pub struct SurfaceArena {
    factory: Arc<dyn SurfaceFactory>,
    options: SurfaceOptions,
    bindings: Mutex<HashMap<SessionId, Binding>>,
}

impl SurfaceArena {
    pub fn new(factory: Arc<dyn SurfaceFactory>, options: SurfaceOptions) -> Self {
        Self {
            factory,
            options,
            bindings: Mutex::new(HashMap::new()),
        }
    }

    /// The surface for `id`, creating it on first use.
    pub fn create(&self, id: &SessionId) -> Arc<dyn Surface> {
        let mut bindings = self.bindings.lock();
        if let Some(binding) = bindings.get(id) {
            return binding.surface.clone();
        }
        let surface = self.factory.create(id, &self.options);
        bindings.insert(
            id.clone(),
            Binding {
                surface: surface.clone(),
                pty: None,
            },
        );
        debug!("Created surface for session {}", id);
        surface
    }

    pub fn get(&self, id: &SessionId) -> Option<Arc<dyn Surface>> {
        self.bindings.lock().get(id).map(|b| b.surface.clone())
    }

    /// Wire the surface's input and resize to `pty`.
    ///
    /// Binding the same PTY again is a no-op. Returns whether handlers were
    /// (re)installed.
    pub fn bind(&self, id: &SessionId, pty: &Arc<PtySession>) -> bool {
        let surface = {
            let mut bindings = self.bindings.lock();
            let Some(binding) = bindings.get_mut(id) else {
                return false;
            };
            if binding.pty.as_ref().is_some_and(|bound| Arc::ptr_eq(bound, pty)) {
                return false;
            }
            binding.pty = Some(pty.clone());
            binding.surface.clone()
        };

        let input_target: Weak<PtySession> = Arc::downgrade(pty);
        surface.on_input(Some(Arc::new(move |data: &[u8]| {
            if let Some(pty) = input_target.upgrade() {
                pty.write(data);
            }
        })));

        let resize_target: Weak<PtySession> = Arc::downgrade(pty);
        surface.on_resize(Some(Arc::new(move |size: TermSize| {
            if let Some(pty) = resize_target.upgrade() {
                pty.resize(size);
            }
        })));

        debug!("Bound surface for session {}", id);
        true
    }

    /// Write to a session's surface. Returns false if it has none.
    pub fn write(&self, id: &SessionId, text: &str) -> bool {
        match self.get(id) {
            Some(surface) => {
                surface.write(text);
                true
            }
            None => false,
        }
    }

    /// Show the active session's surface and hide all others.
    pub fn show_only(&self, active: Option<&SessionId>) {
        let surfaces: Vec<(bool, Arc<dyn Surface>)> = self
            .bindings
            .lock()
            .iter()
            .map(|(id, b)| (Some(id) == active, b.surface.clone()))
            .collect();

        for (is_active, surface) in surfaces {
            surface.set_visible(is_active);
            if is_active {
                surface.focus();
            }
        }
    }

    /// Detach and dispose a session's surface.
    pub fn dispose(&self, id: &SessionId) -> bool {
        let Some(binding) = self.bindings.lock().remove(id) else {
            return false;
        };
        binding.surface.on_input(None);
        binding.surface.on_resize(None);
        binding.surface.dispose();
        debug!("Disposed surface for session {}", id);
        true
    }

    pub fn dispose_all(&self) {
        let drained: Vec<Binding> = self.bindings.lock().drain().map(|(_, b)| b).collect();
        for binding in drained {
            binding.surface.on_input(None);
            binding.surface.on_resize(None);
            binding.surface.dispose();
        }
    }

    pub fn len(&self) -> usize {
        self.bindings.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.lock().is_empty()
    }
}
