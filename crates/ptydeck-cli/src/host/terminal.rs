//! Concrete surfaces: a vt100 screen buffer and a stdout pass-through.

use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use ptydeck_core::session::SessionId;
use tracing::debug;

use crate::host::pty::TermSize;
use crate::host::surface::{InputHandler, ResizeHandler, Surface, SurfaceFactory, SurfaceOptions};

/// Keystroke and resize handlers shared by both surface kinds.
#[derive(Default)]
struct Handlers {
    input: Mutex<Option<InputHandler>>,
    resize: Mutex<Option<ResizeHandler>>,
}

impl Handlers {
    fn input(&self, data: &[u8]) -> bool {
        let handler = self.input.lock().clone();
        handler.map(|handler| handler(data)).is_some()
    }

    fn resize(&self, size: TermSize) -> bool {
        let handler = self.resize.lock().clone();
        handler.map(|handler| handler(size)).is_some()
    }

    fn clear(&self) {
        *self.input.lock() = None;
        *self.resize.lock() = None;
    }
}

/// In-memory terminal screen that parses ANSI escape sequences.
///
/// Wraps `vt100::Parser`; scrollback beyond the configured line count is
/// discarded.
pub struct ScreenSurface {
    parser: Mutex<vt100::Parser>,
    handlers: Handlers,
    visible: AtomicBool,
    disposed: AtomicBool,
}

impl ScreenSurface {
    pub fn new(size: TermSize, scrollback: usize) -> Self {
        // vt100::Parser::new(rows, cols, scrollback_len)
        Self {
            parser: Mutex::new(vt100::Parser::new(size.rows, size.cols, scrollback)),
            handlers: Handlers::default(),
            visible: AtomicBool::new(true),
            disposed: AtomicBool::new(false),
        }
    }

    /// Plain text of the visible screen.
    pub fn contents(&self) -> String {
        self.parser.lock().screen().contents()
    }

    /// Text of a single row, `None` when out of bounds.
    pub fn row(&self, row: u16) -> Option<String> {
        let parser = self.parser.lock();
        let (_, cols) = parser.screen().size();
        let line = parser.screen().rows(0, cols).nth(row as usize);
        line
    }

    /// Cursor position (row, col), 0-indexed.
    pub fn cursor_position(&self) -> (u16, u16) {
        self.parser.lock().screen().cursor_position()
    }

    /// Foreground color of a cell, for checking attribute parsing.
    pub fn fg_color(&self, row: u16, col: u16) -> Option<vt100::Color> {
        self.parser
            .lock()
            .screen()
            .cell(row, col)
            .map(|cell| cell.fgcolor())
    }

    pub fn is_visible(&self) -> bool {
        self.visible.load(Ordering::SeqCst)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Change the screen size and notify the bound session.
    pub fn resize(&self, size: TermSize) -> bool {
        self.parser.lock().screen_mut().set_size(size.rows, size.cols);
        self.handlers.resize(size)
    }

    /// Deliver keystrokes to the bound session.
    pub fn send_input(&self, data: &[u8]) -> bool {
        self.handlers.input(data)
    }
}

impl Surface for ScreenSurface {
    fn write(&self, text: &str) {
        if self.is_disposed() {
            return;
        }
        self.parser.lock().process(text.as_bytes());
    }

    fn size(&self) -> TermSize {
        let (rows, cols) = self.parser.lock().screen().size();
        TermSize { cols, rows }
    }

    fn on_input(&self, handler: Option<InputHandler>) {
        *self.handlers.input.lock() = handler;
    }

    fn on_resize(&self, handler: Option<ResizeHandler>) {
        *self.handlers.resize.lock() = handler;
    }

    fn set_visible(&self, visible: bool) {
        self.visible.store(visible, Ordering::SeqCst);
    }

    fn focus(&self) {}

    fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        self.handlers.clear();
    }
}

/// Creates [`ScreenSurface`]s and keeps typed handles to them.
#[derive(Default)]
pub struct ScreenSurfaceFactory {
    surfaces: Mutex<HashMap<SessionId, Arc<ScreenSurface>>>,
}

impl ScreenSurfaceFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn surface(&self, id: &SessionId) -> Option<Arc<ScreenSurface>> {
        self.surfaces.lock().get(id).cloned()
    }
}

impl SurfaceFactory for ScreenSurfaceFactory {
    fn create(&self, id: &SessionId, options: &SurfaceOptions) -> Arc<dyn Surface> {
        let surface = Arc::new(ScreenSurface::new(options.size, options.scrollback));
        self.surfaces.lock().insert(id.clone(), surface.clone());
        surface
    }
}

/// Approximate bytes kept per scrollback line while a stdout surface is hidden.
const BACKLOG_BYTES_PER_LINE: usize = 256;

/// Keystrokes held for a stdout surface that has no session bound yet.
const PENDING_INPUT_LIMIT: usize = 64 * 1024;

/// Surface that renders by writing straight to this process's stdout.
///
/// While hidden, output is kept in a bounded backlog and flushed when the
/// surface becomes visible again. Visibility only changes under the backlog
/// lock.
pub struct StdoutSurface {
    size: Mutex<TermSize>,
    backlog: Mutex<String>,
    backlog_limit: usize,
    pending_input: Mutex<Vec<u8>>,
    handlers: Handlers,
    visible: AtomicBool,
    disposed: AtomicBool,
}

impl StdoutSurface {
    pub fn new(size: TermSize, scrollback: usize) -> Self {
        Self {
            size: Mutex::new(size),
            backlog: Mutex::new(String::new()),
            backlog_limit: scrollback.saturating_mul(BACKLOG_BYTES_PER_LINE).max(1),
            pending_input: Mutex::new(Vec::new()),
            handlers: Handlers::default(),
            visible: AtomicBool::new(true),
            disposed: AtomicBool::new(false),
        }
    }

    /// Forward keystrokes read from stdin.
    ///
    /// Keystrokes that arrive before a session is bound are held and
    /// delivered once it is. False only after the surface is disposed.
    pub fn feed_input(&self, data: &[u8]) -> bool {
        if self.is_disposed() {
            return false;
        }
        let mut pending = self.pending_input.lock();
        let handler = self.handlers.input.lock().clone();
        match handler {
            Some(handler) => handler(data),
            None => {
                pending.extend_from_slice(data);
                if pending.len() > PENDING_INPUT_LIMIT {
                    let excess = pending.len() - PENDING_INPUT_LIMIT;
                    pending.drain(..excess);
                }
            }
        }
        true
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Record a new terminal size (e.g. after SIGWINCH) and notify the session.
    pub fn resize(&self, size: TermSize) -> bool {
        *self.size.lock() = size;
        self.handlers.resize(size)
    }

    fn emit(text: &str) {
        let mut stdout = std::io::stdout().lock();
        if let Err(e) = stdout.write_all(text.as_bytes()).and_then(|_| stdout.flush()) {
            debug!("Failed to write to stdout: {}", e);
        }
    }

    fn push_backlog(&self, backlog: &mut String, text: &str) {
        backlog.push_str(text);
        if backlog.len() > self.backlog_limit {
            let mut cut = backlog.len() - self.backlog_limit;
            while !backlog.is_char_boundary(cut) {
                cut += 1;
            }
            backlog.drain(..cut);
        }
    }

    #[cfg(test)]
    fn backlog_len(&self) -> usize {
        self.backlog.lock().len()
    }
}

impl Surface for StdoutSurface {
    fn write(&self, text: &str) {
        if self.is_disposed() {
            return;
        }
        let mut backlog = self.backlog.lock();
        if self.visible.load(Ordering::SeqCst) {
            Self::emit(text);
        } else {
            self.push_backlog(&mut backlog, text);
        }
    }

    fn size(&self) -> TermSize {
        *self.size.lock()
    }

    fn on_input(&self, handler: Option<InputHandler>) {
        let mut pending = self.pending_input.lock();
        *self.handlers.input.lock() = handler.clone();
        if let Some(handler) = handler {
            if !pending.is_empty() {
                let early = std::mem::take(&mut *pending);
                handler(&early);
            }
        }
    }

    fn on_resize(&self, handler: Option<ResizeHandler>) {
        *self.handlers.resize.lock() = handler;
    }

    fn set_visible(&self, visible: bool) {
        let mut backlog = self.backlog.lock();
        let was_visible = self.visible.swap(visible, Ordering::SeqCst);
        if visible && !was_visible && !backlog.is_empty() {
            Self::emit(&std::mem::take(&mut *backlog));
        }
    }

    fn focus(&self) {}

    fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        self.backlog.lock().clear();
        self.pending_input.lock().clear();
        self.handlers.clear();
    }
}

/// Creates [`StdoutSurface`]s sized to the controlling terminal.
#[derive(Default)]
pub struct StdoutSurfaceFactory {
    surfaces: Mutex<HashMap<SessionId, Arc<StdoutSurface>>>,
}

impl StdoutSurfaceFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn surface(&self, id: &SessionId) -> Option<Arc<StdoutSurface>> {
        self.surfaces.lock().get(id).cloned()
    }
}

impl SurfaceFactory for StdoutSurfaceFactory {
    fn create(&self, id: &SessionId, options: &SurfaceOptions) -> Arc<dyn Surface> {
        let size = terminal_size().unwrap_or(options.size);
        let surface = Arc::new(StdoutSurface::new(size, options.scrollback));
        self.surfaces.lock().insert(id.clone(), surface.clone());
        surface
    }
}

/// Size of the terminal attached to stdout, if there is one.
#[cfg(unix)]
pub fn terminal_size() -> Option<TermSize> {
    // SAFETY: winsize is plain old data; TIOCGWINSZ only writes into it.
    let mut ws: libc::winsize = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::ioctl(libc::STDOUT_FILENO, libc::TIOCGWINSZ, &mut ws) };
    if rc != 0 || ws.ws_col == 0 || ws.ws_row == 0 {
        return None;
    }
    Some(TermSize {
        cols: ws.ws_col,
        rows: ws.ws_row,
    })
}

#[cfg(not(unix))]
pub fn terminal_size() -> Option<TermSize> {
    None
}

/// Puts stdin into raw mode for as long as it lives.
///
/// Keystrokes, including Ctrl+C, then reach the session's program
/// unmodified. A no-op when stdin is not a terminal.
pub struct RawModeGuard {
    #[cfg(unix)]
    original: Option<libc::termios>,
}

impl RawModeGuard {
    #[cfg(unix)]
    pub fn enable() -> std::io::Result<Self> {
        // SAFETY: isatty only inspects the descriptor.
        if unsafe { libc::isatty(libc::STDIN_FILENO) } != 1 {
            return Ok(Self { original: None });
        }
        // SAFETY: termios is plain old data filled in by tcgetattr.
        let mut original: libc::termios = unsafe { std::mem::zeroed() };
        if unsafe { libc::tcgetattr(libc::STDIN_FILENO, &mut original) } != 0 {
            return Err(std::io::Error::last_os_error());
        }
        let mut raw = original;
        // SAFETY: cfmakeraw only edits the struct we own.
        unsafe { libc::cfmakeraw(&mut raw) };
        if unsafe { libc::tcsetattr(libc::STDIN_FILENO, libc::TCSANOW, &raw) } != 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(Self {
            original: Some(original),
        })
    }

    #[cfg(not(unix))]
    pub fn enable() -> std::io::Result<Self> {
        Ok(Self {})
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            if let Some(original) = &self.original {
                // SAFETY: restores the attributes captured in enable().
                unsafe { libc::tcsetattr(libc::STDIN_FILENO, libc::TCSANOW, original) };
            }
        }
    }
}
