//! PTY process spawning using portable-pty.
//!
//! [`PtyBackend`] is the seam between session logic and the operating
//! system: it spawns one program on a fresh pseudo-terminal and hands back a
//! [`PtyProcess`] for input, resize and kill, plus a channel of
//! [`PtyEvent`]s carrying output and the final exit.

use std::ffi::OsString;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Terminal size in columns and rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TermSize {
    pub cols: u16,
    pub rows: u16,
}

impl Default for TermSize {
    fn default() -> Self {
        Self { cols: 80, rows: 24 }
    }
}

impl From<TermSize> for PtySize {
    fn from(size: TermSize) -> Self {
        PtySize {
            rows: size.rows,
            cols: size.cols,
            pixel_width: 0,
            pixel_height: 0,
        }
    }
}

/// Errors from PTY operations.
#[derive(Debug, Error)]
pub enum PtyError {
    #[error("failed to open PTY: {0}")]
    Open(String),
    #[error("failed to spawn '{program}': {reason}")]
    Spawn { program: String, reason: String },
    #[error("PTY I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("PTY resize failed: {0}")]
    Resize(String),
    #[error("process has exited")]
    Exited,
    #[error("spawn was cancelled")]
    Cancelled,
    #[error("spawn task failed: {0}")]
    Join(String),
}

/// Something the child process did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PtyEvent {
    /// Raw output bytes, not aligned to characters or lines.
    Data(Vec<u8>),
    /// The process exited. Sent once, after all output.
    Exit(Option<u32>),
}

/// Everything needed to start one program on a PTY.
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    pub program: String,
    pub argv: Vec<String>,
    pub size: TermSize,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, OsString)>,
}

/// A live process attached to a PTY.
pub trait PtyProcess: Send + Sync {
    /// Queue bytes for the child's input.
    fn write(&self, data: &[u8]) -> Result<(), PtyError>;

    /// Resize the PTY (delivers SIGWINCH on Unix).
    fn resize(&self, size: TermSize) -> Result<(), PtyError>;

    /// Ask the process to terminate. Completion is signalled by `PtyEvent::Exit`.
    fn kill(&self) -> Result<(), PtyError>;

    fn pid(&self) -> Option<u32>;
}

/// A freshly spawned process and its event stream.
pub struct SpawnedPty {
    pub process: Box<dyn PtyProcess>,
    pub events: mpsc::Receiver<PtyEvent>,
}

/// Spawns programs on pseudo-terminals.
pub trait PtyBackend: Send + Sync {
    /// Spawn `request.program`. This blocks; run it off the async executor.
    fn spawn(&self, request: &SpawnRequest) -> Result<SpawnedPty, PtyError>;
}

/// Buffer size for reading from PTY.
const READ_BUFFER_SIZE: usize = 4096;

/// Capacity of the output event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Backend using the platform's native PTY implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativePtyBackend;

impl PtyBackend for NativePtyBackend {
    fn spawn(&self, request: &SpawnRequest) -> Result<SpawnedPty, PtyError> {
        let pair = native_pty_system()
            .openpty(request.size.into())
            .map_err(|e| PtyError::Open(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&request.program);
        cmd.args(&request.argv);
        if let Some(cwd) = &request.cwd {
            cmd.cwd(cwd);
        }
        for (key, value) in &request.env {
            cmd.env(key, value);
        }

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| PtyError::Spawn {
                program: request.program.clone(),
                reason: e.to_string(),
            })?;
        // Only the child may hold the slave side, otherwise EOF never arrives.
        drop(pair.slave);

        let io = pair
            .master
            .try_clone_reader()
            .and_then(|reader| pair.master.take_writer().map(|writer| (reader, writer)));
        let (reader, writer) = match io {
            Ok(io) => io,
            Err(e) => {
                let _ = child.kill();
                return Err(PtyError::Open(format!("failed to attach PTY I/O: {e}")));
            }
        };

        let (process, events) = NativePty::start(pair.master, child, reader, writer)?;
        debug!(
            "Spawned {} {:?} (pid {:?})",
            request.program,
            request.argv,
            process.pid()
        );
        Ok(SpawnedPty {
            process: Box::new(process),
            events,
        })
    }
}

/// A process on a native PTY, with background threads for blocking I/O.
pub struct NativePty {
    write_tx: mpsc::UnboundedSender<Vec<u8>>,
    /// Master side, kept for resize.
    master: Mutex<Box<dyn MasterPty + Send>>,
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
    pid: Option<u32>,
    /// Set by the reader thread once the child has been reaped.
    exited: Arc<AtomicBool>,
}

impl NativePty {
    fn start(
        master: Box<dyn MasterPty + Send>,
        child: Box<dyn Child + Send + Sync>,
        reader: Box<dyn Read + Send>,
        writer: Box<dyn Write + Send>,
    ) -> Result<(Self, mpsc::Receiver<PtyEvent>), PtyError> {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (write_tx, write_rx) = mpsc::unbounded_channel::<Vec<u8>>();

        let killer = child.clone_killer();
        let pid = child.process_id();
        let exited = Arc::new(AtomicBool::new(false));

        let reader_exited = exited.clone();
        std::thread::Builder::new()
            .name("pty-reader".into())
            .spawn(move || Self::reader_loop(reader, child, event_tx, reader_exited))?;

        std::thread::Builder::new()
            .name("pty-writer".into())
            .spawn(move || Self::writer_loop(writer, write_rx))?;

        Ok((
            Self {
                write_tx,
                master: Mutex::new(master),
                killer: Mutex::new(killer),
                pid,
                exited,
            },
            event_rx,
        ))
    }

    /// Forward output until EOF, then reap the child and report its exit.
    fn reader_loop(
        mut reader: Box<dyn Read + Send>,
        mut child: Box<dyn Child + Send + Sync>,
        event_tx: mpsc::Sender<PtyEvent>,
        exited: Arc<AtomicBool>,
    ) {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        loop {
            match reader.read(&mut buf) {
                Ok(0) => {
                    debug!("PTY reader EOF");
                    break;
                }
                Ok(n) => {
                    if event_tx.blocking_send(PtyEvent::Data(buf[..n].to_vec())).is_err() {
                        debug!("PTY event channel closed");
                        break;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    // Linux reports EIO on the master once the slave side is gone.
                    debug!("PTY read ended: {}", e);
                    break;
                }
            }
        }

        let code = match child.wait() {
            Ok(status) => Some(status.exit_code()),
            Err(e) => {
                warn!("Failed to collect child exit status: {}", e);
                None
            }
        };
        exited.store(true, Ordering::SeqCst);
        let _ = event_tx.blocking_send(PtyEvent::Exit(code));
    }

    fn writer_loop(mut writer: Box<dyn Write + Send>, mut write_rx: mpsc::UnboundedReceiver<Vec<u8>>) {
        while let Some(data) = write_rx.blocking_recv() {
            if let Err(e) = writer.write_all(&data).and_then(|_| writer.flush()) {
                debug!("PTY write error: {}", e);
                break;
            }
        }
        debug!("PTY writer exiting");
    }

    fn has_exited(&self) -> bool {
        self.exited.load(Ordering::SeqCst)
    }
}

impl PtyProcess for NativePty {
    fn write(&self, data: &[u8]) -> Result<(), PtyError> {
        if self.has_exited() {
            return Err(PtyError::Exited);
        }
        self.write_tx
            .send(data.to_vec())
            .map_err(|_| PtyError::Exited)
    }

    fn resize(&self, size: TermSize) -> Result<(), PtyError> {
        if self.has_exited() {
            return Err(PtyError::Exited);
        }
        self.master
            .lock()
            .resize(size.into())
            .map_err(|e| PtyError::Resize(e.to_string()))
    }

    fn kill(&self) -> Result<(), PtyError> {
        if self.has_exited() {
            return Ok(());
        }
        #[cfg(unix)]
        {
            if let Some(pid) = self.pid {
                hang_up_process_group(pid);
            }
        }
        match self.killer.lock().kill() {
            Ok(()) => Ok(()),
            // Lost the race with a natural exit.
            Err(_) if self.has_exited() => Ok(()),
            Err(e) => Err(PtyError::Io(e)),
        }
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }
}

impl Drop for NativePty {
    fn drop(&mut self) {
        if !self.has_exited() {
            if let Err(e) = self.kill() {
                debug!("Failed to kill child on drop (may have already exited): {}", e);
            }
        }
    }
}

/// Send SIGHUP to the child's process group, as a closing terminal would.
///
/// The child is a session leader on its PTY, so its pid is also the group id
/// and tools it started (language servers, subshells) receive the signal too.
#[cfg(unix)]
fn hang_up_process_group(pid: u32) {
    let Ok(pgid) = i32::try_from(pid) else {
        return;
    };
    if pgid <= 1 {
        return;
    }
    // SAFETY: kill(2) with a negative pid only signals the process group; the
    // group id comes from a child we spawned and have not yet reaped.
    let rc = unsafe { libc::kill(-pgid, libc::SIGHUP) };
    if rc != 0 {
        debug!(
            "SIGHUP to process group {} failed: {}",
            pgid,
            std::io::Error::last_os_error()
        );
    }
}
