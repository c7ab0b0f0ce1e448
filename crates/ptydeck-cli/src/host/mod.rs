//! Session host: PTY processes, their surfaces and the active-session workspace.

pub mod bridge;
pub mod pty;
pub mod registry;
pub mod session;
pub mod shell;
pub mod surface;
pub mod terminal;
pub mod workspace;

#[cfg(test)]
pub mod testing;

// Public API - used by main.rs
pub use pty::NativePtyBackend;
pub use shell::SystemShellProbe;
pub use workspace::{LaunchRequest, SessionEvent, Workspace};
