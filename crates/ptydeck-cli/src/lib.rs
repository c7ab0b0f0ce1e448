//! PTY session host for ptydeck.
//!
//! [`host::Workspace`] runs several programs at once, each on its own
//! pseudo-terminal and surface, with one session active at a time. Text can
//! be injected into the active session, including one that is still booting.
//! The `ptydeck` binary is a thin CLI over this crate.
//!
//! # Modules
//!
//! - [`host`]: PTY backend, shell probing, sessions, surfaces, the writer
//!   bridge and the workspace
//! - [`config`]: runtime configuration from environment variables

pub mod config;
pub mod host;
