//! Core types and logic for ptydeck.
//!
//! This crate holds the runtime-free pieces of the PTY session host: how a
//! shell is described and how a command line is built for it, how PTY output
//! bytes become text, and the session data model. It has no async runtime
//! and spawns nothing, so everything here is testable in isolation.
//!
//! # Modules
//!
//! - [`shell`]: shell description, argv construction, `PATH` augmentation
//! - [`decoder`]: streaming UTF-8 decoder for PTY output
//! - [`session`]: session records, tools, flag parsing
//! - [`error`]: error type with actionable suggestions

pub mod decoder;
pub mod error;
pub mod session;
pub mod shell;
