//! Library entry point for chat-tail components.
//!
//! Exposes configuration, logging and the interactive session so tests can
//! exercise them without going through the binary entry point.

pub mod config;
pub mod error;
pub mod logging;
pub mod session;

pub use config::CLIConfiguration;
pub use error::{CLIError, Result};
pub use session::{parse_input, InputCommand, SnapshotRenderer, TailSession};
