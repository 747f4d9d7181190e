//! Error taxonomy for the session orchestrator
//!
//! Operator-facing failures (bad files, bad patterns, failed spawns) are
//! reported on the status line and never alter unrelated state. Only
//! `MultiplexerFault` is fatal.

use std::path::PathBuf;
use thiserror::Error;

use crate::app::Mode;

pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("cannot open {}: {reason}", path.display())]
    FileUnreadable { path: PathBuf, reason: String },

    #[error("{} is already open", path.display())]
    DuplicateFile { path: PathBuf },

    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("failed to spawn '{command}': {reason}")]
    SpawnFailed { command: String, reason: String },

    #[error("process '{command}' terminated abnormally: {reason}")]
    ProcessCrashed { command: String, reason: String },

    #[error("multiplexer fault: {0}")]
    MultiplexerFault(String),

    #[error("session entry for {display_name} does not match the live file")]
    SessionMismatch { display_name: String },

    #[error("{0} mode is already active")]
    ModeActive(Mode),

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("{0}")]
    CommandFailed(String),

    #[error("query failed: {0}")]
    QueryFailed(String),
}

impl SessionError {
    /// Whether the orchestrator has to shut down
    pub fn is_fatal(&self) -> bool {
        matches!(self, SessionError::MultiplexerFault(_))
    }
}
