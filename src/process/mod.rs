//! Subprocess engine
//!
//! Highlight jobs and piped sources both run as `ScopedChild`ren whose
//! output is pumped into the multiplexer by tasks attached to their token.

pub mod helper;
pub mod highlight;
pub mod piper;
pub mod scoped;

pub use highlight::{HighlightJob, JobOutcome, PendingJob};
pub use piper::{PendingPipe, PipedProcess};
pub use scoped::ScopedChild;

use crate::app::ViewKind;

/// Where a highlight job lives. Each slot holds at most one live job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum JobSlot {
    /// Search highlighting for one view
    Search(ViewKind),
    /// The single capture job feeding the capture table
    Capture,
}

impl std::fmt::Display for JobSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobSlot::Search(view) => write!(f, "search:{}", view),
            JobSlot::Capture => write!(f, "capture"),
        }
    }
}
