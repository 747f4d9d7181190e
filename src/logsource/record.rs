//! Indexed log records and source identities

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::level::Level;

/// Stable identifier of a log source within one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceId(pub u32);

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "src{}", self.0)
    }
}

/// Identity of a file on disk, independent of the path used to reach it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileIdentity {
    pub dev: u64,
    pub ino: u64,
}

impl FileIdentity {
    pub fn from_metadata(metadata: &std::fs::Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        Self {
            dev: metadata.dev(),
            ino: metadata.ino(),
        }
    }

    pub fn of_path(path: &Path) -> std::io::Result<Self> {
        std::fs::metadata(path).map(|m| Self::from_metadata(&m))
    }
}

impl std::fmt::Display for FileIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.dev, self.ino)
    }
}

/// One indexed line. Immutable once indexed.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub source: SourceId,
    /// Byte offset of the line within its source
    pub offset: u64,
    pub timestamp: Option<NaiveDateTime>,
    pub level: Level,
    /// Continuation of the previous record (inherited level and timestamp)
    pub continued: bool,
    /// Global arrival sequence, used when timestamps cannot order records
    pub seq: u64,
    pub text: String,
}
