//! Incrementally indexed log source
//!
//! A source is either a file on disk, re-read from the last complete-line
//! offset whenever it grows, or the stdout of a piped command fed chunk by
//! chunk. Only complete lines are indexed; a trailing partial line waits for
//! its newline (pipes flush it when sealed at EOF).

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, info};

use super::parser::LineParser;
use super::record::{FileIdentity, LogRecord, SourceId};

/// Where a source's bytes come from
#[derive(Debug, Clone)]
pub enum SourceOrigin {
    File {
        path: PathBuf,
        identity: FileIdentity,
    },
    Pipe {
        command: String,
    },
}

#[derive(Debug)]
pub struct LogSource {
    id: SourceId,
    origin: SourceOrigin,
    display_name: String,
    file: Option<File>,
    records: Vec<LogRecord>,
    /// Bytes consumed as complete lines
    indexed_offset: u64,
    /// Pipe bytes not yet terminated by a newline
    pending: Vec<u8>,
    sealed: bool,
    exit_code: Option<i32>,
    /// Records lacking a timestamp
    untimed: usize,
    fallback_start_time: i64,
    /// Last position the operator viewed in this source
    cursor: usize,
}

impl LogSource {
    /// Open a file source. Nothing is indexed until `poll_growth`.
    pub fn open(id: SourceId, path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        let metadata = file.metadata()?;
        let identity = FileIdentity::from_metadata(&metadata);
        let fallback_start_time = metadata
            .created()
            .or_else(|_| metadata.modified())
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        let display_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());

        Ok(Self {
            id,
            origin: SourceOrigin::File {
                path: path.to_path_buf(),
                identity,
            },
            display_name,
            file: Some(file),
            records: Vec::new(),
            indexed_offset: 0,
            pending: Vec::new(),
            sealed: false,
            exit_code: None,
            untimed: 0,
            fallback_start_time,
            cursor: 0,
        })
    }

    /// Create a virtual source fed by a piped command
    pub fn piped(id: SourceId, command: &str) -> Self {
        Self {
            id,
            origin: SourceOrigin::Pipe {
                command: command.to_string(),
            },
            display_name: format!("[{}]", command),
            file: None,
            records: Vec::new(),
            indexed_offset: 0,
            pending: Vec::new(),
            sealed: false,
            exit_code: None,
            untimed: 0,
            fallback_start_time: chrono::Utc::now().timestamp(),
            cursor: 0,
        }
    }

    pub fn id(&self) -> SourceId {
        self.id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.origin {
            SourceOrigin::File { path, .. } => Some(path),
            SourceOrigin::Pipe { .. } => None,
        }
    }

    pub fn identity(&self) -> Option<FileIdentity> {
        match &self.origin {
            SourceOrigin::File { identity, .. } => Some(*identity),
            SourceOrigin::Pipe { .. } => None,
        }
    }

    pub fn is_pipe(&self) -> bool {
        matches!(self.origin, SourceOrigin::Pipe { .. })
    }

    pub fn records(&self) -> &[LogRecord] {
        &self.records
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn is_fully_timed(&self) -> bool {
        self.untimed == 0
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn set_cursor(&mut self, cursor: usize) {
        self.cursor = cursor.min(self.records.len().saturating_sub(1));
    }

    /// Start time used to recognize this source across runs: the first
    /// timestamped record, else the file's creation time.
    pub fn start_time(&self) -> i64 {
        self.records
            .iter()
            .find_map(|r| r.timestamp)
            .map(|ts| ts.and_utc().timestamp())
            .unwrap_or(self.fallback_start_time)
    }

    /// Read whatever the file gained since the last call and index the
    /// complete lines. With `force` everything is discarded and re-read.
    /// Returns the number of new records.
    pub fn poll_growth(&mut self, parser: &dyn LineParser, seq: &mut u64, force: bool) -> Result<usize> {
        let Some(file) = self.file.as_mut() else {
            return Ok(0);
        };

        let size = file.metadata()?.len();
        if force || size < self.indexed_offset {
            if size < self.indexed_offset {
                info!("{} was truncated, re-indexing", self.display_name);
            }
            self.records.clear();
            self.untimed = 0;
            self.indexed_offset = 0;
        }
        if size == self.indexed_offset {
            return Ok(0);
        }

        file.seek(SeekFrom::Start(self.indexed_offset))?;
        let mut buf = Vec::with_capacity((size - self.indexed_offset) as usize);
        file.take(size - self.indexed_offset).read_to_end(&mut buf)?;

        let Some(last_newline) = buf.iter().rposition(|&b| b == b'\n') else {
            // Only a partial line so far.
            return Ok(0);
        };
        let complete = &buf[..=last_newline];
        let base = self.indexed_offset;
        let added = self.index_lines(complete, base, parser, seq);
        self.indexed_offset += complete.len() as u64;
        debug!("{}: indexed {} new records", self.display_name, added);
        Ok(added)
    }

    /// Feed bytes read from a piped command
    pub fn append(&mut self, bytes: &[u8], parser: &dyn LineParser, seq: &mut u64) -> usize {
        if self.sealed {
            return 0;
        }
        self.pending.extend_from_slice(bytes);
        let Some(last_newline) = self.pending.iter().rposition(|&b| b == b'\n') else {
            return 0;
        };
        let complete: Vec<u8> = self.pending.drain(..=last_newline).collect();
        let base = self.indexed_offset;
        let added = self.index_lines(&complete, base, parser, seq);
        self.indexed_offset += complete.len() as u64;
        added
    }

    /// Mark a piped source as finished. The trailing partial line, if any,
    /// becomes the final record.
    pub fn seal(&mut self, parser: &dyn LineParser, seq: &mut u64, exit_code: Option<i32>) -> usize {
        if self.sealed {
            return 0;
        }
        let mut added = 0;
        if !self.pending.is_empty() {
            let mut tail = std::mem::take(&mut self.pending);
            tail.push(b'\n');
            let base = self.indexed_offset;
            added = self.index_lines(&tail, base, parser, seq);
            self.indexed_offset += tail.len() as u64 - 1;
        }
        self.sealed = true;
        self.exit_code = exit_code;
        added
    }

    pub fn set_exit_code(&mut self, exit_code: Option<i32>) {
        self.exit_code = exit_code;
    }

    fn index_lines(&mut self, complete: &[u8], base: u64, parser: &dyn LineParser, seq: &mut u64) -> usize {
        let mut offset = base;
        let mut added = 0;
        for raw in complete.split_inclusive(|&b| b == b'\n') {
            let line_offset = offset;
            offset += raw.len() as u64;
            let mut body = &raw[..raw.len() - 1];
            if body.last() == Some(&b'\r') {
                body = &body[..body.len() - 1];
            }
            let text = String::from_utf8_lossy(body).to_string();
            let parsed = parser.parse(&text).unwrap_or_default();

            let previous = self.records.last();
            let continued = parsed.timestamp.is_none()
                && parsed.level == super::Level::Unknown
                && previous.is_some();
            let (level, timestamp) = match (continued, previous) {
                (true, Some(prev)) => (prev.level, prev.timestamp),
                _ => (parsed.level, parsed.timestamp),
            };
            if timestamp.is_none() {
                self.untimed += 1;
            }

            *seq += 1;
            self.records.push(LogRecord {
                source: self.id,
                offset: line_offset,
                timestamp,
                level,
                continued,
                seq: *seq,
                text,
            });
            added += 1;
        }
        added
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logsource::{DefaultLineParser, Level};
    use std::io::Write;

    fn parser() -> DefaultLineParser {
        DefaultLineParser::with_year(2024)
    }

    #[test]
    fn test_partial_line_waits_for_newline() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        write!(tmp, "2024-01-01 00:00:00 INFO one\n2024-01-01 00:00:01 INFO tw").unwrap();
        tmp.flush().unwrap();

        let mut source = LogSource::open(SourceId(0), tmp.path()).unwrap();
        let mut seq = 0;
        assert_eq!(source.poll_growth(&parser(), &mut seq, false).unwrap(), 1);

        write!(tmp, "o\n").unwrap();
        tmp.flush().unwrap();
        assert_eq!(source.poll_growth(&parser(), &mut seq, false).unwrap(), 1);
        assert_eq!(source.records()[1].text, "2024-01-01 00:00:01 INFO two");
        assert_eq!(source.records()[1].offset, 29);
    }

    #[test]
    fn test_poll_without_growth_adds_nothing() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp, "2024-01-01 00:00:00 INFO one").unwrap();
        tmp.flush().unwrap();

        let mut source = LogSource::open(SourceId(0), tmp.path()).unwrap();
        let mut seq = 0;
        assert_eq!(source.poll_growth(&parser(), &mut seq, false).unwrap(), 1);
        assert_eq!(source.poll_growth(&parser(), &mut seq, false).unwrap(), 0);
        assert_eq!(source.records().len(), 1);
    }

    #[test]
    fn test_force_reindexes_from_scratch() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp, "a\nb").unwrap();
        tmp.flush().unwrap();

        let mut source = LogSource::open(SourceId(0), tmp.path()).unwrap();
        let mut seq = 0;
        source.poll_growth(&parser(), &mut seq, false).unwrap();
        assert_eq!(source.poll_growth(&parser(), &mut seq, true).unwrap(), 2);
        assert_eq!(source.records().len(), 2);
    }

    #[test]
    fn test_continuation_inherits_level() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp, "2024-01-01 00:00:00 ERROR boom").unwrap();
        writeln!(tmp, "    at frame one").unwrap();
        tmp.flush().unwrap();

        let mut source = LogSource::open(SourceId(0), tmp.path()).unwrap();
        let mut seq = 0;
        source.poll_growth(&parser(), &mut seq, false).unwrap();
        let continuation = &source.records()[1];
        assert!(continuation.continued);
        assert_eq!(continuation.level, Level::Error);
        assert!(continuation.timestamp.is_some());
        assert!(source.is_fully_timed());
    }

    #[test]
    fn test_pipe_flushes_tail_on_seal() {
        let mut source = LogSource::piped(SourceId(3), "echo hi");
        let mut seq = 0;
        assert_eq!(source.append(b"first\nsec", &parser(), &mut seq), 1);
        assert_eq!(source.append(b"ond", &parser(), &mut seq), 0);
        assert_eq!(source.seal(&parser(), &mut seq, Some(2)), 1);
        assert!(source.is_sealed());
        assert_eq!(source.exit_code(), Some(2));
        assert_eq!(source.records()[1].text, "second");
        assert_eq!(source.append(b"late\n", &parser(), &mut seq), 0);
    }

    #[test]
    fn test_start_time_prefers_first_timestamp() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp, "banner").unwrap();
        writeln!(tmp, "2024-01-01 00:00:00 INFO start").unwrap();
        tmp.flush().unwrap();

        let mut source = LogSource::open(SourceId(0), tmp.path()).unwrap();
        let mut seq = 0;
        source.poll_growth(&parser(), &mut seq, false).unwrap();
        assert_eq!(source.start_time(), 1_704_067_200);
    }
}
