//! Record filters
//!
//! Every filter is either an include or an exclude predicate over a record.
//! `describe()` returns the command that recreates the filter, which is what
//! gets persisted with a session.

use regex::Regex;

use super::level::{Level, UnknownLevelPolicy};
use super::record::LogRecord;
use crate::error::{SessionError, SessionResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    /// At least one include filter must match when any exist
    Include,
    /// A match hides the record
    Exclude,
}

pub trait LogFilter: Send + std::fmt::Debug {
    fn kind(&self) -> FilterKind;
    fn matches(&self, record: &LogRecord) -> bool;
    fn describe(&self) -> String;
}

/// The single minimum-severity filter of the log view
#[derive(Debug, Clone, Copy)]
pub struct LevelFilter {
    pub min_level: Level,
    pub mode: FilterKind,
    pub policy: UnknownLevelPolicy,
}

impl LevelFilter {
    pub fn new(min_level: Level, policy: UnknownLevelPolicy) -> Self {
        Self {
            min_level,
            mode: FilterKind::Exclude,
            policy,
        }
    }

    /// A threshold of `unknown` disables the filter
    pub fn is_active(&self) -> bool {
        self.min_level != Level::Unknown
    }

    fn below_threshold(&self, level: Level) -> bool {
        level.rank(self.policy) < self.min_level.rank(self.policy)
    }
}

impl Default for LevelFilter {
    fn default() -> Self {
        Self::new(Level::Unknown, UnknownLevelPolicy::default())
    }
}

impl LogFilter for LevelFilter {
    fn kind(&self) -> FilterKind {
        self.mode
    }

    fn matches(&self, record: &LogRecord) -> bool {
        match self.mode {
            FilterKind::Exclude => self.is_active() && self.below_threshold(record.level),
            FilterKind::Include => !self.is_active() || !self.below_threshold(record.level),
        }
    }

    fn describe(&self) -> String {
        format!("set-min-log-level {}", self.min_level.name())
    }
}

/// User-defined regex filter
#[derive(Debug, Clone)]
pub struct PatternFilter {
    kind: FilterKind,
    pattern: String,
    regex: Regex,
}

impl PatternFilter {
    pub fn new(kind: FilterKind, pattern: &str) -> SessionResult<Self> {
        let regex = Regex::new(pattern).map_err(|e| SessionError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            kind,
            pattern: pattern.to_string(),
            regex,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

impl LogFilter for PatternFilter {
    fn kind(&self) -> FilterKind {
        self.kind
    }

    fn matches(&self, record: &LogRecord) -> bool {
        self.regex.is_match(&record.text)
    }

    fn describe(&self) -> String {
        match self.kind {
            FilterKind::Include => format!("filter-in {}", self.pattern),
            FilterKind::Exclude => format!("filter-out {}", self.pattern),
        }
    }
}

/// A filter in the user filter list
#[derive(Debug)]
pub struct FilterEntry {
    pub filter: Box<dyn LogFilter>,
    pub enabled: bool,
}

/// Apply the visibility policy: the level filter, then the user filters in
/// list order. The first matching exclude filter rejects the record; if any
/// include filter is enabled, at least one of them has to match.
pub fn passes(level: &LevelFilter, filters: &[FilterEntry], record: &LogRecord) -> bool {
    let level_ok = match level.kind() {
        FilterKind::Exclude => !level.matches(record),
        FilterKind::Include => level.matches(record),
    };
    if !level_ok {
        return false;
    }

    let mut has_include = false;
    let mut included = false;
    for entry in filters.iter().filter(|e| e.enabled) {
        match entry.filter.kind() {
            FilterKind::Exclude => {
                if entry.filter.matches(record) {
                    return false;
                }
            }
            FilterKind::Include => {
                has_include = true;
                if !included && entry.filter.matches(record) {
                    included = true;
                }
            }
        }
    }
    !has_include || included
}
