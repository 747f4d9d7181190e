//! Severity levels

use serde::{Deserialize, Serialize};

/// Severity of a log record, ordered from least to most important.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    /// No recognizable severity
    #[default]
    Unknown,
    Trace,
    Debug,
    Info,
    Stats,
    Warning,
    Error,
    Critical,
    Fatal,
}

impl Level {
    pub const COUNT: usize = 9;

    pub const ALL: [Level; Level::COUNT] = [
        Level::Unknown,
        Level::Trace,
        Level::Debug,
        Level::Info,
        Level::Stats,
        Level::Warning,
        Level::Error,
        Level::Critical,
        Level::Fatal,
    ];

    /// Parse a level name, accepting the usual abbreviations
    pub fn from_name(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "unknown" => Some(Level::Unknown),
            "trace" => Some(Level::Trace),
            "debug" => Some(Level::Debug),
            "info" | "notice" => Some(Level::Info),
            "stats" => Some(Level::Stats),
            "warn" | "warning" => Some(Level::Warning),
            "err" | "error" => Some(Level::Error),
            "crit" | "critical" => Some(Level::Critical),
            "fatal" | "panic" | "emerg" => Some(Level::Fatal),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Level::Unknown => "unknown",
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Stats => "stats",
            Level::Warning => "warning",
            Level::Error => "error",
            Level::Critical => "critical",
            Level::Fatal => "fatal",
        }
    }

    /// Position in `ALL`, used for per-level counters
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Sort key used by threshold comparisons
    pub fn rank(&self, policy: UnknownLevelPolicy) -> u8 {
        match (self, policy) {
            (Level::Unknown, UnknownLevelPolicy::Lowest) => 0,
            (Level::Unknown, UnknownLevelPolicy::Highest) => u8::MAX,
            (level, _) => *level as u8,
        }
    }

    /// Get color for ratatui
    pub fn color(&self) -> ratatui::style::Color {
        use ratatui::style::Color;
        match self {
            Level::Unknown | Level::Info | Level::Stats => Color::Reset,
            Level::Trace | Level::Debug => Color::DarkGray,
            Level::Warning => Color::Yellow,
            Level::Error => Color::Red,
            Level::Critical | Level::Fatal => Color::LightRed,
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Where records of unknown severity sort relative to the named levels
/// when a minimum-level filter is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UnknownLevelPolicy {
    /// Unknown sorts below trace, so any threshold hides it
    #[default]
    Lowest,
    /// Unknown sorts above fatal, so no threshold hides it
    Highest,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_parsing() {
        assert_eq!(Level::from_name("WARN"), Some(Level::Warning));
        assert_eq!(Level::from_name("warning"), Some(Level::Warning));
        assert_eq!(Level::from_name("err"), Some(Level::Error));
        assert_eq!(Level::from_name("bogus"), None);
    }

    #[test]
    fn test_level_ordering() {
        assert!(Level::Unknown < Level::Trace);
        assert!(Level::Info < Level::Warning);
        assert!(Level::Error < Level::Fatal);
    }

    #[test]
    fn test_unknown_rank_follows_policy() {
        let lowest = UnknownLevelPolicy::Lowest;
        let highest = UnknownLevelPolicy::Highest;
        assert!(Level::Unknown.rank(lowest) < Level::Trace.rank(lowest));
        assert!(Level::Unknown.rank(highest) > Level::Fatal.rank(highest));
        assert_eq!(Level::Error.rank(lowest), Level::Error.rank(highest));
    }

    #[test]
    fn test_index_matches_all() {
        for (i, level) in Level::ALL.iter().enumerate() {
            assert_eq!(level.index(), i);
        }
    }
}
