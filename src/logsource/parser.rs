//! Line classification (severity + timestamp)
//!
//! The aggregator treats parsing as a collaborator: anything implementing
//! `LineParser` can be plugged in. A parse error means "severity unknown".

use anyhow::Result;
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use regex::Regex;
use std::sync::LazyLock;

use super::level::Level;

/// Result of classifying one line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ParsedLine {
    pub level: Level,
    pub timestamp: Option<NaiveDateTime>,
}

pub trait LineParser: Send + Sync {
    fn parse(&self, line: &str) -> Result<ParsedLine>;
}

/// Only the head of a line is searched for a severity keyword
const LEVEL_SCAN_LIMIT: usize = 128;

// Compiled once per process. `None` only if a pattern below fails to
// compile, which the tests rule out.
static ISO: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(\d{4})-(\d{2})-(\d{2})[T ](\d{2}):(\d{2}):(\d{2})(?:[.,](\d{1,9}))?").ok()
});
static SYSLOG: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^([A-Z][a-z]{2}) +(\d{1,2}) (\d{2}):(\d{2}):(\d{2})").ok());
static LEVEL: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(trace|debug|info|notice|stats|warn|warning|error|err|crit|critical|fatal|panic)\b").ok()
});

/// Recognizes ISO-8601 style and syslog style timestamps and the common
/// severity keywords.
pub struct DefaultLineParser {
    /// Year assumed for syslog timestamps, which carry none
    year: i32,
}

impl DefaultLineParser {
    pub fn new() -> Self {
        Self::with_year(chrono::Local::now().year())
    }

    pub fn with_year(year: i32) -> Self {
        Self { year }
    }

    fn parse_iso(&self, line: &str) -> Option<NaiveDateTime> {
        let caps = ISO.as_ref()?.captures(line)?;
        let num = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
        let year = caps.get(1)?.as_str().parse::<i32>().ok()?;
        let date = NaiveDate::from_ymd_opt(year, num(2)?, num(3)?)?;
        let nanos = caps
            .get(7)
            .map(|m| {
                let digits = m.as_str();
                let value: u32 = digits.parse().unwrap_or(0);
                value * 10u32.pow(9 - digits.len() as u32)
            })
            .unwrap_or(0);
        date.and_hms_nano_opt(num(4)?, num(5)?, num(6)?, nanos)
    }

    fn parse_syslog(&self, line: &str) -> Option<NaiveDateTime> {
        let caps = SYSLOG.as_ref()?.captures(line)?;
        let month = month_number(caps.get(1)?.as_str())?;
        let num = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
        NaiveDate::from_ymd_opt(self.year, month, num(2)?)?.and_hms_opt(num(3)?, num(4)?, num(5)?)
    }

    fn parse_level(&self, line: &str) -> Level {
        let mut end = line.len().min(LEVEL_SCAN_LIMIT);
        while !line.is_char_boundary(end) {
            end -= 1;
        }
        LEVEL
            .as_ref()
            .and_then(|re| re.find(&line[..end]))
            .and_then(|m| Level::from_name(m.as_str()))
            .unwrap_or(Level::Unknown)
    }
}

impl Default for DefaultLineParser {
    fn default() -> Self {
        Self::new()
    }
}

impl LineParser for DefaultLineParser {
    fn parse(&self, line: &str) -> Result<ParsedLine> {
        let timestamp = self.parse_iso(line).or_else(|| self.parse_syslog(line));
        Ok(ParsedLine {
            level: self.parse_level(line),
            timestamp,
        })
    }
}

fn month_number(name: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = [
        "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
    ];
    MONTHS.iter().position(|m| *m == name).map(|i| i as u32 + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn test_patterns_compile() {
        assert!(ISO.is_some());
        assert!(SYSLOG.is_some());
        assert!(LEVEL.is_some());
    }

    #[test]
    fn test_iso_timestamp_and_level() {
        let parser = DefaultLineParser::with_year(2024);
        let parsed = parser
            .parse("2024-03-01 12:30:45.250 ERROR disk full")
            .unwrap();
        assert_eq!(parsed.level, Level::Error);
        let ts = parsed.timestamp.unwrap();
        assert_eq!(ts.hour(), 12);
        assert_eq!(ts.nanosecond(), 250_000_000);
    }

    #[test]
    fn test_iso_with_t_separator() {
        let parser = DefaultLineParser::with_year(2024);
        let parsed = parser.parse("2024-03-01T08:00:00Z [warn] slow").unwrap();
        assert_eq!(parsed.level, Level::Warning);
        assert!(parsed.timestamp.is_some());
    }

    #[test]
    fn test_syslog_timestamp_uses_configured_year() {
        let parser = DefaultLineParser::with_year(2023);
        let parsed = parser.parse("Mar  5 09:10:11 host sshd[12]: info accepted").unwrap();
        let ts = parsed.timestamp.unwrap();
        assert_eq!(ts.year(), 2023);
        assert_eq!(ts.month(), 3);
        assert_eq!(ts.day(), 5);
        assert_eq!(parsed.level, Level::Info);
    }

    #[test]
    fn test_plain_text_is_unknown() {
        let parser = DefaultLineParser::with_year(2024);
        let parsed = parser.parse("    at com.example.Main(Main.java:10)").unwrap();
        assert_eq!(parsed.level, Level::Unknown);
        assert!(parsed.timestamp.is_none());
    }

    #[test]
    fn test_keyword_must_be_a_word() {
        let parser = DefaultLineParser::with_year(2024);
        let parsed = parser.parse("terrorist information").unwrap();
        assert_eq!(parsed.level, Level::Unknown);
    }

    #[test]
    fn test_invalid_date_is_ignored() {
        let parser = DefaultLineParser::with_year(2024);
        let parsed = parser.parse("2024-13-45 99:00:00 INFO odd").unwrap();
        assert!(parsed.timestamp.is_none());
        assert_eq!(parsed.level, Level::Info);
    }
}
