//! Query engine collaborator
//!
//! The orchestrator only needs to keep the two relations current and hand
//! query strings over; `SqliteEngine` is the default implementation.

pub mod sqlite;

pub use sqlite::SqliteEngine;

use crate::error::SessionResult;
use crate::logsource::LogSourceAggregator;

/// Name of the relation holding the filtered log
pub const LOG_TABLE: &str = "log_lines";
/// Name of the relation holding the last capture
pub const CAPTURE_TABLE: &str = "capture";

/// A line materialized by a capture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedLine {
    /// Line number in the captured view
    pub line: usize,
    pub source: String,
    pub level: String,
    pub text: String,
}

/// Result of a query
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
    /// Rows beyond the display limit were dropped
    pub truncated: bool,
}

impl RowSet {
    /// Render as an aligned text table for the results view
    pub fn to_lines(&self) -> Vec<String> {
        if self.columns.is_empty() {
            return vec!["(no result columns)".to_string()];
        }

        let mut widths: Vec<usize> = self.columns.iter().map(|c| c.chars().count()).collect();
        for row in &self.rows {
            for (i, cell) in row.iter().enumerate() {
                if let Some(w) = widths.get_mut(i) {
                    *w = (*w).max(cell.chars().count());
                }
            }
        }

        let format_row = |cells: &[String]| {
            cells
                .iter()
                .zip(&widths)
                .map(|(cell, w)| format!("{:<w$}", cell, w = *w))
                .collect::<Vec<_>>()
                .join(" | ")
                .trim_end()
                .to_string()
        };

        let mut lines = vec![
            format_row(&self.columns),
            widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>().join("-+-"),
        ];
        lines.extend(self.rows.iter().map(|r| format_row(r)));
        lines.push(format!(
            "({} row{}{})",
            self.rows.len(),
            if self.rows.len() == 1 { "" } else { "s" },
            if self.truncated { ", truncated" } else { "" }
        ));
        lines
    }
}

pub trait QueryEngine: Send {
    /// Reload the log relation from the filtered view
    fn sync_log(&mut self, aggregator: &LogSourceAggregator) -> SessionResult<()>;

    /// Replace the capture relation
    fn replace_capture(&mut self, pattern: &str, lines: &[CapturedLine]) -> SessionResult<()>;

    fn query(&mut self, sql: &str) -> SessionResult<RowSet>;

    /// Description of the relations, one line each
    fn schema(&self) -> Vec<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_set_table() {
        let rows = RowSet {
            columns: vec!["level".into(), "n".into()],
            rows: vec![vec!["error".into(), "12".into()], vec!["info".into(), "3".into()]],
            truncated: false,
        };
        let lines = rows.to_lines();
        assert_eq!(lines[0], "level | n");
        assert_eq!(lines[1], "------+---");
        assert_eq!(lines[2], "error | 12");
        assert_eq!(lines[4], "(2 rows)");
    }
}
