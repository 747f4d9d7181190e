//! In-memory SQLite query engine

use rusqlite::types::ValueRef;
use rusqlite::{params, Connection};
use tracing::{debug, info};

use super::{CapturedLine, QueryEngine, RowSet, CAPTURE_TABLE, LOG_TABLE};
use crate::error::{SessionError, SessionResult};
use crate::logsource::LogSourceAggregator;

/// Rows kept for display per query
const MAX_ROWS: usize = 10_000;

pub struct SqliteEngine {
    conn: Connection,
    /// Aggregator generation last loaded into the log relation
    synced_generation: Option<u64>,
}

fn query_failed(e: rusqlite::Error) -> SessionError {
    SessionError::QueryFailed(e.to_string())
}

impl SqliteEngine {
    pub fn new() -> SessionResult<Self> {
        let conn = Connection::open_in_memory().map_err(query_failed)?;
        conn.execute_batch(&format!(
            "CREATE TABLE {LOG_TABLE} (
                line INTEGER PRIMARY KEY,
                source TEXT NOT NULL,
                level TEXT NOT NULL,
                log_time TEXT,
                text TEXT NOT NULL
            );
            CREATE TABLE {CAPTURE_TABLE} (
                line INTEGER NOT NULL,
                source TEXT NOT NULL,
                level TEXT NOT NULL,
                pattern TEXT NOT NULL,
                text TEXT NOT NULL
            );"
        ))
        .map_err(query_failed)?;
        Ok(Self {
            conn,
            synced_generation: None,
        })
    }

    fn count(&self, table: &str) -> usize {
        self.conn
            .query_row(&format!("SELECT count(*) FROM {table}"), [], |row| row.get::<_, i64>(0))
            .map(|n| n as usize)
            .unwrap_or(0)
    }
}

impl QueryEngine for SqliteEngine {
    fn sync_log(&mut self, aggregator: &LogSourceAggregator) -> SessionResult<()> {
        if self.synced_generation == Some(aggregator.generation()) {
            return Ok(());
        }

        let tx = self.conn.transaction().map_err(query_failed)?;
        tx.execute(&format!("DELETE FROM {LOG_TABLE}"), [])
            .map_err(query_failed)?;
        {
            let mut stmt = tx
                .prepare(&format!(
                    "INSERT INTO {LOG_TABLE} (line, source, level, log_time, text) VALUES (?1, ?2, ?3, ?4, ?5)"
                ))
                .map_err(query_failed)?;
            for (line, record) in aggregator.visible_records().enumerate() {
                let source = aggregator
                    .source(record.source)
                    .map(|s| s.display_name().to_string())
                    .unwrap_or_default();
                let log_time = record
                    .timestamp
                    .map(|ts| ts.format("%Y-%m-%d %H:%M:%S%.3f").to_string());
                stmt.execute(params![
                    line as i64,
                    source,
                    record.level.name(),
                    log_time,
                    record.text
                ])
                .map_err(query_failed)?;
            }
        }
        tx.commit().map_err(query_failed)?;

        self.synced_generation = Some(aggregator.generation());
        debug!("Loaded {} rows into {}", aggregator.visible_len(), LOG_TABLE);
        Ok(())
    }

    fn replace_capture(&mut self, pattern: &str, lines: &[CapturedLine]) -> SessionResult<()> {
        let tx = self.conn.transaction().map_err(query_failed)?;
        tx.execute(&format!("DELETE FROM {CAPTURE_TABLE}"), [])
            .map_err(query_failed)?;
        {
            let mut stmt = tx
                .prepare(&format!(
                    "INSERT INTO {CAPTURE_TABLE} (line, source, level, pattern, text) VALUES (?1, ?2, ?3, ?4, ?5)"
                ))
                .map_err(query_failed)?;
            for captured in lines {
                stmt.execute(params![
                    captured.line as i64,
                    captured.source,
                    captured.level,
                    pattern,
                    captured.text
                ])
                .map_err(query_failed)?;
            }
        }
        tx.commit().map_err(query_failed)?;
        info!("Captured {} lines for '{}'", lines.len(), pattern);
        Ok(())
    }

    fn query(&mut self, sql: &str) -> SessionResult<RowSet> {
        let mut stmt = self.conn.prepare(sql).map_err(query_failed)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let column_count = columns.len();

        let mut result = RowSet {
            columns,
            rows: Vec::new(),
            truncated: false,
        };
        let mut rows = stmt.query([]).map_err(query_failed)?;
        while let Some(row) = rows.next().map_err(query_failed)? {
            if result.rows.len() >= MAX_ROWS {
                result.truncated = true;
                break;
            }
            let mut cells = Vec::with_capacity(column_count);
            for i in 0..column_count {
                cells.push(render_value(row.get_ref(i).map_err(query_failed)?));
            }
            result.rows.push(cells);
        }
        debug!("Query returned {} rows", result.rows.len());
        Ok(result)
    }

    fn schema(&self) -> Vec<String> {
        vec![
            format!(
                "CREATE TABLE {LOG_TABLE} (line INTEGER, source TEXT, level TEXT, log_time TEXT, text TEXT)  -- {} rows",
                self.count(LOG_TABLE)
            ),
            format!(
                "CREATE TABLE {CAPTURE_TABLE} (line INTEGER, source TEXT, level TEXT, pattern TEXT, text TEXT)  -- {} rows",
                self.count(CAPTURE_TABLE)
            ),
        ]
    }
}

fn render_value(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => "NULL".to_string(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(t) => String::from_utf8_lossy(t).into_owned(),
        ValueRef::Blob(b) => format!("<{} bytes>", b.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logsource::{DefaultLineParser, Level, UnknownLevelPolicy};
    use std::io::Write;
    use std::sync::Arc;

    fn captured(line: usize, text: &str) -> CapturedLine {
        CapturedLine {
            line,
            source: "a.log".to_string(),
            level: "error".to_string(),
            text: text.to_string(),
        }
    }

    #[test]
    fn test_log_relation_follows_filters() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.log");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "2024-01-01 00:00:01 INFO a").unwrap();
        writeln!(f, "2024-01-01 00:00:02 ERROR b").unwrap();
        drop(f);

        let mut agg = LogSourceAggregator::new(
            Arc::new(DefaultLineParser::with_year(2024)),
            UnknownLevelPolicy::Lowest,
        );
        agg.add_file(&path).unwrap();
        agg.rebuild_indexes(false);

        let mut engine = SqliteEngine::new().unwrap();
        engine.sync_log(&agg).unwrap();
        let rows = engine.query("SELECT level, source FROM log_lines ORDER BY line").unwrap();
        assert_eq!(rows.columns, vec!["level", "source"]);
        assert_eq!(rows.rows, vec![vec!["info", "a.log"], vec!["error", "a.log"]]);

        agg.set_min_level(Level::Error);
        engine.sync_log(&agg).unwrap();
        let rows = engine.query("SELECT count(*) FROM log_lines").unwrap();
        assert_eq!(rows.rows, vec![vec!["1"]]);
    }

    #[test]
    fn test_capture_is_replaced_each_time() {
        let mut engine = SqliteEngine::new().unwrap();
        engine
            .replace_capture("ERROR", &[captured(1, "ERROR a"), captured(4, "ERROR b")])
            .unwrap();
        engine.replace_capture("timeout", &[captured(9, "timeout")]).unwrap();

        let rows = engine.query("SELECT line, pattern FROM capture").unwrap();
        assert_eq!(rows.rows, vec![vec!["9", "timeout"]]);
        assert!(engine.schema()[1].ends_with("-- 1 rows"));
    }

    #[test]
    fn test_bad_sql_is_query_failure() {
        let mut engine = SqliteEngine::new().unwrap();
        let err = engine.query("SELEC nonsense").unwrap_err();
        assert!(matches!(err, SessionError::QueryFailed(_)));
    }
}
