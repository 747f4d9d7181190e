//! Merged, filtered view over every open log source

use chrono::NaiveDateTime;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::file::LogSource;
use super::filter::{passes, FilterEntry, LevelFilter, LogFilter};
use super::level::{Level, UnknownLevelPolicy};
use super::parser::LineParser;
use super::record::{FileIdentity, LogRecord, SourceId};
use crate::error::{SessionError, SessionResult};

/// Position of a record: index into the source list and line within it
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordRef {
    pub source: usize,
    pub line: usize,
}

/// Ordering key of the time merge: timestamp, then source, then line
type MergeKey = (NaiveDateTime, usize, usize);

/// Outcome of `rebuild_indexes`
#[derive(Debug, Default)]
pub struct RebuildSummary {
    pub new_records: usize,
    /// Sources whose content changed
    pub changed: Vec<SourceId>,
    /// Sources that could not be read this round
    pub errors: Vec<SessionError>,
}

impl RebuildSummary {
    pub fn has_changes(&self) -> bool {
        !self.changed.is_empty()
    }
}

pub struct LogSourceAggregator {
    sources: Vec<LogSource>,
    next_id: u32,
    seq: u64,
    parser: Arc<dyn LineParser>,
    level_filter: LevelFilter,
    filters: Vec<FilterEntry>,
    /// All records in presentation order
    merged: Vec<RecordRef>,
    /// All records in the order they were indexed
    arrival: Vec<RecordRef>,
    /// `merged` after filtering
    visible: Vec<RecordRef>,
    /// Records of each source already placed in `merged`
    indexed: Vec<usize>,
    /// `merged` is in time order rather than arrival order
    time_ordered: bool,
    /// Largest key placed by the time merge
    merged_max: Option<MergeKey>,
    /// Bumped whenever `visible` changes
    generation: u64,
    /// Bumped only when existing rows of `visible` may have moved. Appends
    /// leave it alone.
    layout_generation: u64,
}

impl LogSourceAggregator {
    pub fn new(parser: Arc<dyn LineParser>, policy: UnknownLevelPolicy) -> Self {
        Self {
            sources: Vec::new(),
            next_id: 0,
            seq: 0,
            parser,
            level_filter: LevelFilter::new(Level::Unknown, policy),
            filters: Vec::new(),
            merged: Vec::new(),
            arrival: Vec::new(),
            visible: Vec::new(),
            indexed: Vec::new(),
            time_ordered: true,
            merged_max: None,
            generation: 0,
            layout_generation: 0,
        }
    }

    fn allocate_id(&mut self) -> SourceId {
        let id = SourceId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Start tracking a file. Files are compared by identity, so the same
    /// file reached through another path is rejected.
    pub fn add_file(&mut self, path: &Path) -> SessionResult<SourceId> {
        let unreadable = |e: &dyn std::fmt::Display| SessionError::FileUnreadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        };

        let identity = FileIdentity::of_path(path).map_err(|e| unreadable(&e))?;
        if self.sources.iter().any(|s| s.identity() == Some(identity)) {
            return Err(SessionError::DuplicateFile {
                path: path.to_path_buf(),
            });
        }
        if std::fs::metadata(path).map(|m| m.is_dir()).unwrap_or(false) {
            return Err(unreadable(&"is a directory"));
        }

        let id = self.allocate_id();
        let source = LogSource::open(id, path).map_err(|e| unreadable(&format!("{:#}", e)))?;
        info!("Tracking {} as {} ({})", path.display(), id, identity);
        self.sources.push(source);
        self.indexed.push(0);
        Ok(id)
    }

    /// Create the virtual source for a piped command
    pub fn add_piped(&mut self, command: &str) -> SourceId {
        let id = self.allocate_id();
        self.sources.push(LogSource::piped(id, command));
        self.indexed.push(0);
        id
    }

    /// Feed piped output. Returns the number of new records.
    pub fn append_piped(&mut self, id: SourceId, bytes: &[u8]) -> usize {
        let Some(index) = self.source_index(id) else {
            return 0;
        };
        let parser = Arc::clone(&self.parser);
        let added = self.sources[index].append(bytes, parser.as_ref(), &mut self.seq);
        if added > 0 {
            self.extend_indexes();
        }
        added
    }

    /// Seal a piped source once its output is drained
    pub fn seal_piped(&mut self, id: SourceId, exit_code: Option<i32>) -> usize {
        let Some(index) = self.source_index(id) else {
            return 0;
        };
        let parser = Arc::clone(&self.parser);
        let added = self.sources[index].seal(parser.as_ref(), &mut self.seq, exit_code);
        if added > 0 {
            self.extend_indexes();
        }
        added
    }

    /// Re-scan file sources that grew (every file from scratch with `force`)
    /// and re-derive the merged and visible indexes if anything changed.
    pub fn rebuild_indexes(&mut self, force: bool) -> RebuildSummary {
        let mut summary = RebuildSummary::default();
        let parser = Arc::clone(&self.parser);
        let mut reset = false;

        for source in self.sources.iter_mut().filter(|s| !s.is_pipe()) {
            let before = source.records().len();
            match source.poll_growth(parser.as_ref(), &mut self.seq, force) {
                Ok(added) => {
                    // Truncation or `force` dropped the old records
                    if source.records().len() != before + added {
                        reset = true;
                    }
                    if added > 0 || source.records().len() != before {
                        summary.new_records += added;
                        summary.changed.push(source.id());
                    }
                }
                Err(e) => {
                    warn!("Failed to index {}: {:#}", source.display_name(), e);
                    summary.errors.push(SessionError::FileUnreadable {
                        path: source.path().map(Path::to_path_buf).unwrap_or_default(),
                        reason: format!("{:#}", e),
                    });
                }
            }
        }

        if force || reset {
            self.remerge();
        } else if summary.has_changes() {
            self.extend_indexes();
        }
        if force || summary.has_changes() {
            debug!(
                "Rebuilt indexes: {} new records, {} visible",
                summary.new_records,
                self.visible.len()
            );
        }
        summary
    }

    /// Re-derive presentation order, then visibility
    fn remerge(&mut self) {
        let mut arrival: Vec<(u64, RecordRef)> = Vec::new();
        for (si, source) in self.sources.iter().enumerate() {
            for (li, record) in source.records().iter().enumerate() {
                arrival.push((record.seq, RecordRef { source: si, line: li }));
            }
        }
        arrival.sort_by_key(|(seq, _)| *seq);
        self.arrival = arrival.into_iter().map(|(_, r)| r).collect();

        self.time_ordered = self.sources.iter().all(|s| s.is_fully_timed());
        if self.time_ordered {
            let (merged, max) = self.merge_by_time_from(&vec![0; self.sources.len()]);
            self.merged = merged;
            self.merged_max = max;
        } else {
            self.merged = self.arrival.clone();
            self.merged_max = None;
        }
        self.indexed = self.sources.iter().map(|s| s.records().len()).collect();
        self.refilter();
    }

    /// Place records indexed since the last merge. When they all sort after
    /// everything already merged, only the tail is merged and filtered;
    /// otherwise everything is re-derived.
    fn extend_indexes(&mut self) {
        let mut tail: Vec<(u64, RecordRef)> = Vec::new();
        for (si, source) in self.sources.iter().enumerate() {
            for (li, record) in source.records().iter().enumerate().skip(self.indexed[si]) {
                tail.push((record.seq, RecordRef { source: si, line: li }));
            }
        }
        if tail.is_empty() {
            return;
        }

        let time_ordered = self.sources.iter().all(|s| s.is_fully_timed());
        if time_ordered != self.time_ordered || (time_ordered && !self.tail_follows_merged()) {
            debug!("New records land inside the merged order, re-merging");
            self.remerge();
            return;
        }

        let start = self.merged.len();
        if time_ordered {
            let (merged, max) = self.merge_by_time_from(&self.indexed);
            self.merged.extend(merged);
            self.merged_max = self.merged_max.max(max);
        }
        tail.sort_by_key(|(seq, _)| *seq);
        self.arrival.extend(tail.iter().map(|(_, r)| *r));
        if !time_ordered {
            self.merged.extend(tail.iter().map(|(_, r)| *r));
        }
        for (count, source) in self.indexed.iter_mut().zip(&self.sources) {
            *count = source.records().len();
        }

        let level = self.level_filter;
        let fresh: Vec<RecordRef> = self.merged[start..]
            .iter()
            .copied()
            .filter(|r| passes(&level, &self.filters, &self.sources[r.source].records()[r.line]))
            .collect();
        self.visible.extend(fresh);
        self.generation += 1;
    }

    /// Whether the first unmerged record of every source sorts after the
    /// largest merged key
    fn tail_follows_merged(&self) -> bool {
        let Some(max) = self.merged_max else {
            return true;
        };
        self.sources.iter().enumerate().all(|(si, source)| {
            let li = self.indexed[si];
            match source.records().get(li) {
                Some(record) => record.timestamp.map(|ts| (ts, si, li) > max).unwrap_or(false),
                None => true,
            }
        })
    }

    /// K-way merge by timestamp starting at line `starts[si]` of each
    /// source; each source stays in its own order. Also returns the largest
    /// key placed.
    fn merge_by_time_from(&self, starts: &[usize]) -> (Vec<RecordRef>, Option<MergeKey>) {
        let mut heap = BinaryHeap::new();
        for (si, source) in self.sources.iter().enumerate() {
            let li = starts[si];
            if let Some(ts) = source.records().get(li).and_then(|r| r.timestamp) {
                heap.push(Reverse((ts, si, li)));
            }
        }

        let mut merged = Vec::new();
        let mut max: Option<MergeKey> = None;
        while let Some(Reverse(key)) = heap.pop() {
            let (_, si, li) = key;
            merged.push(RecordRef { source: si, line: li });
            max = max.max(Some(key));
            if let Some(ts) = self.sources[si].records().get(li + 1).and_then(|r| r.timestamp) {
                heap.push(Reverse((ts, si, li + 1)));
            }
        }
        (merged, max)
    }

    /// Re-apply the filters to the merged order
    pub fn refilter(&mut self) {
        let level = self.level_filter;
        let visible: Vec<RecordRef> = self
            .merged
            .iter()
            .copied()
            .filter(|r| passes(&level, &self.filters, &self.sources[r.source].records()[r.line]))
            .collect();
        self.visible = visible;
        self.generation += 1;
        self.layout_generation += 1;
    }

    // ===== Filters =====

    pub fn level_filter(&self) -> &LevelFilter {
        &self.level_filter
    }

    pub fn set_min_level(&mut self, level: Level) {
        if self.level_filter.min_level != level {
            self.level_filter.min_level = level;
            self.refilter();
        }
    }

    pub fn filters(&self) -> &[FilterEntry] {
        &self.filters
    }

    pub fn add_filter(&mut self, filter: Box<dyn LogFilter>) {
        self.filters.push(FilterEntry {
            filter,
            enabled: true,
        });
        self.refilter();
    }

    pub fn set_filter_enabled(&mut self, index: usize, enabled: bool) -> SessionResult<()> {
        let entry = self
            .filters
            .get_mut(index)
            .ok_or_else(|| SessionError::CommandFailed(format!("no filter #{}", index + 1)))?;
        if entry.enabled != enabled {
            entry.enabled = enabled;
            self.refilter();
        }
        Ok(())
    }

    pub fn delete_filter(&mut self, index: usize) -> SessionResult<()> {
        if index >= self.filters.len() {
            return Err(SessionError::CommandFailed(format!("no filter #{}", index + 1)));
        }
        self.filters.remove(index);
        self.refilter();
        Ok(())
    }

    pub fn clear_filters(&mut self) {
        self.filters.clear();
        self.refilter();
    }

    /// Commands that recreate the active filters
    pub fn filter_commands(&self) -> Vec<String> {
        let mut commands = Vec::new();
        if self.level_filter.is_active() {
            commands.push(self.level_filter.describe());
        }
        commands.extend(
            self.filters
                .iter()
                .filter(|e| e.enabled)
                .map(|e| e.filter.describe()),
        );
        commands
    }

    // ===== Access =====

    pub fn sources(&self) -> &[LogSource] {
        &self.sources
    }

    pub fn source_index(&self, id: SourceId) -> Option<usize> {
        self.sources.iter().position(|s| s.id() == id)
    }

    pub fn source(&self, id: SourceId) -> Option<&LogSource> {
        self.sources.iter().find(|s| s.id() == id)
    }

    pub fn source_mut(&mut self, id: SourceId) -> Option<&mut LogSource> {
        self.sources.iter_mut().find(|s| s.id() == id)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Changes only when rows already in the visible order may have moved
    pub fn layout_generation(&self) -> u64 {
        self.layout_generation
    }

    fn resolve(&self, r: RecordRef) -> &LogRecord {
        &self.sources[r.source].records()[r.line]
    }

    pub fn visible_len(&self) -> usize {
        self.visible.len()
    }

    pub fn visible_ref(&self, index: usize) -> Option<RecordRef> {
        self.visible.get(index).copied()
    }

    pub fn visible_record(&self, index: usize) -> Option<&LogRecord> {
        self.visible.get(index).map(|r| self.resolve(*r))
    }

    pub fn visible_records(&self) -> impl Iterator<Item = &LogRecord> {
        self.visible.iter().map(|r| self.resolve(*r))
    }

    pub fn visible_lines(&self) -> Vec<String> {
        self.visible_records().map(|r| r.text.clone()).collect()
    }

    /// Unfiltered records in arrival order
    pub fn raw_len(&self) -> usize {
        self.arrival.len()
    }

    pub fn raw_lines(&self) -> Vec<String> {
        self.arrival.iter().map(|r| self.resolve(*r).text.clone()).collect()
    }

    /// Visible line showing exactly this record
    pub fn visible_index_of(&self, r: RecordRef) -> Option<usize> {
        self.visible.iter().position(|v| *v == r)
    }

    /// Earliest and latest timestamp among `count` visible lines from `start`
    pub fn visible_time_range(&self, start: usize, count: usize) -> Option<(NaiveDateTime, NaiveDateTime)> {
        let end = start.saturating_add(count).min(self.visible.len());
        let mut stamps = self
            .visible
            .get(start..end)?
            .iter()
            .filter_map(|r| self.resolve(*r).timestamp);
        let first = stamps.next()?;
        Some(stamps.fold((first, first), |(lo, hi), ts| (lo.min(ts), hi.max(ts))))
    }

    /// Visible line showing `line` of `source`, or the nearest visible line
    /// after it
    pub fn find_visible(&self, source: SourceId, line: usize) -> Option<usize> {
        let si = self.source_index(source)?;
        let target = self.sources[si].records().get(line)?;
        let exact = self.visible.iter().position(|r| r.source == si && r.line == line);
        exact.or_else(|| {
            self.visible_records()
                .position(|r| r.source == source && r.seq >= target.seq)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logsource::{DefaultLineParser, FilterKind, PatternFilter};
    use std::io::Write;

    fn aggregator() -> LogSourceAggregator {
        LogSourceAggregator::new(
            Arc::new(DefaultLineParser::with_year(2024)),
            UnknownLevelPolicy::Lowest,
        )
    }

    fn log_file(dir: &Path, name: &str, lines: &[&str]) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        for line in lines {
            writeln!(f, "{}", line).unwrap();
        }
        path
    }

    #[test]
    fn test_duplicate_by_identity() {
        let dir = tempfile::tempdir().unwrap();
        let path = log_file(dir.path(), "a.log", &["x"]);
        let link = dir.path().join("link.log");
        std::os::unix::fs::symlink(&path, &link).unwrap();

        let mut agg = aggregator();
        agg.add_file(&path).unwrap();
        assert!(matches!(agg.add_file(&path), Err(SessionError::DuplicateFile { .. })));
        assert!(matches!(agg.add_file(&link), Err(SessionError::DuplicateFile { .. })));
        assert_eq!(agg.sources().len(), 1);
    }

    #[test]
    fn test_missing_file_is_unreadable() {
        let mut agg = aggregator();
        let err = agg.add_file(Path::new("/nonexistent/x.log")).unwrap_err();
        assert!(matches!(err, SessionError::FileUnreadable { .. }));
    }

    #[test]
    fn test_rebuild_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = log_file(dir.path(), "a.log", &["2024-01-01 00:00:00 INFO a"]);
        let mut agg = aggregator();
        agg.add_file(&path).unwrap();

        let first = agg.rebuild_indexes(false);
        assert_eq!(first.new_records, 1);
        let second = agg.rebuild_indexes(false);
        assert_eq!(second.new_records, 0);
        assert!(!second.has_changes());
        assert_eq!(agg.visible_len(), 1);
    }

    #[test]
    fn test_merge_by_timestamp_keeps_file_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = log_file(
            dir.path(),
            "a.log",
            &["2024-01-01 00:00:01 INFO a1", "2024-01-01 00:00:03 INFO a2"],
        );
        let b = log_file(
            dir.path(),
            "b.log",
            &["2024-01-01 00:00:02 INFO b1", "2024-01-01 00:00:00 INFO b2"],
        );
        let mut agg = aggregator();
        agg.add_file(&a).unwrap();
        agg.add_file(&b).unwrap();
        agg.rebuild_indexes(false);

        let lines: Vec<String> = agg
            .visible_lines()
            .iter()
            .map(|l| l.rsplit(' ').next().unwrap().to_string())
            .collect();
        // b2 is out of order inside b.log, so it stays behind b1
        assert_eq!(lines, vec!["a1", "b1", "b2", "a2"]);
    }

    #[test]
    fn test_untimed_falls_back_to_arrival() {
        let dir = tempfile::tempdir().unwrap();
        let a = log_file(dir.path(), "a.log", &["2024-01-01 00:00:05 INFO a1"]);
        let b = log_file(dir.path(), "b.log", &["plain b1"]);
        let mut agg = aggregator();
        agg.add_file(&a).unwrap();
        agg.add_file(&b).unwrap();
        agg.rebuild_indexes(false);
        assert_eq!(agg.visible_lines(), vec!["2024-01-01 00:00:05 INFO a1", "plain b1"]);
    }

    #[test]
    fn test_level_and_pattern_filters() {
        let dir = tempfile::tempdir().unwrap();
        let a = log_file(
            dir.path(),
            "a.log",
            &[
                "2024-01-01 00:00:01 INFO db ok",
                "2024-01-01 00:00:02 WARNING db slow",
                "2024-01-01 00:00:03 ERROR http down",
            ],
        );
        let mut agg = aggregator();
        agg.add_file(&a).unwrap();
        agg.rebuild_indexes(false);

        agg.set_min_level(Level::Warning);
        assert_eq!(agg.visible_len(), 2);

        agg.add_filter(Box::new(PatternFilter::new(FilterKind::Include, "db").unwrap()));
        assert_eq!(agg.visible_lines(), vec!["2024-01-01 00:00:02 WARNING db slow"]);

        agg.set_filter_enabled(0, false).unwrap();
        assert_eq!(agg.visible_len(), 2);
        assert!(agg.set_filter_enabled(5, true).is_err());

        assert_eq!(agg.filter_commands(), vec!["set-min-log-level warning"]);
        agg.clear_filters();
        agg.set_min_level(Level::Unknown);
        assert_eq!(agg.visible_len(), 3);
    }

    #[test]
    fn test_piped_source_feeds_view() {
        let mut agg = aggregator();
        let id = agg.add_piped("make");
        assert_eq!(agg.append_piped(id, b"building\nlinking"), 1);
        assert_eq!(agg.visible_len(), 1);
        assert_eq!(agg.seal_piped(id, Some(0)), 1);
        assert_eq!(agg.raw_lines(), vec!["building", "linking"]);
        assert!(agg.source(id).unwrap().is_sealed());
    }

    #[test]
    fn test_find_visible_falls_forward() {
        let dir = tempfile::tempdir().unwrap();
        let a = log_file(
            dir.path(),
            "a.log",
            &[
                "2024-01-01 00:00:01 DEBUG a",
                "2024-01-01 00:00:02 ERROR b",
            ],
        );
        let mut agg = aggregator();
        let id = agg.add_file(&a).unwrap();
        agg.rebuild_indexes(false);
        agg.set_min_level(Level::Error);
        assert_eq!(agg.find_visible(id, 0), Some(0));
        assert_eq!(agg.find_visible(id, 1), Some(0));
    }

    #[test]
    fn test_in_order_growth_extends_without_moving_rows() {
        let dir = tempfile::tempdir().unwrap();
        let a = log_file(dir.path(), "a.log", &["2024-01-01 00:00:01 INFO a1"]);
        let b = log_file(dir.path(), "b.log", &["2024-01-01 00:00:02 ERROR b1"]);
        let mut agg = aggregator();
        agg.add_file(&a).unwrap();
        agg.add_file(&b).unwrap();
        agg.rebuild_indexes(false);
        agg.set_min_level(Level::Info);
        let layout = agg.layout_generation();
        let generation = agg.generation();

        let mut f = std::fs::OpenOptions::new().append(true).open(&a).unwrap();
        writeln!(f, "2024-01-01 00:00:03 INFO a2").unwrap();
        writeln!(f, "2024-01-01 00:00:04 DEBUG a3").unwrap();
        agg.rebuild_indexes(false);

        assert_eq!(agg.layout_generation(), layout);
        assert!(agg.generation() > generation);
        assert_eq!(
            agg.visible_lines(),
            vec![
                "2024-01-01 00:00:01 INFO a1",
                "2024-01-01 00:00:02 ERROR b1",
                "2024-01-01 00:00:03 INFO a2",
            ]
        );
        assert_eq!(agg.raw_len(), 4);
    }

    #[test]
    fn test_out_of_order_growth_remerges() {
        let dir = tempfile::tempdir().unwrap();
        let a = log_file(
            dir.path(),
            "a.log",
            &["2024-01-01 00:00:01 INFO a1", "2024-01-01 00:00:05 ERROR a2"],
        );
        let b = log_file(dir.path(), "b.log", &["2024-01-01 00:00:00 INFO b1"]);
        let mut agg = aggregator();
        agg.add_file(&a).unwrap();
        agg.add_file(&b).unwrap();
        agg.rebuild_indexes(false);
        let layout = agg.layout_generation();

        let mut f = std::fs::OpenOptions::new().append(true).open(&b).unwrap();
        writeln!(f, "2024-01-01 00:00:02 INFO b2").unwrap();
        agg.rebuild_indexes(false);

        assert!(agg.layout_generation() > layout);
        let order: Vec<String> = agg
            .visible_lines()
            .iter()
            .map(|l| l.rsplit(' ').next().unwrap().to_string())
            .collect();
        assert_eq!(order, vec!["b1", "a1", "b2", "a2"]);
    }

    #[test]
    fn test_chunked_pipe_matches_full_merge() {
        let mut agg = aggregator();
        let id = agg.add_piped("gen");
        let mut text = String::new();
        for i in 0..500 {
            let level = if i % 3 == 0 { "ERROR" } else { "INFO" };
            text.push_str(&format!("2024-01-01 00:{:02}:{:02} {} line {}\n", i / 60, i % 60, level, i));
        }
        agg.set_min_level(Level::Error);
        for chunk in text.as_bytes().chunks(97) {
            agg.append_piped(id, chunk);
        }
        let incremental = agg.visible_lines();
        let layout = agg.layout_generation();

        agg.remerge();
        assert!(agg.layout_generation() > layout);
        assert_eq!(agg.visible_lines(), incremental);
        assert_eq!(incremental.len(), 167);
    }

    #[test]
    fn test_untimed_growth_appends_in_arrival_order() {
        let mut agg = aggregator();
        let id = agg.add_piped("make");
        agg.append_piped(id, b"compiling a\n");
        let layout = agg.layout_generation();
        agg.append_piped(id, b"2024-01-01 00:00:00 INFO linked\n");
        assert_eq!(agg.layout_generation(), layout);
        assert_eq!(agg.visible_lines(), vec!["compiling a", "2024-01-01 00:00:00 INFO linked"]);
    }

    #[test]
    fn test_visible_time_range_and_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let a = log_file(
            dir.path(),
            "a.log",
            &[
                "2024-01-01 00:00:01 INFO a",
                "2024-01-01 00:00:09 INFO b",
                "2024-01-01 00:00:04 INFO c",
            ],
        );
        let mut agg = aggregator();
        agg.add_file(&a).unwrap();
        agg.rebuild_indexes(false);

        let (lo, hi) = agg.visible_time_range(1, 10).unwrap();
        assert_eq!(lo.format("%H:%M:%S").to_string(), "00:00:04");
        assert_eq!(hi.format("%H:%M:%S").to_string(), "00:00:09");
        assert!(agg.visible_time_range(5, 2).is_none());
        assert_eq!(agg.visible_index_of(RecordRef { source: 0, line: 2 }), Some(2));
        assert_eq!(agg.visible_index_of(RecordRef { source: 1, line: 0 }), None);
    }
}
