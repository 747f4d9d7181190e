//! Time-bucketed record counts for the histogram view

use chrono::{DateTime, NaiveDateTime};
use std::collections::BTreeMap;

use super::aggregator::LogSourceAggregator;
use super::level::Level;

/// Bucket widths in seconds, coarsest first
pub const ZOOM_LEVELS: [(i64, &str); 5] = [
    (86_400, "1 day"),
    (14_400, "4 hours"),
    (3_600, "1 hour"),
    (600, "10 minutes"),
    (60, "1 minute"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
    pub start: i64,
    pub counts: [usize; Level::COUNT],
}

impl Bucket {
    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }

    fn count(&self, level: Level) -> usize {
        self.counts[level.index()]
    }
}

#[derive(Debug, Clone, Default)]
pub struct Histogram {
    pub width_secs: i64,
    pub buckets: Vec<Bucket>,
}

impl Histogram {
    /// Count the visible records with a timestamp
    pub fn build(aggregator: &LogSourceAggregator, zoom: usize) -> Self {
        let (width_secs, _) = ZOOM_LEVELS[zoom.min(ZOOM_LEVELS.len() - 1)];
        let mut buckets: BTreeMap<i64, [usize; Level::COUNT]> = BTreeMap::new();

        for record in aggregator.visible_records() {
            let Some(ts) = record.timestamp else {
                continue;
            };
            let secs = ts.and_utc().timestamp();
            let start = secs - secs.rem_euclid(width_secs);
            buckets.entry(start).or_insert([0; Level::COUNT])[record.level.index()] += 1;
        }

        Self {
            width_secs,
            buckets: buckets
                .into_iter()
                .map(|(start, counts)| Bucket { start, counts })
                .collect(),
        }
    }

    /// One text line per bucket
    pub fn lines(&self) -> Vec<String> {
        let peak = self.buckets.iter().map(Bucket::total).max().unwrap_or(0).max(1);
        self.buckets
            .iter()
            .map(|b| {
                let bar_len = (b.total() * 40).div_ceil(peak);
                format!(
                    "{}  {:<40}  total={} warning={} error={}",
                    format_bucket_start(b.start),
                    "#".repeat(bar_len),
                    b.total(),
                    b.count(Level::Warning),
                    b.count(Level::Error) + b.count(Level::Critical) + b.count(Level::Fatal),
                )
            })
            .collect()
    }
}

fn format_bucket_start(secs: i64) -> String {
    DateTime::from_timestamp(secs, 0)
        .map(|dt| dt.naive_utc())
        .map(|dt: NaiveDateTime| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| secs.to_string())
}

/// Per-level totals as text bars, used by the graph view
pub fn level_totals(aggregator: &LogSourceAggregator) -> Vec<String> {
    let mut totals = [0usize; Level::COUNT];
    for record in aggregator.visible_records() {
        totals[record.level.index()] += 1;
    }
    let peak = totals.iter().copied().max().unwrap_or(0).max(1);
    Level::ALL
        .iter()
        .map(|level| {
            let count = totals[level.index()];
            format!(
                "{:<9} {:>8} {}",
                level.name(),
                count,
                "#".repeat((count * 50).div_ceil(peak))
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logsource::{DefaultLineParser, UnknownLevelPolicy};
    use std::io::Write;
    use std::sync::Arc;

    #[test]
    fn test_buckets_by_zoom() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.log");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "2024-01-01 10:00:10 INFO a").unwrap();
        writeln!(f, "2024-01-01 10:00:50 ERROR b").unwrap();
        writeln!(f, "2024-01-01 10:05:00 WARNING c").unwrap();
        drop(f);

        let mut agg = LogSourceAggregator::new(
            Arc::new(DefaultLineParser::with_year(2024)),
            UnknownLevelPolicy::Lowest,
        );
        agg.add_file(&path).unwrap();
        agg.rebuild_indexes(false);

        let minute = Histogram::build(&agg, 4);
        assert_eq!(minute.buckets.len(), 2);
        assert_eq!(minute.buckets[0].total(), 2);
        assert_eq!(minute.buckets[0].count(Level::Error), 1);

        let hour = Histogram::build(&agg, 2);
        assert_eq!(hour.buckets.len(), 1);
        assert!(hour.lines()[0].starts_with("2024-01-01 10:00"));
        assert!(hour.lines()[0].contains("total=3 warning=1 error=1"));

        let totals = level_totals(&agg);
        assert!(totals[Level::Error.index()].starts_with("error"));
    }
}
