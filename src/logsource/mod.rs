//! Log sources: indexing, severity classification and filtering
//!
//! Files (and piped command output) are indexed line by line into
//! `LogRecord`s, merged into one presentation order and filtered for display.

pub mod aggregator;
pub mod file;
pub mod filter;
pub mod histogram;
pub mod level;
pub mod parser;
pub mod record;

pub use aggregator::{LogSourceAggregator, RebuildSummary, RecordRef};
pub use file::{LogSource, SourceOrigin};
pub use filter::{FilterKind, LevelFilter, LogFilter, PatternFilter};
pub use histogram::Histogram;
pub use level::{Level, UnknownLevelPolicy};
pub use parser::{DefaultLineParser, LineParser, ParsedLine};
pub use record::{FileIdentity, LogRecord, SourceId};
