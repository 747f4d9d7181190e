pub mod app;
pub mod error;
pub mod logsource;
pub mod multiplexer;
pub mod process;
pub mod query;
pub mod store;
pub mod ui;
