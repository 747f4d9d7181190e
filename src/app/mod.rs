pub mod commands;
pub mod config;
pub mod events;
pub mod mode;
pub mod session;
pub mod views;

pub use commands::{Command, CommandExecutor, NoExternalCommands};
pub use config::Config;
pub use events::Action;
pub use mode::{EditOutcome, LineEditor, Mode, ModeMachine};
pub use session::{RestoreSummary, Session, SessionOptions, StatusMessage};
pub use views::{ViewDescriptor, ViewKind, ViewStack, Views};
