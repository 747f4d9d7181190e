//! Session persistence
//!
//! One JSON file per set of open files, named after a UUIDv5 of the sorted
//! canonical paths, so reopening the same files finds the same session.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{SessionError, SessionResult};
use crate::logsource::FileIdentity;

/// Saved state of one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionFile {
    pub identity: FileIdentity,
    /// Start time of the file's content when saved (unix seconds)
    pub start_time: i64,
    pub display_name: String,
    pub path: PathBuf,
    /// Last viewed line within the file
    pub cursor: usize,
    /// The log view was positioned in this file
    #[serde(default)]
    pub focused: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub loaded_at: Option<DateTime<Utc>>,
    pub saved_at: Option<DateTime<Utc>>,
    pub files: Vec<SessionFile>,
    /// Commands that recreate the filters
    #[serde(default)]
    pub commands: Vec<String>,
    /// Last search pattern per view name
    #[serde(default)]
    pub searches: BTreeMap<String, String>,
    /// Focused view when saved
    #[serde(default)]
    pub top_view: Option<String>,
}

impl SessionRecord {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            loaded_at: None,
            saved_at: None,
            files: Vec::new(),
            commands: Vec::new(),
            searches: BTreeMap::new(),
            top_view: None,
        }
    }

    pub fn file(&self, identity: FileIdentity) -> Option<&SessionFile> {
        self.files.iter().find(|f| f.identity == identity)
    }
}

/// Decide whether a saved entry still describes the live file.
/// Returns the saved cursor when identity and start time both match.
pub fn reattach(saved: &SessionFile, identity: FileIdentity, start_time: i64) -> SessionResult<usize> {
    if saved.identity == identity && saved.start_time == start_time {
        Ok(saved.cursor)
    } else {
        Err(SessionError::SessionMismatch {
            display_name: saved.display_name.clone(),
        })
    }
}

pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// `<data dir>/sessions`
    pub fn default_dir() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("", "", "logscope")
            .ok_or_else(|| anyhow::anyhow!("Failed to determine data directory"))?;
        Ok(dirs.data_dir().join("sessions"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Session id for a set of files, independent of order and spelling
    pub fn session_id(paths: &[PathBuf]) -> Uuid {
        let mut canonical: Vec<String> = paths
            .iter()
            .map(|p| {
                std::fs::canonicalize(p)
                    .unwrap_or_else(|_| p.clone())
                    .to_string_lossy()
                    .to_string()
            })
            .collect();
        canonical.sort();
        canonical.dedup();
        Uuid::new_v5(&Uuid::NAMESPACE_URL, canonical.join("\n").as_bytes())
    }

    fn path_for(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    /// Load a saved session, stamping its load time
    pub fn load(&self, id: Uuid) -> Result<Option<SessionRecord>> {
        let path = self.path_for(id);
        if !path.exists() {
            debug!("No saved session at {}", path.display());
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut record: SessionRecord =
            serde_json::from_str(&content).context("Failed to parse session")?;
        record.loaded_at = Some(Utc::now());
        info!("Loaded session {} ({} files)", id, record.files.len());
        Ok(Some(record))
    }

    /// Write a session, stamping its save time
    pub fn save(&self, record: &mut SessionRecord) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;
        record.saved_at = Some(Utc::now());
        let path = self.path_for(record.id);
        let json = serde_json::to_string_pretty(record).context("Failed to serialize session")?;
        std::fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Saved session {} to {}", record.id, path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(ino: u64) -> FileIdentity {
        FileIdentity { dev: 1, ino }
    }

    fn saved(ino: u64, start_time: i64, cursor: usize) -> SessionFile {
        SessionFile {
            identity: identity(ino),
            start_time,
            display_name: "app.log".to_string(),
            path: PathBuf::from("/var/log/app.log"),
            cursor,
            focused: true,
        }
    }

    #[test]
    fn test_reattach_requires_identity_and_start_time() {
        assert_eq!(reattach(&saved(7, 100, 42), identity(7), 100).unwrap(), 42);
        assert!(matches!(
            reattach(&saved(7, 100, 42), identity(7), 200),
            Err(SessionError::SessionMismatch { .. })
        ));
        assert!(reattach(&saved(7, 100, 42), identity(8), 100).is_err());
    }

    #[test]
    fn test_session_id_ignores_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.log");
        let b = dir.path().join("b.log");
        std::fs::write(&a, "").unwrap();
        std::fs::write(&b, "").unwrap();
        assert_eq!(
            SessionStore::session_id(&[a.clone(), b.clone()]),
            SessionStore::session_id(&[b.clone(), a.clone()])
        );
        assert_ne!(SessionStore::session_id(&[a]), SessionStore::session_id(&[b]));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("sessions"));
        let id = Uuid::new_v5(&Uuid::NAMESPACE_URL, b"test");

        assert!(store.load(id).unwrap().is_none());

        let mut record = SessionRecord::new(id);
        record.files.push(saved(3, 10, 5));
        record.commands.push("set-min-log-level warning".to_string());
        record.searches.insert("log".to_string(), "ERROR".to_string());
        store.save(&mut record).unwrap();
        assert!(record.saved_at.is_some());

        let loaded = store.load(id).unwrap().unwrap();
        assert!(loaded.loaded_at.is_some());
        assert_eq!(loaded.files, record.files);
        assert_eq!(loaded.file(identity(3)).unwrap().cursor, 5);
        assert_eq!(loaded.searches.get("log").map(String::as_str), Some("ERROR"));
    }
}
