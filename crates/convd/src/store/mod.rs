//! Session store: disk-backed JSON records.
//!
//! Layout under the sessions root:
//! - `<session_id>.json` -- the transcript record
//! - `<session_id>/`     -- the session's working directory

use std::path::{Path, PathBuf};

use chrono::Utc;
use log::warn;
use thiserror::Error;
use tokio::fs;

use crate::session::models::{Message, Role, SessionRecord, SessionSummary};

/// Default title prefix until the first real user message sets one.
pub const DEFAULT_TITLE_PREFIX: &str = "Conversion - ";
/// Canned kickoff message sent by the desktop client; never used as a title.
const KICKOFF_PREFIX: &str = "I'd like to convert";
/// Maximum derived title length in characters.
const TITLE_MAX_CHARS: usize = 60;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session not found: {0}")]
    NotFound(String),

    #[error("session already exists: {0}")]
    AlreadyExists(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Disk-backed session store.
#[derive(Debug, Clone)]
pub struct SessionStore {
    base_dir: PathBuf,
}

impl SessionStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Ensure the sessions root exists.
    pub async fn ensure_base(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.base_dir).await?;
        Ok(())
    }

    fn record_path(&self, session_id: &str) -> PathBuf {
        self.base_dir.join(format!("{}.json", session_id))
    }

    /// Working directory for a session (the engine's cwd).
    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.base_dir.join(session_id)
    }

    /// Write the initial record for a new session.
    pub async fn create_record(&self, record: &SessionRecord) -> Result<(), StoreError> {
        self.ensure_base().await?;
        let path = self.record_path(&record.session_id);
        if fs::try_exists(&path).await? {
            return Err(StoreError::AlreadyExists(record.session_id.clone()));
        }
        self.write_record(&path, record).await
    }

    /// Append one message to a session's transcript.
    ///
    /// Also derives the title from the first real user message while the
    /// record still carries the default title, and bumps `updated_at`.
    pub async fn append_message(
        &self,
        session_id: &str,
        message: Message,
    ) -> Result<(), StoreError> {
        let path = self.record_path(session_id);
        let mut record = match self.read_record(&path).await? {
            Some(record) => record,
            None => return Err(StoreError::NotFound(session_id.to_string())),
        };

        if message.role == Role::User && record.title.starts_with(DEFAULT_TITLE_PREFIX) {
            if let Some(title) = message.text().and_then(derive_title) {
                record.title = title;
            }
        }

        record.messages.push(message);
        record.updated_at = Utc::now().to_rfc3339();
        self.write_record(&path, &record).await
    }

    /// Load a session's record, if one exists.
    pub async fn get_history(&self, session_id: &str) -> Result<Option<SessionRecord>, StoreError> {
        let path = self.record_path(session_id);
        self.read_record(&path).await
    }

    /// List all session summaries, most recently updated first.
    ///
    /// Unreadable records are skipped so one corrupt file does not hide
    /// the rest.
    pub async fn list_sessions(&self) -> Result<Vec<SessionSummary>, StoreError> {
        if !fs::try_exists(&self.base_dir).await? {
            return Ok(Vec::new());
        }

        let mut summaries = Vec::new();
        let mut entries = fs::read_dir(&self.base_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match self.read_record(&path).await {
                Ok(Some(record)) => summaries.push(record.summary()),
                Ok(None) => {}
                Err(e) => {
                    warn!("Skipping unreadable session record {}: {:?}", path.display(), e);
                }
            }
        }

        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    /// Delete a session's record and working directory.
    ///
    /// Returns whether anything was actually removed.
    pub async fn delete_record(&self, session_id: &str) -> Result<bool, StoreError> {
        let mut removed = false;

        let path = self.record_path(session_id);
        if fs::try_exists(&path).await? {
            fs::remove_file(&path).await?;
            removed = true;
        }

        let dir = self.session_dir(session_id);
        if fs::try_exists(&dir).await? {
            fs::remove_dir_all(&dir).await?;
            removed = true;
        }

        Ok(removed)
    }

    async fn read_record(&self, path: &Path) -> Result<Option<SessionRecord>, StoreError> {
        match fs::read_to_string(path).await {
            Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_record(&self, path: &Path, record: &SessionRecord) -> Result<(), StoreError> {
        let contents = serde_json::to_string_pretty(record)?;
        fs::write(path, contents).await?;
        Ok(())
    }
}

/// Build a new session record with the default title.
pub fn new_record(session_id: &str, slug: &str, directories: Vec<String>) -> SessionRecord {
    let now = Utc::now().to_rfc3339();
    SessionRecord {
        session_id: session_id.to_string(),
        title: format!("{}{}", DEFAULT_TITLE_PREFIX, slug),
        directories,
        created_at: now.clone(),
        updated_at: now,
        messages: Vec::new(),
    }
}

/// Derive a session title from a user message.
///
/// First line only, capped at 60 characters, skipping the canned kickoff
/// message the client sends on behalf of the user.
fn derive_title(text: &str) -> Option<String> {
    let first_line = text.lines().next()?.trim();
    if first_line.is_empty() || first_line.starts_with(KICKOFF_PREFIX) {
        return None;
    }
    Some(first_line.chars().take(TITLE_MAX_CHARS).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (TempDir, SessionStore) {
        let temp = TempDir::new().unwrap();
        let store = SessionStore::new(temp.path());
        (temp, store)
    }

    fn record(id: &str) -> SessionRecord {
        new_record(id, "ephys-data", vec!["/data/ephys".to_string()])
    }

    #[tokio::test]
    async fn test_create_and_get_round_trip() {
        let (_temp, store) = create_test_store();
        store.create_record(&record("s1")).await.unwrap();

        let loaded = store.get_history("s1").await.unwrap().unwrap();
        assert_eq!(loaded.session_id, "s1");
        assert_eq!(loaded.title, "Conversion - ephys-data");
        assert_eq!(loaded.directories, vec!["/data/ephys".to_string()]);
        assert!(loaded.messages.is_empty());
    }

    #[tokio::test]
    async fn test_create_twice_fails() {
        let (_temp, store) = create_test_store();
        store.create_record(&record("s1")).await.unwrap();
        let err = store.create_record(&record("s1")).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let (_temp, store) = create_test_store();
        assert!(store.get_history("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_append_to_missing_session_fails() {
        let (_temp, store) = create_test_store();
        let err = store
            .append_message("nope", Message::user("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_append_preserves_order() {
        let (_temp, store) = create_test_store();
        store.create_record(&record("s1")).await.unwrap();

        store.append_message("s1", Message::user("first")).await.unwrap();
        store
            .append_message("s1", Message::assistant(serde_json::json!([{"type":"text","text":"ok"}])))
            .await
            .unwrap();
        store.append_message("s1", Message::user("second")).await.unwrap();

        let loaded = store.get_history("s1").await.unwrap().unwrap();
        assert_eq!(loaded.messages.len(), 3);
        assert_eq!(loaded.messages[0].text(), Some("first"));
        assert_eq!(loaded.messages[2].text(), Some("second"));
    }

    #[tokio::test]
    async fn test_title_derived_from_first_user_message() {
        let (_temp, store) = create_test_store();
        store.create_record(&record("s1")).await.unwrap();

        store
            .append_message("s1", Message::user("Map the probe geometry\nand more"))
            .await
            .unwrap();
        let loaded = store.get_history("s1").await.unwrap().unwrap();
        assert_eq!(loaded.title, "Map the probe geometry");

        // A later message must not overwrite the derived title
        store
            .append_message("s1", Message::user("Something else entirely"))
            .await
            .unwrap();
        let loaded = store.get_history("s1").await.unwrap().unwrap();
        assert_eq!(loaded.title, "Map the probe geometry");
    }

    #[tokio::test]
    async fn test_kickoff_message_keeps_default_title() {
        let (_temp, store) = create_test_store();
        store.create_record(&record("s1")).await.unwrap();

        store
            .append_message("s1", Message::user("I'd like to convert my recordings"))
            .await
            .unwrap();
        let loaded = store.get_history("s1").await.unwrap().unwrap();
        assert_eq!(loaded.title, "Conversion - ephys-data");

        // The next real message still gets to set the title
        store
            .append_message("s1", Message::user("Fix the electrode table"))
            .await
            .unwrap();
        let loaded = store.get_history("s1").await.unwrap().unwrap();
        assert_eq!(loaded.title, "Fix the electrode table");
    }

    #[tokio::test]
    async fn test_title_truncated_to_sixty_chars() {
        let (_temp, store) = create_test_store();
        store.create_record(&record("s1")).await.unwrap();

        let long = "x".repeat(200);
        store.append_message("s1", Message::user(long)).await.unwrap();
        let loaded = store.get_history("s1").await.unwrap().unwrap();
        assert_eq!(loaded.title.chars().count(), 60);
    }

    #[tokio::test]
    async fn test_assistant_message_never_sets_title() {
        let (_temp, store) = create_test_store();
        store.create_record(&record("s1")).await.unwrap();

        store
            .append_message("s1", Message::assistant(serde_json::json!("hello")))
            .await
            .unwrap();
        let loaded = store.get_history("s1").await.unwrap().unwrap();
        assert_eq!(loaded.title, "Conversion - ephys-data");
    }

    #[tokio::test]
    async fn test_list_sorted_by_updated_at() {
        let (_temp, store) = create_test_store();

        let mut older = record("older");
        older.created_at = "2026-01-01T00:00:00Z".to_string();
        older.updated_at = "2026-01-01T00:00:00Z".to_string();
        let mut newer = record("newer");
        newer.created_at = "2026-02-01T00:00:00Z".to_string();
        newer.updated_at = "2026-02-01T00:00:00Z".to_string();

        store.create_record(&older).await.unwrap();
        store.create_record(&newer).await.unwrap();

        let sessions = store.list_sessions().await.unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].session_id, "newer");
        assert_eq!(sessions[1].session_id, "older");
    }

    #[tokio::test]
    async fn test_list_skips_corrupt_records() {
        let (temp, store) = create_test_store();
        store.create_record(&record("good")).await.unwrap();
        std::fs::write(temp.path().join("bad.json"), "{ not json").unwrap();

        let sessions = store.list_sessions().await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].session_id, "good");
    }

    #[tokio::test]
    async fn test_delete_removes_record_and_work_dir() {
        let (temp, store) = create_test_store();
        store.create_record(&record("s1")).await.unwrap();
        std::fs::create_dir_all(store.session_dir("s1").join("workspace")).unwrap();

        assert!(store.delete_record("s1").await.unwrap());
        assert!(store.get_history("s1").await.unwrap().is_none());
        assert!(!temp.path().join("s1").exists());

        // Second delete finds nothing
        assert!(!store.delete_record("s1").await.unwrap());
    }
}
