//! Session data model.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Who authored a transcript message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// One transcript entry. User messages carry a plain string; assistant
/// messages carry the content blocks of the event they came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Value,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Value::String(content.into()),
        }
    }

    pub fn assistant(content: Value) -> Self {
        Self {
            role: Role::Assistant,
            content,
        }
    }

    /// Plain-text view of the content, if there is one.
    pub fn text(&self) -> Option<&str> {
        self.content.as_str()
    }
}

/// Persisted session record, one JSON file per session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub title: String,
    /// Data directories the session was created with.
    pub directories: Vec<String>,
    /// RFC 3339 timestamps.
    pub created_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub messages: Vec<Message>,
}

/// Listing view of a session record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub title: String,
    pub created_at: String,
    pub updated_at: String,
    pub message_count: usize,
}

impl SessionRecord {
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.session_id.clone(),
            title: self.title.clone(),
            created_at: self.created_at.clone(),
            updated_at: self.updated_at.clone(),
            message_count: self.messages.len(),
        }
    }
}

/// Lifecycle state of a session worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Starting,
    Connecting,
    Connected,
    Processing,
    Disconnecting,
    Stopped,
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Starting => "starting",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Processing => "processing",
            Self::Disconnecting => "disconnecting",
            Self::Stopped => "stopped",
        };
        write!(f, "{}", s)
    }
}
