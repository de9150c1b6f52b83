//! Chat persistence trait.
//!
//! The request handler saves the user message before an agent run and the
//! assistant reply after it, and loads recent history to seed the next
//! run. The agent loop itself never touches the store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::message::{Message, Role, SessionId};

/// Which pipeline a chat session uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatMode {
    /// Retrieval-augmented answer from the knowledge service.
    Ask,
    /// Tool-calling agent loop.
    #[default]
    Agent,
    /// Retrieval restricted to local entities.
    Local,
}

impl ChatMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ask => "ask",
            Self::Agent => "agent",
            Self::Local => "local",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ask" => Some(Self::Ask),
            "agent" => Some(Self::Agent),
            "local" => Some(Self::Local),
            _ => None,
        }
    }
}

/// A chat session bound to a topology.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: SessionId,
    pub topology_id: String,
    pub title: String,
    pub mode: ChatMode,
    pub model: String,
    pub created_at: DateTime<Utc>,
}

/// A persisted chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl StoredMessage {
    pub fn to_message(&self) -> Message {
        Message::from_parts(self.role, self.content.clone())
    }
}

#[async_trait]
pub trait ChatStore: Send + Sync {
    /// A human-readable backend name.
    fn name(&self) -> &str;

    async fn create_session(
        &self,
        topology_id: &str,
        title: &str,
        mode: ChatMode,
        model: &str,
    ) -> Result<ChatSession, StoreError>;

    /// Sessions of a topology, newest first.
    async fn list_sessions(&self, topology_id: &str) -> Result<Vec<ChatSession>, StoreError>;

    /// Delete a session and its messages. Returns whether it existed.
    async fn delete_session(&self, session_id: &SessionId) -> Result<bool, StoreError>;

    /// Rename a session. Returns whether it existed.
    async fn rename_session(&self, session_id: &SessionId, title: &str)
    -> Result<bool, StoreError>;

    /// Full history of a session, oldest first, or `None` when the session
    /// does not belong to `topology_id`.
    async fn session_history(
        &self,
        session_id: &SessionId,
        topology_id: &str,
    ) -> Result<Option<Vec<StoredMessage>>, StoreError>;

    async fn save_message(
        &self,
        session_id: &SessionId,
        role: Role,
        content: &str,
    ) -> Result<(), StoreError>;

    /// The most recent `2 * pair_limit` messages, oldest first; every
    /// message when `pair_limit` is `None`.
    async fn load_recent_history(
        &self,
        session_id: &SessionId,
        pair_limit: Option<usize>,
    ) -> Result<Vec<Message>, StoreError>;
}

/// Session title derived from the first user message.
pub fn session_title(content: &str) -> String {
    const MAX_CHARS: usize = 30;
    if content.chars().count() > MAX_CHARS {
        let head: String = content.chars().take(MAX_CHARS).collect();
        format!("{head}...")
    } else {
        content.to_string()
    }
}
