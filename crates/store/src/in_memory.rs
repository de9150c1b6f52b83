//! In-memory chat store — useful for testing and ephemeral deployments.

use async_trait::async_trait;
use chrono::Utc;
use dispatch_core::error::StoreError;
use dispatch_core::message::{Message, Role, SessionId};
use dispatch_core::store::{ChatMode, ChatSession, ChatStore, StoredMessage};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
struct State {
    /// Sessions in creation order
    sessions: Vec<ChatSession>,
    messages: HashMap<SessionId, Vec<StoredMessage>>,
}

/// A chat store that keeps everything in process memory.
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn create_session(
        &self,
        topology_id: &str,
        title: &str,
        mode: ChatMode,
        model: &str,
    ) -> Result<ChatSession, StoreError> {
        let session = ChatSession {
            id: SessionId::new(),
            topology_id: topology_id.to_string(),
            title: title.to_string(),
            mode,
            model: model.to_string(),
            created_at: Utc::now(),
        };
        let mut state = self.state.write().await;
        state.messages.insert(session.id.clone(), Vec::new());
        state.sessions.push(session.clone());
        Ok(session)
    }

    async fn list_sessions(&self, topology_id: &str) -> Result<Vec<ChatSession>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .sessions
            .iter()
            .rev()
            .filter(|s| s.topology_id == topology_id)
            .cloned()
            .collect())
    }

    async fn delete_session(&self, session_id: &SessionId) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        let before = state.sessions.len();
        state.sessions.retain(|s| &s.id != session_id);
        state.messages.remove(session_id);
        Ok(state.sessions.len() != before)
    }

    async fn rename_session(
        &self,
        session_id: &SessionId,
        title: &str,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        match state.sessions.iter_mut().find(|s| &s.id == session_id) {
            Some(session) => {
                session.title = title.to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn session_history(
        &self,
        session_id: &SessionId,
        topology_id: &str,
    ) -> Result<Option<Vec<StoredMessage>>, StoreError> {
        let state = self.state.read().await;
        let belongs = state
            .sessions
            .iter()
            .any(|s| &s.id == session_id && s.topology_id == topology_id);
        if !belongs {
            return Ok(None);
        }
        Ok(Some(
            state.messages.get(session_id).cloned().unwrap_or_default(),
        ))
    }

    async fn save_message(
        &self,
        session_id: &SessionId,
        role: Role,
        content: &str,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let messages = state
            .messages
            .get_mut(session_id)
            .ok_or_else(|| StoreError::SessionNotFound(session_id.to_string()))?;
        messages.push(StoredMessage {
            role,
            content: content.to_string(),
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn load_recent_history(
        &self,
        session_id: &SessionId,
        pair_limit: Option<usize>,
    ) -> Result<Vec<Message>, StoreError> {
        let state = self.state.read().await;
        let Some(messages) = state.messages.get(session_id) else {
            return Ok(Vec::new());
        };
        let skip = match pair_limit {
            Some(pairs) => messages.len().saturating_sub(pairs * 2),
            None => 0,
        };
        Ok(messages[skip..].iter().map(StoredMessage::to_message).collect())
    }
}
