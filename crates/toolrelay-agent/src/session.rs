//! Conversation history storage keyed by session id.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use toolrelay_core::ChatMessage;

use crate::error::AgentResult;

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Prior turns of `session_id`, oldest first. Unknown sessions are empty.
    async fn history(&self, session_id: &str) -> AgentResult<Vec<ChatMessage>>;

    async fn append(&self, session_id: &str, messages: Vec<ChatMessage>) -> AgentResult<()>;

    async fn clear(&self, session_id: &str) -> AgentResult<()>;
}

/// Process-local session store. History is lost on restart.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, Vec<ChatMessage>>>,
    max_messages: Option<usize>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep only the most recent `max_messages` per session.
    pub fn with_max_messages(mut self, max_messages: usize) -> Self {
        self.max_messages = Some(max_messages);
        self
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn history(&self, session_id: &str) -> AgentResult<Vec<ChatMessage>> {
        Ok(self
            .sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn append(&self, session_id: &str, messages: Vec<ChatMessage>) -> AgentResult<()> {
        let mut sessions = self.sessions.write().await;
        let history = sessions.entry(session_id.to_string()).or_default();
        history.extend(messages);
        if let Some(max) = self.max_messages
            && history.len() > max
        {
            let excess = history.len() - max;
            history.drain(..excess);
        }
        Ok(())
    }

    async fn clear(&self, session_id: &str) -> AgentResult<()> {
        self.sessions.write().await.remove(session_id);
        Ok(())
    }
}
