//! System prompt sources.
//!
//! The planner's system prompt is loaded through a [`PromptSource`] and kept
//! in a [`CachedPrompt`] owned by the orchestrator. The cache is filled on
//! first use and only dropped by an explicit [`CachedPrompt::invalidate`].

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{AgentError, AgentResult};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an assistant that answers questions using \
the tools available to you. Call tools when you need data you do not already have, combine \
their results, and answer in plain language once you have enough information. If a tool \
fails, decide whether another tool or different arguments can still answer the question. \
Never invent data that no tool returned.";

#[async_trait]
pub trait PromptSource: Send + Sync {
    async fn load(&self) -> AgentResult<String>;
}

/// Prompt held in memory.
#[derive(Debug, Clone)]
pub struct StaticPrompt {
    text: String,
}

impl StaticPrompt {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

impl Default for StaticPrompt {
    fn default() -> Self {
        Self::new(DEFAULT_SYSTEM_PROMPT)
    }
}

#[async_trait]
impl PromptSource for StaticPrompt {
    async fn load(&self) -> AgentResult<String> {
        Ok(self.text.clone())
    }
}

/// Prompt read from a file on every load.
#[derive(Debug, Clone)]
pub struct FilePrompt {
    path: PathBuf,
}

impl FilePrompt {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl PromptSource for FilePrompt {
    async fn load(&self) -> AgentResult<String> {
        tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            AgentError::PromptUnavailable(format!("{}: {}", self.path.display(), e))
        })
    }
}

pub struct CachedPrompt {
    source: Arc<dyn PromptSource>,
    cached: RwLock<Option<Arc<str>>>,
}

impl CachedPrompt {
    pub fn new(source: Arc<dyn PromptSource>) -> Self {
        Self {
            source,
            cached: RwLock::new(None),
        }
    }

    /// Cached prompt text, loading it on first use. Blank prompts are rejected.
    pub async fn get(&self) -> AgentResult<Arc<str>> {
        if let Some(text) = self.cached.read().await.as_ref() {
            return Ok(Arc::clone(text));
        }

        let text = self.source.load().await?;
        let text = text.trim();
        if text.is_empty() {
            return Err(AgentError::PromptUnavailable(
                "system prompt is empty".to_string(),
            ));
        }

        let text: Arc<str> = Arc::from(text);
        *self.cached.write().await = Some(Arc::clone(&text));
        debug!(chars = text.len(), "System prompt loaded");
        Ok(text)
    }

    pub async fn invalidate(&self) {
        *self.cached.write().await = None;
    }

    pub async fn is_loaded(&self) -> bool {
        self.cached.read().await.is_some()
    }
}

impl Default for CachedPrompt {
    fn default() -> Self {
        Self::new(Arc::new(StaticPrompt::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        loads: AtomicUsize,
    }

    #[async_trait]
    impl PromptSource for CountingSource {
        async fn load(&self) -> AgentResult<String> {
            let n = self.loads.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("prompt v{}", n))
        }
    }

    #[tokio::test]
    async fn test_cached_prompt_loads_once_until_invalidated() {
        let source = Arc::new(CountingSource {
            loads: AtomicUsize::new(0),
        });
        let cached = CachedPrompt::new(source.clone());

        assert_eq!(&*cached.get().await.unwrap(), "prompt v1");
        assert_eq!(&*cached.get().await.unwrap(), "prompt v1");
        assert_eq!(source.loads.load(Ordering::SeqCst), 1);

        cached.invalidate().await;
        assert!(!cached.is_loaded().await);
        assert_eq!(&*cached.get().await.unwrap(), "prompt v2");
    }

    #[tokio::test]
    async fn test_empty_prompt_is_error() {
        let cached = CachedPrompt::new(Arc::new(StaticPrompt::new("   \n")));
        let err = cached.get().await.unwrap_err();
        assert_eq!(err.error_code(), "PROMPT_UNAVAILABLE");
    }

    #[tokio::test]
    async fn test_file_prompt() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "You are the CRM assistant.").unwrap();

        let prompt = FilePrompt::new(file.path()).load().await.unwrap();
        assert!(prompt.starts_with("You are the CRM assistant."));
    }

    #[tokio::test]
    async fn test_missing_file_prompt() {
        let err = FilePrompt::new("/nonexistent/prompt.txt")
            .load()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("/nonexistent/prompt.txt"));
    }
}
