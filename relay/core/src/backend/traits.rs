//! LLM Backend Traits
//!
//! Trait definitions for generation backends. The relay only needs one
//! capability from a backend: open a streaming generation for a prompt and
//! hand back the chunks as they arrive. Health checks and model listing are
//! there for hosts that want to show backend status.

use async_trait::async_trait;
use tokio::sync::mpsc;

/// Token stream events from LLM backends
///
/// A well-behaved stream is any number of `Token`s followed by exactly one
/// `Complete` or `Error`. A channel that closes without either is treated as
/// a broken stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamingToken {
    /// A piece of generated text (may be empty)
    Token(String),
    /// The model finished generating
    Complete,
    /// Error occurred during streaming
    Error(String),
}

/// A generation request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LlmRequest {
    /// The prompt to send, after any host-side transform
    pub prompt: String,
    /// Model to use (backend-specific identifier)
    pub model: String,
}

impl LlmRequest {
    /// Create a new request with prompt and model
    pub fn new(prompt: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: model.into(),
        }
    }
}

/// Information about an available model
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelInfo {
    /// Model identifier
    pub name: String,
    /// Model size in bytes (if known)
    pub size: Option<u64>,
    /// Parameter count (if known)
    pub parameters: Option<String>,
}

/// LLM Backend trait
///
/// Implement this trait to relay to a different generation service.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Get the backend name (e.g., "Ollama")
    fn name(&self) -> &str;

    /// Check if the backend is healthy and reachable
    async fn health_check(&self) -> bool;

    /// Open a streaming generation
    ///
    /// Returns a channel receiver that yields tokens as they arrive. The
    /// stream is finite and not restartable. Dropping the receiver tells the
    /// backend to stop producing.
    ///
    /// # Errors
    ///
    /// Fails if the backend cannot be reached or rejects the request before
    /// any output is produced.
    async fn send_streaming(
        &self,
        request: &LlmRequest,
    ) -> anyhow::Result<mpsc::Receiver<StreamingToken>>;

    /// List available models
    async fn list_models(&self) -> anyhow::Result<Vec<ModelInfo>>;

    /// Check if a specific model is available
    async fn has_model(&self, model: &str) -> anyhow::Result<bool> {
        let models = self.list_models().await?;
        Ok(models.iter().any(|m| m.name == model))
    }
}
