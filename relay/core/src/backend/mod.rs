//! LLM Backend Integration
//!
//! This module provides abstracted access to generation backends through a
//! common trait interface.
//!
//! # Available Backends
//!
//! - **Ollama**: Local LLM server (default)
//! - **Scripted**: Deterministic playback for tests and offline hosts
//!
//! # Usage
//!
//! ```ignore
//! use relay_core::backend::{OllamaBackend, LlmBackend, LlmRequest};
//!
//! let backend = OllamaBackend::default();
//! let request = LlmRequest::new("Hello!", "deepseek-r1:latest");
//! let rx = backend.send_streaming(&request).await?;
//! ```

mod ollama;
mod scripted;
mod traits;

pub use ollama::OllamaBackend;
pub use scripted::{Script, ScriptStep, ScriptedBackend};
pub use traits::{LlmBackend, LlmRequest, ModelInfo, StreamingToken};
