//! Relay Core - Streaming Prompt Relay for Editor Chat Panels
//!
//! This crate forwards prompts from editor chat panels to a local LLM server
//! and streams the accumulated response back while it is being generated.
//! It is UI-agnostic: the host supplies events and renders the messages.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     Editor Host                           │
//! │   chat panel A        chat panel B        ...             │
//! │        │                   │                              │
//! │        └──── ClientEvent (up) / RelayMessage (down) ──┐   │
//! └────────────────────────────────────────────────────────┼──┘
//!                                                          │
//! ┌────────────────────────────────────────────────────────┼──┐
//! │                      RELAY CORE                        │  │
//! │  ┌─────────────────────────────────────────────────────┴┐ │
//! │  │                   RelayService                       │ │
//! │  │  ┌────────────────┐  ┌──────────────┐  ┌───────────┐ │ │
//! │  │  │ SessionManager │  │ RelayChannel │  │  Backend  │ │ │
//! │  │  │ (one per client│  │ (one task per│  │  (Ollama) │ │ │
//! │  │  │  + supersede)  │  │   session)   │  │           │ │ │
//! │  │  └────────────────┘  └──────────────┘  └───────────┘ │ │
//! │  └──────────────────────────────────────────────────────┘ │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`RelayService`]: Accepts host events and runs one relay per session
//! - [`SessionManager`]: At most one active session per client
//! - [`RelayChannel`]: Streams latest-text updates with backpressure
//! - [`RelayMessage`]: Updates and terminal messages sent to the host
//! - [`ClientEvent`]: Prompt submissions and cancellations from the host
//!
//! # Quick Start
//!
//! ```ignore
//! use relay_core::{load_config, ClientEvent, InProcessTransport, OllamaBackend, RelayService};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config()?;
//!     let (mut transport, event_rx, msg_tx) = InProcessTransport::new_pair();
//!     let service = RelayService::new(OllamaBackend::from_config(&config), config, msg_tx);
//!     tokio::spawn(async move { service.serve(event_rx).await });
//!
//!     transport
//!         .send(ClientEvent::SubmitPrompt { client_id: "panel".into(), text: "Hi".into() })
//!         .await?;
//!
//!     while let Some(msg) = transport.recv().await {
//!         println!("{}", msg.text());
//!         if msg.is_terminal() {
//!             break;
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`backend`]: LLM backend abstraction (Ollama, scripted)
//! - [`config`]: TOML and environment configuration
//! - [`error`]: Relay error types
//! - [`messages`]: Identifiers, host events and relay messages
//! - [`relay`]: Per-session streaming relay
//! - [`service`]: Event handling and task tracking
//! - [`session`]: Session lifecycle state machine
//! - [`session_manager`]: Active-session table and supersede policy
//! - [`telemetry`]: Optional tracing subscriber setup
//! - [`transport`]: In-process channel pair

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod config;
pub mod error;
pub mod messages;
pub mod relay;
pub mod service;
pub mod session;
pub mod session_manager;
pub mod telemetry;
pub mod transport;

// Re-exports for convenience
pub use backend::{
    LlmBackend, LlmRequest, ModelInfo, OllamaBackend, Script, ScriptStep, ScriptedBackend,
    StreamingToken,
};
pub use error::{RelayError, SinkClosed};
pub use messages::{ClientEvent, ClientId, RelayMessage, SessionId, TerminalStatus};
pub use relay::{RelayChannel, RelayOutcome, RelayStats, UpdateSink};
pub use service::{prefix_transform, PromptTransform, RelayService};
pub use session::{PromptRequest, Session, SessionState, StreamChunk};
pub use session_manager::{SessionLease, SessionManager};
pub use telemetry::init_tracing;
pub use transport::{InProcessTransport, TransportError};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, BackendToml, ConfigError,
    ConfigSource, RelayConfig, RelayConfigToml, RelayToml,
};
