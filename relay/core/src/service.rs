//! Relay Service
//!
//! The seam the hosting editor talks to. It turns [`ClientEvent`]s into
//! sessions, runs one [`RelayChannel`] task per session, and sends every
//! [`RelayMessage`] to a single host-provided sink.
//!
//! # Usage
//!
//! ```ignore
//! use relay_core::{load_config, OllamaBackend, RelayService, InProcessTransport};
//!
//! let config = load_config()?;
//! let (mut transport, event_rx, msg_tx) = InProcessTransport::new_pair();
//! let service = RelayService::new(OllamaBackend::from_config(&config), config, msg_tx);
//! tokio::spawn(async move { service.serve(event_rx).await });
//!
//! transport.send(ClientEvent::SubmitPrompt { client_id: "panel".into(), text: "Hi".into() }).await?;
//! while let Some(msg) = transport.recv().await {
//!     // render msg.text()
//! }
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::backend::LlmBackend;
use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::messages::{ClientEvent, ClientId, SessionId};
use crate::relay::{RelayChannel, RelayOutcome, UpdateSink};
use crate::session::{PromptRequest, Session};
use crate::session_manager::SessionManager;

/// Rewrites a prompt before it reaches the backend
pub type PromptTransform = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Transform that prepends `prefix` verbatim, or passes prompts through
#[must_use]
pub fn prefix_transform(prefix: Option<String>) -> PromptTransform {
    match prefix {
        Some(prefix) if !prefix.is_empty() => Arc::new(move |prompt| format!("{prefix}{prompt}")),
        _ => Arc::new(str::to_string),
    }
}

/// Accepts host events and relays sessions
///
/// Prefer [`RelayService::shutdown`] to wait for every relay to finish.
/// Dropping the service without it cancels all sessions and leaves the relay
/// tasks running in the background until each one has sent its Cancelled
/// terminal message.
pub struct RelayService {
    manager: Arc<SessionManager>,
    backend: Arc<dyn LlmBackend>,
    sink: Arc<dyn UpdateSink>,
    relay: RelayChannel,
    transform: PromptTransform,
    tasks: Mutex<JoinSet<RelayOutcome>>,
}

impl RelayService {
    /// Create a service using the configured model, timeout and prompt prefix
    pub fn new(
        backend: impl LlmBackend + 'static,
        config: RelayConfig,
        sink: impl UpdateSink + 'static,
    ) -> Self {
        Self::with_shared(Arc::new(backend), &config, Arc::new(sink))
    }

    /// Create a service from already shared backend and sink
    #[must_use]
    pub fn with_shared(
        backend: Arc<dyn LlmBackend>,
        config: &RelayConfig,
        sink: Arc<dyn UpdateSink>,
    ) -> Self {
        Self {
            manager: Arc::new(SessionManager::new()),
            backend,
            sink,
            relay: RelayChannel::from_config(config),
            transform: prefix_transform(config.prompt_prefix.clone()),
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// Replace the prompt transform
    #[must_use]
    pub fn with_transform(mut self, transform: PromptTransform) -> Self {
        self.transform = transform;
        self
    }

    /// The session manager backing this service
    #[must_use]
    pub fn manager(&self) -> &SessionManager {
        &self.manager
    }

    /// Dispatch one host event
    ///
    /// Returns the new session ID for submissions and `None` for cancels.
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidRequest`] for empty prompts; no session
    /// is created and no message is sent in that case.
    pub fn handle_event(&self, event: ClientEvent) -> Result<Option<SessionId>, RelayError> {
        match event {
            ClientEvent::SubmitPrompt { client_id, text } => self.submit(client_id, text).map(Some),
            ClientEvent::Cancel { client_id } => {
                self.cancel(&client_id);
                Ok(None)
            }
        }
    }

    /// Start relaying a prompt for `client_id`
    ///
    /// Supersedes the client's current session, if any. Must be called from
    /// within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidRequest`] if the prompt, before or after
    /// the transform, is empty.
    pub fn submit(&self, client_id: ClientId, text: impl Into<String>) -> Result<SessionId, RelayError> {
        let raw = PromptRequest::new(client_id.clone(), text)?;
        let request = PromptRequest::new(client_id, (self.transform)(raw.prompt_text()))?;
        let lease = self.manager.start_session(&request)?;
        let session_id = lease.session_id().clone();

        let relay = self.relay.clone();
        let backend = Arc::clone(&self.backend);
        let sink = Arc::clone(&self.sink);

        let mut tasks = self.tasks.lock();
        // Reap finished relays so the set only holds live ones
        while let Some(finished) = tasks.try_join_next() {
            if let Err(e) = finished {
                tracing::error!(error = %e, "Relay task panicked");
            }
        }
        tasks.spawn(async move { relay.run(lease, backend.as_ref(), sink.as_ref()).await });

        Ok(session_id)
    }

    /// Cancel the client's active session, returning whether one existed
    pub fn cancel(&self, client_id: &ClientId) -> bool {
        self.manager.cancel_session(client_id)
    }

    /// Snapshot of the client's active session
    #[must_use]
    pub fn active_session(&self, client_id: &ClientId) -> Option<Session> {
        self.manager.get_active_session(client_id)
    }

    /// Whether the backend is reachable
    pub async fn backend_healthy(&self) -> bool {
        self.backend.health_check().await
    }

    /// Process events until the host closes its side of the channel
    ///
    /// Then cancels whatever is still running and waits for every relay to
    /// deliver its terminal message.
    pub async fn serve(&self, mut events: mpsc::Receiver<ClientEvent>) {
        while let Some(event) = events.recv().await {
            let client_id = event.client_id().clone();
            if let Err(e) = self.handle_event(event) {
                tracing::warn!(client_id = %client_id, error = %e, "Rejected client event");
            }
        }
        tracing::info!("Event channel closed, shutting down relay service");
        self.shutdown().await;
    }

    /// Cancel every session and wait for all relay tasks to finish
    ///
    /// Returns the outcomes of the relays that were still tracked.
    pub async fn shutdown(&self) -> Vec<RelayOutcome> {
        self.manager.cancel_all();
        let mut tasks = std::mem::take(&mut *self.tasks.lock());

        let mut outcomes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => tracing::error!(error = %e, "Relay task panicked"),
            }
        }
        outcomes
    }
}

impl Drop for RelayService {
    fn drop(&mut self) {
        let cancelled = self.manager.cancel_all();
        let tasks = self.tasks.get_mut();
        if !tasks.is_empty() {
            tracing::debug!(cancelled, running = tasks.len(), "Relay service dropped without shutdown");
        }
        // Aborting would lose the terminal messages; let the relays wind down
        tasks.detach_all();
    }
}
