//! Session Lifecycle
//!
//! A session is one prompt/response generation for one client. It starts
//! Pending, becomes Streaming when the first chunk (or an immediate
//! completion) arrives, and ends in exactly one of Completed, Failed or
//! Cancelled.
//!
//! ```text
//! Pending ──first chunk──▶ Streaming ──chunks──▶ Streaming ──end──▶ Completed
//!    │                        │
//!    ├────────cancel──────────┼──────────────▶ Cancelled
//!    └────backend error───────┴──────────────▶ Failed
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RelayError;
use crate::messages::{ClientId, SessionId, TerminalStatus};

/// Session state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    /// Created, waiting for the backend to produce anything
    Pending,
    /// At least one chunk has arrived
    Streaming,
    /// The backend stream ended normally
    Completed,
    /// The backend failed or went idle
    Failed,
    /// Cancelled by the client or superseded by a newer prompt
    Cancelled,
}

impl SessionState {
    /// Whether no further transitions are possible
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether the session still counts as the client's active session
    #[must_use]
    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }

    /// Whether the lifecycle allows moving from `self` to `next`
    #[must_use]
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::{Cancelled, Completed, Failed, Pending, Streaming};
        matches!(
            (self, next),
            (Pending, Streaming)
                | (Streaming, Streaming | Completed)
                | (Pending | Streaming, Cancelled | Failed)
        )
    }

    /// Terminal status for a terminal state
    #[must_use]
    pub fn terminal_status(self) -> Option<TerminalStatus> {
        match self {
            Self::Completed => Some(TerminalStatus::Completed),
            Self::Failed => Some(TerminalStatus::Failed),
            Self::Cancelled => Some(TerminalStatus::Cancelled),
            Self::Pending | Self::Streaming => None,
        }
    }
}

/// A validated prompt submission
///
/// Construction rejects empty and whitespace-only prompts, so holding a
/// `PromptRequest` means the text is worth sending.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PromptRequest {
    client_id: ClientId,
    prompt_text: String,
}

impl PromptRequest {
    /// Validate and build a request
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidRequest`] if the prompt has no
    /// non-whitespace characters.
    pub fn new(client_id: ClientId, prompt_text: impl Into<String>) -> Result<Self, RelayError> {
        let prompt_text = prompt_text.into();
        if prompt_text.trim().is_empty() {
            return Err(RelayError::InvalidRequest(
                "prompt text is empty".to_string(),
            ));
        }
        Ok(Self {
            client_id,
            prompt_text,
        })
    }

    /// The requesting client
    #[must_use]
    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    /// The prompt to send to the backend
    #[must_use]
    pub fn prompt_text(&self) -> &str {
        &self.prompt_text
    }
}

/// One unit of backend output, tagged with its session
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamChunk {
    /// Session the chunk belongs to
    pub session_id: SessionId,
    /// Newly generated text (may be empty)
    pub delta_text: String,
    /// Whether the backend reported end of stream
    pub is_final: bool,
}

impl StreamChunk {
    /// A chunk carrying generated text
    pub fn delta(session_id: SessionId, delta_text: impl Into<String>) -> Self {
        Self {
            session_id,
            delta_text: delta_text.into(),
            is_final: false,
        }
    }

    /// The end-of-stream marker
    #[must_use]
    pub fn end(session_id: SessionId) -> Self {
        Self {
            session_id,
            delta_text: String::new(),
            is_final: true,
        }
    }
}

/// A generation session
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Unique session ID
    pub id: SessionId,
    /// Client that owns the session
    pub client_id: ClientId,
    /// Prompt as sent to the backend
    pub prompt: String,
    /// Current lifecycle state
    pub state: SessionState,
    /// Everything generated so far, in order
    pub accumulated_text: String,
    /// When the session was created
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// Create a pending session for a request
    #[must_use]
    pub fn new(request: &PromptRequest) -> Self {
        Self {
            id: SessionId::new(),
            client_id: request.client_id().clone(),
            prompt: request.prompt_text().to_string(),
            state: SessionState::Pending,
            accumulated_text: String::new(),
            created_at: Utc::now(),
        }
    }

    /// Move to `next`, rejecting transitions the lifecycle forbids
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidTransition`] for any move out of a
    /// terminal state or any skipped step.
    pub fn transition(&mut self, next: SessionState) -> Result<(), RelayError> {
        if !self.state.can_transition_to(next) {
            return Err(RelayError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        if self.state != next {
            tracing::debug!(
                session_id = %self.id,
                from = ?self.state,
                to = ?next,
                "Session state change"
            );
        }
        self.state = next;
        Ok(())
    }

    /// Apply a chunk from the backend
    ///
    /// Appends the delta, promotes Pending to Streaming, and completes the
    /// session on the final chunk.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidTransition`] if the session already ended,
    /// or [`RelayError::BackendStreamError`] if the chunk belongs to another
    /// session.
    pub fn apply(&mut self, chunk: &StreamChunk) -> Result<(), RelayError> {
        if chunk.session_id != self.id {
            return Err(RelayError::BackendStreamError(format!(
                "chunk for session {} delivered to session {}",
                chunk.session_id, self.id
            )));
        }
        self.transition(SessionState::Streaming)?;
        self.accumulated_text.push_str(&chunk.delta_text);
        if chunk.is_final {
            self.transition(SessionState::Completed)?;
        }
        Ok(())
    }

    /// Whether the session has ended
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}
