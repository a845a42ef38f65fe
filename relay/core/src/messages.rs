//! Relay Messages
//!
//! Identifiers and the wire-level events exchanged with the hosting editor.
//!
//! # Design Philosophy
//!
//! The host is a pure renderer. It sends [`ClientEvent`]s up (submit a prompt,
//! cancel the current one) and renders whatever [`RelayMessage`]s come down.
//! Every update carries the full accumulated text rather than a delta, so a
//! panel that misses intermediate updates still converges on the final text.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies the requesting panel or connection
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(pub String);

impl ClientId {
    /// Create a client ID from any string-like value
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Session identifier
///
/// Random v4 UUIDs, so an ID is never handed out twice for the lifetime of
/// the process (or across restarts).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// Generate a new unique session ID
    #[must_use]
    pub fn new() -> Self {
        Self(format!("relay_{}", uuid::Uuid::new_v4().simple()))
    }

    /// Borrow the raw identifier
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Events sent from the host to the relay
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// The user submitted a prompt
    SubmitPrompt {
        /// Panel that submitted the prompt
        client_id: ClientId,
        /// Raw prompt text as typed
        text: String,
    },
    /// The user asked to stop the current generation
    Cancel {
        /// Panel whose session should stop
        client_id: ClientId,
    },
}

impl ClientEvent {
    /// The client this event originates from
    #[must_use]
    pub fn client_id(&self) -> &ClientId {
        match self {
            Self::SubmitPrompt { client_id, .. } | Self::Cancel { client_id } => client_id,
        }
    }
}

/// How a session ended
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TerminalStatus {
    /// The backend stream ended normally
    Completed,
    /// The backend failed or went idle
    Failed,
    /// The client cancelled or a newer prompt superseded this one
    Cancelled,
}

impl fmt::Display for TerminalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Messages sent from the relay to the host
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayMessage {
    /// Latest accumulated text of an in-flight session
    Update {
        /// Panel that owns the session
        client_id: ClientId,
        /// Session being streamed
        session_id: SessionId,
        /// Everything generated so far
        text: String,
        /// Always `false` for updates
        done: bool,
    },
    /// Final message of a session; nothing follows it
    Terminal {
        /// Panel that owns the session
        client_id: ClientId,
        /// Session that ended
        session_id: SessionId,
        /// Everything generated before the session ended
        text: String,
        /// Always `true` for terminal messages
        done: bool,
        /// How the session ended
        status: TerminalStatus,
        /// Human-readable failure description
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl RelayMessage {
    /// Build an update message
    pub fn update(client_id: ClientId, session_id: SessionId, text: impl Into<String>) -> Self {
        Self::Update {
            client_id,
            session_id,
            text: text.into(),
            done: false,
        }
    }

    /// Build a terminal message
    pub fn terminal(
        client_id: ClientId,
        session_id: SessionId,
        text: impl Into<String>,
        status: TerminalStatus,
        error: Option<String>,
    ) -> Self {
        Self::Terminal {
            client_id,
            session_id,
            text: text.into(),
            done: true,
            status,
            error,
        }
    }

    /// Session this message belongs to
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        match self {
            Self::Update { session_id, .. } | Self::Terminal { session_id, .. } => session_id,
        }
    }

    /// Client this message is addressed to
    #[must_use]
    pub fn client_id(&self) -> &ClientId {
        match self {
            Self::Update { client_id, .. } | Self::Terminal { client_id, .. } => client_id,
        }
    }

    /// Text carried by the message
    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Self::Update { text, .. } | Self::Terminal { text, .. } => text,
        }
    }

    /// Whether this is the final message of its session
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal { .. })
    }

    /// Terminal status, if this is a terminal message
    #[must_use]
    pub fn status(&self) -> Option<TerminalStatus> {
        match self {
            Self::Terminal { status, .. } => Some(*status),
            Self::Update { .. } => None,
        }
    }
}
