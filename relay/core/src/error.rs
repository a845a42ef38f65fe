//! Relay error types

use std::time::Duration;

use thiserror::Error;

use crate::messages::SessionId;
use crate::session::SessionState;

/// Errors raised by the relay core
///
/// Only [`RelayError::InvalidRequest`] and [`RelayError::DuplicateSession`]
/// ever reach the host as `Err`. Backend failures end up in a Failed terminal
/// message instead.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RelayError {
    /// The prompt was rejected before a session was created
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The backend could not be reached or refused the request
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The backend stream broke after it was opened
    #[error("backend stream error: {0}")]
    BackendStreamError(String),

    /// No chunk arrived within the idle window
    #[error("no output from the model for {}s", .0.as_secs_f32())]
    IdleTimeout(Duration),

    /// A session state change that the lifecycle does not allow
    #[error("invalid session transition from {from:?} to {to:?}")]
    InvalidTransition {
        /// State the session was in
        from: SessionState,
        /// State that was requested
        to: SessionState,
    },

    /// A session ID collided with one already registered
    #[error("session {0} is already registered")]
    DuplicateSession(SessionId),
}

impl RelayError {
    /// Whether this error should end a session as Failed
    #[must_use]
    pub fn is_backend_failure(&self) -> bool {
        matches!(
            self,
            Self::BackendUnavailable(_) | Self::BackendStreamError(_) | Self::IdleTimeout(_)
        )
    }
}

/// The delivery sink went away
#[derive(Clone, Copy, Debug, Default, Error, PartialEq, Eq)]
#[error("delivery sink closed")]
pub struct SinkClosed;
