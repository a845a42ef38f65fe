//! Relay Channel
//!
//! Drives one session from creation to a terminal state: opens the backend
//! stream, appends every chunk to the session, and pushes the latest
//! accumulated text to the host.
//!
//! # Architecture
//!
//! ```text
//!   backend tokens ──▶ pump ──send_modify──▶ watch<Session> ──▶ deliver ──▶ UpdateSink
//!                       │                      (one slot)           │
//!                       └── idle timeout / cancel                   └── skips stale text
//! ```
//!
//! The pump and the delivery loop run concurrently inside the relay task.
//! The `watch` slot between them holds only the newest session state, so a
//! slow sink never builds up a queue: whenever it becomes ready it receives
//! the current accumulated text, and the intermediate values are dropped.
//! Updates stay in production order and each one is a prefix of the next.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::Instrument;

use crate::backend::{LlmBackend, LlmRequest, StreamingToken};
use crate::config::RelayConfig;
use crate::error::{RelayError, SinkClosed};
use crate::messages::{RelayMessage, TerminalStatus};
use crate::session::{Session, SessionState, StreamChunk};
use crate::session_manager::SessionLease;

/// Where relay output goes
///
/// `deliver` may wait for the host to make room; that wait is the only
/// backpressure the relay applies.
#[async_trait]
pub trait UpdateSink: Send + Sync {
    /// Hand one message to the host
    async fn deliver(&self, message: RelayMessage) -> Result<(), SinkClosed>;
}

#[async_trait]
impl UpdateSink for mpsc::Sender<RelayMessage> {
    async fn deliver(&self, message: RelayMessage) -> Result<(), SinkClosed> {
        self.send(message).await.map_err(|_| SinkClosed)
    }
}

/// Counters for one relayed session
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Chunks received from the backend (including the final marker)
    pub chunks_received: u32,
    /// Update messages handed to the sink
    pub updates_delivered: u32,
    /// Time from start of `run` until the terminal message
    pub duration: Duration,
}

impl RelayStats {
    /// Chunks whose text was folded into a later update
    #[must_use]
    pub fn updates_coalesced(&self) -> u32 {
        self.chunks_received.saturating_sub(self.updates_delivered)
    }
}

/// Result of relaying one session
#[derive(Clone, Debug)]
pub struct RelayOutcome {
    /// Final session snapshot
    pub session: Session,
    /// How the session ended
    pub status: TerminalStatus,
    /// Failure that ended the session, if any
    pub error: Option<RelayError>,
    /// Session counters
    pub stats: RelayStats,
}

/// Resolve once the session reaches any terminal state
async fn until_terminal(session: &mut watch::Receiver<Session>) {
    // A closed channel means the lease is gone, which is just as final
    let _ = session.wait_for(Session::is_terminal).await;
}

/// Resolve once the session is cancelled
async fn until_cancelled(session: &mut watch::Receiver<Session>) {
    let _ = session
        .wait_for(|s| s.state == SessionState::Cancelled)
        .await;
}

/// How the pump stopped
enum PumpEnd {
    Completed,
    Cancelled,
    Failed(RelayError),
}

/// Relays sessions against a backend
#[derive(Clone, Debug)]
pub struct RelayChannel {
    model: String,
    idle_timeout: Duration,
}

impl RelayChannel {
    /// Create a relay for `model` with the given idle timeout
    pub fn new(model: impl Into<String>, idle_timeout: Duration) -> Self {
        Self {
            model: model.into(),
            idle_timeout,
        }
    }

    /// Create from relay configuration
    #[must_use]
    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(config.model.clone(), config.idle_timeout)
    }

    /// Drive the leased session to a terminal state
    ///
    /// Delivers zero or more updates followed by exactly one terminal
    /// message. Backend failures never escape as errors; they end the session
    /// as Failed with the partial text preserved.
    pub async fn run(
        &self,
        lease: SessionLease,
        backend: &dyn LlmBackend,
        sink: &dyn UpdateSink,
    ) -> RelayOutcome {
        let span = tracing::info_span!(
            "relay",
            session_id = %lease.session_id(),
            client_id = %lease.client_id(),
            backend = backend.name(),
        );
        self.run_session(lease, backend, sink).instrument(span).await
    }

    async fn run_session(
        &self,
        mut lease: SessionLease,
        backend: &dyn LlmBackend,
        sink: &dyn UpdateSink,
    ) -> RelayOutcome {
        let started = Instant::now();
        let mut stats = RelayStats::default();

        // A superseded session must get its terminal message out first
        if lease.has_predecessor() {
            tracing::debug!("Waiting for superseded session to finish");
            lease.wait_for_predecessor().await;
        }

        let error = if lease.state().is_terminal() {
            None
        } else {
            let updates = lease.subscribe();
            let (pumped, delivered) = tokio::join!(
                self.pump_and_settle(&lease, backend, &mut stats.chunks_received),
                Self::deliver_updates(updates, sink),
            );
            stats.updates_delivered = delivered;
            pumped
        };

        stats.duration = started.elapsed();
        self.deliver_terminal(lease, error, stats, sink).await
    }

    /// Run the pump and record how it ended on the session
    async fn pump_and_settle(
        &self,
        lease: &SessionLease,
        backend: &dyn LlmBackend,
        chunks: &mut u32,
    ) -> Option<RelayError> {
        match self.pump(lease, backend, chunks).await {
            PumpEnd::Completed | PumpEnd::Cancelled => None,
            PumpEnd::Failed(error) => {
                if let Err(e) = lease.modify(|s| s.transition(SessionState::Failed)) {
                    // Cancelled in the meantime; the cancel wins
                    tracing::debug!(error = %e, "Failure raced with cancellation");
                    return None;
                }
                Some(error)
            }
        }
    }

    /// Consume the backend stream into the session
    async fn pump(
        &self,
        lease: &SessionLease,
        backend: &dyn LlmBackend,
        chunks: &mut u32,
    ) -> PumpEnd {
        let mut cancel = lease.subscribe();
        let session_id = lease.session_id().clone();
        let request = LlmRequest::new(lease.snapshot().prompt, self.model.clone());

        let opened = tokio::select! {
            biased;
            () = until_terminal(&mut cancel) => return PumpEnd::Cancelled,
            opened = tokio::time::timeout(self.idle_timeout, backend.send_streaming(&request)) => opened,
        };

        let mut tokens = match opened {
            Ok(Ok(tokens)) => tokens,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Backend refused the request");
                return PumpEnd::Failed(RelayError::BackendUnavailable(format!("{e:#}")));
            }
            Err(_) => return PumpEnd::Failed(RelayError::IdleTimeout(self.idle_timeout)),
        };

        loop {
            let next = tokio::select! {
                biased;
                () = until_terminal(&mut cancel) => return PumpEnd::Cancelled,
                next = tokio::time::timeout(self.idle_timeout, tokens.recv()) => next,
            };

            let chunk = match next {
                Ok(Some(StreamingToken::Token(text))) => StreamChunk::delta(session_id.clone(), text),
                Ok(Some(StreamingToken::Complete)) => StreamChunk::end(session_id.clone()),
                Ok(Some(StreamingToken::Error(e))) => {
                    return PumpEnd::Failed(RelayError::BackendStreamError(e));
                }
                Ok(None) => {
                    return PumpEnd::Failed(RelayError::BackendStreamError(
                        "stream disconnected unexpectedly".to_string(),
                    ));
                }
                Err(_) => {
                    tracing::warn!(idle_timeout = ?self.idle_timeout, "Backend went idle");
                    return PumpEnd::Failed(RelayError::IdleTimeout(self.idle_timeout));
                }
            };

            *chunks += 1;
            match lease.modify(|s| s.apply(&chunk)) {
                Ok(()) if chunk.is_final => return PumpEnd::Completed,
                Ok(()) => {}
                // The manager cancelled between receiving and applying
                Err(RelayError::InvalidTransition { .. }) => return PumpEnd::Cancelled,
                Err(e) => return PumpEnd::Failed(e),
            }
        }
    }

    /// Push the latest accumulated text to the sink until the session ends
    ///
    /// Text that arrived while the sink was busy is flushed once more after
    /// Completed or Failed, so the host always sees the final text as an
    /// update before the terminal message. Returns the number of updates
    /// delivered.
    async fn deliver_updates(mut updates: watch::Receiver<Session>, sink: &dyn UpdateSink) -> u32 {
        let mut cancel = updates.clone();
        let mut delivered = 0;
        let mut delivered_len: Option<usize> = None;

        loop {
            let (update, finished) = {
                let session = updates.borrow_and_update();
                let fresh = delivered_len != Some(session.accumulated_text.len());
                let update = || {
                    RelayMessage::update(
                        session.client_id.clone(),
                        session.id.clone(),
                        session.accumulated_text.clone(),
                    )
                };
                match session.state {
                    SessionState::Pending => (None, false),
                    SessionState::Streaming => (fresh.then(update), false),
                    SessionState::Completed | SessionState::Failed => {
                        ((fresh && !session.accumulated_text.is_empty()).then(update), true)
                    }
                    SessionState::Cancelled => break,
                }
            };

            if let Some(update) = update {
                let len = update.text().len();
                tokio::select! {
                    biased;
                    () = until_cancelled(&mut cancel) => break,
                    result = sink.deliver(update) => {
                        if result.is_err() {
                            tracing::warn!("Sink closed, dropping further updates");
                            break;
                        }
                        delivered += 1;
                        delivered_len = Some(len);
                    }
                }
            }

            if finished || updates.changed().await.is_err() {
                break;
            }
        }

        delivered
    }

    /// Send the single terminal message and release the session
    async fn deliver_terminal(
        &self,
        lease: SessionLease,
        error: Option<RelayError>,
        stats: RelayStats,
        sink: &dyn UpdateSink,
    ) -> RelayOutcome {
        let session = lease.snapshot();
        let status = session
            .state
            .terminal_status()
            .unwrap_or(TerminalStatus::Failed);

        let message = RelayMessage::terminal(
            session.client_id.clone(),
            session.id.clone(),
            session.accumulated_text.clone(),
            status,
            error.as_ref().map(ToString::to_string),
        );
        if sink.deliver(message).await.is_err() {
            tracing::warn!("Sink closed before the terminal message was delivered");
        }

        match &error {
            Some(e) => tracing::warn!(
                status = %status,
                error = %e,
                chars = session.accumulated_text.len(),
                chunks = stats.chunks_received,
                "Session failed"
            ),
            None => tracing::info!(
                status = %status,
                chars = session.accumulated_text.len(),
                chunks = stats.chunks_received,
                updates = stats.updates_delivered,
                coalesced = stats.updates_coalesced(),
                elapsed_ms = u64::try_from(stats.duration.as_millis()).unwrap_or(u64::MAX),
                "Session finished"
            ),
        }

        // Releasing the lease wakes a session waiting to supersede this one
        drop(lease);

        RelayOutcome {
            session,
            status,
            error,
            stats,
        }
    }
}
