//! Session Manager
//!
//! Single source of truth for "which session, if any, is active per client".
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                      SessionManager                        │
//! │   Mutex<HashMap<ClientId, ActiveSession>>                  │
//! │   ┌──────────────────────┐  ┌──────────────────────┐       │
//! │   │ panel-1 → session A  │  │ panel-2 → session B  │  ...  │
//! │   └──────────┬───────────┘  └──────────┬───────────┘       │
//! └──────────────┼─────────────────────────┼───────────────────┘
//!                │ watch::Sender<Session>  │
//!                ▼                         ▼
//!          SessionLease A            SessionLease B
//!          (RelayChannel)            (RelayChannel)
//! ```
//!
//! Each session lives in a `watch` slot. The relay that holds the
//! [`SessionLease`] is the only writer of its text; the manager reads the
//! slot for lookups and writes to it exactly once, to mark it Cancelled.
//! Starting a session for a client that already has one supersedes the old
//! session: it is cancelled and the new lease waits until the old relay has
//! delivered its terminal message before doing anything.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::error::RelayError;
use crate::messages::{ClientId, SessionId};
use crate::session::{PromptRequest, Session, SessionState};

type SessionTable = Mutex<HashMap<ClientId, ActiveSession>>;

/// Table entry for a client's current session
struct ActiveSession {
    slot: Arc<watch::Sender<Session>>,
}

impl ActiveSession {
    fn id(&self) -> SessionId {
        self.slot.borrow().id.clone()
    }

    /// Mark the session Cancelled; no-op if it already ended
    fn cancel(&self) -> bool {
        self.slot.send_if_modified(|session| {
            if session.state.is_terminal() {
                return false;
            }
            session.transition(SessionState::Cancelled).is_ok()
        })
    }
}

/// Tracks the active session of every client
pub struct SessionManager {
    table: Arc<SessionTable>,
    total_started: AtomicU64,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionManager {
    /// Create an empty manager
    #[must_use]
    pub fn new() -> Self {
        Self {
            table: Arc::new(Mutex::new(HashMap::new())),
            total_started: AtomicU64::new(0),
        }
    }

    /// Start a session for the request's client
    ///
    /// Any session the client already has is cancelled first (supersede
    /// policy). The returned lease must be handed to a
    /// [`RelayChannel`](crate::relay::RelayChannel); dropping it releases the
    /// client's slot.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::DuplicateSession`] if the generated session ID
    /// collides with a session currently in the table. Only registered
    /// sessions are checked; uniqueness over the manager's lifetime rests on
    /// UUID v4.
    pub fn start_session(&self, request: &PromptRequest) -> Result<SessionLease, RelayError> {
        self.register(Session::new(request))
    }

    fn register(&self, session: Session) -> Result<SessionLease, RelayError> {
        let session_id = session.id.clone();
        let client_id = session.client_id.clone();

        let mut table = self.table.lock();

        if table.values().any(|active| active.id() == session_id) {
            return Err(RelayError::DuplicateSession(session_id));
        }

        let predecessor = table.remove(&client_id).map(|previous| {
            let previous_id = previous.id();
            if previous.cancel() {
                tracing::info!(
                    client_id = %client_id,
                    session_id = %previous_id,
                    superseded_by = %session_id,
                    "Superseding active session"
                );
            }
            previous.slot.subscribe()
        });

        let slot = Arc::new(watch::Sender::new(session));
        table.insert(
            client_id.clone(),
            ActiveSession {
                slot: Arc::clone(&slot),
            },
        );
        drop(table);

        self.total_started.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(client_id = %client_id, session_id = %session_id, "Session started");

        Ok(SessionLease {
            session_id,
            client_id,
            slot,
            predecessor,
            table: Arc::downgrade(&self.table),
        })
    }

    /// Cancel the client's active session
    ///
    /// Returns `false` (and does nothing else) if the client has no active
    /// session.
    pub fn cancel_session(&self, client_id: &ClientId) -> bool {
        let Some(active) = self.table.lock().remove(client_id) else {
            tracing::debug!(client_id = %client_id, "Cancel requested but no active session");
            return false;
        };

        let cancelled = active.cancel();
        tracing::info!(
            client_id = %client_id,
            session_id = %active.id(),
            cancelled,
            "Session cancelled"
        );
        cancelled
    }

    /// Snapshot of the client's active session
    ///
    /// Sessions that already reached a terminal state but have not yet
    /// delivered their terminal message are not reported.
    #[must_use]
    pub fn get_active_session(&self, client_id: &ClientId) -> Option<Session> {
        let table = self.table.lock();
        let session = table.get(client_id)?.slot.borrow();
        session.state.is_active().then(|| session.clone())
    }

    /// Number of clients with an active session
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.table
            .lock()
            .values()
            .filter(|active| active.slot.borrow().state.is_active())
            .count()
    }

    /// Cancel every active session, returning how many were cancelled
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<ActiveSession> = self.table.lock().drain().map(|(_, a)| a).collect();
        let cancelled = drained.iter().filter(|active| active.cancel()).count();
        if cancelled > 0 {
            tracing::info!(cancelled, "Cancelled all active sessions");
        }
        cancelled
    }

    /// Total sessions started over the manager's lifetime
    #[must_use]
    pub fn total_sessions_started(&self) -> u64 {
        self.total_started.load(Ordering::Relaxed)
    }
}

/// Exclusive right to drive one session
///
/// Held by the relay for the session's whole lifetime. Dropping the lease
/// removes the session from the manager's table (if it is still the client's
/// current one) and wakes anything waiting on it as a predecessor.
pub struct SessionLease {
    session_id: SessionId,
    client_id: ClientId,
    slot: Arc<watch::Sender<Session>>,
    predecessor: Option<watch::Receiver<Session>>,
    table: Weak<SessionTable>,
}

impl SessionLease {
    /// ID of the leased session
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Client that owns the session
    #[must_use]
    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    /// Current snapshot of the session
    #[must_use]
    pub fn snapshot(&self) -> Session {
        self.slot.borrow().clone()
    }

    /// Current state of the session
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.slot.borrow().state
    }

    /// Whether this session superseded another one
    #[must_use]
    pub fn has_predecessor(&self) -> bool {
        self.predecessor.is_some()
    }

    /// Subscribe to changes of the session
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.slot.subscribe()
    }

    /// Wait until the superseded session's relay has fully finished
    ///
    /// Returns immediately when there is no predecessor.
    pub async fn wait_for_predecessor(&mut self) {
        if let Some(mut previous) = self.predecessor.take() {
            // The channel closes once the previous lease is dropped, which
            // happens after its terminal message went out.
            while previous.changed().await.is_ok() {}
        }
    }

    /// Mutate the session in place
    ///
    /// Watchers are only notified when `f` succeeds.
    pub(crate) fn modify(
        &self,
        f: impl FnOnce(&mut Session) -> Result<(), RelayError>,
    ) -> Result<(), RelayError> {
        let mut outcome = Ok(());
        self.slot.send_if_modified(|session| match f(session) {
            Ok(()) => true,
            Err(e) => {
                outcome = Err(e);
                false
            }
        });
        outcome
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        self.slot.send_if_modified(|session| {
            if session.state.is_terminal() {
                return false;
            }
            session.transition(SessionState::Cancelled).is_ok()
        });

        let Some(table) = self.table.upgrade() else {
            return;
        };
        let mut table = table.lock();
        let is_current = table
            .get(&self.client_id)
            .is_some_and(|active| active.id() == self.session_id);
        if is_current {
            table.remove(&self.client_id);
            tracing::debug!(
                client_id = %self.client_id,
                session_id = %self.session_id,
                "Session released"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(client: &str, text: &str) -> PromptRequest {
        PromptRequest::new(ClientId::new(client), text).unwrap()
    }

    #[test]
    fn test_start_registers_active_session() {
        let manager = SessionManager::new();
        let lease = manager.start_session(&request("panel", "hello")).unwrap();

        let active = manager.get_active_session(&ClientId::new("panel")).unwrap();
        assert_eq!(&active.id, lease.session_id());
        assert_eq!(active.state, SessionState::Pending);
        assert_eq!(manager.active_count(), 1);
        assert_eq!(manager.total_sessions_started(), 1);
        assert!(!lease.has_predecessor());
    }

    #[test]
    fn test_colliding_session_id_is_refused() {
        let manager = SessionManager::new();
        let first = manager.start_session(&request("panel-a", "one")).unwrap();

        let mut clash = Session::new(&request("panel-b", "two"));
        clash.id = first.session_id().clone();

        assert_eq!(
            manager.register(clash).err(),
            Some(RelayError::DuplicateSession(first.session_id().clone()))
        );
        assert!(manager.get_active_session(&ClientId::new("panel-b")).is_none());
        assert_eq!(first.state(), SessionState::Pending);
        assert_eq!(manager.total_sessions_started(), 1);
    }

    #[test]
    fn test_second_start_supersedes_first() {
        let manager = SessionManager::new();
        let first = manager.start_session(&request("panel", "one")).unwrap();
        let second = manager.start_session(&request("panel", "two")).unwrap();

        assert_eq!(first.state(), SessionState::Cancelled);
        assert_eq!(second.state(), SessionState::Pending);
        assert!(second.has_predecessor());
        assert_ne!(first.session_id(), second.session_id());

        let active = manager.get_active_session(&ClientId::new("panel")).unwrap();
        assert_eq!(&active.id, second.session_id());
        assert_eq!(manager.active_count(), 1);
    }

    #[test]
    fn test_dropping_superseded_lease_keeps_new_session() {
        let manager = SessionManager::new();
        let first = manager.start_session(&request("panel", "one")).unwrap();
        let second = manager.start_session(&request("panel", "two")).unwrap();

        drop(first);

        let active = manager.get_active_session(&ClientId::new("panel")).unwrap();
        assert_eq!(&active.id, second.session_id());
    }

    #[test]
    fn test_cancel_without_session_returns_false() {
        let manager = SessionManager::new();
        assert!(!manager.cancel_session(&ClientId::new("nobody")));
    }

    #[test]
    fn test_cancel_marks_session_cancelled() {
        let manager = SessionManager::new();
        let lease = manager.start_session(&request("panel", "hi")).unwrap();

        assert!(manager.cancel_session(&ClientId::new("panel")));
        assert_eq!(lease.state(), SessionState::Cancelled);
        assert!(manager.get_active_session(&ClientId::new("panel")).is_none());
        assert!(!manager.cancel_session(&ClientId::new("panel")));
    }

    #[test]
    fn test_clients_are_independent() {
        let manager = SessionManager::new();
        let a = manager.start_session(&request("a", "x")).unwrap();
        let b = manager.start_session(&request("b", "y")).unwrap();

        assert!(manager.cancel_session(&ClientId::new("a")));
        assert_eq!(a.state(), SessionState::Cancelled);
        assert_eq!(b.state(), SessionState::Pending);
        assert_eq!(manager.active_count(), 1);
    }

    #[test]
    fn test_drop_releases_slot() {
        let manager = SessionManager::new();
        let lease = manager.start_session(&request("panel", "hi")).unwrap();
        drop(lease);
        assert!(manager.get_active_session(&ClientId::new("panel")).is_none());
        assert_eq!(manager.active_count(), 0);
    }

    #[test]
    fn test_terminal_session_not_reported_active() {
        let manager = SessionManager::new();
        let lease = manager.start_session(&request("panel", "hi")).unwrap();
        lease.modify(|s| s.transition(SessionState::Failed)).unwrap();

        assert!(manager.get_active_session(&ClientId::new("panel")).is_none());
        assert_eq!(manager.active_count(), 0);
    }

    #[test]
    fn test_cancel_all() {
        let manager = SessionManager::new();
        let leases: Vec<_> = ["a", "b", "c"]
            .iter()
            .map(|c| manager.start_session(&request(c, "hi")).unwrap())
            .collect();

        assert_eq!(manager.cancel_all(), 3);
        assert!(leases
            .iter()
            .all(|l| l.state() == SessionState::Cancelled));
        assert_eq!(manager.active_count(), 0);
    }

    #[tokio::test]
    async fn test_wait_for_predecessor_returns_after_drop() {
        let manager = SessionManager::new();
        let first = manager.start_session(&request("panel", "one")).unwrap();
        let mut second = manager.start_session(&request("panel", "two")).unwrap();

        let waiter = tokio::spawn(async move {
            second.wait_for_predecessor().await;
            second
        });

        assert!(!waiter.is_finished());
        drop(first);

        let second = waiter.await.unwrap();
        assert!(!second.has_predecessor());
    }
}
