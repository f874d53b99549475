//! Registry of live sessions.
//!
//! Every accepted connection that passes the session cap gets an entry for
//! as long as its task runs. The registry is the source for the control
//! socket's session listing and for shutdown, which cancels every entry.

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

/// Unique session identifier.
pub type SessionId = String;

/// Shared view of one live session.
#[derive(Debug)]
pub struct SessionHandle {
    id: SessionId,
    peer: SocketAddr,
    connected_at: SystemTime,
    login: OnceLock<String>,
    cancel: CancellationToken,
}

impl SessionHandle {
    /// Session identifier.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Remote address of the client.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Login the session authenticated as, if it has.
    pub fn login(&self) -> Option<&str> {
        self.login.get().map(String::as_str)
    }

    /// Record the authenticated login. Only the first call has an effect.
    pub fn set_login(&self, login: &str) {
        let _ = self.login.set(login.to_string());
    }

    /// Token cancelled when the session must end.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Ask the session to end.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Point-in-time description of the session.
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            peer: self.peer,
            login: self.login().map(str::to_string),
            connected_at: self
                .connected_at
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
        }
    }
}

/// Information about a session, as reported to the control socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Unique session identifier.
    pub id: SessionId,
    /// Remote address of the client.
    pub peer: SocketAddr,
    /// Authenticated login, once known.
    pub login: Option<String>,
    /// Unix timestamp of the connection.
    pub connected_at: u64,
}

/// Thread-safe set of live sessions.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<SessionHandle>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session for `peer`. The session stays registered until the
    /// returned guard is dropped.
    ///
    /// The session's cancel token is a child of `parent`, so cancelling
    /// `parent` ends every session registered under it.
    pub fn register(
        self: &Arc<Self>,
        peer: SocketAddr,
        parent: &CancellationToken,
    ) -> RegistrationGuard {
        let handle = Arc::new(SessionHandle {
            id: uuid::Uuid::new_v4().to_string(),
            peer,
            connected_at: SystemTime::now(),
            login: OnceLock::new(),
            cancel: parent.child_token(),
        });
        self.sessions
            .insert(handle.id.clone(), Arc::clone(&handle));

        tracing::debug!(session_id = %handle.id, peer = %peer, "Registered session");

        RegistrationGuard {
            registry: Arc::clone(self),
            handle,
        }
    }

    /// Remove a session. Removing an unknown id is a no-op.
    pub fn remove(&self, id: &str) -> Option<Arc<SessionHandle>> {
        let removed = self.sessions.remove(id).map(|(_, handle)| handle);
        if removed.is_some() {
            tracing::debug!(session_id = %id, "Unregistered session");
        }
        removed
    }

    /// Look up a session by id.
    pub fn get(&self, id: &str) -> Option<Arc<SessionHandle>> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Handles of all live sessions.
    pub fn handles(&self) -> Vec<Arc<SessionHandle>> {
        self.sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Descriptions of all live sessions, oldest first.
    pub fn snapshot(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> =
            self.sessions.iter().map(|entry| entry.value().info()).collect();
        sessions.sort_by(|a, b| a.connected_at.cmp(&b.connected_at).then(a.id.cmp(&b.id)));
        sessions
    }

    /// Cancel one session. Returns `false` if the id is unknown.
    pub fn cancel(&self, id: &str) -> bool {
        match self.get(id) {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every live session.
    pub fn cancel_all(&self) {
        for handle in self.handles() {
            handle.cancel();
        }
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session is live.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Keeps a session registered while alive.
#[derive(Debug)]
pub struct RegistrationGuard {
    registry: Arc<SessionRegistry>,
    handle: Arc<SessionHandle>,
}

impl RegistrationGuard {
    /// The registered session.
    pub fn handle(&self) -> &Arc<SessionHandle> {
        &self.handle
    }
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.handle.id);
    }
}
