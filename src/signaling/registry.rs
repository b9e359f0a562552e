use dashmap::DashMap;
use std::sync::Arc;

use super::client::ClientHandle;
use super::session::Session;
use crate::state_machine::SessionEvent;

/// Live sessions, at most one per identity.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `session` for its identity. A session it displaces is closed.
    pub fn insert(&self, session: Arc<Session>) -> Option<Arc<Session>> {
        let displaced = self
            .sessions
            .insert(session.identity().to_string(), session.clone());
        // The map shard lock is released before closing.
        if let Some(old) = &displaced {
            if old.id() != session.id() {
                log::info!(
                    "Sessions: {} replaced {} for {}",
                    session.id(),
                    old.id(),
                    session.identity()
                );
                old.transition(SessionEvent::Replaced);
            }
        }
        displaced
    }

    pub fn get(&self, identity: &str) -> Option<Arc<Session>> {
        self.sessions.get(identity).map(|s| s.value().clone())
    }

    /// Remove the entry for `identity` only if it is still `session_id`.
    pub fn remove(&self, identity: &str, session_id: &str) -> Option<Arc<Session>> {
        self.sessions
            .remove_if(identity, |_, s| s.id() == session_id)
            .map(|(_, s)| s)
    }

    pub fn find_by_id(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions
            .iter()
            .find(|entry| entry.value().id() == session_id)
            .map(|entry| entry.value().clone())
    }

    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.sessions.iter().map(|e| e.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Registered client connections by identity, for peer signaling relay.
#[derive(Default)]
pub struct ClientRegistry {
    clients: DashMap<String, ClientHandle>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The newest registration for an identity wins.
    pub fn register(&self, identity: &str, client: ClientHandle) {
        if let Some(old) = self.clients.insert(identity.to_string(), client) {
            log::debug!("Clients: {} re-registered (was {})", identity, old.conn_id());
        }
    }

    /// Remove `identity` only if it still points at `client`'s connection.
    pub fn unregister(&self, identity: &str, client: &ClientHandle) -> bool {
        self.clients
            .remove_if(identity, |_, c| c.same_connection(client))
            .is_some()
    }

    pub fn get(&self, identity: &str) -> Option<ClientHandle> {
        self.clients.get(identity).map(|c| c.value().clone())
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
