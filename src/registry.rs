//! Concurrent session registry.
//!
//! Maps session ids to live sessions. Readers share the lock; writers
//! exclude. [`Registry::reap`] removes sessions that reached the Closed
//! state, and is driven by the server's periodic reaper task.

use std::{collections::HashMap, sync::Arc};

use async_lock::RwLock;

use crate::session::{Session, SessionState};

/// The pool of known sessions, open or closed, keyed by id.
#[derive(Debug, Default)]
pub struct Registry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a session by id.
    pub async fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Register a session under its id.
    ///
    /// Sessions with an empty id are rejected with a diagnostic.
    pub async fn add(&self, session: Arc<Session>) {
        if session.id().is_empty() {
            tracing::warn!("refusing to register session with empty id");
            return;
        }
        self.sessions
            .write()
            .await
            .insert(session.id().to_owned(), session);
    }

    /// Remove a session.
    pub async fn remove(&self, session: &Session) {
        if self.sessions.write().await.remove(session.id()).is_some() {
            tracing::debug!(session_id = %session.id(), "removed session");
        }
    }

    /// Number of registered sessions, open or closed.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Whether the registry holds no sessions.
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Delete every session that was Closed at a read snapshot,
    /// returning how many were removed.
    ///
    /// The snapshot is taken under the read lock and released before
    /// deleting under the write lock, so long scans do not starve
    /// concurrent lookups.
    pub async fn reap(&self) -> usize {
        let victims: Vec<String> = {
            let sessions = self.sessions.read().await;
            let mut victims = Vec::new();
            for (id, session) in sessions.iter() {
                if session.state().await == SessionState::Closed {
                    victims.push(id.clone());
                }
            }
            victims
        };

        if victims.is_empty() {
            return 0;
        }

        let mut sessions = self.sessions.write().await;
        let mut removed = 0;
        for id in victims {
            if sessions.remove(&id).is_some() {
                tracing::debug!(session_id = %id, "reaped closed session");
                removed += 1;
            }
        }
        removed
    }
}
