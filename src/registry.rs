use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::models::Session;
use crate::persistence::DocStore;

/// Owner of every live session, keyed by document name. Constructed once in
/// `main` and injected through the router state, so tests can stand up
/// isolated instances.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    store: DocStore,
    gc: bool,
}

impl SessionRegistry {
    pub fn new(store: DocStore, gc: bool) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            store,
            gc,
        }
    }

    pub fn store(&self) -> &DocStore {
        &self.store
    }

    /// Look up a session, creating it from the durable snapshot (or cold)
    /// on first reference. Holds the map write lock across the load so a
    /// name never maps to two sessions.
    pub async fn get_or_create(&self, doc_name: &str) -> Arc<Session> {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get(doc_name) {
            return session.clone();
        }
        let session = Arc::new(Session::new(doc_name, self.gc));
        if let Some(bytes) = self.store.load(doc_name).await {
            session.state().await.apply_snapshot(doc_name, &bytes);
        }
        info!(doc = %doc_name, "session created");
        sessions.insert(doc_name.to_string(), session.clone());
        session
    }

    /// Called whenever a connection leaves a session. If nobody is left the
    /// session gets a final flush and is evicted; the next connect reloads
    /// it from disk.
    pub async fn remove_if_empty(&self, doc_name: &str) {
        let mut sessions = self.sessions.write().await;
        let Some(session) = sessions.get(doc_name) else {
            return;
        };
        let encoded = {
            let state = session.state().await;
            if !state.is_empty() {
                return;
            }
            (
                state.encode_full_state(),
                self.store
                    .text_mirror_enabled()
                    .then(|| state.text_content()),
            )
        };
        self.store.write(doc_name, encoded.0, encoded.1).await;
        sessions.remove(doc_name);
        info!(doc = %doc_name, "session flushed and evicted");
    }

    /// Snapshot every live session. Runs on the periodic timer and once at
    /// shutdown; per-document failures are logged by the store and do not
    /// abort the sweep.
    pub async fn persist_all(&self) {
        let sessions: Vec<Arc<Session>> = {
            let map = self.sessions.read().await;
            map.values().cloned().collect()
        };
        debug!(sessions = sessions.len(), "persistence sweep");
        for session in sessions {
            let (snapshot, text) = {
                let state = session.state().await;
                (
                    state.encode_full_state(),
                    self.store
                        .text_mirror_enabled()
                        .then(|| state.text_content()),
                )
            };
            self.store.write(session.name(), snapshot, text).await;
        }
    }

    /// Best-effort Close to every connection of every session (shutdown).
    pub async fn close_all(&self) {
        let sessions: Vec<Arc<Session>> = {
            let map = self.sessions.read().await;
            map.values().cloned().collect()
        };
        for session in sessions {
            session.state().await.close_all();
        }
    }

    /// Orderly teardown: one final persistence sweep, fully awaited, and only
    /// then the Close frames. A client observing the Close can rely on its
    /// document already being on disk.
    pub async fn shutdown(&self) {
        info!("flushing sessions before shutdown");
        self.persist_all().await;
        self.close_all().await;
    }

    #[cfg(test)]
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}
