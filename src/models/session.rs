use std::collections::HashMap;

use axum::extract::ws::Message;
use tokio::sync::{mpsc, Mutex, MutexGuard};
use tracing::{debug, warn};
use uuid::Uuid;
use yrs::sync::awareness::{Awareness, AwarenessUpdate, AwarenessUpdateEntry};
use yrs::sync::Message as ProtocolMessage;
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Doc, GetString, Options, ReadTxn, StateVector, Transact, Update};

/// Name of the shared text root carrying the document's primary content.
/// Must match the root the editor binding on the client side uses.
pub const TEXT_ROOT: &str = "codemirror";

/// Per-connection outgoing frame queue, drained by the connection's writer task.
pub type Outbox = mpsc::UnboundedSender<Message>;

/// In-memory binding of a document name to its replica, awareness state and
/// connected clients. All three are mutated only under the single state mutex.
pub struct Session {
    name: String,
    state: Mutex<SessionState>,
}

pub struct SessionState {
    awareness: Awareness,
    clients: HashMap<Uuid, SessionClient>,
}

pub struct SessionClient {
    outbox: Outbox,
    /// Awareness client ids this connection has announced, with the last
    /// clock seen for each. Used to retract exactly these entries on close.
    presence: HashMap<u64, u32>,
}

impl Session {
    pub fn new(name: impl Into<String>, gc: bool) -> Self {
        let doc = Doc::with_options(Options {
            skip_gc: !gc,
            ..Options::default()
        });
        // Materialize the primary text root so an empty document still
        // serializes and mirrors predictably.
        let _ = doc.get_or_insert_text(TEXT_ROOT);
        Self {
            name: name.into(),
            state: Mutex::new(SessionState {
                awareness: Awareness::new(doc),
                clients: HashMap::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().await
    }
}

impl SessionState {
    pub fn awareness(&self) -> &Awareness {
        &self.awareness
    }

    pub fn awareness_mut(&mut self) -> &mut Awareness {
        &mut self.awareness
    }

    pub fn doc(&self) -> &Doc {
        self.awareness.doc()
    }

    #[cfg(test)]
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Register a connection's outbox under its connection id.
    pub fn connect(&mut self, conn_id: Uuid, outbox: Outbox) {
        self.clients.insert(
            conn_id,
            SessionClient {
                outbox,
                presence: HashMap::new(),
            },
        );
    }

    /// Remove a connection and retract the awareness entries it contributed,
    /// broadcasting the retraction to the remaining peers. Calling this for a
    /// connection that already left is a no-op.
    pub fn disconnect(&mut self, conn_id: Uuid) -> bool {
        if !self.clients.contains_key(&conn_id) {
            return false;
        }
        if let Some(frame) = self.remove_and_retract(conn_id) {
            let dead = self.send_except(conn_id, &frame);
            self.reap(dead);
        }
        true
    }

    /// Remove `conn_id` from the client set and fold a retraction of its
    /// recorded awareness entries into the session, returning the retraction
    /// frame to relay. `None` when the connection had announced no presence.
    fn remove_and_retract(&mut self, conn_id: Uuid) -> Option<Vec<u8>> {
        let client = self.clients.remove(&conn_id)?;
        if client.presence.is_empty() {
            return None;
        }
        let mut retraction = AwarenessUpdate {
            clients: HashMap::new(),
        };
        for (client_id, clock) in client.presence {
            retraction.clients.insert(
                client_id,
                AwarenessUpdateEntry {
                    clock: clock + 1,
                    json: "null".into(),
                },
            );
        }
        let frame = ProtocolMessage::Awareness(retraction.clone()).encode_v1();
        if let Err(e) = self.awareness.apply_update(retraction) {
            debug!(conn_id = %conn_id, "failed to retract awareness entries: {}", e);
        }
        Some(frame)
    }

    /// Record the awareness client ids carried by a delta against the
    /// connection that sent it. Null entries are retractions and un-record.
    pub fn record_presence(&mut self, conn_id: Uuid, update: &AwarenessUpdate) {
        let Some(client) = self.clients.get_mut(&conn_id) else {
            return;
        };
        for (client_id, entry) in &update.clients {
            if &*entry.json == "null" {
                client.presence.remove(client_id);
            } else {
                client.presence.insert(*client_id, entry.clock);
            }
        }
    }

    /// Send a binary frame to every connection except `from`. A connection
    /// whose outbox is gone leaves through the normal close path: its
    /// presence is retracted, not just dropped.
    pub fn broadcast_except(&mut self, from: Uuid, frame: Vec<u8>) {
        let dead = self.send_except(from, &frame);
        self.reap(dead);
    }

    /// Deliver a frame to everyone but `from`, reporting the connections
    /// whose outbox is closed instead of removing them.
    fn send_except(&self, from: Uuid, frame: &[u8]) -> Vec<Uuid> {
        let mut dead: Vec<Uuid> = Vec::new();
        for (id, client) in &self.clients {
            if *id == from {
                continue;
            }
            if client.outbox.send(Message::Binary(frame.to_vec())).is_err() {
                dead.push(*id);
            }
        }
        dead
    }

    /// Drop the listed connections as if each had closed: remove, retract
    /// their awareness entries and relay the retractions. Relaying can expose
    /// further dead outboxes, so the worklist is drained iteratively.
    fn reap(&mut self, mut dead: Vec<Uuid>) {
        while let Some(id) = dead.pop() {
            debug!(conn_id = %id, "removed dead subscriber");
            if let Some(frame) = self.remove_and_retract(id) {
                dead.extend(self.send_except(id, &frame));
            }
        }
    }

    /// Best-effort Close frame to every connected client (shutdown path).
    pub fn close_all(&mut self) {
        for client in self.clients.values() {
            let _ = client.outbox.send(Message::Close(None));
        }
    }

    /// Full-state encoding of the replica, the authoritative snapshot format.
    pub fn encode_full_state(&self) -> Vec<u8> {
        self.doc()
            .transact()
            .encode_state_as_update_v1(&StateVector::default())
    }

    /// Current contents of the primary text root.
    pub fn text_content(&self) -> String {
        let doc = self.doc();
        let text = doc.get_or_insert_text(TEXT_ROOT);
        let txn = doc.transact();
        text.get_string(&txn)
    }

    /// Apply a previously persisted full-state snapshot.
    pub fn apply_snapshot(&mut self, name: &str, bytes: &[u8]) {
        let update = match Update::decode_v1(bytes) {
            Ok(update) => update,
            Err(e) => {
                warn!(doc = %name, "corrupt snapshot, starting cold: {}", e);
                return;
            }
        };
        let doc = self.doc();
        let mut txn = doc.transact_mut();
        if let Err(e) = txn.apply_update(update) {
            warn!(doc = %name, "failed to apply snapshot, starting cold: {}", e);
        }
    }
}
