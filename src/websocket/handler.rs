use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use yrs::sync::{Message as ProtocolMessage, SyncMessage};
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{ReadTxn, Transact};

use crate::models::{Outbox, Session};
use crate::websocket::{msg_awareness_handler, msg_sync_handler};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    /// Target document name; the configured default applies when absent.
    pub document: Option<String>,
}

/// WebSocket handler
pub async fn websocket_handler(
    Query(params): Query<WsParams>,
    State(app_state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> Response {
    let doc_name = params
        .document
        .unwrap_or_else(|| app_state.config.default_doc.clone());
    ws.on_upgrade(move |socket| handle_socket(socket, doc_name, app_state))
}

/// Drive one client connection from accept to cleanup.
async fn handle_socket(socket: WebSocket, doc_name: String, app_state: Arc<AppState>) {
    let conn_id = Uuid::new_v4();
    info!(doc = %doc_name, conn_id = %conn_id, "WebSocket connection established");

    let registry = &app_state.registry;
    let session = registry.get_or_create(&doc_name).await;

    let (outbox, mut outbox_rx) = mpsc::unbounded_channel::<Message>();
    let (mut sink, mut stream) = socket.split();

    // Writer task drains the outbox. A failed send means the transport is
    // gone; the read side notices and runs the standard cleanup.
    let writer = tokio::spawn(async move {
        while let Some(msg) = outbox_rx.recv().await {
            if sink.send(msg).await.is_err() {
                break;
            }
        }
    });

    // Register before the handshake so fan-out can already reach us.
    session.state().await.connect(conn_id, outbox.clone());
    send_initial_sync(&session, &outbox).await;

    let mut probe =
        tokio::time::interval(Duration::from_secs(app_state.config.heartbeat_interval_secs));
    probe.tick().await; // the first tick fires immediately
    let mut pong_seen = true;

    loop {
        tokio::select! {
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Binary(data))) => {
                    dispatch_frame(&session, conn_id, &outbox, &data).await;
                }
                Some(Ok(Message::Pong(_))) => pong_seen = true,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {} // text frames carry nothing in this protocol
                Some(Err(e)) => {
                    debug!(conn_id = %conn_id, "transport error: {}", e);
                    break;
                }
            },
            _ = probe.tick() => {
                if !pong_seen {
                    warn!(doc = %doc_name, conn_id = %conn_id, "heartbeat timeout, closing connection");
                    break;
                }
                pong_seen = false;
                if outbox.send(Message::Ping(Vec::new())).is_err() {
                    break;
                }
            }
        }
    }

    // Shared cleanup path for client close, transport failure and heartbeat
    // timeout. Disconnecting twice is harmless.
    session.state().await.disconnect(conn_id);
    registry.remove_if_empty(&doc_name).await;
    drop(outbox);
    let _ = writer.await;
    info!(doc = %doc_name, conn_id = %conn_id, "WebSocket connection terminated");
}

/// Entering Syncing: ask the client for its missing state and, if any
/// presence is already known, hand over the full awareness snapshot. Neither
/// blocks the read loop.
async fn send_initial_sync(session: &Session, outbox: &Outbox) {
    let state = session.state().await;
    let state_vector = state.doc().transact().state_vector();
    let step1 = ProtocolMessage::Sync(SyncMessage::SyncStep1(state_vector)).encode_v1();
    let _ = outbox.send(Message::Binary(step1));

    match state.awareness().update() {
        Ok(snapshot) if !snapshot.clients.is_empty() => {
            let frame = ProtocolMessage::Awareness(snapshot).encode_v1();
            let _ = outbox.send(Message::Binary(frame));
        }
        Ok(_) => {}
        Err(e) => debug!("could not encode awareness snapshot: {}", e),
    }
}

/// Demultiplex one inbound frame. A frame that fails to decode is logged and
/// dropped; it never costs the client its connection.
async fn dispatch_frame(session: &Session, conn_id: Uuid, outbox: &Outbox, data: &[u8]) {
    let msg = match ProtocolMessage::decode_v1(data) {
        Ok(msg) => msg,
        Err(e) => {
            warn!(conn_id = %conn_id, "malformed frame dropped: {}", e);
            return;
        }
    };
    let mut state = session.state().await;
    match msg {
        ProtocolMessage::Sync(sync_msg) => {
            msg_sync_handler::handle_sync_message(&mut state, conn_id, outbox, sync_msg);
        }
        ProtocolMessage::Awareness(update) => {
            msg_awareness_handler::handle_awareness_message(&mut state, conn_id, update, data);
        }
        ProtocolMessage::AwarenessQuery => {
            msg_awareness_handler::handle_awareness_query(&state, conn_id, outbox);
        }
        other => debug!(conn_id = %conn_id, "unsupported frame ignored: {:?}", other),
    }
}
