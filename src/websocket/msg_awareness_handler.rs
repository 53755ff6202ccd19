use axum::extract::ws::Message as WsMessage;
use tracing::{debug, warn};
use uuid::Uuid;
use yrs::sync::awareness::AwarenessUpdate;
use yrs::sync::Message;
use yrs::updates::encoder::Encode;

use crate::models::{Outbox, SessionState};

/// Merge a presence delta, remembering which awareness client ids the
/// originating connection now controls, and relay the raw frame verbatim to
/// every other connection in the session.
pub fn handle_awareness_message(
    state: &mut SessionState,
    conn_id: Uuid,
    update: AwarenessUpdate,
    raw_frame: &[u8],
) {
    state.record_presence(conn_id, &update);
    if let Err(e) = state.awareness_mut().apply_update(update) {
        warn!(conn_id = %conn_id, "awareness delta dropped: {}", e);
        return;
    }
    state.broadcast_except(conn_id, raw_frame.to_vec());
}

/// Answer an awareness query with the full presence snapshot.
pub fn handle_awareness_query(state: &SessionState, conn_id: Uuid, outbox: &Outbox) {
    match state.awareness().update() {
        Ok(snapshot) => {
            let frame = Message::Awareness(snapshot).encode_v1();
            if outbox.send(WsMessage::Binary(frame)).is_err() {
                debug!(conn_id = %conn_id, "awareness reply dropped, connection is closing");
            }
        }
        Err(e) => debug!(conn_id = %conn_id, "could not encode awareness snapshot: {}", e),
    }
}
