use axum::extract::ws::Message as WsMessage;
use tracing::{debug, warn};
use uuid::Uuid;
use yrs::sync::{Message, SyncMessage};
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{ReadTxn, Transact, Update};

use crate::models::{Outbox, SessionState};

/// Handle a sync frame. Replies go only to the originating connection; an
/// apply that mutated the replica is published to every other connection,
/// never echoed back to the sender.
pub fn handle_sync_message(
    state: &mut SessionState,
    conn_id: Uuid,
    outbox: &Outbox,
    msg: SyncMessage,
) {
    match msg {
        // state-vector request: answer with everything the peer is missing
        SyncMessage::SyncStep1(state_vector) => {
            let diff = state
                .doc()
                .transact()
                .encode_state_as_update_v1(&state_vector);
            let reply = Message::Sync(SyncMessage::SyncStep2(diff.into())).encode_v1();
            if outbox.send(WsMessage::Binary(reply)).is_err() {
                debug!(conn_id = %conn_id, "sync reply dropped, connection is closing");
            }
        }
        SyncMessage::SyncStep2(update) | SyncMessage::Update(update) => {
            let decoded = match Update::decode_v1(&update) {
                Ok(decoded) => decoded,
                Err(e) => {
                    warn!(conn_id = %conn_id, "undecodable update dropped: {}", e);
                    return;
                }
            };
            {
                let doc = state.doc();
                let mut txn = doc.transact_mut();
                if let Err(e) = txn.apply_update(decoded) {
                    warn!(conn_id = %conn_id, "update failed to apply: {}", e);
                    return;
                }
            }
            let frame = Message::Sync(SyncMessage::Update(update)).encode_v1();
            state.broadcast_except(conn_id, frame);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Session, TEXT_ROOT};
    use tokio::sync::mpsc;
    use yrs::{Doc, GetString, StateVector, Text};

    fn update_inserting(doc: &Doc, at: u32, s: &str) -> Vec<u8> {
        let text = doc.get_or_insert_text(TEXT_ROOT);
        let before = doc.transact().state_vector();
        text.insert(&mut doc.transact_mut(), at, s);
        doc.transact().encode_state_as_update_v1(&before)
    }

    #[tokio::test]
    async fn step1_is_answered_with_a_step2_diff_to_the_sender_only() {
        let session = Session::new("doc", true);
        let mut state = session.state().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = Uuid::new_v4();
        state.connect(conn, tx.clone());

        // seed server content
        let seed = Doc::new();
        let update = update_inserting(&seed, 0, "hello");
        handle_sync_message(&mut state, conn, &tx, SyncMessage::Update(update.into()));
        assert!(rx.try_recv().is_err(), "no other clients and no echo");

        handle_sync_message(
            &mut state,
            conn,
            &tx,
            SyncMessage::SyncStep1(StateVector::default()),
        );
        let WsMessage::Binary(frame) = rx.try_recv().unwrap() else {
            panic!("expected binary reply");
        };
        let Message::Sync(SyncMessage::SyncStep2(diff)) = Message::decode_v1(&frame).unwrap()
        else {
            panic!("expected sync step 2");
        };

        let receiver = Doc::new();
        receiver
            .transact_mut()
            .apply_update(Update::decode_v1(&diff).unwrap())
            .unwrap();
        let text = receiver.get_or_insert_text(TEXT_ROOT);
        assert_eq!(text.get_string(&receiver.transact()), "hello");
    }

    #[tokio::test]
    async fn applied_updates_fan_out_to_the_other_connections_exactly_once() {
        let session = Session::new("doc", true);
        let mut state = session.state().await;
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        state.connect(a, tx_a.clone());
        state.connect(b, tx_b);

        let doc = Doc::new();
        let update = update_inserting(&doc, 0, "hi");
        handle_sync_message(&mut state, a, &tx_a, SyncMessage::Update(update.into()));

        assert_eq!(state.text_content(), "hi");
        assert!(rx_a.try_recv().is_err(), "sender must not see its own update");
        assert!(matches!(rx_b.try_recv(), Ok(WsMessage::Binary(_))));
        assert!(rx_b.try_recv().is_err(), "exactly one fan-out frame");
    }

    #[tokio::test]
    async fn convergence_is_order_independent() {
        let doc_x = Doc::new();
        let doc_y = Doc::new();
        let ux = update_inserting(&doc_x, 0, "foo");
        let uy = update_inserting(&doc_y, 0, "bar");

        // session 1 sees x then y, session 2 sees y then x
        let s1 = Session::new("one", true);
        let s2 = Session::new("two", true);
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = Uuid::new_v4();
        {
            let mut state = s1.state().await;
            state.connect(conn, tx.clone());
            handle_sync_message(&mut state, conn, &tx, SyncMessage::Update(ux.clone().into()));
            handle_sync_message(&mut state, conn, &tx, SyncMessage::Update(uy.clone().into()));
        }
        {
            let mut state = s2.state().await;
            state.connect(conn, tx.clone());
            handle_sync_message(&mut state, conn, &tx, SyncMessage::Update(uy.into()));
            handle_sync_message(&mut state, conn, &tx, SyncMessage::Update(ux.into()));
        }

        let one = s1.state().await.text_content();
        let two = s2.state().await.text_content();
        assert_eq!(one, two);
        assert_eq!(one.len(), 6);
    }

    #[tokio::test]
    async fn an_undecodable_update_is_dropped_without_side_effects() {
        let session = Session::new("doc", true);
        let mut state = session.state().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = Uuid::new_v4();
        state.connect(conn, tx.clone());

        handle_sync_message(
            &mut state,
            conn,
            &tx,
            SyncMessage::Update(vec![0xde, 0xad, 0xbe, 0xef].into()),
        );
        assert_eq!(state.text_content(), "");
        assert!(rx.try_recv().is_err());
    }
}
