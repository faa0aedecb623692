use super::connection::{Connection, ConnectionId, OutboundFrame};
use super::room::RoomRegistry;
use super::snapshot::SnapshotStore;
use super::SyncError;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// An edit as sent by a client.
///
/// Both parts are opaque: `data` is the full content payload that replaces
/// the cached snapshot's content, `change` is the descriptor relayed to the
/// other editors.
#[derive(Debug, Deserialize)]
pub struct InboundMessage {
    pub data: Value,
    #[serde(alias = "Change")]
    pub change: Value,
}

/// Result of relaying one edit
#[derive(Debug, Default, PartialEq, Eq)]
pub struct FanOut {
    pub delivered: usize,
    /// Recipients that could not keep up and were asked to disconnect
    pub disconnected: Vec<ConnectionId>,
}

/// Applies inbound edits and relays their change descriptors.
///
/// An edit is applied and fanned out while its room is locked, so every
/// recipient sees the edits of a room in one order.
#[derive(Clone)]
pub struct BroadcastHub {
    snapshots: Arc<SnapshotStore>,
    rooms: RoomRegistry,
}

impl BroadcastHub {
    pub fn new(snapshots: Arc<SnapshotStore>, rooms: RoomRegistry) -> Self {
        Self { snapshots, rooms }
    }

    /// Handle one raw message from `sender`.
    ///
    /// Errors are per-message: the caller logs them and keeps the session.
    pub async fn on_message(&self, sender: &Connection, raw: &str) -> Result<FanOut, SyncError> {
        let message: InboundMessage = serde_json::from_str(raw)?;
        let frame = OutboundFrame::encode(&message.change)?;
        let document_id = sender.document_id();

        let room = self
            .rooms
            .lock_existing(document_id)
            .await
            .ok_or_else(|| SyncError::NotCached(document_id.to_string()))?;

        // Access lists can change while the session is open; the cached
        // snapshot is checked under the room lock, not the flag from join.
        let entry = self
            .snapshots
            .entry(document_id)
            .await
            .ok_or_else(|| SyncError::NotCached(document_id.to_string()))?;
        if entry.is_deleted() {
            return Err(SyncError::NotFound(document_id.to_string()));
        }
        if !entry.can_write(sender.identity()).await {
            sender.set_can_write(false);
            return Err(SyncError::ReadOnly {
                document_id: document_id.to_string(),
                identity: sender.identity().to_string(),
            });
        }

        self.snapshots.apply_edit(document_id, message.data).await?;

        let mut fan_out = FanOut::default();
        for target in room.broadcast_targets(sender.id()) {
            if target.is_close_requested() {
                continue;
            }
            match target.deliver(frame.clone()) {
                Ok(()) => fan_out.delivered += 1,
                Err(e) => {
                    warn!("{}; disconnecting", e);
                    target.request_close();
                    fan_out.disconnected.push(target.id());
                }
            }
        }

        debug!(
            "Relayed change from {} on {} to {} peer(s)",
            sender.id(),
            document_id,
            fan_out.delivered
        );
        Ok(fan_out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scribe_core::{DocumentAttribute, DocumentSnapshot};
    use serde_json::json;
    use std::collections::BTreeSet;
    use tokio::sync::mpsc;

    const ALICE: &str = "alice@example.com";
    const BOB: &str = "bob@example.com";
    const CAROL: &str = "carol@example.com";

    struct Fixture {
        hub: BroadcastHub,
        snapshots: Arc<SnapshotStore>,
        rooms: RoomRegistry,
    }

    async fn fixture() -> Fixture {
        let snapshots = Arc::new(SnapshotStore::new());
        snapshots
            .put(DocumentSnapshot {
                id: "D1".to_string(),
                author: ALICE.to_string(),
                title: "D1".to_string(),
                read_access: BTreeSet::from([CAROL.to_string()]),
                write_access: BTreeSet::from([BOB.to_string()]),
                data: json!({"ops": []}),
            })
            .await;
        let rooms = RoomRegistry::new();
        Fixture {
            hub: BroadcastHub::new(snapshots.clone(), rooms.clone()),
            snapshots,
            rooms,
        }
    }

    async fn join(
        rooms: &RoomRegistry,
        doc: &str,
        identity: &str,
        capacity: usize,
    ) -> (Arc<Connection>, mpsc::Receiver<OutboundFrame>) {
        let (conn, rx) = Connection::channel(doc, identity, identity != CAROL, capacity);
        rooms.join(conn.clone()).await;
        (conn, rx)
    }

    fn edit(n: usize) -> String {
        json!({
            "data": {"ops": [n]},
            "Change": {"op": "insert", "pos": n, "text": "x"}
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_relays_in_order_without_echo() {
        let f = fixture().await;
        let (a, mut rx_a) = join(&f.rooms, "D1", ALICE, 16).await;
        let (_b, mut rx_b) = join(&f.rooms, "D1", ALICE, 16).await;
        let (_c, mut rx_c) = join(&f.rooms, "D1", ALICE, 16).await;

        for n in 0..5 {
            let fan_out = f.hub.on_message(&a, &edit(n)).await.unwrap();
            assert_eq!(fan_out.delivered, 2);
        }

        for rx in [&mut rx_b, &mut rx_c] {
            for n in 0..5 {
                let frame = rx.try_recv().unwrap();
                let change: Value = serde_json::from_str(frame.as_str()).unwrap();
                assert_eq!(change["pos"], json!(n));
            }
        }
        assert!(rx_a.try_recv().is_err());
        assert_eq!(f.snapshots.get("D1").await.unwrap().data, json!({"ops": [4]}));
    }

    #[tokio::test]
    async fn test_lowercase_change_field_is_accepted() {
        let f = fixture().await;
        let (a, _rx_a) = join(&f.rooms, "D1", ALICE, 4).await;
        let (_b, mut rx_b) = join(&f.rooms, "D1", ALICE, 4).await;

        let raw = json!({"data": {"ops": ["y"]}, "change": {"op": "delete"}}).to_string();
        f.hub.on_message(&a, &raw).await.unwrap();
        assert_eq!(rx_b.try_recv().unwrap().as_str(), r#"{"op":"delete"}"#);
    }

    #[tokio::test]
    async fn test_uncached_document_drops_message() {
        let f = fixture().await;
        let (a, _rx_a) = join(&f.rooms, "other", ALICE, 4).await;
        let (_b, mut rx_b) = join(&f.rooms, "other", ALICE, 4).await;

        let err = f.hub.on_message(&a, &edit(0)).await.unwrap_err();
        assert!(matches!(err, SyncError::NotCached(_)));
        assert!(rx_b.try_recv().is_err());
        // Recoverable: the sender is not disconnected
        assert!(!a.is_close_requested());
    }

    #[tokio::test]
    async fn test_malformed_message_is_rejected() {
        let f = fixture().await;
        let (a, _rx_a) = join(&f.rooms, "D1", ALICE, 4).await;

        assert!(matches!(
            f.hub.on_message(&a, "not json").await,
            Err(SyncError::Malformed(_))
        ));
        assert!(matches!(
            f.hub.on_message(&a, r#"{"data": {}}"#).await,
            Err(SyncError::Malformed(_))
        ));
        assert_eq!(f.snapshots.get("D1").await.unwrap().data, json!({"ops": []}));
    }

    #[tokio::test]
    async fn test_read_only_sender_is_ignored() {
        let f = fixture().await;
        let (reader, _rx_r) = join(&f.rooms, "D1", CAROL, 4).await;
        let (_b, mut rx_b) = join(&f.rooms, "D1", ALICE, 4).await;

        let err = f.hub.on_message(&reader, &edit(1)).await.unwrap_err();
        assert!(matches!(err, SyncError::ReadOnly { .. }));
        assert!(rx_b.try_recv().is_err());
        assert_eq!(f.snapshots.get("D1").await.unwrap().data, json!({"ops": []}));
    }

    #[tokio::test]
    async fn test_slow_recipient_is_disconnected_without_stalling_others() {
        let f = fixture().await;
        let (a, _rx_a) = join(&f.rooms, "D1", ALICE, 4).await;
        let (slow, _rx_slow) = join(&f.rooms, "D1", ALICE, 1).await;
        let (_c, mut rx_c) = join(&f.rooms, "D1", ALICE, 4).await;

        let first = f.hub.on_message(&a, &edit(0)).await.unwrap();
        assert_eq!(first.delivered, 2);

        // `slow` never drains its single-slot outbox
        let second = f.hub.on_message(&a, &edit(1)).await.unwrap();
        assert_eq!(second.delivered, 1);
        assert_eq!(second.disconnected, vec![slow.id()]);
        assert!(slow.is_close_requested());

        // Once asked to close it is skipped entirely
        let third = f.hub.on_message(&a, &edit(2)).await.unwrap();
        assert_eq!(third.delivered, 1);
        assert!(third.disconnected.is_empty());

        let received: Vec<_> = std::iter::from_fn(|| rx_c.try_recv().ok()).collect();
        assert_eq!(received.len(), 3);
    }

    #[tokio::test]
    async fn test_revoked_writer_is_refused_on_next_edit() {
        let f = fixture().await;
        let (bob, _rx_bob) = join(&f.rooms, "D1", BOB, 4).await;
        let (_a, mut rx_a) = join(&f.rooms, "D1", ALICE, 4).await;

        f.hub.on_message(&bob, &edit(0)).await.unwrap();
        assert!(rx_a.try_recv().is_ok());

        f.snapshots
            .apply_attribute_update(
                "D1",
                &DocumentAttribute::Access {
                    read_access: BTreeSet::new(),
                    write_access: BTreeSet::new(),
                },
            )
            .await
            .unwrap();

        let err = f.hub.on_message(&bob, &edit(1)).await.unwrap_err();
        assert!(matches!(err, SyncError::ReadOnly { .. }));
        assert!(!bob.can_write());
        assert!(rx_a.try_recv().is_err());
        assert_eq!(f.snapshots.get("D1").await.unwrap().data, json!({"ops": [0]}));
    }

    #[tokio::test]
    async fn test_edits_to_deleted_document_are_refused() {
        let f = fixture().await;
        let (a, _rx_a) = join(&f.rooms, "D1", ALICE, 4).await;
        let (_b, mut rx_b) = join(&f.rooms, "D1", BOB, 4).await;

        assert!(f.snapshots.mark_deleted("D1").await);
        let err = f.hub.on_message(&a, &edit(0)).await.unwrap_err();
        assert!(matches!(err, SyncError::NotFound(_)));
        assert!(rx_b.try_recv().is_err());
    }
}
