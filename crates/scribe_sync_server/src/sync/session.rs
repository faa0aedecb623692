use super::connection::{Connection, OutboundFrame, SessionPhase};
use super::hub::{BroadcastHub, FanOut};
use super::room::{Departure, RoomRegistry};
use super::snapshot::SnapshotStore;
use super::synchronizer::Synchronizer;
use super::{SessionRefused, SyncError};
use scribe_core::{DocumentAttribute, DocumentSnapshot, DocumentStore, StoreError};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Opens, drives and tears down real-time sessions.
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn DocumentStore>,
    snapshots: Arc<SnapshotStore>,
    rooms: RoomRegistry,
    hub: BroadcastHub,
    synchronizer: Arc<Synchronizer>,
    outbox_capacity: usize,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        snapshots: Arc<SnapshotStore>,
        rooms: RoomRegistry,
        synchronizer: Arc<Synchronizer>,
        outbox_capacity: usize,
    ) -> Self {
        let hub = BroadcastHub::new(snapshots.clone(), rooms.clone());
        Self {
            store,
            snapshots,
            rooms,
            hub,
            synchronizer,
            outbox_capacity,
        }
    }

    /// Join `identity` to the room of `document_id`.
    ///
    /// The first joiner loads the document from the durable store; later
    /// joiners share the cached snapshot. A refused open leaves neither a
    /// room nor a cache entry behind.
    pub async fn open_session(
        &self,
        document_id: &str,
        identity: &str,
    ) -> Result<Session, SessionRefused> {
        let mut room = self.rooms.lock(document_id).await;

        let cached = match self.snapshots.entry(document_id).await {
            Some(entry) if entry.is_deleted() => {
                return Err(SessionRefused::NotFound(document_id.to_string()));
            }
            Some(entry) if !entry.is_evicted() => Some(entry.snapshot().await),
            _ => None,
        };
        let snapshot = match cached {
            Some(cached) => cached,
            None => {
                let loaded = self
                    .store
                    .find_one(document_id)?
                    .ok_or_else(|| SessionRefused::NotFound(document_id.to_string()))?;
                debug!("Loaded document {} from the store", document_id);
                loaded
            }
        };

        if !snapshot.can_read(identity) {
            return Err(SessionRefused::Forbidden {
                document_id: document_id.to_string(),
                identity: identity.to_string(),
            });
        }
        let can_write = snapshot.can_write(identity);

        // No edits can land while the room is locked, so a copy taken above
        // is still current if the entry was evicted in the meantime.
        if !self.snapshots.retain(document_id).await {
            self.snapshots.put(snapshot).await;
        }

        let (connection, outbox) =
            Connection::channel(document_id, identity, can_write, self.outbox_capacity);
        let members = room.join(connection.clone());
        connection.mark_joined();

        info!(
            "{} opened {} as {} ({} in room, {})",
            identity,
            document_id,
            connection.id(),
            members,
            if can_write { "read-write" } else { "read-only" }
        );

        Ok(Session {
            connection,
            outbox,
            manager: self.clone(),
        })
    }

    /// Update a document attribute that arrived outside a live session.
    ///
    /// The durable store is written first; a hot snapshot is then updated to
    /// match. Live sessions that lost read access are asked to close.
    /// Returns `false` if the document does not exist.
    pub async fn dispatch_attribute_update(
        &self,
        document_id: &str,
        attribute: &DocumentAttribute,
    ) -> Result<bool, StoreError> {
        let room = self.rooms.lock(document_id).await;

        if !self.store.update_attribute(document_id, attribute)? {
            return Ok(false);
        }

        match self
            .snapshots
            .apply_attribute_update(document_id, attribute)
            .await
        {
            Ok(()) => debug!(
                "Reflected {} update into cached document {}",
                attribute.field(),
                document_id
            ),
            Err(SyncError::NotCached(_)) => return Ok(true),
            Err(e) => warn!("Failed to update cached document {}: {}", document_id, e),
        }

        if matches!(attribute, DocumentAttribute::Access { .. })
            && let Some(snapshot) = self.snapshots.get(document_id).await
        {
            for connection in room.members() {
                if !snapshot.can_read(connection.identity()) {
                    info!(
                        "{} lost access to {}; closing {}",
                        connection.identity(),
                        document_id,
                        connection.id()
                    );
                    connection.request_close();
                } else {
                    connection.set_can_write(snapshot.can_write(connection.identity()));
                }
            }
        }
        Ok(true)
    }

    /// Read a document, preferring the hot snapshot.
    ///
    /// A cache miss reads through to the durable store without caching.
    pub async fn read_document(
        &self,
        document_id: &str,
    ) -> Result<Option<DocumentSnapshot>, StoreError> {
        if let Some(entry) = self.snapshots.entry(document_id).await {
            if entry.is_deleted() {
                return Ok(None);
            }
            return Ok(Some(entry.snapshot().await));
        }
        self.store.find_one(document_id)
    }

    /// Delete a document and disconnect everyone editing it.
    ///
    /// A hot snapshot is flagged so no one can join it while its sessions
    /// wind down. Returns `false` if the document did not exist.
    pub async fn delete_document(&self, document_id: &str) -> Result<bool, StoreError> {
        let room = self.rooms.lock(document_id).await;

        if !self.store.delete(document_id)? {
            return Ok(false);
        }
        self.snapshots.mark_deleted(document_id).await;

        for connection in room.members() {
            connection.request_close();
        }
        if !room.is_empty() {
            info!(
                "Deleted document {}; closing {} session(s)",
                document_id,
                room.len()
            );
        }
        Ok(true)
    }

    pub async fn on_message(
        &self,
        connection: &Connection,
        raw: &str,
    ) -> Result<FanOut, SyncError> {
        self.hub.on_message(connection, raw).await
    }

    /// Move a connection through `Closing` to `Closed`.
    ///
    /// Safe to call any number of times from any task; only the first call
    /// does anything. The last connection out flushes and evicts the
    /// snapshot before the room can be joined again.
    pub async fn close_connection(&self, connection: &Connection) {
        if !connection.begin_closing() {
            return;
        }
        connection.request_close();

        let document_id = connection.document_id();
        match self.rooms.leave(document_id, connection.id()).await {
            Departure::Absent => {}
            Departure::Remaining(remaining) => {
                debug!(
                    "{} left {} ({} remaining)",
                    connection.id(),
                    document_id,
                    remaining
                );
            }
            Departure::Emptied(room) => {
                match self.synchronizer.flush_and_evict(document_id).await {
                    Ok(_) => info!(
                        "Last editor left {}; snapshot flushed and evicted",
                        document_id
                    ),
                    Err(e) => error!("Final flush failed, keeping snapshot cached: {}", e),
                }
                drop(room);
            }
        }

        connection.mark_closed();
        debug!("{} closed", connection.id());
    }
}

/// One live session, owned by the transport task that drives it.
///
/// Dropping a session that was not closed tears it down in the background.
pub struct Session {
    connection: Arc<Connection>,
    outbox: mpsc::Receiver<OutboundFrame>,
    manager: SessionManager,
}

impl Session {
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub fn phase(&self) -> SessionPhase {
        self.connection.phase()
    }

    /// Apply and relay one inbound message
    pub async fn handle_message(&self, raw: &str) -> Result<FanOut, SyncError> {
        if self.connection.phase() >= SessionPhase::Closing {
            return Err(SyncError::SessionClosed);
        }
        self.connection.mark_active();
        self.manager.on_message(&self.connection, raw).await
    }

    /// Next frame to write to the transport; `None` once the outbox closes
    pub async fn next_outbound(&mut self) -> Option<OutboundFrame> {
        self.outbox.recv().await
    }

    /// Leave the room and finish the session
    pub async fn close(&self) {
        self.manager.close_connection(&self.connection).await;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.connection.phase() >= SessionPhase::Closing {
            return;
        }
        let connection = self.connection.clone();
        let manager = self.manager.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    manager.close_connection(&connection).await;
                });
            }
            Err(_) => warn!(
                "Session {} dropped outside a runtime; room membership not released",
                connection.id()
            ),
        }
    }
}
