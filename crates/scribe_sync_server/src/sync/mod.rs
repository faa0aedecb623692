//! Real-time synchronization core.
//!
//! Editors of the same document share a room. Each accepted edit replaces the
//! content of the document's cached snapshot and its change descriptor is
//! relayed to every other member of the room. Cached snapshots are written
//! back to the durable store by the write-behind [`Synchronizer`], and once
//! more when the last editor leaves.

mod connection;
mod error;
mod hub;
mod room;
mod session;
mod snapshot;
mod synchronizer;

pub use connection::{Connection, ConnectionId, OutboundFrame, SessionPhase};
pub use error::{SessionRefused, SyncError};
pub use hub::{BroadcastHub, FanOut, InboundMessage};
pub use room::{Departure, RoomGuard, RoomRegistry};
pub use session::{Session, SessionManager};
pub use snapshot::{CachedDocument, SnapshotStore};
pub use synchronizer::{FlushReport, Synchronizer, SynchronizerHandle};

use scribe_core::DocumentStore;
use std::sync::Arc;
use std::time::Duration;

/// Tunables for the sync core
#[derive(Debug, Clone, Copy)]
pub struct SyncSettings {
    /// Period of the write-behind flush
    pub flush_interval: Duration,
    /// Frames buffered per connection before it counts as too slow
    pub outbox_capacity: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(30),
            outbox_capacity: 64,
        }
    }
}

/// Statistics about the sync state
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    pub active_connections: usize,
    pub active_rooms: usize,
    pub cached_documents: usize,
}

/// The wired-up sync core, shared by the request handlers
#[derive(Clone)]
pub struct SyncState {
    pub snapshots: Arc<SnapshotStore>,
    pub rooms: RoomRegistry,
    pub synchronizer: Arc<Synchronizer>,
    pub sessions: SessionManager,
}

impl SyncState {
    pub fn new(store: Arc<dyn DocumentStore>, settings: SyncSettings) -> Self {
        let snapshots = Arc::new(SnapshotStore::new());
        let rooms = RoomRegistry::new();
        let synchronizer = Arc::new(Synchronizer::new(
            snapshots.clone(),
            store.clone(),
            settings.flush_interval,
        ));
        let sessions = SessionManager::new(
            store,
            snapshots.clone(),
            rooms.clone(),
            synchronizer.clone(),
            settings.outbox_capacity,
        );

        Self {
            snapshots,
            rooms,
            synchronizer,
            sessions,
        }
    }

    /// Start the periodic write-behind task
    pub fn start_synchronizer(&self) -> SynchronizerHandle {
        self.synchronizer.clone().spawn()
    }

    pub async fn stats(&self) -> SyncStats {
        SyncStats {
            active_connections: self.rooms.connection_count(),
            active_rooms: self.rooms.room_count(),
            cached_documents: self.snapshots.len().await,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Durable store fakes for exercising the sync core.

    use scribe_core::{
        DocumentAttribute, DocumentSnapshot, DocumentStore, DocumentSummary, MemoryDocumentStore,
        NewDocument, StoreError, StoreResult,
    };
    use serde_json::Value;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts `find_one` calls
    pub struct CountingStore {
        inner: MemoryDocumentStore,
        find_one_calls: AtomicUsize,
    }

    impl CountingStore {
        pub fn new(inner: MemoryDocumentStore) -> Self {
            Self {
                inner,
                find_one_calls: AtomicUsize::new(0),
            }
        }

        pub fn inner(&self) -> &MemoryDocumentStore {
            &self.inner
        }

        pub fn find_one_calls(&self) -> usize {
            self.find_one_calls.load(Ordering::SeqCst)
        }
    }

    impl DocumentStore for CountingStore {
        fn find_one(&self, id: &str) -> StoreResult<Option<DocumentSnapshot>> {
            self.find_one_calls.fetch_add(1, Ordering::SeqCst);
            self.inner.find_one(id)
        }

        fn insert(&self, document: NewDocument) -> StoreResult<String> {
            self.inner.insert(document)
        }

        fn update_content(&self, id: &str, data: &Value) -> StoreResult<bool> {
            self.inner.update_content(id, data)
        }

        fn update_attribute(&self, id: &str, attribute: &DocumentAttribute) -> StoreResult<bool> {
            self.inner.update_attribute(id, attribute)
        }

        fn delete(&self, id: &str) -> StoreResult<bool> {
            self.inner.delete(id)
        }

        fn find_accessible(
            &self,
            identity: &str,
            title_query: Option<&str>,
        ) -> StoreResult<Vec<DocumentSummary>> {
            self.inner.find_accessible(identity, title_query)
        }
    }

    /// Fails content updates for selected documents until recovered
    pub struct FailingStore {
        inner: MemoryDocumentStore,
        failing: Mutex<HashSet<String>>,
    }

    impl FailingStore {
        pub fn new(inner: MemoryDocumentStore, failing: &[&str]) -> Self {
            Self {
                inner,
                failing: Mutex::new(failing.iter().map(|id| id.to_string()).collect()),
            }
        }

        pub fn inner(&self) -> &MemoryDocumentStore {
            &self.inner
        }

        pub fn recover(&self, id: &str) {
            self.failing.lock().unwrap().remove(id);
        }
    }

    impl DocumentStore for FailingStore {
        fn find_one(&self, id: &str) -> StoreResult<Option<DocumentSnapshot>> {
            self.inner.find_one(id)
        }

        fn insert(&self, document: NewDocument) -> StoreResult<String> {
            self.inner.insert(document)
        }

        fn update_content(&self, id: &str, data: &Value) -> StoreResult<bool> {
            if self.failing.lock().unwrap().contains(id) {
                return Err(StoreError::Unavailable(format!("write to {} refused", id)));
            }
            self.inner.update_content(id, data)
        }

        fn update_attribute(&self, id: &str, attribute: &DocumentAttribute) -> StoreResult<bool> {
            self.inner.update_attribute(id, attribute)
        }

        fn delete(&self, id: &str) -> StoreResult<bool> {
            self.inner.delete(id)
        }

        fn find_accessible(
            &self,
            identity: &str,
            title_query: Option<&str>,
        ) -> StoreResult<Vec<DocumentSummary>> {
            self.inner.find_accessible(identity, title_query)
        }
    }
}
