use super::SyncError;
use scribe_core::{DocumentAttribute, DocumentSnapshot};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tracing::debug;

/// One hot document held in the snapshot cache.
pub struct CachedDocument {
    snapshot: Mutex<DocumentSnapshot>,
    /// Serializes flushes of this entry with its eviction
    flush_lock: Mutex<()>,
    /// Set once the entry has left the cache; stale holders must not flush it
    evicted: AtomicBool,
    /// The room emptied but the final flush failed; evict after the next
    /// successful flush
    pending_eviction: AtomicBool,
    /// The durable row is gone; the entry only lives until its room empties
    deleted: AtomicBool,
}

impl CachedDocument {
    fn new(snapshot: DocumentSnapshot) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
            flush_lock: Mutex::new(()),
            evicted: AtomicBool::new(false),
            pending_eviction: AtomicBool::new(false),
            deleted: AtomicBool::new(false),
        }
    }

    /// Copy of the current snapshot
    pub async fn snapshot(&self) -> DocumentSnapshot {
        self.snapshot.lock().await.clone()
    }

    /// Copy of the current content payload
    pub async fn data(&self) -> Value {
        self.snapshot.lock().await.data.clone()
    }

    /// Whether `identity` may edit the document under its current access lists
    pub async fn can_write(&self, identity: &str) -> bool {
        self.snapshot.lock().await.can_write(identity)
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::SeqCst)
    }

    pub fn is_evicted(&self) -> bool {
        self.evicted.load(Ordering::SeqCst)
    }

    pub(crate) fn is_pending_eviction(&self) -> bool {
        self.pending_eviction.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_pending_eviction(&self) {
        self.pending_eviction.store(true, Ordering::SeqCst);
    }

    pub(crate) async fn begin_flush(&self) -> MutexGuard<'_, ()> {
        self.flush_lock.lock().await
    }
}

/// In-memory authoritative copy of every hot document.
///
/// Each entry has its own lock, so edits to different documents never wait
/// on each other. The map lock is only held to find, insert or remove an
/// entry.
#[derive(Default)]
pub struct SnapshotStore {
    entries: RwLock<HashMap<String, Arc<CachedDocument>>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache hit path; never touches the durable store
    pub async fn get(&self, document_id: &str) -> Option<DocumentSnapshot> {
        let entry = self.entry(document_id).await?;
        Some(entry.snapshot().await)
    }

    pub async fn contains(&self, document_id: &str) -> bool {
        self.entries.read().await.contains_key(document_id)
    }

    /// Insert or wholesale replace a snapshot
    pub async fn put(&self, snapshot: DocumentSnapshot) {
        let id = snapshot.id.clone();
        let entry = Arc::new(CachedDocument::new(snapshot));
        let previous = self.entries.write().await.insert(id, entry);
        if let Some(previous) = previous {
            previous.evicted.store(true, Ordering::SeqCst);
        }
    }

    /// Replace the content payload of a cached document
    pub async fn apply_edit(&self, document_id: &str, data: Value) -> Result<(), SyncError> {
        let entry = self
            .entry(document_id)
            .await
            .ok_or_else(|| SyncError::NotCached(document_id.to_string()))?;
        entry.snapshot.lock().await.data = data;
        Ok(())
    }

    /// Apply a metadata update to a cached document
    pub async fn apply_attribute_update(
        &self,
        document_id: &str,
        attribute: &DocumentAttribute,
    ) -> Result<(), SyncError> {
        let entry = self
            .entry(document_id)
            .await
            .ok_or_else(|| SyncError::NotCached(document_id.to_string()))?;
        entry.snapshot.lock().await.apply_attribute(attribute);
        Ok(())
    }

    /// Drop a document from the cache without flushing it
    pub async fn remove(&self, document_id: &str) -> Option<DocumentSnapshot> {
        let entry = self.entries.write().await.remove(document_id)?;
        entry.evicted.store(true, Ordering::SeqCst);
        Some(entry.snapshot().await)
    }

    /// Flag a cached document whose durable row was deleted.
    ///
    /// Returns `false` if nothing was cached.
    pub async fn mark_deleted(&self, document_id: &str) -> bool {
        match self.entry(document_id).await {
            Some(entry) => {
                entry.deleted.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /// Shared handle to a cache entry
    pub async fn entry(&self, document_id: &str) -> Option<Arc<CachedDocument>> {
        self.entries.read().await.get(document_id).cloned()
    }

    /// Keep an entry that was waiting for eviction.
    ///
    /// Returns `false` if there is no live entry, in which case the caller
    /// has to load the document again.
    pub(crate) async fn retain(&self, document_id: &str) -> bool {
        let Some(entry) = self.entry(document_id).await else {
            return false;
        };
        let _flush = entry.begin_flush().await;
        if entry.is_evicted() {
            return false;
        }
        entry.pending_eviction.store(false, Ordering::SeqCst);
        true
    }

    /// Evict `entry` if it is still the one cached under `document_id`.
    ///
    /// Callers hold the entry's flush lock.
    pub(crate) async fn evict_entry(&self, document_id: &str, entry: &Arc<CachedDocument>) {
        entry.evicted.store(true, Ordering::SeqCst);
        let mut entries = self.entries.write().await;
        if entries
            .get(document_id)
            .is_some_and(|current| Arc::ptr_eq(current, entry))
        {
            entries.remove(document_id);
            debug!("Evicted snapshot for document {}", document_id);
        }
    }

    /// Point-in-time list of entries.
    ///
    /// Entries added or removed after this returns are not reflected, and
    /// the walk never blocks edits for longer than one entry lock.
    pub async fn entries(&self) -> Vec<(String, Arc<CachedDocument>)> {
        self.entries
            .read()
            .await
            .iter()
            .map(|(id, entry)| (id.clone(), entry.clone()))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
