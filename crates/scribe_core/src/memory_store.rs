//! In-memory document store for testing.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::Value;

use crate::document::{DocumentAttribute, DocumentSnapshot, DocumentSummary, NewDocument};
use crate::error::{StoreError, StoreResult};
use crate::store::{DocumentStore, title_matches};

/// In-memory document store.
///
/// Thread-safe via `RwLock`, but data is lost when dropped.
#[derive(Debug, Default, Clone)]
pub struct MemoryDocumentStore {
    docs: Arc<RwLock<HashMap<String, DocumentSnapshot>>>,
}

impl MemoryDocumentStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a complete snapshot under its own id, replacing any existing one.
    pub fn seed(&self, snapshot: DocumentSnapshot) -> StoreResult<()> {
        self.write()?.insert(snapshot.id.clone(), snapshot);
        Ok(())
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.read().map(|docs| docs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, HashMap<String, DocumentSnapshot>>> {
        self.docs
            .read()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, HashMap<String, DocumentSnapshot>>> {
        self.docs
            .write()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn find_one(&self, id: &str) -> StoreResult<Option<DocumentSnapshot>> {
        Ok(self.read()?.get(id).cloned())
    }

    fn insert(&self, document: NewDocument) -> StoreResult<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let snapshot = document.into_snapshot(id.clone());
        self.write()?.insert(id.clone(), snapshot);
        Ok(id)
    }

    fn update_content(&self, id: &str, data: &Value) -> StoreResult<bool> {
        let mut docs = self.write()?;
        Ok(match docs.get_mut(id) {
            Some(doc) => {
                doc.data = data.clone();
                true
            }
            None => false,
        })
    }

    fn update_attribute(&self, id: &str, attribute: &DocumentAttribute) -> StoreResult<bool> {
        let mut docs = self.write()?;
        Ok(match docs.get_mut(id) {
            Some(doc) => {
                doc.apply_attribute(attribute);
                true
            }
            None => false,
        })
    }

    fn delete(&self, id: &str) -> StoreResult<bool> {
        Ok(self.write()?.remove(id).is_some())
    }

    fn find_accessible(
        &self,
        identity: &str,
        title_query: Option<&str>,
    ) -> StoreResult<Vec<DocumentSummary>> {
        let docs = self.read()?;
        let mut found: Vec<DocumentSummary> = docs
            .values()
            .filter(|doc| doc.can_read(identity) && title_matches(&doc.title, title_query))
            .map(DocumentSnapshot::summary)
            .collect();
        found.sort_by(|a, b| a.title.cmp(&b.title).then_with(|| a.id.cmp(&b.id)));
        Ok(found)
    }
}
