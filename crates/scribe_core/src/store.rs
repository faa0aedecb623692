//! Durable document storage abstraction.
//!
//! The [`DocumentStore`] trait is the contract the sync server relies on for
//! persistence. Updates replace fields wholesale, so replaying the same update
//! any number of times leaves the store in the same state.

use serde_json::Value;

use crate::document::{DocumentAttribute, DocumentSnapshot, DocumentSummary, NewDocument};
use crate::error::StoreResult;

/// Trait for durable document storage backends.
///
/// Implementations must be safe to share between the connection tasks and
/// the background synchronizer.
pub trait DocumentStore: Send + Sync {
    /// Load a document by id.
    ///
    /// Returns `None` if the document doesn't exist.
    fn find_one(&self, id: &str) -> StoreResult<Option<DocumentSnapshot>>;

    /// Create a document and return its generated id.
    fn insert(&self, document: NewDocument) -> StoreResult<String>;

    /// Replace the content payload of a document.
    ///
    /// Returns `false` when no document with that id exists.
    fn update_content(&self, id: &str, data: &Value) -> StoreResult<bool>;

    /// Replace one attribute of a document.
    ///
    /// Returns `false` when no document with that id exists.
    fn update_attribute(&self, id: &str, attribute: &DocumentAttribute) -> StoreResult<bool>;

    /// Delete a document. Returns whether anything was deleted.
    fn delete(&self, id: &str) -> StoreResult<bool>;

    /// List documents `identity` can see (as author, reader or writer),
    /// optionally narrowed to titles containing `title_query`
    /// (case-insensitive).
    fn find_accessible(
        &self,
        identity: &str,
        title_query: Option<&str>,
    ) -> StoreResult<Vec<DocumentSummary>>;
}

/// Case-insensitive substring match used by title searches.
pub(crate) fn title_matches(title: &str, query: Option<&str>) -> bool {
    match query {
        None => true,
        Some(q) => title.to_lowercase().contains(&q.to_lowercase()),
    }
}
