//! Scribe Core
//!
//! Shared building blocks for the Scribe collaborative-document backend:
//!
//! - [`document`]: the document snapshot model, its access rules and the
//!   typed attribute updates that can be applied to it
//! - [`store`]: the [`DocumentStore`] contract for durable persistence
//! - [`MemoryDocumentStore`]: an in-memory store for tests and development
//! - `SqliteDocumentStore`: a SQLite store (requires the `sqlite` feature)
//!
//! Document content is treated as an opaque JSON value. Its structure belongs
//! to the client application and is never interpreted here.

pub mod document;
pub mod error;
mod memory_store;
#[cfg(all(not(target_arch = "wasm32"), feature = "sqlite"))]
mod sqlite_store;
pub mod store;

pub use document::{
    DocumentAttribute, DocumentSnapshot, DocumentSummary, NewDocument, normalize_identity,
};
pub use error::{StoreError, StoreResult};
pub use memory_store::MemoryDocumentStore;
#[cfg(all(not(target_arch = "wasm32"), feature = "sqlite"))]
pub use sqlite_store::SqliteDocumentStore;
pub use store::DocumentStore;
