use thiserror::Error;

/// Error type for durable document store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[cfg(all(not(target_arch = "wasm32"), feature = "sqlite"))]
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The backing store cannot serve requests right now (poisoned lock,
    /// lost connection, ...). Callers may retry later.
    #[error("Document store unavailable: {0}")]
    Unavailable(String),
}

/// Result type alias for document store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;
