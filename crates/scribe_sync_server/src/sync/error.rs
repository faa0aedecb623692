use scribe_core::StoreError;
use thiserror::Error;

/// Errors raised inside the real-time sync core.
///
/// Apart from [`SyncError::TransportFailure`], every variant is recoverable:
/// the offending message is dropped and logged, and the session stays open.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The operation needed a cached snapshot that is not present
    #[error("document '{0}' is not cached")]
    NotCached(String),

    /// The document does not exist in the durable store, or was deleted
    /// while its room was open
    #[error("document '{0}' not found")]
    NotFound(String),

    /// Sending to or receiving from a connection failed
    #[error("transport failure on connection {connection}: {reason}")]
    TransportFailure { connection: String, reason: String },

    /// Writing a snapshot to the durable store failed
    #[error("failed to persist document '{document_id}': {source}")]
    PersistFailure {
        document_id: String,
        #[source]
        source: StoreError,
    },

    /// The inbound message could not be decoded
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The sender only has read access
    #[error("'{identity}' cannot edit document '{document_id}'")]
    ReadOnly {
        document_id: String,
        identity: String,
    },

    /// The session is closing or closed and accepts no more messages
    #[error("session is closed")]
    SessionClosed,
}

impl SyncError {
    /// Errors caused by one message, not by the server
    pub fn is_dropped_message(&self) -> bool {
        matches!(
            self,
            SyncError::NotCached(_)
                | SyncError::NotFound(_)
                | SyncError::Malformed(_)
                | SyncError::ReadOnly { .. }
        )
    }
}

/// Reasons a session cannot be opened.
#[derive(Debug, Error)]
pub enum SessionRefused {
    #[error("document '{0}' not found")]
    NotFound(String),

    #[error("'{identity}' has no access to document '{document_id}'")]
    Forbidden {
        document_id: String,
        identity: String,
    },

    #[error("failed to load document: {0}")]
    Store(#[from] StoreError),
}
