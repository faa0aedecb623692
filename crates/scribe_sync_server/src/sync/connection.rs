use super::SyncError;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use tokio::sync::{Notify, mpsc};
use tracing::debug;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of a live connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Lifecycle of a connection's session.
///
/// `Connecting -> Joined -> Active -> Closing -> Closed`. Phases only move
/// forward; `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum SessionPhase {
    Connecting = 0,
    Joined = 1,
    Active = 2,
    Closing = 3,
    Closed = 4,
}

impl SessionPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionPhase::Connecting,
            1 => SessionPhase::Joined,
            2 => SessionPhase::Active,
            3 => SessionPhase::Closing,
            _ => SessionPhase::Closed,
        }
    }
}

/// A change descriptor encoded once and shared by every recipient
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame(Arc<str>);

impl OutboundFrame {
    pub fn encode(change: &Value) -> Result<Self, serde_json::Error> {
        Ok(Self(serde_json::to_string(change)?.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One live real-time connection bound to a single document.
///
/// Outbound frames go through a bounded outbox drained by the transport's
/// writer. A connection that cannot keep up is asked to close instead of
/// being queued for without limit.
pub struct Connection {
    id: ConnectionId,
    document_id: String,
    identity: String,
    can_write: AtomicBool,
    outbox: mpsc::Sender<OutboundFrame>,
    phase: AtomicU8,
    close_requested: AtomicBool,
    close_signal: Notify,
}

impl Connection {
    /// Create a connection together with the receiving end of its outbox
    pub fn channel(
        document_id: impl Into<String>,
        identity: impl Into<String>,
        can_write: bool,
        outbox_capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<OutboundFrame>) {
        let (outbox, outbox_rx) = mpsc::channel(outbox_capacity.max(1));
        let connection = Arc::new(Self {
            id: ConnectionId::next(),
            document_id: document_id.into(),
            identity: identity.into(),
            can_write: AtomicBool::new(can_write),
            outbox,
            phase: AtomicU8::new(SessionPhase::Connecting as u8),
            close_requested: AtomicBool::new(false),
            close_signal: Notify::new(),
        });
        (connection, outbox_rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Write permission as of the last access change seen by the room
    pub fn can_write(&self) -> bool {
        self.can_write.load(Ordering::SeqCst)
    }

    pub(crate) fn set_can_write(&self, can_write: bool) {
        self.can_write.store(can_write, Ordering::SeqCst);
    }

    pub fn phase(&self) -> SessionPhase {
        SessionPhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    /// `Connecting -> Joined`
    pub(crate) fn mark_joined(&self) {
        let _ = self.phase.compare_exchange(
            SessionPhase::Connecting as u8,
            SessionPhase::Joined as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    /// `Joined -> Active` on the first inbound message
    pub(crate) fn mark_active(&self) {
        let _ = self.phase.compare_exchange(
            SessionPhase::Joined as u8,
            SessionPhase::Active as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    /// Enter `Closing`. Returns `true` for exactly one caller; everyone
    /// else finds the connection already closing or closed.
    pub(crate) fn begin_closing(&self) -> bool {
        let mut current = self.phase.load(Ordering::SeqCst);
        loop {
            if current >= SessionPhase::Closing as u8 {
                return false;
            }
            match self.phase.compare_exchange(
                current,
                SessionPhase::Closing as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    pub(crate) fn mark_closed(&self) {
        self.phase.store(SessionPhase::Closed as u8, Ordering::SeqCst);
    }

    /// Queue a frame without waiting.
    ///
    /// A full or closed outbox is a transport failure.
    pub fn deliver(&self, frame: OutboundFrame) -> Result<(), SyncError> {
        self.outbox.try_send(frame).map_err(|e| {
            let reason = match e {
                mpsc::error::TrySendError::Full(_) => "outbox full",
                mpsc::error::TrySendError::Closed(_) => "outbox closed",
            };
            SyncError::TransportFailure {
                connection: self.id.to_string(),
                reason: reason.to_string(),
            }
        })
    }

    /// Ask the transport driving this connection to shut it down.
    ///
    /// Returns `false` if a close was already requested.
    pub fn request_close(&self) -> bool {
        if self.close_requested.swap(true, Ordering::SeqCst) {
            return false;
        }
        debug!("Close requested for {} on {}", self.id, self.document_id);
        self.close_signal.notify_one();
        true
    }

    pub fn is_close_requested(&self) -> bool {
        self.close_requested.load(Ordering::SeqCst)
    }

    /// Resolves once [`Connection::request_close`] has been called
    pub async fn close_requested(&self) {
        if self.is_close_requested() {
            return;
        }
        self.close_signal.notified().await;
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("document_id", &self.document_id)
            .field("identity", &self.identity)
            .field("phase", &self.phase())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn test_ids_are_unique() {
        let (a, _rx_a) = Connection::channel("doc", "a", true, 1);
        let (b, _rx_b) = Connection::channel("doc", "b", true, 1);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_phase_transitions() {
        let (conn, _rx) = Connection::channel("doc", "a", true, 1);
        assert_eq!(conn.phase(), SessionPhase::Connecting);

        // Cannot activate before joining
        conn.mark_active();
        assert_eq!(conn.phase(), SessionPhase::Connecting);

        conn.mark_joined();
        conn.mark_active();
        assert_eq!(conn.phase(), SessionPhase::Active);

        assert!(conn.begin_closing());
        assert!(!conn.begin_closing());
        conn.mark_closed();
        assert!(!conn.begin_closing());
        assert_eq!(conn.phase(), SessionPhase::Closed);
    }

    #[test]
    fn test_deliver_fails_when_outbox_full_or_closed() {
        let (conn, rx) = Connection::channel("doc", "a", true, 1);
        let frame = OutboundFrame::encode(&json!({"op": "insert"})).unwrap();

        conn.deliver(frame.clone()).unwrap();
        assert!(matches!(
            conn.deliver(frame.clone()),
            Err(SyncError::TransportFailure { .. })
        ));

        drop(rx);
        assert!(matches!(
            conn.deliver(frame),
            Err(SyncError::TransportFailure { .. })
        ));
    }

    #[tokio::test]
    async fn test_close_request_wakes_waiter_once() {
        let (conn, _rx) = Connection::channel("doc", "a", true, 1);

        let waiter = {
            let conn = conn.clone();
            tokio::spawn(async move { conn.close_requested().await })
        };

        assert!(conn.request_close());
        assert!(!conn.request_close());
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();

        // Already requested: resolves immediately
        conn.close_requested().await;
    }
}
