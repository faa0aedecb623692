use super::connection::{Connection, ConnectionId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard as StdMutexGuard, PoisonError};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

type RoomMap = HashMap<String, Arc<Room>>;

/// The live connections editing one document
#[derive(Default)]
struct Room {
    state: Arc<Mutex<RoomState>>,
    /// Mirrors `state.members.len()` for lock-free stats
    member_count: AtomicUsize,
}

#[derive(Default)]
struct RoomState {
    members: Vec<Arc<Connection>>,
    /// Set when the room emptied and left the registry
    retired: bool,
}

/// Maps document ids to the connections currently editing them.
///
/// Every compound operation on a room runs inside that room's own critical
/// section ([`RoomGuard`]), so unrelated documents never serialize on each
/// other. A room is removed from the registry when the guard that emptied
/// it is dropped; a join waiting on that guard then finds the room retired
/// and starts a fresh one.
#[derive(Clone, Default)]
pub struct RoomRegistry {
    rooms: Arc<StdMutex<RoomMap>>,
}

/// Result of removing a connection from its room
pub enum Departure {
    /// The connection was not a member (already removed)
    Absent,
    /// Members left in the room
    Remaining(usize),
    /// The room is now empty. It stays locked until the guard is dropped,
    /// so teardown can finish before anyone joins again.
    Emptied(RoomGuard),
}

impl Departure {
    pub fn room_now_empty(&self) -> bool {
        matches!(self, Departure::Emptied(_))
    }
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> StdMutexGuard<'_, RoomMap> {
        self.rooms.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enter the critical section for a document, creating its room if needed.
    ///
    /// A room created here and left without members is discarded when the
    /// guard drops.
    pub async fn lock(&self, document_id: &str) -> RoomGuard {
        loop {
            let room = self
                .map()
                .entry(document_id.to_string())
                .or_default()
                .clone();

            let state = room.state.clone().lock_owned().await;
            if state.retired {
                continue;
            }
            return RoomGuard {
                document_id: document_id.to_string(),
                state,
                room,
                rooms: self.rooms.clone(),
            };
        }
    }

    /// Enter the critical section of an existing room
    pub async fn lock_existing(&self, document_id: &str) -> Option<RoomGuard> {
        loop {
            let room = self.map().get(document_id).cloned()?;

            let state = room.state.clone().lock_owned().await;
            if state.retired {
                continue;
            }
            return Some(RoomGuard {
                document_id: document_id.to_string(),
                state,
                room,
                rooms: self.rooms.clone(),
            });
        }
    }

    /// Add a connection to the room of its document.
    ///
    /// Returns the member count after joining.
    pub async fn join(&self, connection: Arc<Connection>) -> usize {
        let mut room = self.lock(connection.document_id()).await;
        room.join(connection)
    }

    /// Remove a connection from a room.
    ///
    /// Never creates a room; leaving twice reports [`Departure::Absent`].
    pub async fn leave(&self, document_id: &str, connection: ConnectionId) -> Departure {
        let Some(mut room) = self.lock_existing(document_id).await else {
            return Departure::Absent;
        };
        match room.remove(connection) {
            None => Departure::Absent,
            Some(0) => Departure::Emptied(room),
            Some(remaining) => Departure::Remaining(remaining),
        }
    }

    /// Members of a room other than `excluding`
    pub async fn broadcast_targets(
        &self,
        document_id: &str,
        excluding: ConnectionId,
    ) -> Vec<Arc<Connection>> {
        match self.lock_existing(document_id).await {
            Some(room) => room.broadcast_targets(excluding),
            None => Vec::new(),
        }
    }

    pub async fn members(&self, document_id: &str) -> Vec<Arc<Connection>> {
        match self.lock_existing(document_id).await {
            Some(room) => room.members().to_vec(),
            None => Vec::new(),
        }
    }

    pub fn contains_room(&self, document_id: &str) -> bool {
        self.map()
            .get(document_id)
            .is_some_and(|room| room.member_count.load(Ordering::SeqCst) > 0)
    }

    /// Rooms with at least one member
    pub fn room_count(&self) -> usize {
        self.map()
            .values()
            .filter(|room| room.member_count.load(Ordering::SeqCst) > 0)
            .count()
    }

    pub fn connection_count(&self) -> usize {
        self.map()
            .values()
            .map(|room| room.member_count.load(Ordering::SeqCst))
            .sum()
    }
}

/// Exclusive access to one document's room
pub struct RoomGuard {
    document_id: String,
    state: OwnedMutexGuard<RoomState>,
    room: Arc<Room>,
    rooms: Arc<StdMutex<RoomMap>>,
}

impl RoomGuard {
    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    /// Add a member. Joining twice is a no-op.
    pub fn join(&mut self, connection: Arc<Connection>) -> usize {
        if !self.contains(connection.id()) {
            debug!(
                "{} joined room {} as {}",
                connection.id(),
                self.document_id,
                connection.identity()
            );
            self.state.members.push(connection);
            self.sync_count();
        }
        self.len()
    }

    /// Remove a member, returning the remaining count if it was present
    fn remove(&mut self, id: ConnectionId) -> Option<usize> {
        let index = self.state.members.iter().position(|c| c.id() == id)?;
        self.state.members.remove(index);
        self.sync_count();
        debug!("{} left room {}", id, self.document_id);
        Some(self.len())
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.state.members.iter().any(|c| c.id() == id)
    }

    pub fn members(&self) -> &[Arc<Connection>] {
        &self.state.members
    }

    pub fn broadcast_targets(&self, excluding: ConnectionId) -> Vec<Arc<Connection>> {
        self.state
            .members
            .iter()
            .filter(|c| c.id() != excluding)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.members.is_empty()
    }

    fn sync_count(&self) {
        self.room
            .member_count
            .store(self.state.members.len(), Ordering::SeqCst);
    }
}

impl Drop for RoomGuard {
    fn drop(&mut self) {
        if !self.state.members.is_empty() {
            return;
        }
        // Retire while still holding the room lock so waiters re-resolve
        self.state.retired = true;
        let mut rooms = self.rooms.lock().unwrap_or_else(PoisonError::into_inner);
        if rooms
            .get(&self.document_id)
            .is_some_and(|room| Arc::ptr_eq(room, &self.room))
        {
            rooms.remove(&self.document_id);
            info!("Removed empty room: {}", self.document_id);
        }
    }
}
