//! Room-based operation fan-out.
//!
//! The engine talks to the realtime transport through [`BroadcastTransport`].
//! [`RoomManager`] is the in-process implementation: one tokio broadcast
//! channel per presentation room, pre-encoded messages shared via `Arc`.
//!
//! Delivery reaches every subscriber of the room, the sender included;
//! filtering out self-echo is the caller's job.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::protocol::{ProtocolError, SyncMessage};

/// Transport errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("Room {0} is closed")]
    RoomClosed(Uuid),
    #[error("Transport unavailable: {0}")]
    Unavailable(String),
}

/// Realtime transport: at-least-once, in order per sender, no ordering
/// across senders.
pub trait BroadcastTransport: Send + Sync {
    fn subscribe(&self, room_id: Uuid) -> BoxFuture<'_, Result<Subscription, TransportError>>;

    /// Send to every subscriber of the room. The returned future owns
    /// everything it needs so callers can detach it.
    fn publish(
        &self,
        room_id: Uuid,
        message: SyncMessage,
    ) -> BoxFuture<'static, Result<usize, TransportError>>;
}

/// Inbound side of one room membership.
pub struct Subscription {
    room_id: Uuid,
    receiver: broadcast::Receiver<Arc<Vec<u8>>>,
    malformed: u64,
    lagged: u64,
}

impl Subscription {
    pub fn new(room_id: Uuid, receiver: broadcast::Receiver<Arc<Vec<u8>>>) -> Self {
        Self {
            room_id,
            receiver,
            malformed: 0,
            lagged: 0,
        }
    }

    pub fn room_id(&self) -> Uuid {
        self.room_id
    }

    /// Wait for the next decodable message. `None` once the room is closed.
    pub async fn recv(&mut self) -> Option<SyncMessage> {
        loop {
            match self.receiver.recv().await {
                Ok(bytes) => {
                    if let Some(msg) = self.decode(&bytes) {
                        return Some(msg);
                    }
                }
                Err(RecvError::Lagged(n)) => self.on_lag(n),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next message if one is already buffered.
    pub fn try_recv(&mut self) -> Option<SyncMessage> {
        loop {
            match self.receiver.try_recv() {
                Ok(bytes) => {
                    if let Some(msg) = self.decode(&bytes) {
                        return Some(msg);
                    }
                }
                Err(TryRecvError::Lagged(n)) => self.on_lag(n),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// Messages dropped because they did not decode.
    pub fn malformed(&self) -> u64 {
        self.malformed
    }

    /// Messages lost to a full receive buffer.
    pub fn lagged(&self) -> u64 {
        self.lagged
    }

    fn decode(&mut self, bytes: &[u8]) -> Option<SyncMessage> {
        match SyncMessage::decode(bytes) {
            Ok(msg) => Some(msg),
            Err(e) => {
                self.malformed += 1;
                log::warn!("Dropping malformed message in room {}: {e}", self.room_id);
                None
            }
        }
    }

    fn on_lag(&mut self, n: u64) {
        self.lagged += n;
        log::warn!("Subscription to room {} lagged by {n} messages", self.room_id);
    }
}

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default)]
pub struct BroadcastStats {
    pub messages_sent: u64,
    pub messages_dropped: u64,
    pub subscribers: usize,
}

/// Atomic broadcast stats, so sends never take a lock.
struct AtomicBroadcastStats {
    messages_sent: AtomicU64,
    messages_dropped: AtomicU64,
}

impl AtomicBroadcastStats {
    fn new() -> Self {
        Self {
            messages_sent: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
        }
    }
}

/// A broadcast group for a single presentation room.
pub struct BroadcastGroup {
    sender: broadcast::Sender<Arc<Vec<u8>>>,
    /// Messages buffered per receiver before it starts lagging
    capacity: usize,
    atomic_stats: Arc<AtomicBroadcastStats>,
}

impl BroadcastGroup {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            capacity,
            atomic_stats: Arc::new(AtomicBroadcastStats::new()),
        }
    }

    /// Encode once and fan out. Returns the number of receivers reached.
    pub fn broadcast(&self, msg: &SyncMessage) -> Result<usize, ProtocolError> {
        let encoded = msg.encode()?;
        Ok(self.broadcast_raw(Arc::new(encoded)))
    }

    /// Broadcast pre-encoded bytes directly.
    pub fn broadcast_raw(&self, encoded: Arc<Vec<u8>>) -> usize {
        match self.sender.send(encoded) {
            Ok(count) => {
                self.atomic_stats.messages_sent.fetch_add(1, Ordering::Relaxed);
                count
            }
            Err(_) => {
                // Nobody listening.
                self.atomic_stats.messages_dropped.fetch_add(1, Ordering::Relaxed);
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Vec<u8>>> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            messages_sent: self.atomic_stats.messages_sent.load(Ordering::Relaxed),
            messages_dropped: self.atomic_stats.messages_dropped.load(Ordering::Relaxed),
            subscribers: self.subscriber_count(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Room manager: maps presentation ids to broadcast groups.
#[derive(Clone)]
pub struct RoomManager {
    rooms: Arc<RwLock<HashMap<Uuid, Arc<BroadcastGroup>>>>,
    default_capacity: usize,
}

impl RoomManager {
    pub fn new(default_capacity: usize) -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
            default_capacity,
        }
    }

    /// Get or create the room for a presentation.
    pub async fn get_or_create(&self, room_id: Uuid) -> Arc<BroadcastGroup> {
        // Fast path: read lock
        {
            let rooms = self.rooms.read().await;
            if let Some(room) = rooms.get(&room_id) {
                return room.clone();
            }
        }

        let mut rooms = self.rooms.write().await;
        rooms
            .entry(room_id)
            .or_insert_with(|| Arc::new(BroadcastGroup::new(self.default_capacity)))
            .clone()
    }

    pub async fn get(&self, room_id: &Uuid) -> Option<Arc<BroadcastGroup>> {
        self.rooms.read().await.get(room_id).cloned()
    }

    /// Drop a room nobody subscribes to any more.
    pub async fn remove_if_empty(&self, room_id: &Uuid) -> bool {
        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get(room_id) {
            if room.subscriber_count() == 0 {
                rooms.remove(room_id);
                log::info!("Room {room_id} removed (empty)");
                return true;
            }
        }
        false
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}

impl BroadcastTransport for RoomManager {
    fn subscribe(&self, room_id: Uuid) -> BoxFuture<'_, Result<Subscription, TransportError>> {
        Box::pin(async move {
            let room = self.get_or_create(room_id).await;
            Ok(Subscription::new(room_id, room.subscribe()))
        })
    }

    fn publish(
        &self,
        room_id: Uuid,
        message: SyncMessage,
    ) -> BoxFuture<'static, Result<usize, TransportError>> {
        let manager = self.clone();
        Box::pin(async move {
            let room = manager
                .get(&room_id)
                .await
                .ok_or(TransportError::RoomClosed(room_id))?;
            Ok(room.broadcast(&message)?)
        })
    }
}
