//! Connection registry and channel fan-out.
//!
//! Every live socket registers here and receives a bounded queue of
//! pre-encoded frames. Channels (`room_<id>`, `session_<id>`) are sets of
//! connection ids. Publishing never waits on a consumer: a full queue drops
//! the frame for that connection only.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cohort_shared::protocol::ServerEvent;
use cohort_shared::types::{ChannelKey, ConnectionId};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One encoded JSON event, shared by every recipient.
pub type Frame = Arc<str>;

struct Connection {
    user_id: Uuid,
    tx: mpsc::Sender<Frame>,
    channels: HashSet<ChannelKey>,
}

#[derive(Default)]
struct HubState {
    connections: HashMap<ConnectionId, Connection>,
    channels: HashMap<ChannelKey, HashSet<ConnectionId>>,
}

impl HubState {
    fn detach(&mut self, conn: ConnectionId, key: ChannelKey) {
        if let Some(members) = self.channels.get_mut(&key) {
            members.remove(&conn);
            if members.is_empty() {
                self.channels.remove(&key);
            }
        }
    }
}

#[derive(Clone)]
pub struct Hub {
    state: Arc<RwLock<HubState>>,
    buffer: usize,
    dropped: Arc<AtomicU64>,
}

impl Hub {
    pub fn new(buffer: usize) -> Self {
        Self {
            state: Arc::new(RwLock::new(HubState::default())),
            buffer: buffer.max(1),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Register a connection for `user_id`. Returns its id and the queue the
    /// transport drains.
    pub async fn register(&self, user_id: Uuid) -> (ConnectionId, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(self.buffer);
        let conn = ConnectionId::new();
        self.state.write().await.connections.insert(
            conn,
            Connection {
                user_id,
                tx,
                channels: HashSet::new(),
            },
        );
        debug!(%conn, %user_id, "connection registered");
        (conn, rx)
    }

    /// Forget a connection and every subscription it held. Returns the
    /// channels it was in.
    pub async fn unregister(&self, conn: ConnectionId) -> Vec<ChannelKey> {
        let mut state = self.state.write().await;
        let Some(connection) = state.connections.remove(&conn) else {
            return Vec::new();
        };
        for key in &connection.channels {
            state.detach(conn, *key);
        }
        debug!(%conn, channels = connection.channels.len(), "connection unregistered");
        connection.channels.into_iter().collect()
    }

    /// Returns `false` for an unknown connection.
    pub async fn subscribe(&self, conn: ConnectionId, key: ChannelKey) -> bool {
        let mut state = self.state.write().await;
        let Some(connection) = state.connections.get_mut(&conn) else {
            return false;
        };
        connection.channels.insert(key);
        state.channels.entry(key).or_default().insert(conn);
        true
    }

    pub async fn unsubscribe(&self, conn: ConnectionId, key: ChannelKey) {
        let mut state = self.state.write().await;
        if let Some(connection) = state.connections.get_mut(&conn) {
            connection.channels.remove(&key);
        }
        state.detach(conn, key);
    }

    /// Unsubscribe every connection of `user_id` from `key`.
    pub async fn evict_user(&self, key: ChannelKey, user_id: Uuid) -> usize {
        let mut state = self.state.write().await;
        let Some(members) = state.channels.get(&key) else {
            return 0;
        };
        let targets: Vec<ConnectionId> = members
            .iter()
            .filter(|c| {
                state
                    .connections
                    .get(*c)
                    .is_some_and(|conn| conn.user_id == user_id)
            })
            .copied()
            .collect();
        for conn in &targets {
            if let Some(connection) = state.connections.get_mut(conn) {
                connection.channels.remove(&key);
            }
            state.detach(*conn, key);
        }
        targets.len()
    }

    /// Drop a channel entirely (its room or session no longer exists).
    pub async fn close_channel(&self, key: ChannelKey) {
        let mut state = self.state.write().await;
        let Some(members) = state.channels.remove(&key) else {
            return;
        };
        for conn in members {
            if let Some(connection) = state.connections.get_mut(&conn) {
                connection.channels.remove(&key);
            }
        }
        info!(channel = %key, "channel closed");
    }

    pub async fn is_subscribed(&self, conn: ConnectionId, key: ChannelKey) -> bool {
        self.state
            .read()
            .await
            .channels
            .get(&key)
            .is_some_and(|members| members.contains(&conn))
    }

    pub async fn subscriber_count(&self, key: ChannelKey) -> usize {
        self.state
            .read()
            .await
            .channels
            .get(&key)
            .map_or(0, |members| members.len())
    }

    /// Deliver to every subscriber of `key`. Returns how many queues
    /// accepted the frame.
    pub async fn broadcast(&self, key: ChannelKey, event: &ServerEvent) -> usize {
        self.fan_out(key, None, event).await
    }

    /// Deliver to every subscriber of `key` except `sender`.
    pub async fn broadcast_except(
        &self,
        key: ChannelKey,
        sender: ConnectionId,
        event: &ServerEvent,
    ) -> usize {
        self.fan_out(key, Some(sender), event).await
    }

    /// Deliver to one connection only.
    pub async fn send_to(&self, conn: ConnectionId, event: &ServerEvent) -> bool {
        let Some(frame) = encode(event) else {
            return false;
        };
        let state = self.state.read().await;
        match state.connections.get(&conn) {
            Some(connection) => self.push(conn, &connection.tx, frame),
            None => false,
        }
    }

    /// Frames dropped because a consumer's queue was full or closed.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    async fn fan_out(
        &self,
        key: ChannelKey,
        except: Option<ConnectionId>,
        event: &ServerEvent,
    ) -> usize {
        let Some(frame) = encode(event) else {
            return 0;
        };

        let state = self.state.read().await;
        let Some(members) = state.channels.get(&key) else {
            return 0;
        };

        let mut delivered = 0;
        for conn in members {
            if Some(*conn) == except {
                continue;
            }
            if let Some(connection) = state.connections.get(conn) {
                if self.push(*conn, &connection.tx, frame.clone()) {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    fn push(&self, conn: ConnectionId, tx: &mpsc::Sender<Frame>, frame: Frame) -> bool {
        match tx.try_send(frame) {
            Ok(()) => true,
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(%conn, "dropping frame for slow connection");
                false
            }
        }
    }
}

fn encode(event: &ServerEvent) -> Option<Frame> {
    match event.to_json() {
        Ok(json) => Some(Arc::from(json)),
        Err(e) => {
            warn!(error = %e, "failed to encode event");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(room_id: Uuid) -> ServerEvent {
        ServerEvent::RoomDeleted { room_id }
    }

    #[tokio::test]
    async fn test_broadcast_reaches_subscribers_only() {
        let hub = Hub::new(8);
        let room = Uuid::new_v4();
        let key = ChannelKey::Room(room);

        let (a, mut rx_a) = hub.register(Uuid::new_v4()).await;
        let (b, mut rx_b) = hub.register(Uuid::new_v4()).await;
        let (_c, mut rx_c) = hub.register(Uuid::new_v4()).await;
        assert!(hub.subscribe(a, key).await);
        assert!(hub.subscribe(b, key).await);

        assert_eq!(hub.broadcast(key, &event(room)).await, 2);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
        assert!(rx_c.try_recv().is_err());

        assert_eq!(hub.broadcast_except(key, a, &event(room)).await, 1);
        assert!(rx_a.try_recv().is_err());
        let frame = rx_b.try_recv().unwrap();
        assert!(frame.contains("room_deleted"));
    }

    #[tokio::test]
    async fn test_unregister_releases_subscriptions() {
        let hub = Hub::new(8);
        let room = ChannelKey::Room(Uuid::new_v4());
        let session = ChannelKey::Session(Uuid::new_v4());

        let (conn, _rx) = hub.register(Uuid::new_v4()).await;
        hub.subscribe(conn, room).await;
        hub.subscribe(conn, session).await;

        let mut released = hub.unregister(conn).await;
        released.sort_by_key(|k| k.to_key());
        assert_eq!(released.len(), 2);
        assert_eq!(hub.subscriber_count(room).await, 0);
        assert_eq!(hub.subscriber_count(session).await, 0);
        assert!(!hub.subscribe(conn, room).await);
    }

    #[tokio::test]
    async fn test_slow_consumer_is_skipped() {
        let hub = Hub::new(1);
        let room = Uuid::new_v4();
        let key = ChannelKey::Room(room);

        let (slow, _slow_rx) = hub.register(Uuid::new_v4()).await;
        let (fast, mut fast_rx) = hub.register(Uuid::new_v4()).await;
        hub.subscribe(slow, key).await;
        hub.subscribe(fast, key).await;

        assert_eq!(hub.broadcast(key, &event(room)).await, 2);
        fast_rx.try_recv().unwrap();

        // `slow` never drains its single-slot queue.
        assert_eq!(hub.broadcast(key, &event(room)).await, 1);
        assert_eq!(hub.dropped_frames(), 1);
        fast_rx.try_recv().unwrap();
    }

    #[tokio::test]
    async fn test_evict_user_and_close_channel() {
        let hub = Hub::new(8);
        let key = ChannelKey::Room(Uuid::new_v4());
        let user = Uuid::new_v4();

        let (phone, _r1) = hub.register(user).await;
        let (laptop, _r2) = hub.register(user).await;
        let (other, _r3) = hub.register(Uuid::new_v4()).await;
        for conn in [phone, laptop, other] {
            hub.subscribe(conn, key).await;
        }

        assert_eq!(hub.evict_user(key, user).await, 2);
        assert!(!hub.is_subscribed(phone, key).await);
        assert!(hub.is_subscribed(other, key).await);

        hub.close_channel(key).await;
        assert_eq!(hub.subscriber_count(key).await, 0);
        assert!(hub.unregister(other).await.is_empty());
    }
}
