//! Real-time routing between connections.
//!
//! Inbound socket events are validated against the store, persisted where
//! they are durable, and published onto room or session channels through the
//! [`Hub`]. HTTP handlers use the `publish_*` helpers so that every
//! mutation, whatever its entry point, reaches the connected members.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use cohort_shared::constants::PRESENCE_WINDOW_SECS;
use cohort_shared::models::NoteEdit;
use cohort_shared::protocol::{ClientEvent, ServerEvent};
use cohort_shared::role::Denied;
use cohort_shared::types::{ChannelKey, ConnectionId};
use cohort_store::StoreError;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::ServerError;
use crate::hub::Hub;
use crate::store::Store;

pub struct Fanout {
    store: Store,
    hub: Hub,
    presence_window: chrono::Duration,
    /// Serializes persist-then-broadcast per room so delivery order matches
    /// storage order.
    sequencers: RwLock<HashMap<Uuid, Arc<Mutex<()>>>>,
    /// Session channels opened in each room, so eviction and deletion
    /// reach them too.
    room_sessions: RwLock<HashMap<Uuid, HashSet<Uuid>>>,
}

impl Fanout {
    pub fn new(store: Store, hub: Hub, presence_window: Duration) -> Self {
        let presence_window = chrono::Duration::from_std(presence_window)
            .unwrap_or_else(|_| chrono::Duration::seconds(PRESENCE_WINDOW_SECS));
        Self {
            store,
            hub,
            presence_window,
            sequencers: RwLock::new(HashMap::new()),
            room_sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    pub fn presence_window(&self) -> chrono::Duration {
        self.presence_window
    }

    /// Dispatch one inbound event. Failures are reported to `conn` alone.
    pub async fn handle(&self, conn: ConnectionId, user_id: Uuid, event: ClientEvent) {
        let name = event.name();
        let result = match event {
            ClientEvent::JoinRoom { room_id } => self.join_room(conn, user_id, room_id).await,
            ClientEvent::LeaveRoom { room_id } => {
                self.leave_room(conn, room_id).await;
                Ok(())
            }
            ClientEvent::ChatMessage { room_id, message } => {
                self.chat_message(conn, user_id, room_id, message).await
            }
            ClientEvent::SyncFlashcard { room_id, index } => {
                let event = ServerEvent::FlashcardSynced {
                    room_id,
                    user_id,
                    index,
                };
                self.relay(conn, room_id, event).await
            }
            ClientEvent::SyncQuiz { room_id, index } => {
                let event = ServerEvent::QuizSynced {
                    room_id,
                    user_id,
                    index,
                };
                self.relay(conn, room_id, event).await
            }
            ClientEvent::NoteEdit {
                room_id,
                content_id,
                edit,
            } => self.note_edit(conn, user_id, room_id, content_id, edit).await,
            ClientEvent::AnnotationTyping {
                room_id,
                content_id,
                is_typing,
            } => {
                let event = ServerEvent::AnnotationTyping {
                    room_id,
                    content_id,
                    user_id,
                    is_typing,
                };
                self.relay(conn, room_id, event).await
            }
            ClientEvent::TypingStart { room_id, name } => {
                let event = ServerEvent::UserTyping {
                    room_id,
                    user_id,
                    name,
                };
                self.relay(conn, room_id, event).await
            }
            ClientEvent::TypingStop { room_id } => {
                let event = ServerEvent::UserStoppedTyping { room_id, user_id };
                self.relay(conn, room_id, event).await
            }
            ClientEvent::SessionJoin { session_id } => {
                self.session_join(conn, user_id, session_id).await
            }
            ClientEvent::SessionLeave { session_id } => {
                self.hub
                    .unsubscribe(conn, ChannelKey::Session(session_id))
                    .await;
                Ok(())
            }
        };

        if let Err(e) = result {
            debug!(%conn, %user_id, event = name, error = %e, "event rejected");
            self.hub
                .send_to(conn, &ServerEvent::error(e.code(), e.client_message()))
                .await;
        }
    }

    /// Subscribe a member's connection to its room and announce presence.
    pub async fn join_room(
        &self,
        conn: ConnectionId,
        user_id: Uuid,
        room_id: Uuid,
    ) -> Result<(), ServerError> {
        self.store
            .call(move |db| {
                if db.touch_presence(room_id, user_id)? {
                    return Ok(());
                }
                db.get_room(room_id)?;
                Err(StoreError::Denied(Denied::InsufficientRole(
                    "not a member of this room",
                )))
            })
            .await?;

        let key = ChannelKey::Room(room_id);
        self.hub.subscribe(conn, key).await;
        let subscribers = self.hub.subscriber_count(key).await;
        info!(%conn, %user_id, %room_id, subscribers, "connection joined room channel");

        self.publish_members(room_id).await;
        Ok(())
    }

    pub async fn leave_room(&self, conn: ConnectionId, room_id: Uuid) {
        self.hub.unsubscribe(conn, ChannelKey::Room(room_id)).await;
        self.publish_members(room_id).await;
        self.prune(room_id).await;
    }

    /// Persist, then broadcast to the whole room (sender included).
    pub async fn chat_message(
        &self,
        conn: ConnectionId,
        user_id: Uuid,
        room_id: Uuid,
        text: String,
    ) -> Result<(), ServerError> {
        self.require_subscription(conn, room_id).await?;

        let sequencer = self.sequencer(room_id).await;
        let _turn = sequencer.lock().await;

        let message = self
            .store
            .call(move |db| db.save_chat_message(room_id, user_id, &text))
            .await?;
        self.hub
            .broadcast(ChannelKey::Room(room_id), &ServerEvent::ChatMessage(message))
            .await;
        Ok(())
    }

    /// Log the edit if possible; the other editors get it either way.
    pub async fn note_edit(
        &self,
        conn: ConnectionId,
        user_id: Uuid,
        room_id: Uuid,
        content_id: Uuid,
        edit: NoteEdit,
    ) -> Result<(), ServerError> {
        self.require_subscription(conn, room_id).await?;

        let logged = edit.clone();
        if let Err(e) = self
            .store
            .call(move |db| db.record_edit(room_id, content_id, user_id, &logged))
            .await
        {
            warn!(%room_id, %content_id, %user_id, error = %e, "note edit not persisted");
        }

        let event = ServerEvent::NoteEdited {
            room_id,
            content_id,
            user_id,
            edit,
        };
        self.hub
            .broadcast_except(ChannelKey::Room(room_id), conn, &event)
            .await;
        Ok(())
    }

    pub async fn session_join(
        &self,
        conn: ConnectionId,
        user_id: Uuid,
        session_id: Uuid,
    ) -> Result<(), ServerError> {
        let (room_id, participant) = self
            .store
            .call(move |db| {
                let session = db.get_session(session_id)?;
                let participant = db.join_session(session_id, user_id)?;
                Ok((session.room_id, participant))
            })
            .await?;

        self.room_sessions
            .write()
            .await
            .entry(room_id)
            .or_default()
            .insert(session_id);
        let key = ChannelKey::Session(session_id);
        self.hub.subscribe(conn, key).await;
        self.hub
            .broadcast(
                key,
                &ServerEvent::ParticipantJoined {
                    session_id,
                    user_id,
                    name: participant.name,
                    joined_at: participant.joined_at,
                },
            )
            .await;
        Ok(())
    }

    /// Release everything the connection held and refresh presence in the
    /// rooms it left behind.
    pub async fn disconnect(&self, conn: ConnectionId) {
        let released = self.hub.unregister(conn).await;
        for key in released {
            if let ChannelKey::Room(room_id) = key {
                self.publish_members(room_id).await;
                self.prune(room_id).await;
            }
        }
        debug!(%conn, "connection closed");
    }

    /// Broadcast the room's currently active members.
    pub async fn publish_members(&self, room_id: Uuid) {
        let window = self.presence_window;
        match self
            .store
            .call(move |db| db.active_members(room_id, window))
            .await
        {
            Ok(members) => {
                self.hub
                    .broadcast(
                        ChannelKey::Room(room_id),
                        &ServerEvent::MembersUpdated { room_id, members },
                    )
                    .await;
            }
            Err(e) => warn!(%room_id, error = %e, "presence refresh failed"),
        }
    }

    pub async fn publish_room(&self, room_id: Uuid, event: &ServerEvent) -> usize {
        self.hub.broadcast(ChannelKey::Room(room_id), event).await
    }

    pub async fn publish_session(&self, session_id: Uuid, event: &ServerEvent) -> usize {
        self.hub.broadcast(ChannelKey::Session(session_id), event).await
    }

    /// A member left or was removed: stop routing the room and its
    /// sessions to their connections.
    pub async fn evict(&self, room_id: Uuid, user_id: Uuid) {
        let mut evicted = self.hub.evict_user(ChannelKey::Room(room_id), user_id).await;
        for session_id in self.sessions_in(room_id).await {
            evicted += self
                .hub
                .evict_user(ChannelKey::Session(session_id), user_id)
                .await;
        }
        if evicted > 0 {
            debug!(%room_id, %user_id, subscriptions = evicted, "evicted from room channels");
        }
        self.publish_members(room_id).await;
        self.prune(room_id).await;
    }

    /// Announce the deletion, then tear down the room channel and every
    /// session channel opened under it.
    pub async fn close_room(&self, room_id: Uuid) {
        self.publish_room(room_id, &ServerEvent::RoomDeleted { room_id })
            .await;
        self.hub.close_channel(ChannelKey::Room(room_id)).await;
        let sessions = self.room_sessions.write().await.remove(&room_id);
        for session_id in sessions.into_iter().flatten() {
            self.hub.close_channel(ChannelKey::Session(session_id)).await;
        }
        self.sequencers.write().await.remove(&room_id);
    }

    /// Forward an ephemeral event to everyone else in the room.
    async fn relay(
        &self,
        conn: ConnectionId,
        room_id: Uuid,
        event: ServerEvent,
    ) -> Result<(), ServerError> {
        self.require_subscription(conn, room_id).await?;
        self.hub
            .broadcast_except(ChannelKey::Room(room_id), conn, &event)
            .await;
        Ok(())
    }

    async fn require_subscription(
        &self,
        conn: ConnectionId,
        room_id: Uuid,
    ) -> Result<(), ServerError> {
        let key = ChannelKey::Room(room_id);
        if self.hub.is_subscribed(conn, key).await {
            Ok(())
        } else {
            Err(ServerError::NotSubscribed(key.to_key()))
        }
    }

    async fn sessions_in(&self, room_id: Uuid) -> Vec<Uuid> {
        self.room_sessions
            .read()
            .await
            .get(&room_id)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Forget per-room state once nobody is listening. A sequencer still
    /// held by an in-flight chat message is kept.
    async fn prune(&self, room_id: Uuid) {
        if self.hub.subscriber_count(ChannelKey::Room(room_id)).await > 0 {
            return;
        }
        {
            let mut sequencers = self.sequencers.write().await;
            if sequencers
                .get(&room_id)
                .is_some_and(|seq| Arc::strong_count(seq) == 1)
            {
                sequencers.remove(&room_id);
            }
        }

        let mut idle = Vec::new();
        for session_id in self.sessions_in(room_id).await {
            if self.hub.subscriber_count(ChannelKey::Session(session_id)).await == 0 {
                idle.push(session_id);
            }
        }
        let mut room_sessions = self.room_sessions.write().await;
        if let Some(ids) = room_sessions.get_mut(&room_id) {
            for session_id in &idle {
                ids.remove(session_id);
            }
            if ids.is_empty() {
                room_sessions.remove(&room_id);
            }
        }
    }

    async fn sequencer(&self, room_id: Uuid) -> Arc<Mutex<()>> {
        {
            let sequencers = self.sequencers.read().await;
            if let Some(seq) = sequencers.get(&room_id) {
                return seq.clone();
            }
        }

        let mut sequencers = self.sequencers.write().await;
        sequencers
            .entry(room_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
