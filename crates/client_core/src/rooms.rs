//! Room overview: every room the user belongs to, most recently active
//! first, each carrying its latest messages.
//!
//! [`RoomList`] follows the same snapshot rules as the message store: every
//! operation returns a new list and untouched rooms keep their identity.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex, PoisonError, Weak},
};

use serde_json::Value;
use shared::{
    domain::{Message, Room, RoomId, UserId},
    protocol::{RoomEvent, RoomEventKind},
};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    api::{AccessToken, ChatApi},
    error::FetchError,
    subscriber::{
        decode_event, emit_received, follow_connection, AckPolicy, EventSink, GatedSubscriber,
        SubscriberState,
    },
    transport::RoomTransport,
};

#[derive(Debug, Clone)]
pub struct RoomList {
    rooms: Arc<[Arc<Room>]>,
}

impl Default for RoomList {
    fn default() -> Self {
        Self {
            rooms: Arc::from(Vec::new()),
        }
    }
}

impl RoomList {
    /// Keeps the server's order; repeated room ids keep their first entry.
    pub fn initialize(rooms: Vec<Room>) -> Self {
        let mut seen = HashSet::with_capacity(rooms.len());
        let entries: Vec<Arc<Room>> = rooms
            .into_iter()
            .filter(|room| seen.insert(room.id.clone()))
            .map(Arc::new)
            .collect();
        Self {
            rooms: Arc::from(entries),
        }
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Room> {
        self.rooms.iter().map(|entry| entry.as_ref())
    }

    pub fn ids(&self) -> Vec<&RoomId> {
        self.iter().map(|room| &room.id).collect()
    }

    pub fn get(&self, id: &RoomId) -> Option<&Room> {
        self.iter().find(|room| &room.id == id)
    }

    pub fn same_snapshot(&self, other: &RoomList) -> bool {
        Arc::ptr_eq(&self.rooms, &other.rooms)
    }

    /// Prepends `message` to its room and moves that room to the front.
    ///
    /// Messages for rooms not in the list, and ids the room already holds,
    /// leave the list unchanged.
    pub fn apply_new_message(&self, message: Message) -> RoomList {
        let Some(index) = self
            .rooms
            .iter()
            .position(|room| room.id == message.room_id)
        else {
            debug!(room_id = %message.room_id, "rooms: message for unknown room dropped");
            return self.clone();
        };
        let room = &self.rooms[index];
        if room.messages.iter().any(|existing| existing.id == message.id) {
            debug!(message_id = %message.id, "rooms: duplicate message ignored");
            return self.clone();
        }

        let mut updated = Room::clone(room);
        updated.messages.insert(0, message);

        let mut entries = Vec::with_capacity(self.rooms.len());
        entries.push(Arc::new(updated));
        entries.extend(
            self.rooms
                .iter()
                .enumerate()
                .filter(|(position, _)| *position != index)
                .map(|(_, room)| Arc::clone(room)),
        );
        RoomList {
            rooms: Arc::from(entries),
        }
    }
}

/// Current room overview, published to observers on change.
#[derive(Debug, Clone)]
pub struct RoomListStore {
    tx: Arc<watch::Sender<RoomList>>,
}

impl Default for RoomListStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomListStore {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(RoomList::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn snapshot(&self) -> RoomList {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RoomList> {
        self.tx.subscribe()
    }

    pub fn initialize(&self, rooms: Vec<Room>) {
        self.tx.send_replace(RoomList::initialize(rooms));
    }

    pub fn apply_new_message(&self, message: Message) -> bool {
        self.tx.send_if_modified(|current| {
            let next = current.apply_new_message(message);
            if next.same_snapshot(current) {
                return false;
            }
            *current = next;
            true
        })
    }
}

pub struct RoomListEvents {
    current_user: UserId,
    store: RoomListStore,
    transport: Weak<dyn RoomTransport>,
    ack_policy: AckPolicy,
}

/// Binds `newMessage` for every room to the overview.
pub type RoomListSubscriber = GatedSubscriber<RoomListEvents>;

impl GatedSubscriber<RoomListEvents> {
    pub fn for_room_list(
        current_user: UserId,
        transport: Arc<dyn RoomTransport>,
        store: RoomListStore,
        ack_policy: AckPolicy,
    ) -> Self {
        let sink = RoomListEvents {
            current_user,
            store,
            transport: Arc::downgrade(&transport),
            ack_policy,
        };
        Self::with_sink(sink, transport)
    }
}

impl EventSink for RoomListEvents {
    const KINDS: &'static [RoomEventKind] = &[RoomEventKind::NewMessage];

    fn scope(&self) -> String {
        "rooms".to_string()
    }

    fn handle(&self, kind: RoomEventKind, payload: &Value) {
        let message = match decode_event(kind, payload) {
            Ok(RoomEvent::NewMessage(message)) => message,
            Ok(_) => return,
            Err(err) => {
                warn!("rooms: dropping event: {err}");
                return;
            }
        };

        let known = self
            .store
            .snapshot()
            .get(&message.room_id)
            .map(|room| room.messages.iter().any(|existing| existing.id == message.id));
        match known {
            None => {
                debug!(room_id = %message.room_id, "rooms: message for unknown room ignored");
                return;
            }
            Some(true) => {
                debug!(message_id = %message.id, "rooms: redelivered message ignored");
                return;
            }
            Some(false) => {}
        }

        if message.sender_id != self.current_user && self.ack_policy != AckPolicy::None {
            emit_received(&self.transport, &message);
        }
        if self.store.apply_new_message(message) {
            debug!("rooms: overview updated");
        }
    }
}

/// The room list screen: initial load, live updates while focused.
pub struct RoomOverview {
    session_id: Uuid,
    credential: Option<AccessToken>,
    api: Arc<dyn ChatApi>,
    store: RoomListStore,
    subscriber: Arc<Mutex<RoomListSubscriber>>,
    follower: Mutex<Option<JoinHandle<()>>>,
}

impl RoomOverview {
    /// Must be called inside a tokio runtime.
    pub fn new(
        current_user: UserId,
        credential: Option<AccessToken>,
        api: Arc<dyn ChatApi>,
        transport: Arc<dyn RoomTransport>,
        ack_policy: AckPolicy,
    ) -> Self {
        let session_id = Uuid::new_v4();
        let store = RoomListStore::new();
        let subscriber = Arc::new(Mutex::new(RoomListSubscriber::for_room_list(
            current_user,
            Arc::clone(&transport),
            store.clone(),
            ack_policy,
        )));
        let follower = follow_connection(session_id, transport.as_ref(), Arc::clone(&subscriber));

        Self {
            session_id,
            credential,
            api,
            store,
            subscriber,
            follower: Mutex::new(Some(follower)),
        }
    }

    /// Fetches the room list, replacing whatever the overview held.
    pub async fn load(&self) -> Result<usize, FetchError> {
        let token = self
            .credential
            .as_ref()
            .ok_or(FetchError::MissingCredential)?;
        let rooms = self.api.list_rooms(token).await?;
        let count = rooms.len();
        self.store.initialize(rooms);
        info!(session_id = %self.session_id, count, "rooms: loaded");
        Ok(count)
    }

    pub fn set_focused(&self, focused: bool) -> SubscriberState {
        self.subscriber
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .set_focused(focused)
    }

    pub fn snapshot(&self) -> RoomList {
        self.store.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<RoomList> {
        self.store.subscribe()
    }

    pub fn close(&self) {
        self.subscriber
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .shutdown();
        if let Some(follower) = self
            .follower
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            follower.abort();
        }
    }
}

impl Drop for RoomOverview {
    fn drop(&mut self) {
        if let Some(follower) = self
            .follower
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            follower.abort();
        }
    }
}

#[cfg(test)]
#[path = "tests/rooms_tests.rs"]
mod tests;
