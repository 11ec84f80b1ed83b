//! Ordered, de-duplicated message list for one room.
//!
//! [`MessageStore`] is an immutable snapshot: every operation returns a new
//! store and leaves the receiver untouched. Entries are shared between
//! snapshots, so an operation that changes one message never alters the
//! identity of the others. Order is newest-first; new messages are only ever
//! prepended.

use std::{collections::HashSet, sync::Arc};

use shared::{
    domain::{Message, MessageId, MessageStatus},
    protocol::RoomEvent,
};
use tokio::sync::watch;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct MessageStore {
    messages: Arc<[Arc<Message>]>,
}

impl Default for MessageStore {
    fn default() -> Self {
        Self {
            messages: Arc::from(Vec::new()),
        }
    }
}

impl MessageStore {
    /// Builds a store from a fetched history page.
    ///
    /// Input may be oldest-first or newest-first; it is normalized to
    /// newest-first. Repeated ids keep their first occurrence.
    pub fn initialize(messages: Vec<Message>) -> Self {
        let mut messages = messages;
        if let (Some(first), Some(last)) = (messages.first(), messages.last()) {
            if first.created_at < last.created_at {
                messages.reverse();
            }
        }

        let mut seen = HashSet::with_capacity(messages.len());
        let entries: Vec<Arc<Message>> = messages
            .into_iter()
            .filter(|message| seen.insert(message.id.clone()))
            .map(Arc::new)
            .collect();

        Self {
            messages: Arc::from(entries),
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().map(|entry| entry.as_ref())
    }

    pub fn ids(&self) -> Vec<&MessageId> {
        self.iter().map(|message| &message.id).collect()
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.position(id).map(|index| self.messages[index].as_ref())
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.position(id).is_some()
    }

    /// True when both values are the very same snapshot.
    pub fn same_snapshot(&self, other: &MessageStore) -> bool {
        Arc::ptr_eq(&self.messages, &other.messages)
    }

    /// Prepends `message` unless its id is already present.
    pub fn apply_new_message(&self, message: Message) -> MessageStore {
        if self.contains(&message.id) {
            debug!(message_id = %message.id, "store: duplicate message ignored");
            return self.clone();
        }

        let mut entries = Vec::with_capacity(self.messages.len() + 1);
        entries.push(Arc::new(message));
        entries.extend(self.messages.iter().cloned());
        MessageStore {
            messages: Arc::from(entries),
        }
    }

    /// Upserts the `(message_id, user_id)` record; last write wins.
    ///
    /// Updates for messages outside this window are dropped.
    pub fn apply_status_update(&self, status: MessageStatus) -> MessageStore {
        self.apply_bulk_status_update(std::iter::once(status))
    }

    /// Applies each record in order and yields a single resulting snapshot.
    pub fn apply_bulk_status_update(
        &self,
        statuses: impl IntoIterator<Item = MessageStatus>,
    ) -> MessageStore {
        let mut working: Option<Vec<Arc<Message>>> = None;

        for status in statuses {
            let entries = working.as_deref().unwrap_or(&self.messages[..]);
            let Some(index) = entries
                .iter()
                .position(|message| message.id == status.message_id)
            else {
                debug!(
                    message_id = %status.message_id,
                    user_id = %status.user_id,
                    "store: status for unknown message dropped"
                );
                continue;
            };

            let Some(updated) = with_status(&entries[index], status) else {
                continue;
            };
            let entries = working.get_or_insert_with(|| self.messages.to_vec());
            entries[index] = Arc::new(updated);
        }

        match working {
            Some(entries) => MessageStore {
                messages: Arc::from(entries),
            },
            None => self.clone(),
        }
    }

    pub fn apply_event(&self, event: RoomEvent) -> MessageStore {
        match event {
            RoomEvent::NewMessage(message) => self.apply_new_message(message),
            RoomEvent::MessageDelivered(status) | RoomEvent::MessageRead(status) => {
                self.apply_status_update(status)
            }
            RoomEvent::MessagesDelivered(statuses) | RoomEvent::MessagesRead(statuses) => {
                self.apply_bulk_status_update(statuses)
            }
        }
    }

    fn position(&self, id: &MessageId) -> Option<usize> {
        self.messages.iter().position(|message| &message.id == id)
    }
}

/// Copy of `message` with `status` stored for its user, or `None` when the
/// stored record is already identical.
fn with_status(message: &Message, status: MessageStatus) -> Option<Message> {
    let existing = message
        .status
        .iter()
        .position(|entry| entry.user_id == status.user_id);

    let mut updated = message.clone();
    match existing {
        Some(index) if message.status[index] == status => return None,
        Some(index) => updated.status[index] = status,
        None => updated.status.push(status),
    }
    Some(updated)
}

/// Current snapshot for a mounted room, published to observers on change.
///
/// Every operation reads and replaces the current value inside one critical
/// section, so interleaved events cannot lose each other's updates.
#[derive(Debug, Clone)]
pub struct LiveStore {
    tx: Arc<watch::Sender<MessageStore>>,
}

impl Default for LiveStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveStore {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(MessageStore::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn snapshot(&self) -> MessageStore {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<MessageStore> {
        self.tx.subscribe()
    }

    pub fn initialize(&self, messages: Vec<Message>) {
        self.tx.send_replace(MessageStore::initialize(messages));
    }

    pub fn clear(&self) {
        self.tx.send_replace(MessageStore::default());
    }

    pub fn apply_new_message(&self, message: Message) -> bool {
        self.transform(|store| store.apply_new_message(message))
    }

    pub fn apply_status_update(&self, status: MessageStatus) -> bool {
        self.transform(|store| store.apply_status_update(status))
    }

    pub fn apply_bulk_status_update(&self, statuses: Vec<MessageStatus>) -> bool {
        self.transform(|store| store.apply_bulk_status_update(statuses))
    }

    /// Applies `event`; returns whether the snapshot changed.
    pub fn apply_event(&self, event: RoomEvent) -> bool {
        self.transform(|store| store.apply_event(event))
    }

    fn transform(&self, op: impl FnOnce(&MessageStore) -> MessageStore) -> bool {
        self.tx.send_if_modified(|current| {
            let next = op(current);
            if next.same_snapshot(current) {
                return false;
            }
            *current = next;
            true
        })
    }
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
