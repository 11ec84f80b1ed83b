//! One mounted room screen: history, live subscription and acknowledgments.

use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{anyhow, Context, Result};
use shared::domain::{Message, Room, UserId};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    api::{AccessToken, ChatApi},
    error::FetchError,
    history::HistoryLoader,
    status::{self, DeliveryState},
    store::{LiveStore, MessageStore},
    subscriber::{follow_connection, AckPolicy, AckRequest, LiveEventSubscriber, SubscriberState},
    transport::RoomTransport,
};

pub struct RoomSession {
    session_id: Uuid,
    room: Room,
    credential: Option<AccessToken>,
    api: Arc<dyn ChatApi>,
    store: LiveStore,
    subscriber: Arc<Mutex<LiveEventSubscriber>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RoomSession {
    /// Builds the session and starts its background tasks; must be called
    /// inside a tokio runtime.
    pub fn new(
        room: Room,
        current_user: UserId,
        credential: Option<AccessToken>,
        api: Arc<dyn ChatApi>,
        transport: Arc<dyn RoomTransport>,
        ack_policy: AckPolicy,
    ) -> Self {
        let session_id = Uuid::new_v4();
        let store = LiveStore::new();
        let (acks_tx, acks_rx) = mpsc::unbounded_channel();
        let subscriber = Arc::new(Mutex::new(LiveEventSubscriber::with_ack_policy(
            room.id.clone(),
            current_user,
            Arc::clone(&transport),
            store.clone(),
            ack_policy,
            Some(acks_tx),
        )));

        let tasks = vec![
            follow_connection(session_id, transport.as_ref(), Arc::clone(&subscriber)),
            spawn_ack_worker(session_id, Arc::clone(&api), credential.clone(), acks_rx),
        ];

        info!(session_id = %session_id, room_id = %room.id, "session: created");
        Self {
            session_id,
            room,
            credential,
            api,
            store,
            subscriber,
            tasks: Mutex::new(tasks),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn room(&self) -> &Room {
        &self.room
    }

    /// Loads the room history into the store, replacing whatever it held.
    ///
    /// Live messages applied while the fetch is in flight are discarded with
    /// the old contents, so focus the session only after this returns.
    pub async fn mount(&self) -> Result<usize, FetchError> {
        let loader = HistoryLoader::new(Arc::clone(&self.api));
        let messages = loader.load(&self.room.id, self.credential.as_ref()).await?;
        let count = messages.len();
        self.store.initialize(messages);
        info!(
            session_id = %self.session_id,
            room_id = %self.room.id,
            count,
            "session: mounted"
        );
        Ok(count)
    }

    pub fn set_focused(&self, focused: bool) -> SubscriberState {
        self.subscriber
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .set_focused(focused)
    }

    pub fn subscriber_state(&self) -> SubscriberState {
        self.subscriber
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .state()
    }

    pub fn snapshot(&self) -> MessageStore {
        self.store.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<MessageStore> {
        self.store.subscribe()
    }

    pub fn recipients_for(&self, message: &Message) -> Vec<UserId> {
        self.room.recipients_for(&message.sender_id)
    }

    pub fn delivery_state(&self, message: &Message) -> DeliveryState {
        status::delivery_state(&message.status, &self.recipients_for(message))
    }

    /// Posts a message. The store is not touched here: the server echo
    /// arrives as `newMessage` and goes through the usual de-duplication.
    pub async fn send_message(&self, content: &str) -> Result<Message> {
        let token = self
            .credential
            .as_ref()
            .ok_or_else(|| anyhow!("cannot send without an access token"))?;
        let message = self
            .api
            .send_message(token, &self.room.id, content)
            .await
            .with_context(|| format!("failed to send message to room {}", self.room.id))?;
        debug!(session_id = %self.session_id, message_id = %message.id, "session: message sent");
        Ok(message)
    }

    /// Detaches every handler, stops background tasks and drops the list.
    pub fn unmount(&self) {
        self.subscriber
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .shutdown();
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            task.abort();
        }
        self.store.clear();
        info!(session_id = %self.session_id, room_id = %self.room.id, "session: unmounted");
    }
}

impl Drop for RoomSession {
    fn drop(&mut self) {
        for task in self
            .tasks
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            task.abort();
        }
    }
}

fn spawn_ack_worker(
    session_id: Uuid,
    api: Arc<dyn ChatApi>,
    credential: Option<AccessToken>,
    mut requests: mpsc::UnboundedReceiver<AckRequest>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(request) = requests.recv().await {
            let Some(token) = credential.as_ref() else {
                continue;
            };
            match request {
                AckRequest::MarkRead {
                    room_id,
                    message_id,
                } => {
                    if let Err(err) = api.mark_message_read(token, &room_id, &message_id).await {
                        warn!(
                            session_id = %session_id,
                            message_id = %message_id,
                            "session: mark-read failed: {err}"
                        );
                    }
                }
            }
        }
    })
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
