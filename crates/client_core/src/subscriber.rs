//! Binds realtime events to the reconcilers while the screen showing them
//! is both focused and connected.

use std::{
    str::FromStr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError, Weak,
    },
};

use serde::de::DeserializeOwned;
use serde_json::Value;
use shared::{
    domain::{Message, MessageId, MessageStatus, RoomId, UserId},
    protocol::{OutboundEvent, RoomEvent, RoomEventKind},
};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    error::PayloadError,
    store::LiveStore,
    transport::{ConnectionState, HandlerId, RoomTransport},
};

/// What the client acknowledges when a message from someone else arrives
/// while the room is on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckPolicy {
    None,
    /// Emit `receiveMessage` on the socket.
    Delivered,
    /// Emit `receiveMessage`, then mark the message read over HTTP.
    #[default]
    DeliveredAndRead,
}

impl FromStr for AckPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "none" => Ok(AckPolicy::None),
            "delivered" => Ok(AckPolicy::Delivered),
            "delivered_and_read" => Ok(AckPolicy::DeliveredAndRead),
            other => Err(format!("unknown ack policy: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckRequest {
    MarkRead {
        room_id: RoomId,
        message_id: MessageId,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberState {
    Detached,
    Attached,
}

struct Attachment {
    live: Arc<AtomicBool>,
    registrations: Vec<(RoomEventKind, HandlerId)>,
}

/// Receiver of the events a [`GatedSubscriber`] registers for.
pub trait EventSink: Send + Sync + 'static {
    const KINDS: &'static [RoomEventKind];

    /// Log label for the registrations, e.g. the room id.
    fn scope(&self) -> String;
    fn handle(&self, kind: RoomEventKind, payload: &Value);
}

/// Keeps a sink registered on the transport exactly while the screen is
/// focused and the transport is connected.
pub struct GatedSubscriber<S: EventSink> {
    sink: Arc<S>,
    transport: Arc<dyn RoomTransport>,
    focused: bool,
    connected: bool,
    attachment: Option<Attachment>,
}

/// Binds one room's five events to its message store.
pub type LiveEventSubscriber = GatedSubscriber<RoomEvents>;

impl<S: EventSink> GatedSubscriber<S> {
    pub fn with_sink(sink: S, transport: Arc<dyn RoomTransport>) -> Self {
        let connected = transport.is_connected();
        Self {
            sink: Arc::new(sink),
            transport,
            focused: false,
            connected,
            attachment: None,
        }
    }

    pub fn state(&self) -> SubscriberState {
        if self.attachment.is_some() {
            SubscriberState::Attached
        } else {
            SubscriberState::Detached
        }
    }

    pub fn is_focused(&self) -> bool {
        self.focused
    }

    pub fn set_focused(&mut self, focused: bool) -> SubscriberState {
        self.focused = focused;
        self.sync_attachment()
    }

    pub fn set_connected(&mut self, connected: bool) -> SubscriberState {
        self.connected = connected;
        self.sync_attachment()
    }

    /// Unconditionally drops every registration, as on unmount.
    pub fn shutdown(&mut self) {
        self.focused = false;
        self.detach();
    }

    fn sync_attachment(&mut self) -> SubscriberState {
        let wanted = self.focused && self.connected;
        match (wanted, self.attachment.is_some()) {
            (true, false) => self.attach(),
            (false, true) => self.detach(),
            _ => {}
        }
        self.state()
    }

    fn attach(&mut self) {
        let live = Arc::new(AtomicBool::new(true));
        let registrations = S::KINDS
            .iter()
            .map(|&kind| {
                let sink = Arc::clone(&self.sink);
                let live = Arc::clone(&live);
                let id = self.transport.on(
                    kind,
                    Arc::new(move |payload: &Value| {
                        if live.load(Ordering::Acquire) {
                            sink.handle(kind, payload);
                        }
                    }),
                );
                (kind, id)
            })
            .collect();
        self.attachment = Some(Attachment {
            live,
            registrations,
        });
        info!(scope = %self.sink.scope(), "subscriber: attached");
    }

    fn detach(&mut self) {
        let Some(attachment) = self.attachment.take() else {
            return;
        };
        attachment.live.store(false, Ordering::Release);
        for (kind, id) in attachment.registrations {
            if !self.transport.off(kind, id) {
                warn!(
                    scope = %self.sink.scope(),
                    event = %kind,
                    "subscriber: handler was already unregistered"
                );
            }
        }
        info!(scope = %self.sink.scope(), "subscriber: detached");
    }
}

impl<S: EventSink> Drop for GatedSubscriber<S> {
    fn drop(&mut self) {
        self.detach();
    }
}

/// Seeds `subscriber` with the transport's current connection state and
/// keeps it in step with later changes.
///
/// The receiver is taken before the state is read, so a transition that
/// lands in between is still observed by the spawned task.
pub(crate) fn follow_connection<S: EventSink>(
    session_id: Uuid,
    transport: &dyn RoomTransport,
    subscriber: Arc<Mutex<GatedSubscriber<S>>>,
) -> JoinHandle<()> {
    let mut connection = transport.connection();
    let connected = *connection.borrow_and_update() == ConnectionState::Connected;
    subscriber
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .set_connected(connected);

    tokio::spawn(async move {
        while connection.changed().await.is_ok() {
            let state = *connection.borrow_and_update();
            let attached = subscriber
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .set_connected(state == ConnectionState::Connected);
            debug!(
                session_id = %session_id,
                connection = ?state,
                subscriber = ?attached,
                "subscriber: connection changed"
            );
        }
    })
}

/// Emits the socket-level "received" acknowledgment for `message`.
pub(crate) fn emit_received(transport: &Weak<dyn RoomTransport>, message: &Message) {
    let Some(transport) = transport.upgrade() else {
        return;
    };
    let ack = OutboundEvent::MessageReceived {
        room_id: message.room_id.clone(),
        message_id: message.id.clone(),
    };
    if let Err(err) = transport.emit(ack) {
        debug!(message_id = %message.id, "subscriber: received ack not sent: {err}");
    }
}

pub struct RoomEvents {
    room_id: RoomId,
    current_user: UserId,
    store: LiveStore,
    transport: Weak<dyn RoomTransport>,
    ack_policy: AckPolicy,
    acks: Option<mpsc::UnboundedSender<AckRequest>>,
}

impl GatedSubscriber<RoomEvents> {
    pub fn new(
        room_id: RoomId,
        current_user: UserId,
        transport: Arc<dyn RoomTransport>,
        store: LiveStore,
    ) -> Self {
        Self::with_ack_policy(room_id, current_user, transport, store, AckPolicy::None, None)
    }

    pub fn with_ack_policy(
        room_id: RoomId,
        current_user: UserId,
        transport: Arc<dyn RoomTransport>,
        store: LiveStore,
        ack_policy: AckPolicy,
        acks: Option<mpsc::UnboundedSender<AckRequest>>,
    ) -> Self {
        let sink = RoomEvents {
            room_id,
            current_user,
            store,
            transport: Arc::downgrade(&transport),
            ack_policy,
            acks,
        };
        Self::with_sink(sink, transport)
    }
}

impl EventSink for RoomEvents {
    const KINDS: &'static [RoomEventKind] = &RoomEventKind::ALL;

    fn scope(&self) -> String {
        self.room_id.to_string()
    }

    fn handle(&self, kind: RoomEventKind, payload: &Value) {
        let event = match decode_event(kind, payload) {
            Ok(event) => event,
            Err(err) => {
                warn!(room_id = %self.room_id, "subscriber: dropping event: {err}");
                return;
            }
        };

        let mut read_request = None;
        if let RoomEvent::NewMessage(message) = &event {
            if message.room_id != self.room_id {
                debug!(
                    room_id = %self.room_id,
                    other_room_id = %message.room_id,
                    "subscriber: message for another room ignored"
                );
                return;
            }
            if self.store.snapshot().contains(&message.id) {
                debug!(message_id = %message.id, "subscriber: redelivered message ignored");
                return;
            }
            if self.wants_ack(message) {
                emit_received(&self.transport, message);
                if self.ack_policy == AckPolicy::DeliveredAndRead {
                    read_request = Some(AckRequest::MarkRead {
                        room_id: message.room_id.clone(),
                        message_id: message.id.clone(),
                    });
                }
            }
        }

        if self.store.apply_event(event) {
            debug!(room_id = %self.room_id, event = %kind, "subscriber: store updated");
        }

        if let (Some(request), Some(acks)) = (read_request, &self.acks) {
            if acks.send(request).is_err() {
                debug!(room_id = %self.room_id, "subscriber: ack worker gone, mark-read dropped");
            }
        }
    }
}

impl RoomEvents {
    fn wants_ack(&self, message: &Message) -> bool {
        message.sender_id != self.current_user && self.ack_policy != AckPolicy::None
    }
}

/// Validates an untyped payload against the schema of `kind`.
pub fn decode_event(kind: RoomEventKind, payload: &Value) -> Result<RoomEvent, PayloadError> {
    let event = kind.as_str();
    let decoded = match kind {
        RoomEventKind::NewMessage => {
            let message: Message = decode(event, payload)?;
            require(event, "id", !message.id.is_empty())?;
            require(event, "roomId", !message.room_id.is_empty())?;
            RoomEvent::NewMessage(message)
        }
        RoomEventKind::MessageDelivered => {
            RoomEvent::MessageDelivered(validated_status(event, decode(event, payload)?)?)
        }
        RoomEventKind::MessageRead => {
            RoomEvent::MessageRead(validated_status(event, decode(event, payload)?)?)
        }
        RoomEventKind::MessagesDelivered => {
            RoomEvent::MessagesDelivered(validated_statuses(event, decode(event, payload)?)?)
        }
        RoomEventKind::MessagesRead => {
            RoomEvent::MessagesRead(validated_statuses(event, decode(event, payload)?)?)
        }
    };
    Ok(decoded)
}

fn decode<T: DeserializeOwned>(event: &'static str, payload: &Value) -> Result<T, PayloadError> {
    T::deserialize(payload).map_err(|source| PayloadError::Malformed { event, source })
}

fn require(event: &'static str, field: &'static str, present: bool) -> Result<(), PayloadError> {
    if present {
        Ok(())
    } else {
        Err(PayloadError::MissingField { event, field })
    }
}

fn validated_status(
    event: &'static str,
    status: MessageStatus,
) -> Result<MessageStatus, PayloadError> {
    require(event, "messageId", !status.message_id.is_empty())?;
    require(event, "userId", !status.user_id.is_empty())?;
    Ok(status)
}

fn validated_statuses(
    event: &'static str,
    statuses: Vec<MessageStatus>,
) -> Result<Vec<MessageStatus>, PayloadError> {
    statuses
        .into_iter()
        .map(|status| validated_status(event, status))
        .collect()
}

#[cfg(test)]
#[path = "tests/subscriber_tests.rs"]
mod tests;
