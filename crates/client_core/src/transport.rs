//! Event transport seam between the room socket and the subscriber.
//!
//! Handlers are invoked synchronously, on the task that decoded the frame,
//! and always outside the registry lock so a handler may itself register or
//! unregister handlers.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
};

use serde_json::Value;
use shared::protocol::{OutboundEvent, RawFrame, RoomEventKind};
use tokio::sync::watch;
use tracing::debug;

use crate::error::TransportError;

pub type EventHandler = Arc<dyn Fn(&Value) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
}

pub trait RoomTransport: Send + Sync {
    fn on(&self, kind: RoomEventKind, handler: EventHandler) -> HandlerId;
    /// Returns false when `id` was not registered for `kind`.
    fn off(&self, kind: RoomEventKind, id: HandlerId) -> bool;
    fn emit(&self, event: OutboundEvent) -> Result<(), TransportError>;
    fn connection(&self) -> watch::Receiver<ConnectionState>;

    fn is_connected(&self) -> bool {
        *self.connection().borrow() == ConnectionState::Connected
    }
}

#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    handlers: Mutex<HashMap<RoomEventKind, Vec<(HandlerId, EventHandler)>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, kind: RoomEventKind, handler: EventHandler) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_default()
            .push((id, handler));
        id
    }

    pub fn off(&self, kind: RoomEventKind, id: HandlerId) -> bool {
        let mut handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(registered) = handlers.get_mut(&kind) else {
            return false;
        };
        let before = registered.len();
        registered.retain(|(handler_id, _)| *handler_id != id);
        let removed = registered.len() != before;
        if registered.is_empty() {
            handlers.remove(&kind);
        }
        removed
    }

    pub fn handler_count(&self, kind: RoomEventKind) -> usize {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .map_or(0, Vec::len)
    }

    /// Invokes every handler registered for `kind`; returns how many ran.
    pub fn dispatch(&self, kind: RoomEventKind, payload: &Value) -> usize {
        let snapshot: Vec<EventHandler> = {
            let handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
            handlers
                .get(&kind)
                .map(|registered| registered.iter().map(|(_, h)| Arc::clone(h)).collect())
                .unwrap_or_default()
        };
        for handler in &snapshot {
            handler(payload);
        }
        snapshot.len()
    }

    pub fn dispatch_frame(&self, frame: &RawFrame) -> usize {
        match frame.event.parse::<RoomEventKind>() {
            Ok(kind) => self.dispatch(kind, &frame.payload),
            Err(_) => {
                debug!(event = %frame.event, "transport: ignoring unknown event");
                0
            }
        }
    }
}

/// In-process transport: events are injected with [`LocalTransport::deliver`]
/// and emitted frames are recorded instead of sent.
pub struct LocalTransport {
    bus: EventBus,
    state: watch::Sender<ConnectionState>,
    sent: Mutex<Vec<OutboundEvent>>,
}

impl Default for LocalTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalTransport {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            bus: EventBus::new(),
            state,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn set_connection(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    pub fn deliver(&self, kind: RoomEventKind, payload: Value) -> usize {
        self.bus.dispatch(kind, &payload)
    }

    pub fn handler_count(&self, kind: RoomEventKind) -> usize {
        self.bus.handler_count(kind)
    }

    pub fn sent(&self) -> Vec<OutboundEvent> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl RoomTransport for LocalTransport {
    fn on(&self, kind: RoomEventKind, handler: EventHandler) -> HandlerId {
        self.bus.on(kind, handler)
    }

    fn off(&self, kind: RoomEventKind, id: HandlerId) -> bool {
        self.bus.off(kind, id)
    }

    fn emit(&self, event: OutboundEvent) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Unavailable);
        }
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
        Ok(())
    }

    fn connection(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
