//! Client core for a room-based chat: reconciles fetched history with the
//! realtime event stream into one de-duplicated, per-message status view.

pub mod api;
pub mod config;
pub mod error;
pub mod history;
pub mod rooms;
pub mod session;
pub mod status;
pub mod store;
pub mod subscriber;
pub mod transport;
pub mod ws;

pub use api::{AccessToken, ChatApi, RestChatApi};
pub use config::{load_settings, ClientSettings};
pub use error::{FetchError, PayloadError, TransportError};
pub use history::HistoryLoader;
pub use rooms::{RoomList, RoomListStore, RoomListSubscriber, RoomOverview};
pub use session::RoomSession;
pub use status::DeliveryState;
pub use store::{LiveStore, MessageStore};
pub use subscriber::{AckPolicy, EventSink, GatedSubscriber, LiveEventSubscriber, SubscriberState};
pub use transport::{ConnectionState, EventBus, LocalTransport, RoomTransport};
pub use ws::{WsOptions, WsTransport};

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;
