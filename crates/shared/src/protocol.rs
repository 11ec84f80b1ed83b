use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{Message, MessageId, MessageStatus, RoomId};

/// Event names pushed by the server on the room channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomEventKind {
    NewMessage,
    MessageDelivered,
    MessageRead,
    MessagesDelivered,
    MessagesRead,
}

impl RoomEventKind {
    pub const ALL: [RoomEventKind; 5] = [
        RoomEventKind::NewMessage,
        RoomEventKind::MessageDelivered,
        RoomEventKind::MessageRead,
        RoomEventKind::MessagesDelivered,
        RoomEventKind::MessagesRead,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RoomEventKind::NewMessage => "newMessage",
            RoomEventKind::MessageDelivered => "messageDelivered",
            RoomEventKind::MessageRead => "messageRead",
            RoomEventKind::MessagesDelivered => "messagesDelivered",
            RoomEventKind::MessagesRead => "messagesRead",
        }
    }
}

impl fmt::Display for RoomEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownEventKind(pub String);

impl FromStr for RoomEventKind {
    type Err = UnknownEventKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RoomEventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownEventKind(s.to_string()))
    }
}

/// A validated room event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomEvent {
    NewMessage(Message),
    MessageDelivered(MessageStatus),
    MessageRead(MessageStatus),
    MessagesDelivered(Vec<MessageStatus>),
    MessagesRead(Vec<MessageStatus>),
}

impl RoomEvent {
    pub fn kind(&self) -> RoomEventKind {
        match self {
            RoomEvent::NewMessage(_) => RoomEventKind::NewMessage,
            RoomEvent::MessageDelivered(_) => RoomEventKind::MessageDelivered,
            RoomEvent::MessageRead(_) => RoomEventKind::MessageRead,
            RoomEvent::MessagesDelivered(_) => RoomEventKind::MessagesDelivered,
            RoomEvent::MessagesRead(_) => RoomEventKind::MessagesRead,
        }
    }
}

/// Frame as it travels over the socket, before the payload is validated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFrame {
    #[serde(rename = "type")]
    pub event: String,
    #[serde(default)]
    pub payload: Value,
}

/// Frames the client sends over the room socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum OutboundEvent {
    ConnectToRoom,
    #[serde(rename = "receiveMessage", rename_all = "camelCase")]
    MessageReceived {
        room_id: RoomId,
        message_id: MessageId,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub room_id: RoomId,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageAckRequest {
    pub room_id: RoomId,
    pub message_id: MessageId,
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
