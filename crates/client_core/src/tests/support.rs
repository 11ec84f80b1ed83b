use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use shared::{
    domain::{Message, MessageId, MessageStatus, Room, RoomId, UserSummary},
    error::ApiFailure,
};

use crate::api::{AccessToken, ChatApi};

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().expect("timestamp")
}

pub fn message(id: &str, sender: &str, created_at: i64) -> Message {
    Message::new(id, "room-1", sender, format!("body of {id}"), at(created_at))
}

pub fn room(user_ids: &[&str]) -> Room {
    Room {
        id: RoomId::from("room-1"),
        name: "general".to_string(),
        description: None,
        users: user_ids
            .iter()
            .map(|id| UserSummary {
                id: (*id).into(),
                username: id.to_string(),
                email: None,
            })
            .collect(),
        messages: Vec::new(),
    }
}

#[derive(Default)]
pub struct FakeChatApi {
    pub history: Mutex<Option<Result<Vec<Message>, ApiFailure>>>,
    pub fail_bulk_read: bool,
    pub fail_read: bool,
    pub calls: Mutex<Vec<String>>,
}

impl FakeChatApi {
    pub fn with_history(messages: Vec<Message>) -> Self {
        Self {
            history: Mutex::new(Some(Ok(messages))),
            ..Self::default()
        }
    }

    pub fn failing_history(failure: ApiFailure) -> Self {
        Self {
            history: Mutex::new(Some(Err(failure))),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls").clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().expect("calls").push(call);
    }
}

#[async_trait]
impl ChatApi for FakeChatApi {
    async fn list_rooms(&self, _token: &AccessToken) -> Result<Vec<Room>, ApiFailure> {
        self.record("list_rooms".to_string());
        Ok(vec![room(&["alice", "bob"])])
    }

    async fn fetch_room_messages(
        &self,
        _token: &AccessToken,
        room_id: &RoomId,
    ) -> Result<Vec<Message>, ApiFailure> {
        self.record(format!("fetch:{room_id}"));
        self.history
            .lock()
            .expect("history")
            .clone()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn send_message(
        &self,
        _token: &AccessToken,
        room_id: &RoomId,
        content: &str,
    ) -> Result<Message, ApiFailure> {
        self.record(format!("send:{room_id}:{content}"));
        Ok(Message::new("sent-1", room_id.clone(), "alice", content, at(100)))
    }

    async fn mark_message_delivered(
        &self,
        _token: &AccessToken,
        _room_id: &RoomId,
        message_id: &MessageId,
    ) -> Result<Option<MessageStatus>, ApiFailure> {
        self.record(format!("delivered:{message_id}"));
        Ok(None)
    }

    async fn mark_message_read(
        &self,
        _token: &AccessToken,
        _room_id: &RoomId,
        message_id: &MessageId,
    ) -> Result<Option<MessageStatus>, ApiFailure> {
        self.record(format!("read:{message_id}"));
        if self.fail_read {
            return Err(ApiFailure::with_status("read failed", 500));
        }
        Ok(None)
    }

    async fn mark_room_messages_read(
        &self,
        _token: &AccessToken,
        room_id: &RoomId,
    ) -> Result<(), ApiFailure> {
        self.record(format!("room_read:{room_id}"));
        if self.fail_bulk_read {
            return Err(ApiFailure::with_status("bulk read failed", 500));
        }
        Ok(())
    }

    async fn mark_room_messages_delivered(
        &self,
        _token: &AccessToken,
        room_id: &RoomId,
    ) -> Result<(), ApiFailure> {
        self.record(format!("room_delivered:{room_id}"));
        Ok(())
    }
}
