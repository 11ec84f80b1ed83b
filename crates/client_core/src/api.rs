//! Bearer-authenticated REST bindings for the chat backend.
//!
//! Every failure, whether local validation, network, status or decoding, is
//! normalized to [`ApiFailure`] before it leaves this module.

use std::{fmt, time::Duration};

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use shared::{
    domain::{Message, MessageId, MessageStatus, Room, RoomId},
    error::{ApiFailure, ServerErrorBody},
    protocol::{MessageAckRequest, SendMessageRequest},
};
use tracing::debug;

#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn list_rooms(&self, token: &AccessToken) -> Result<Vec<Room>, ApiFailure>;
    async fn fetch_room_messages(
        &self,
        token: &AccessToken,
        room_id: &RoomId,
    ) -> Result<Vec<Message>, ApiFailure>;
    async fn send_message(
        &self,
        token: &AccessToken,
        room_id: &RoomId,
        content: &str,
    ) -> Result<Message, ApiFailure>;
    async fn mark_message_delivered(
        &self,
        token: &AccessToken,
        room_id: &RoomId,
        message_id: &MessageId,
    ) -> Result<Option<MessageStatus>, ApiFailure>;
    async fn mark_message_read(
        &self,
        token: &AccessToken,
        room_id: &RoomId,
        message_id: &MessageId,
    ) -> Result<Option<MessageStatus>, ApiFailure>;
    async fn mark_room_messages_read(
        &self,
        token: &AccessToken,
        room_id: &RoomId,
    ) -> Result<(), ApiFailure>;
    async fn mark_room_messages_delivered(
        &self,
        token: &AccessToken,
        room_id: &RoomId,
    ) -> Result<(), ApiFailure>;
}

pub struct RestChatApi {
    http: Client,
    api_url: String,
}

impl RestChatApi {
    pub fn new(api_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            http,
            api_url: api_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn get(&self, token: &AccessToken, path: &str) -> RequestBuilder {
        self.http
            .get(format!("{}{path}", self.api_url))
            .header(reqwest::header::AUTHORIZATION, token.bearer())
    }

    fn post(&self, token: &AccessToken, path: &str) -> RequestBuilder {
        self.http
            .post(format!("{}{path}", self.api_url))
            .header(reqwest::header::AUTHORIZATION, token.bearer())
    }

    async fn mark_message(
        &self,
        token: &AccessToken,
        path: &str,
        room_id: &RoomId,
        message_id: &MessageId,
    ) -> Result<Option<MessageStatus>, ApiFailure> {
        if room_id.is_empty() || message_id.is_empty() {
            return Err(ApiFailure::new("Room ID and message ID are required"));
        }
        let response = send(
            self.post(token, path).json(&MessageAckRequest {
                room_id: room_id.clone(),
                message_id: message_id.clone(),
            }),
            None,
        )
        .await?;
        read_optional_json(response).await
    }
}

#[async_trait]
impl ChatApi for RestChatApi {
    async fn list_rooms(&self, token: &AccessToken) -> Result<Vec<Room>, ApiFailure> {
        let response = send(self.get(token, "/room/all"), None).await?;
        read_json(response).await
    }

    async fn fetch_room_messages(
        &self,
        token: &AccessToken,
        room_id: &RoomId,
    ) -> Result<Vec<Message>, ApiFailure> {
        let response = send(self.get(token, &format!("/room/{room_id}/messages")), None).await?;
        read_json(response).await
    }

    async fn send_message(
        &self,
        token: &AccessToken,
        room_id: &RoomId,
        content: &str,
    ) -> Result<Message, ApiFailure> {
        if room_id.is_empty() || content.trim().is_empty() {
            return Err(ApiFailure::new("Room ID and content are required"));
        }
        let request = self.post(token, "/message/send").json(&SendMessageRequest {
            room_id: room_id.clone(),
            content: content.to_string(),
        });
        let response = send(request, Some(StatusCode::CREATED)).await?;
        read_json(response).await
    }

    async fn mark_message_delivered(
        &self,
        token: &AccessToken,
        room_id: &RoomId,
        message_id: &MessageId,
    ) -> Result<Option<MessageStatus>, ApiFailure> {
        self.mark_message(token, "/message/delivered", room_id, message_id)
            .await
    }

    async fn mark_message_read(
        &self,
        token: &AccessToken,
        room_id: &RoomId,
        message_id: &MessageId,
    ) -> Result<Option<MessageStatus>, ApiFailure> {
        self.mark_message(token, "/message/read", room_id, message_id)
            .await
    }

    async fn mark_room_messages_read(
        &self,
        token: &AccessToken,
        room_id: &RoomId,
    ) -> Result<(), ApiFailure> {
        send(self.post(token, &format!("/room/{room_id}/messages/read")), None).await?;
        Ok(())
    }

    async fn mark_room_messages_delivered(
        &self,
        token: &AccessToken,
        room_id: &RoomId,
    ) -> Result<(), ApiFailure> {
        send(
            self.post(token, &format!("/room/{room_id}/messages/delivered")),
            None,
        )
        .await?;
        Ok(())
    }
}

async fn send(request: RequestBuilder, expected: Option<StatusCode>) -> Result<Response, ApiFailure> {
    let response = request.send().await.map_err(network_failure)?;
    let status = response.status();
    let unexpected = expected.is_some_and(|expected| expected != status);
    if status.is_success() && !unexpected {
        return Ok(response);
    }

    let body = response.json::<ServerErrorBody>().await.unwrap_or_default();
    let message = body
        .message
        .unwrap_or_else(|| format!("request failed with status {status}"));
    debug!(status = status.as_u16(), "api: request rejected: {message}");
    Err(ApiFailure::with_status(message, status.as_u16()))
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ApiFailure> {
    response
        .json::<T>()
        .await
        .map_err(|err| ApiFailure::new(format!("invalid response body: {err}")))
}

async fn read_optional_json<T: DeserializeOwned>(response: Response) -> Result<Option<T>, ApiFailure> {
    let text = response.text().await.map_err(network_failure)?;
    if text.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str::<Option<T>>(&text)
        .map_err(|err| ApiFailure::new(format!("invalid response body: {err}")))
}

fn network_failure(err: reqwest::Error) -> ApiFailure {
    let message = if err.is_timeout() {
        "request timed out".to_string()
    } else {
        format!("Network error: {err}")
    };
    ApiFailure {
        error: true,
        message,
        status: err.status().map(|status| status.as_u16()),
    }
}

#[cfg(test)]
#[path = "tests/api_tests.rs"]
mod tests;
