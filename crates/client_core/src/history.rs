use std::sync::Arc;

use shared::domain::{Message, RoomId};
use tracing::{info, warn};

use crate::{
    api::{AccessToken, ChatApi},
    error::FetchError,
};

/// Initial fetch of a room's history on mount.
pub struct HistoryLoader {
    api: Arc<dyn ChatApi>,
}

impl HistoryLoader {
    pub fn new(api: Arc<dyn ChatApi>) -> Self {
        Self { api }
    }

    /// Fetches the room history and, when it is non-empty, asks the server to
    /// mark the room read. The mark-read call is best effort. No retries.
    pub async fn load(
        &self,
        room_id: &RoomId,
        credential: Option<&AccessToken>,
    ) -> Result<Vec<Message>, FetchError> {
        let token = credential.ok_or(FetchError::MissingCredential)?;
        let messages = self.api.fetch_room_messages(token, room_id).await?;
        info!(room_id = %room_id, count = messages.len(), "history: loaded");

        if !messages.is_empty() {
            if let Err(err) = self.api.mark_room_messages_read(token, room_id).await {
                warn!(room_id = %room_id, "history: bulk mark-read failed: {err}");
            }
        }

        Ok(messages)
    }
}

#[cfg(test)]
#[path = "tests/history_tests.rs"]
mod tests;
