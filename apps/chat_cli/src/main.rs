use std::{path::PathBuf, sync::Arc};

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use client_core::{
    config::load_settings_from, load_settings, AccessToken, ChatApi, DeliveryState,
    MessageStore, RestChatApi, RoomList, RoomOverview, RoomSession, WsOptions, WsTransport,
};
use futures::StreamExt;
use shared::domain::{RoomId, UserId};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::wrappers::WatchStream;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const VISIBLE_MESSAGES: usize = 20;

#[derive(Parser, Debug)]
#[command(about = "Join a chat room and follow it live")]
struct Args {
    /// Room to join; without it the room overview is shown.
    #[arg(long)]
    room_id: Option<String>,
    /// Id of the signed-in user; their own messages get delivery marks.
    #[arg(long)]
    user_id: String,
    #[arg(long, env = "CHAT_TOKEN", hide_env_values = true)]
    token: String,
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    api_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    let mut settings = match &args.config {
        Some(path) => load_settings_from(path, |key| std::env::var(key).ok()),
        None => load_settings(),
    };
    if let Some(api_url) = args.api_url {
        settings.api_url = api_url;
    }

    let token = AccessToken::new(args.token);
    let user_id = UserId::new(args.user_id);
    let api = Arc::new(RestChatApi::new(&settings.api_url, settings.request_timeout())?);
    let transport = WsTransport::connect(WsOptions::from_settings(&settings, token.clone())?);

    let Some(room_id) = args.room_id.map(RoomId::new) else {
        let overview = RoomOverview::new(
            user_id,
            Some(token),
            api,
            transport.clone(),
            settings.ack_policy,
        );
        overview.load().await.context("failed to load rooms")?;
        overview.set_focused(true);
        info!("chat: following room overview; /quit to leave");

        let mut snapshots = WatchStream::new(overview.subscribe());
        let renderer = tokio::spawn(async move {
            while let Some(list) = snapshots.next().await {
                render_rooms(&list);
            }
        });
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim() == "/quit" {
                break;
            }
        }
        renderer.abort();
        overview.close();
        transport.close();
        return Ok(());
    };

    let room = api
        .list_rooms(&token)
        .await
        .context("failed to list rooms")?
        .into_iter()
        .find(|room| room.id == room_id)
        .ok_or_else(|| anyhow!("room {room_id} not found for this account"))?;

    let session = Arc::new(RoomSession::new(
        room,
        user_id.clone(),
        Some(token),
        api,
        transport.clone(),
        settings.ack_policy,
    ));
    session
        .mount()
        .await
        .with_context(|| format!("failed to load history for room {room_id}"))?;
    session.set_focused(true);
    info!(room_id = %room_id, "chat: following room; type a line to send, /quit to leave");

    let renderer = {
        let session = Arc::clone(&session);
        let mut snapshots = WatchStream::new(session.subscribe());
        tokio::spawn(async move {
            while let Some(store) = snapshots.next().await {
                render(&session, &store, &user_id);
            }
        })
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line == "/quit" {
            break;
        }
        if line.is_empty() {
            continue;
        }
        if let Err(err) = session.send_message(line).await {
            warn!("chat: {err:#}");
        }
    }

    renderer.abort();
    session.unmount();
    transport.close();
    Ok(())
}

fn render_rooms(list: &RoomList) {
    println!("---- rooms ----");
    for room in list.iter() {
        match room.latest_message() {
            Some(latest) => {
                let sender = latest
                    .sender
                    .as_ref()
                    .map(|sender| sender.username.as_str())
                    .unwrap_or(latest.sender_id.as_str());
                println!("{} ({}): {sender}: {}", room.name, room.id, latest.content);
            }
            None => println!("{} ({})", room.name, room.id),
        }
    }
}

fn render(session: &RoomSession, store: &MessageStore, user_id: &UserId) {
    println!("---- {} ----", session.room().name);
    let visible: Vec<_> = store.iter().take(VISIBLE_MESSAGES).collect();
    for message in visible.into_iter().rev() {
        let sender = message
            .sender
            .as_ref()
            .map(|sender| sender.username.as_str())
            .unwrap_or(message.sender_id.as_str());
        let mark = if &message.sender_id == user_id {
            match session.delivery_state(message) {
                DeliveryState::Sent => " ✓",
                DeliveryState::Delivered => " ✓✓",
                DeliveryState::Read => " ✓✓ read",
            }
        } else {
            ""
        };
        println!(
            "[{}] {sender}: {}{mark}",
            message.created_at.format("%d/%m/%y %H:%M"),
            message.content
        );
    }
}
