//! Room channel over a WebSocket carrying `{"type", "payload"}` JSON frames.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use shared::protocol::{OutboundEvent, RawFrame, RoomEventKind};
use tokio::{
    net::TcpStream,
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, http::HeaderValue, Message as WsMessage},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
    api::AccessToken,
    config::ClientSettings,
    error::TransportError,
    transport::{ConnectionState, EventBus, EventHandler, HandlerId, RoomTransport},
};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct WsOptions {
    pub url: Url,
    pub token: AccessToken,
    pub reconnect_delay: Duration,
    /// Consecutive failed connection attempts before giving up.
    pub reconnect_attempts: u32,
}

impl WsOptions {
    pub fn from_settings(settings: &ClientSettings, token: AccessToken) -> Result<Self> {
        Ok(Self {
            url: settings.room_socket_url()?,
            token,
            reconnect_delay: settings.reconnect_delay(),
            reconnect_attempts: settings.reconnect_attempts,
        })
    }
}

enum PumpExit {
    Dropped,
    Closed,
}

pub struct WsTransport {
    bus: Arc<EventBus>,
    state: Arc<watch::Sender<ConnectionState>>,
    outbound: mpsc::UnboundedSender<OutboundEvent>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl WsTransport {
    /// Starts the connection task; must be called inside a tokio runtime.
    pub fn connect(options: WsOptions) -> Arc<Self> {
        let bus = Arc::new(EventBus::new());
        let (state, _) = watch::channel(ConnectionState::Connecting);
        let state = Arc::new(state);
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(run_connection(
            options,
            Arc::clone(&bus),
            Arc::clone(&state),
            outbound_rx,
        ));

        Arc::new(Self {
            bus,
            state,
            outbound,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn close(&self) {
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
            self.state.send_replace(ConnectionState::Disconnected);
            info!("transport: closed");
        }
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.close();
    }
}

impl RoomTransport for WsTransport {
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
        self.outbound
            .send(event)
            .map_err(|_| TransportError::Closed)
    }

    fn connection(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }
}

async fn run_connection(
    options: WsOptions,
    bus: Arc<EventBus>,
    state: Arc<watch::Sender<ConnectionState>>,
    mut outbound: mpsc::UnboundedReceiver<OutboundEvent>,
) {
    let mut failures = 0u32;
    loop {
        state.send_replace(ConnectionState::Connecting);
        match open_socket(&options).await {
            Ok(socket) => {
                failures = 0;
                // Frames queued while the previous socket was down are stale.
                while outbound.try_recv().is_ok() {}
                state.send_replace(ConnectionState::Connected);
                info!(url = %options.url, "transport: connected");

                let exit = pump(socket, &bus, &mut outbound).await;
                state.send_replace(ConnectionState::Disconnected);
                if let PumpExit::Closed = exit {
                    return;
                }
                warn!(url = %options.url, "transport: connection lost");
            }
            Err(err) => {
                failures += 1;
                state.send_replace(ConnectionState::Disconnected);
                warn!(
                    url = %options.url,
                    attempt = failures,
                    max_attempts = options.reconnect_attempts,
                    "transport: connect failed: {err:#}"
                );
                if failures >= options.reconnect_attempts {
                    error!(url = %options.url, "transport: giving up after repeated failures");
                    return;
                }
            }
        }
        tokio::time::sleep(options.reconnect_delay).await;
    }
}

async fn open_socket(options: &WsOptions) -> Result<Socket> {
    let mut request = options
        .url
        .as_str()
        .into_client_request()
        .context("failed to build websocket request")?;
    request.headers_mut().insert(
        "Authorization",
        HeaderValue::from_str(&options.token.bearer()).context("invalid access token")?,
    );
    let (socket, _) = connect_async(request)
        .await
        .with_context(|| format!("failed to connect websocket: {}", options.url))?;
    Ok(socket)
}

async fn pump(
    socket: Socket,
    bus: &EventBus,
    outbound: &mut mpsc::UnboundedReceiver<OutboundEvent>,
) -> PumpExit {
    let (mut writer, mut reader) = socket.split();

    if let Err(err) = send_frame(&mut writer, &OutboundEvent::ConnectToRoom).await {
        warn!("transport: failed to join room channel: {err:#}");
        return PumpExit::Dropped;
    }

    loop {
        tokio::select! {
            incoming = reader.next() => match incoming {
                Some(Ok(WsMessage::Text(text))) => match serde_json::from_str::<RawFrame>(&text) {
                    Ok(frame) => {
                        bus.dispatch_frame(&frame);
                    }
                    Err(err) => warn!("transport: invalid frame: {err}"),
                },
                Some(Ok(WsMessage::Close(_))) | None => return PumpExit::Dropped,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!("transport: receive failed: {err}");
                    return PumpExit::Dropped;
                }
            },
            queued = outbound.recv() => match queued {
                Some(event) => {
                    if let Err(err) = send_frame(&mut writer, &event).await {
                        warn!("transport: send failed: {err:#}");
                        return PumpExit::Dropped;
                    }
                }
                None => {
                    let _ = writer.close().await;
                    return PumpExit::Closed;
                }
            },
        }
    }
}

async fn send_frame<S>(writer: &mut S, event: &OutboundEvent) -> Result<()>
where
    S: futures::Sink<WsMessage> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    let text = serde_json::to_string(event)?;
    debug!(frame = %text, "transport: sending");
    writer.send(WsMessage::Text(text)).await?;
    Ok(())
}

#[cfg(test)]
#[path = "tests/ws_tests.rs"]
mod tests;
