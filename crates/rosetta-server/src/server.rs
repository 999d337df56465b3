//! WebSocket server implementation.
//!
//! Accepts connections and runs two tasks per client: one decoding inbound
//! frames into hub commands, one writing the session's outbound queue.

use crate::codec::{decode_message, encode};
use crate::config::ServerSettings;
use crate::error::{Result, ServerError};
use crate::hub::{Hub, HubCommand, HubHandle};
use crate::protocol::{ClientMessage, ServerMessage, SessionId};
use crate::session::DisconnectReason;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use rosetta_tree::{ClassIndex, MappingTree};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{accept_async_with_config, tungstenite::Message, WebSocketStream};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsStream = SplitStream<WebSocketStream<TcpStream>>;

/// The Rosetta mapping server.
pub struct RosettaServer {
    settings: Arc<ServerSettings>,
    listener: TcpListener,
    hub: HubHandle,
}

impl RosettaServer {
    /// Binds the configured address and starts the hub.
    pub async fn bind(
        settings: ServerSettings,
        tree: MappingTree,
        index: Arc<dyn ClassIndex>,
    ) -> Result<Self> {
        settings.validate()?;
        let address = settings
            .bind_address()
            .ok_or_else(|| ServerError::InvalidAddress(settings.bind.clone()))?;

        let listener = TcpListener::bind((address.host.as_str(), address.port)).await?;
        let settings = Arc::new(settings);

        let (hub, handle) = Hub::new(settings.clone(), tree, index);
        hub.spawn();

        Ok(Self {
            settings,
            listener,
            hub: handle,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Returns a handle to the hub for snapshots and change subscriptions.
    pub fn handle(&self) -> HubHandle {
        self.hub.clone()
    }

    /// Runs the server, accepting connections forever.
    pub async fn run(self) -> Result<()> {
        info!("╔═══════════════════════════════════════════════════════════╗");
        info!("║            ROSETTA - SHARED MAPPINGS SERVER               ║");
        info!("╚═══════════════════════════════════════════════════════════╝");
        info!("🌐 Listening on ws://{}", self.local_addr()?);
        info!(
            "💓 Heartbeat: {}ms, timeout {}ms",
            self.settings.heartbeat_interval_ms, self.settings.heartbeat_timeout_ms
        );

        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    info!("🔌 New connection from {}", addr);
                    let hub = self.hub.clone();
                    let settings = self.settings.clone();

                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, addr, hub, settings).await {
                            warn!("Connection error from {}: {}", addr, e);
                        }
                    });
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                }
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Connection Handler
// ─────────────────────────────────────────────────────────────────────────────

/// Transport limits for one connection. Frames up to twice
/// `max_frame_bytes` still reach the codec and get a Nak; anything larger
/// drops the connection before it is buffered.
fn websocket_config(settings: &ServerSettings) -> WebSocketConfig {
    let limit = settings.max_frame_bytes.saturating_mul(2);
    WebSocketConfig {
        max_message_size: Some(limit),
        max_frame_size: Some(limit),
        ..WebSocketConfig::default()
    }
}

/// Handles a single WebSocket connection.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    hub: HubHandle,
    settings: Arc<ServerSettings>,
) -> Result<()> {
    let ws_stream = accept_async_with_config(stream, Some(websocket_config(&settings))).await?;
    let (write, read) = ws_stream.split();
    info!("✅ WebSocket handshake complete with {}", addr);

    let session = Uuid::new_v4();
    let (outbound_tx, outbound_rx) = mpsc::channel(settings.outbound_watermark);
    hub.send(HubCommand::Connect {
        session,
        outbound: outbound_tx,
    })
    .await?;

    let mut inbound = tokio::spawn(read_frames(
        read,
        session,
        hub.clone(),
        settings.max_frame_bytes,
    ));
    let mut outbound = tokio::spawn(write_frames(write, outbound_rx, addr));

    // Whichever side finishes first ends the connection.
    let reason = tokio::select! {
        reason = &mut inbound => {
            outbound.abort();
            reason.unwrap_or(DisconnectReason::Transport)
        }
        _ = &mut outbound => {
            inbound.abort();
            DisconnectReason::Transport
        }
    };

    // No-op if the hub already ended the session.
    let _ = hub
        .send(HubCommand::Disconnect { session, reason })
        .await;

    info!("🔌 Connection closed: {}", addr);
    Ok(())
}

/// Decodes frames and forwards them to the hub until the client leaves.
async fn read_frames(
    mut read: WsStream,
    session: SessionId,
    hub: HubHandle,
    max_frame_bytes: usize,
) -> DisconnectReason {
    while let Some(frame) = read.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                debug!("Read error on {}: {}", session, e);
                return DisconnectReason::Transport;
            }
        };

        if frame.is_close() {
            return DisconnectReason::Transport;
        }

        let command = match decode_message(&frame, max_frame_bytes) {
            None => continue,
            Some(Ok(message)) => {
                let logout = message == ClientMessage::Logout;
                let command = HubCommand::Client { session, message };
                if logout {
                    let _ = hub.send(command).await;
                    return DisconnectReason::Logout;
                }
                command
            }
            Some(Err(e)) => {
                debug!("📥 Bad frame from {}: {}", session, e);
                HubCommand::Nak {
                    session,
                    reason: e.to_string(),
                }
            }
        };

        if hub.send(command).await.is_err() {
            break;
        }
    }

    DisconnectReason::Transport
}

/// Writes queued messages until the hub drops the session's queue.
async fn write_frames(
    mut write: WsSink,
    mut outbound: mpsc::Receiver<ServerMessage>,
    addr: SocketAddr,
) {
    while let Some(message) = outbound.recv().await {
        let frame = match encode(&message) {
            Ok(frame) => frame,
            Err(e) => {
                error!("Failed to encode message for {}: {}", addr, e);
                continue;
            }
        };
        if write.send(frame).await.is_err() {
            return;
        }
    }

    let _ = write.send(Message::Close(None)).await;
}
