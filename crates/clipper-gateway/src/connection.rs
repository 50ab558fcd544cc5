use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, close_code};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use clipper_types::events::ServerEvent;
use clipper_types::models::{ChannelId, UserIdentity};

use crate::config::HubConfig;
use crate::error::{HubError, ProtocolError};
use crate::hub::ChannelHub;
use crate::rate_limit::RateLimiter;
use crate::registry::HubRegistry;

/// Frames queued for a connection's write loop.
#[derive(Debug, Clone)]
pub enum Outbound {
    Text(Utf8Bytes),
    /// Send a close frame after everything queued before it, then stop.
    Close { code: u16, reason: String },
}

/// The hub's side of one client connection.
///
/// The hub is the only producer on `tx`. Cancelling `closer` makes the write
/// loop send a close frame immediately and exit, skipping anything queued.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: Uuid,
    pub user: UserIdentity,
    tx: mpsc::Sender<Outbound>,
    closer: CancellationToken,
}

impl ConnectionHandle {
    pub fn new(user: UserIdentity, queue_depth: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(queue_depth.max(1));
        let handle = Self {
            id: Uuid::new_v4(),
            user,
            tx,
            closer: CancellationToken::new(),
        };
        (handle, rx)
    }

    pub fn closer(&self) -> CancellationToken {
        self.closer.clone()
    }

    /// True once the write loop is gone or the connection was force-closed.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed() || self.closer.is_cancelled()
    }

    pub(crate) fn try_send(&self, frame: Outbound) -> Result<(), TrySendError<Outbound>> {
        self.tx.try_send(frame)
    }

    /// Queue a close frame behind pending traffic, or force-close if the queue is full.
    pub(crate) fn close(&self, code: u16, reason: impl Into<String>) {
        let frame = Outbound::Close {
            code,
            reason: reason.into(),
        };
        if self.tx.try_send(frame).is_err() {
            self.closer.cancel();
        }
    }

    pub(crate) fn kill(&self) {
        self.closer.cancel();
    }

    /// Resolves when the write loop has released its queue.
    pub(crate) async fn closed(&self) {
        self.tx.closed().await
    }
}

/// Close code sent when a hub refuses the registration.
fn rejection_close_code(error: &HubError) -> u16 {
    match error {
        HubError::ChannelFull { .. } => close_code::AGAIN,
        HubError::Draining | HubError::Closed => close_code::AWAY,
    }
}

/// Run an upgraded WebSocket as a member of `channel_id` until either side
/// goes away. Identity and channel access were settled at the HTTP layer.
pub async fn serve_connection(
    socket: WebSocket,
    registry: HubRegistry,
    channel_id: ChannelId,
    user: UserIdentity,
) {
    let config = registry.config().clone();
    let (conn, outbound) = ConnectionHandle::new(user, config.send_queue_depth);
    let (mut sender, receiver) = socket.split();

    let hub = match registry.join(&channel_id, conn.clone()).await {
        Ok(hub) => hub,
        Err(e) => {
            warn!(
                "{} ({}) refused by #{}: {}",
                conn.user.username, conn.user.user_id, channel_id, e
            );
            if let Ok(text) = serde_json::to_string(&ServerEvent::error(channel_id.clone(), e.to_string())) {
                let _ = sender.send(Message::Text(text.into())).await;
            }
            let close = Message::Close(Some(CloseFrame {
                code: rejection_close_code(&e),
                reason: e.to_string().into(),
            }));
            let _ = tokio::time::timeout(config.write_timeout, sender.send(close)).await;
            return;
        }
    };

    info!(
        "{} ({}) joined #{} [conn={}]",
        conn.user.username, conn.user.user_id, channel_id, conn.id
    );

    let mut write_task = tokio::spawn(write_loop(sender, outbound, conn.closer(), config.clone()));
    let mut read_task = tokio::spawn(read_loop(receiver, hub.clone(), conn.clone(), config.clone()));

    let write_done = tokio::select! {
        _ = &mut write_task => {
            read_task.abort();
            true
        }
        _ = &mut read_task => false,
    };

    hub.unregister(conn.id).await;

    // The hub has closed the queue by now; let the writer flush its close frame
    if !write_done && tokio::time::timeout(config.write_timeout, &mut write_task).await.is_err() {
        write_task.abort();
    }

    info!(
        "{} ({}) left #{} [conn={}]",
        conn.user.username, conn.user.user_id, channel_id, conn.id
    );
}

async fn read_loop(
    mut receiver: SplitStream<WebSocket>,
    hub: ChannelHub,
    conn: ConnectionHandle,
    config: HubConfig,
) {
    let limiter = RateLimiter::from_config(&config.rate_limit);

    loop {
        // Any inbound frame, pongs included, resets the liveness deadline
        let frame = match tokio::time::timeout(config.pong_timeout, receiver.next()).await {
            Ok(Some(Ok(frame))) => frame,
            Ok(Some(Err(e))) => {
                debug!("read error on {}: {}", conn.id, e);
                break;
            }
            Ok(None) => break,
            Err(_) => {
                warn!(
                    "{} ({}) missed pong deadline, dropping connection",
                    conn.user.username, conn.user.user_id
                );
                break;
            }
        };

        match frame {
            Message::Text(text) => hub.handle_inbound(&conn, &limiter, text.as_str()).await,
            Message::Binary(_) => hub.reject(conn.id, ProtocolError::BinaryFrame.into()).await,
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }
}

async fn write_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Outbound>,
    closer: CancellationToken,
    config: HubConfig,
) {
    let mut ping = tokio::time::interval(config.ping_interval);
    ping.tick().await;

    loop {
        let frame = tokio::select! {
            biased;
            _ = closer.cancelled() => {
                send_close(&mut sender, close_code::NORMAL, String::new(), config.write_timeout).await;
                break;
            }
            item = outbound.recv() => match item {
                Some(Outbound::Text(text)) => Message::Text(text),
                Some(Outbound::Close { code, reason }) => {
                    send_close(&mut sender, code, reason, config.write_timeout).await;
                    break;
                }
                None => break,
            },
            _ = ping.tick() => Message::Ping(Bytes::new()),
        };

        match tokio::time::timeout(config.write_timeout, sender.send(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!("write error: {}", e);
                break;
            }
            Err(_) => {
                warn!("write deadline exceeded, dropping connection");
                break;
            }
        }
    }
}

async fn send_close(
    sender: &mut SplitSink<WebSocket, Message>,
    code: u16,
    reason: String,
    deadline: Duration,
) {
    let frame = Message::Close(Some(CloseFrame {
        code,
        reason: reason.into(),
    }));
    let _ = tokio::time::timeout(deadline, sender.send(frame)).await;
}
