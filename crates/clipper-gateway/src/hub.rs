//! Per-channel hub
//!
//! Each hub is a single task that owns the channel's local connection set.
//! Registrations, unregistrations, publishes and cluster deliveries are all
//! processed serially on that task.
//!
//! Local echo: an accepted event is fanned out to local connections first
//! and then published on the cluster bus tagged with this process's id. The
//! copy that comes back from the bus carries our own origin and is dropped,
//! so every local connection sees each event exactly once whether or not
//! the bus is reachable.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use axum::extract::ws::{Utf8Bytes, close_code};
use futures_util::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, warn};
use uuid::Uuid;

use clipper_types::events::{
    ClientFrame, ClusterEnvelope, ModerationAction, ModerationEvent, PresenceEvent, PresenceKind,
    ServerEvent,
};
use clipper_types::models::{ChannelId, ChatMessage};

use crate::cluster::{ClusterBus, MessageHandler};
use crate::config::HubConfig;
use crate::connection::{ConnectionHandle, Outbound};
use crate::error::{HubError, Rejection};
use crate::metrics;
use crate::moderation::ModerationGate;
use crate::persistence::MessagePersistence;
use crate::presence::PresenceTracker;
use crate::protocol::{decode_client_frame, validate_content};
use crate::rate_limit::RateLimiter;

const COMMAND_QUEUE_DEPTH: usize = 1024;
const CLUSTER_QUEUE_DEPTH: usize = 1024;

pub(crate) type Directory = Mutex<HashMap<ChannelId, ChannelHub>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubState {
    /// Accepting registrations, possibly empty within its idle grace period.
    Active,
    /// Shutting down. New registrations are refused.
    Draining,
    /// Every connection closed and the hub left the registry.
    Closed,
}

impl HubState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Active,
            1 => Self::Draining,
            _ => Self::Closed,
        }
    }
}

/// Process-wide collaborators shared by every hub.
pub(crate) struct HubContext {
    pub process_id: Uuid,
    pub config: HubConfig,
    pub bus: Arc<dyn ClusterBus>,
    pub persistence: Arc<dyn MessagePersistence>,
    pub gate: Arc<dyn ModerationGate>,
    pub presence: PresenceTracker,
    /// Serializes bus subscribe/unsubscribe so a closing hub never tears down
    /// its successor's subscription.
    pub subscriptions: tokio::sync::Mutex<()>,
}

enum Command {
    Register {
        conn: ConnectionHandle,
        history: Vec<ChatMessage>,
        reply: oneshot::Sender<Result<(), HubError>>,
    },
    Unregister {
        conn_id: Uuid,
    },
    Publish {
        event: ServerEvent,
        accepted_at: Instant,
    },
    SendTo {
        conn_id: Uuid,
        event: ServerEvent,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

struct HubShared {
    channel_id: ChannelId,
    commands: mpsc::Sender<Command>,
    state: AtomicU8,
    connections: AtomicUsize,
    ctx: Arc<HubContext>,
}

impl HubShared {
    fn set_state(&self, state: HubState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

/// Handle to one channel's hub task. Cheap to clone.
#[derive(Clone)]
pub struct ChannelHub {
    shared: Arc<HubShared>,
}

impl ChannelHub {
    pub(crate) fn spawn(channel_id: ChannelId, ctx: Arc<HubContext>, directory: Weak<Directory>) -> Self {
        let (commands, command_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let shared = Arc::new(HubShared {
            channel_id,
            commands,
            state: AtomicU8::new(HubState::Active as u8),
            connections: AtomicUsize::new(0),
            ctx,
        });

        let actor = HubActor::new(shared.clone(), directory);
        tokio::spawn(actor.run(command_rx));

        Self { shared }
    }

    pub fn channel_id(&self) -> &ChannelId {
        &self.shared.channel_id
    }

    pub fn state(&self) -> HubState {
        HubState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    /// Local connections currently registered.
    pub fn connection_count(&self) -> usize {
        self.shared.connections.load(Ordering::Acquire)
    }

    pub(crate) fn ptr_eq(&self, other: &ChannelHub) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Add a connection. `history` is queued to it ahead of the presence snapshot.
    pub async fn register(&self, conn: ConnectionHandle, history: Vec<ChatMessage>) -> Result<(), HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Register { conn, history, reply }).await?;
        rx.await.unwrap_or(Err(HubError::Closed))
    }

    /// Idempotent.
    pub async fn unregister(&self, conn_id: Uuid) {
        let _ = self.send(Command::Unregister { conn_id }).await;
    }

    /// Fan an event out locally and to the cluster.
    pub async fn publish(&self, event: ServerEvent) -> Result<(), HubError> {
        self.send(Command::Publish {
            event,
            accepted_at: Instant::now(),
        })
        .await
    }

    /// Report a refused frame to the connection that sent it.
    pub async fn reject(&self, conn_id: Uuid, rejection: Rejection) {
        let channel_id = self.channel_id();
        metrics::error(channel_id, rejection.kind());
        if matches!(rejection, Rejection::RateLimited) {
            metrics::rate_limit_hit(channel_id);
        }
        debug!("rejected frame on #{} from {}: {}", channel_id, conn_id, rejection);

        let event = ServerEvent::error(channel_id.clone(), rejection.to_string());
        let _ = self.send(Command::SendTo { conn_id, event }).await;
    }

    /// Process one text frame from `conn`. Runs on the connection's read task.
    pub async fn handle_inbound(&self, conn: &ConnectionHandle, limiter: &RateLimiter, raw: &str) {
        let accepted_at = Instant::now();
        match self.accept(conn, limiter, raw).await {
            Ok(event) => {
                let _ = self.send(Command::Publish { event, accepted_at }).await;
            }
            Err(rejection) => self.reject(conn.id, rejection).await,
        }
    }

    async fn accept(
        &self,
        conn: &ConnectionHandle,
        limiter: &RateLimiter,
        raw: &str,
    ) -> Result<ServerEvent, Rejection> {
        let ctx = &self.shared.ctx;
        let channel_id = self.channel_id();

        match decode_client_frame(raw)? {
            ClientFrame::Message { content } => {
                validate_content(&content)?;

                if !limiter.try_acquire() {
                    return Err(Rejection::RateLimited);
                }

                let user_id = conn.user.user_id;
                match tokio::time::timeout(
                    ctx.config.collaborator_timeout,
                    ctx.gate.may_post(user_id, channel_id),
                )
                .await
                {
                    Ok(Ok(true)) => {}
                    Ok(Ok(false)) => return Err(Rejection::NotAuthorized),
                    Ok(Err(e)) => {
                        warn!("moderation check failed for {} on #{}: {}", user_id, channel_id, e);
                        return Err(Rejection::NotAuthorized);
                    }
                    Err(_) => {
                        warn!("moderation check timed out for {} on #{}", user_id, channel_id);
                        return Err(Rejection::NotAuthorized);
                    }
                }

                let message = ChatMessage::new(channel_id.clone(), &conn.user, content);
                self.persist(message.clone());
                Ok(ServerEvent::Message(message))
            }
            ClientFrame::Typing => Ok(ServerEvent::typing(channel_id.clone(), &conn.user)),
        }
    }

    fn persist(&self, message: ChatMessage) {
        let persistence = self.shared.ctx.persistence.clone();
        let deadline = self.shared.ctx.config.collaborator_timeout;

        tokio::spawn(async move {
            match tokio::time::timeout(deadline, persistence.save(&message)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("failed to persist message {}: {}", message.message_id, e),
                Err(_) => warn!("persisting message {} timed out", message.message_id),
            }
        });
    }

    /// Drain and close. Returns once the hub is `Closed`.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.send(Command::Shutdown { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }

    async fn send(&self, command: Command) -> Result<(), HubError> {
        self.shared
            .commands
            .send(command)
            .await
            .map_err(|_| HubError::Closed)
    }
}

/// Borrowing twin of `ClusterEnvelope`, serialized without cloning the event.
#[derive(Serialize)]
struct EnvelopeRef<'a> {
    origin: Uuid,
    event: &'a ServerEvent,
}

/// Why a frame could not be queued for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Undeliverable {
    /// Queue full: the client is not reading fast enough.
    Full,
    /// The write loop has already exited.
    Gone,
}

impl From<&TrySendError<Outbound>> for Undeliverable {
    fn from(error: &TrySendError<Outbound>) -> Self {
        match error {
            TrySendError::Full(_) => Self::Full,
            TrySendError::Closed(_) => Self::Gone,
        }
    }
}

enum CloseMode {
    /// Cancel the write loop, discarding queued frames.
    Force,
    /// Flush queued frames, then close with this code.
    Graceful { code: u16, reason: String },
}

struct HubActor {
    shared: Arc<HubShared>,
    ctx: Arc<HubContext>,
    channel_id: ChannelId,
    directory: Weak<Directory>,
    connections: HashMap<Uuid, ConnectionHandle>,
    publish_tx: Option<mpsc::Sender<Vec<u8>>>,
    idle_deadline: Option<Instant>,
}

impl HubActor {
    fn new(shared: Arc<HubShared>, directory: Weak<Directory>) -> Self {
        Self {
            ctx: shared.ctx.clone(),
            channel_id: shared.channel_id.clone(),
            shared,
            directory,
            connections: HashMap::new(),
            publish_tx: None,
            idle_deadline: None,
        }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        let (cluster_tx, mut cluster_rx) = mpsc::channel(CLUSTER_QUEUE_DEPTH);
        self.subscribe(cluster_tx).await;
        self.start_publisher();

        self.idle_deadline = Some(Instant::now() + self.ctx.config.idle_grace);
        let mut maintenance = tokio::time::interval(self.ctx.config.maintenance_interval);
        maintenance.tick().await;

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        self.shutdown(&mut commands).await;
                        let _ = reply.send(());
                        return;
                    }
                    Some(command) => self.handle(command),
                    None => return,
                },
                Some(payload) = cluster_rx.recv() => self.on_cluster_message(&payload),
                _ = maintenance.tick() => self.maintain(),
                _ = idle_timer(self.idle_deadline) => {
                    if self.connections.is_empty() {
                        debug!("hub #{} idle, closing", self.channel_id);
                        self.expire(&mut commands).await;
                        return;
                    }
                    self.idle_deadline = None;
                }
            }
        }
    }

    async fn subscribe(&self, cluster_tx: mpsc::Sender<Vec<u8>>) {
        let channel_id = self.channel_id.clone();
        let handler: MessageHandler = Arc::new(move |payload| {
            if let Err(TrySendError::Full(_)) = cluster_tx.try_send(payload) {
                warn!("cluster inbox for #{} is full, dropping delivery", channel_id);
            }
        });

        let _guard = self.ctx.subscriptions.lock().await;
        let subscribed = tokio::time::timeout(
            self.ctx.config.publish_timeout,
            self.ctx.bus.subscribe(&self.channel_id, handler),
        )
        .await;

        match subscribed {
            Ok(Ok(())) => debug!("hub #{} subscribed to cluster bus", self.channel_id),
            Ok(Err(e)) => {
                warn!("cluster subscribe failed for #{}, serving locally: {}", self.channel_id, e);
                metrics::error(&self.channel_id, "cluster_subscribe");
            }
            Err(_) => {
                warn!("cluster subscribe timed out for #{}, serving locally", self.channel_id);
                metrics::error(&self.channel_id, "cluster_subscribe");
            }
        }
    }

    /// Cluster publishes run on their own task so a slow bus never stalls
    /// local fan-out. Order within the channel is kept.
    fn start_publisher(&mut self) {
        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(CLUSTER_QUEUE_DEPTH);
        let bus = self.ctx.bus.clone();
        let channel_id = self.channel_id.clone();
        let deadline = self.ctx.config.publish_timeout;

        tokio::spawn(async move {
            while let Some(payload) = rx.recv().await {
                match tokio::time::timeout(deadline, bus.publish(&channel_id, payload)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        warn!("cluster publish failed for #{}: {}", channel_id, e);
                        metrics::error(&channel_id, "cluster_publish");
                    }
                    Err(_) => {
                        warn!("cluster publish timed out for #{}", channel_id);
                        metrics::error(&channel_id, "cluster_publish");
                    }
                }
            }
        });

        self.publish_tx = Some(tx);
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Register { conn, history, reply } => {
                let _ = reply.send(self.register(conn, history));
            }
            Command::Unregister { conn_id } => {
                if let Some(left) = self.detach(conn_id, CloseMode::Force) {
                    self.deliver(left, true);
                }
            }
            Command::Publish { event, accepted_at } => {
                if let ServerEvent::Typing(typing) = &event {
                    self.ctx.presence.mark_typing(&self.channel_id, typing.user_id);
                }
                metrics::message(&self.channel_id, event.kind());
                self.deliver(event, true);
                metrics::message_latency(&self.channel_id, accepted_at.elapsed());
            }
            Command::SendTo { conn_id, event } => self.send_to(conn_id, &event),
            // handled by the run loop
            Command::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    fn register(&mut self, conn: ConnectionHandle, history: Vec<ChatMessage>) -> Result<(), HubError> {
        match HubState::from_u8(self.shared.state.load(Ordering::Acquire)) {
            HubState::Active => {}
            HubState::Draining => return Err(HubError::Draining),
            HubState::Closed => return Err(HubError::Closed),
        }

        let max = self.ctx.config.max_participants;
        if self.connections.len() >= max {
            return Err(HubError::ChannelFull { max });
        }

        // Initial sync: history oldest first, then who is already here
        let mut backlog = history.into_iter().map(ServerEvent::Message).collect::<Vec<_>>();
        backlog.extend(self.ctx.presence.snapshot(&self.channel_id).into_iter().map(|present| {
            ServerEvent::Presence(PresenceEvent {
                channel_id: self.channel_id.clone(),
                user_id: present.user_id,
                username: present.username,
                presence_type: PresenceKind::Joined,
                timestamp: chrono::Utc::now(),
            })
        }));
        for event in &backlog {
            let Ok(text) = serde_json::to_string(event) else { continue };
            if conn.try_send(Outbound::Text(text.into())).is_err() {
                break;
            }
        }

        let first_local = !self.has_user(conn.user.user_id);
        self.ctx.presence.mark_online(&self.channel_id, &conn.user);
        let joined = ServerEvent::presence(self.channel_id.clone(), &conn.user, PresenceKind::Joined);

        self.connections.insert(conn.id, conn);
        self.shared.connections.store(self.connections.len(), Ordering::Release);
        self.idle_deadline = None;
        metrics::connection_established(&self.channel_id);

        if first_local {
            self.deliver(joined, true);
        }
        Ok(())
    }

    fn has_user(&self, user_id: Uuid) -> bool {
        self.connections.values().any(|c| c.user.user_id == user_id)
    }

    /// Remove a connection and close it. Returns the `left` event when this
    /// was the user's last local connection. Unknown ids are ignored.
    fn detach(&mut self, conn_id: Uuid, mode: CloseMode) -> Option<ServerEvent> {
        let conn = self.connections.remove(&conn_id)?;
        match mode {
            CloseMode::Force => conn.kill(),
            CloseMode::Graceful { code, reason } => conn.close(code, reason),
        }

        self.shared.connections.store(self.connections.len(), Ordering::Release);
        metrics::connection_closed(&self.channel_id);

        if self.connections.is_empty() && self.shared.state.load(Ordering::Acquire) == HubState::Active as u8 {
            self.idle_deadline = Some(Instant::now() + self.ctx.config.idle_grace);
        }

        if self.has_user(conn.user.user_id) {
            return None;
        }
        self.ctx.presence.mark_offline(&self.channel_id, conn.user.user_id);
        Some(ServerEvent::presence(self.channel_id.clone(), &conn.user, PresenceKind::Left))
    }

    /// Fan out locally, optionally forward to the cluster, then settle any
    /// connections the fan-out evicted.
    fn deliver(&mut self, event: ServerEvent, forward: bool) {
        let mut pending = VecDeque::from([(event, forward)]);

        while let Some((event, forward)) = pending.pop_front() {
            let undeliverable = self.fan_out(&event);
            if forward {
                self.forward(&event);
            }

            for (conn_id, reason) in undeliverable {
                if let Some(left) = self.drop_undeliverable(conn_id, reason) {
                    pending.push_back((left, true));
                }
            }

            if let ServerEvent::Moderation(moderation) = &event {
                for left in self.enforce(moderation) {
                    pending.push_back((left, true));
                }
            }
        }
    }

    /// Queue `event` on every target connection. Returns the connections whose
    /// queue was full or gone.
    fn fan_out(&self, event: &ServerEvent) -> Vec<(Uuid, Undeliverable)> {
        let started = Instant::now();
        let text: Utf8Bytes = match serde_json::to_string(event) {
            Ok(text) => text.into(),
            Err(e) => {
                error!("failed to encode {} event: {}", event.kind(), e);
                return Vec::new();
            }
        };

        let target = match event {
            ServerEvent::Moderation(moderation) => Some(moderation.user_id),
            _ => None,
        };

        let mut undeliverable = Vec::new();
        for conn in self.connections.values() {
            if target.is_some_and(|user_id| user_id != conn.user.user_id) {
                continue;
            }
            if let Err(e) = conn.try_send(Outbound::Text(text.clone())) {
                undeliverable.push((conn.id, Undeliverable::from(&e)));
            }
        }

        metrics::broadcast_duration(&self.channel_id, started.elapsed());
        undeliverable
    }

    /// Detach a connection a frame could not be queued on.
    fn drop_undeliverable(&mut self, conn_id: Uuid, reason: Undeliverable) -> Option<ServerEvent> {
        match reason {
            Undeliverable::Full => {
                warn!("connection {} on #{} cannot keep up, disconnecting", conn_id, self.channel_id);
                metrics::error(&self.channel_id, "backpressure");
            }
            Undeliverable::Gone => {
                debug!("connection {} on #{} already gone", conn_id, self.channel_id);
            }
        }
        self.detach(conn_id, CloseMode::Force)
    }

    fn enforce(&mut self, moderation: &ModerationEvent) -> Vec<ServerEvent> {
        if moderation.action != ModerationAction::Disconnect {
            return Vec::new();
        }

        let targets: Vec<Uuid> = self
            .connections
            .values()
            .filter(|c| c.user.user_id == moderation.user_id)
            .map(|c| c.id)
            .collect();

        if !targets.is_empty() {
            debug!(
                "disconnecting {} connection(s) of {} from #{}",
                targets.len(),
                moderation.user_id,
                self.channel_id
            );
        }

        let reason = moderation.reason.clone().unwrap_or_else(|| "removed by moderator".to_string());
        targets
            .into_iter()
            .filter_map(|conn_id| {
                self.detach(
                    conn_id,
                    CloseMode::Graceful {
                        code: close_code::POLICY,
                        reason: reason.clone(),
                    },
                )
            })
            .collect()
    }

    fn forward(&self, event: &ServerEvent) {
        // Errors are addressed to a single local connection
        if matches!(event, ServerEvent::Error(_)) {
            return;
        }
        let Some(publish_tx) = &self.publish_tx else {
            return;
        };

        let envelope = EnvelopeRef {
            origin: self.ctx.process_id,
            event,
        };
        let payload = match serde_json::to_vec(&envelope) {
            Ok(payload) => payload,
            Err(e) => {
                error!("failed to encode cluster envelope: {}", e);
                return;
            }
        };

        if publish_tx.try_send(payload).is_err() {
            warn!("cluster publish queue for #{} is full, delivering locally only", self.channel_id);
            metrics::error(&self.channel_id, "cluster_backlog");
        }
    }

    fn send_to(&mut self, conn_id: Uuid, event: &ServerEvent) {
        let Some(conn) = self.connections.get(&conn_id) else {
            return;
        };
        let Ok(text) = serde_json::to_string(event) else {
            return;
        };
        if let Err(e) = conn.try_send(Outbound::Text(text.into())) {
            if let Some(left) = self.drop_undeliverable(conn_id, Undeliverable::from(&e)) {
                self.deliver(left, true);
            }
        }
    }

    fn on_cluster_message(&mut self, payload: &[u8]) {
        let envelope: ClusterEnvelope = match serde_json::from_slice(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("undecodable cluster payload on #{}: {}", self.channel_id, e);
                metrics::error(&self.channel_id, "cluster_decode");
                return;
            }
        };

        // Already delivered locally when it was published
        if envelope.origin == self.ctx.process_id {
            return;
        }
        if envelope.event.channel_id() != &self.channel_id || matches!(envelope.event, ServerEvent::Error(_)) {
            return;
        }

        metrics::message(&self.channel_id, envelope.event.kind());
        self.deliver(envelope.event, false);
    }

    fn maintain(&mut self) {
        self.ctx
            .presence
            .refresh(&self.channel_id, self.connections.values().map(|c| &c.user.user_id));
        let swept = self.ctx.presence.sweep();
        if swept.expired > 0 {
            debug!("presence sweep dropped {} stale entries", swept.expired);
        }

        // Catch write loops that died without unregistering
        let dead: Vec<Uuid> = self
            .connections
            .values()
            .filter(|c| c.is_closed())
            .map(|c| c.id)
            .collect();
        for conn_id in dead {
            if let Some(left) = self.detach(conn_id, CloseMode::Force) {
                self.deliver(left, true);
            }
        }
    }

    async fn expire(mut self, commands: &mut mpsc::Receiver<Command>) {
        self.leave_directory();
        self.shared.set_state(HubState::Closed);
        drain(commands);
        self.publish_tx = None;
        self.unsubscribe().await;
    }

    async fn shutdown(&mut self, commands: &mut mpsc::Receiver<Command>) {
        self.shared.set_state(HubState::Draining);
        self.idle_deadline = None;

        for conn in self.connections.values() {
            conn.close(close_code::AWAY, "server shutting down");
        }

        let grace = self.ctx.config.shutdown_grace;
        let closing = join_all(self.connections.values().map(|c| c.closed()));
        if tokio::time::timeout(grace, closing).await.is_err() {
            warn!(
                "hub #{} still had open connections after {:?}, forcing close",
                self.channel_id, grace
            );
        }

        let conn_ids: Vec<Uuid> = self.connections.keys().copied().collect();
        for conn_id in conn_ids {
            if let Some(left) = self.detach(conn_id, CloseMode::Force) {
                self.forward(&left);
            }
        }

        self.leave_directory();
        self.shared.set_state(HubState::Closed);
        drain(commands);
        self.publish_tx = None;
        self.unsubscribe().await;
        debug!("hub #{} closed", self.channel_id);
    }

    fn leave_directory(&self) {
        let Some(directory) = self.directory.upgrade() else {
            return;
        };
        let mut hubs = directory.lock();
        let ours = hubs
            .get(&self.channel_id)
            .is_some_and(|hub| Arc::ptr_eq(&hub.shared, &self.shared));
        if ours {
            hubs.remove(&self.channel_id);
        }
        metrics::channels_active(hubs.len());
    }

    async fn unsubscribe(&self) {
        let _guard = self.ctx.subscriptions.lock().await;

        // A successor hub for the channel owns the subscription now
        let successor = self
            .directory
            .upgrade()
            .is_some_and(|directory| directory.lock().contains_key(&self.channel_id));
        if successor {
            return;
        }

        match tokio::time::timeout(self.ctx.config.publish_timeout, self.ctx.bus.unsubscribe(&self.channel_id)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("cluster unsubscribe failed for #{}: {}", self.channel_id, e),
            Err(_) => warn!("cluster unsubscribe timed out for #{}", self.channel_id),
        }
    }
}

/// Refuse everything still queued for a hub that has stopped.
fn drain(commands: &mut mpsc::Receiver<Command>) {
    commands.close();
    while let Ok(command) = commands.try_recv() {
        match command {
            Command::Register { reply, .. } => {
                let _ = reply.send(Err(HubError::Closed));
            }
            Command::Shutdown { reply } => {
                let _ = reply.send(());
            }
            Command::Unregister { .. } | Command::Publish { .. } | Command::SendTo { .. } => {}
        }
    }
}

async fn idle_timer(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
