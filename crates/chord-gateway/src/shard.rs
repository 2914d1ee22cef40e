//! A single gateway shard.
//!
//! Each shard owns one WebSocket connection and keeps it alive across
//! drops: the run task loops, resuming the session when the close code
//! allows it and re-identifying otherwise.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::{
    connect_async,
    tungstenite::protocol::{frame::coding::CloseCode, CloseFrame, Message as WsMessage},
};
use tracing::{debug, error, info, instrument, warn};

use crate::client::GatewayConfig;
use crate::error::GatewayError;
use crate::payload::{
    is_fatal_close, is_resumable_close, GatewayPayload, Hello, Opcode, PlayingStatus, Ready,
};
use crate::GatewayResult;

/// How many frames may be sent per rate-limit window.
const SEND_LIMIT: u32 = 110;

/// Length of the send rate-limit window.
const SEND_WINDOW: Duration = Duration::from_secs(60);

/// Delay before retrying after a failed connection attempt.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// An event surfaced by a shard to the client dispatcher.
#[derive(Debug, Clone)]
pub enum ShardEvent {
    /// READY dispatch. Carries the full payload so caches can seed from it.
    Ready { shard_id: u32, data: Value },
    /// RESUMED dispatch.
    Resumed { shard_id: u32 },
    /// Any other dispatch event.
    Dispatch {
        shard_id: u32,
        event: String,
        data: Value,
    },
}

/// Point-in-time view of a shard's health.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ShardSnapshot {
    /// Shard ID.
    pub id: u32,
    /// Gap between the last heartbeat and its ack, in seconds.
    pub ping: Option<f64>,
    /// Last measured heartbeat round trip, in seconds.
    pub latency: Option<f64>,
    /// When the shard last saw traffic, as unix milliseconds.
    pub last_activity_ms: Option<u64>,
    /// Milliseconds since the last traffic.
    pub idle_ms: Option<u64>,
    /// Whether the shard currently holds a session.
    pub ready: bool,
}

enum ShardCommand {
    Send(Value),
    Close { code: u16 },
}

/// How a single connection ended, deciding what the run loop does next.
enum ConnectionEnd {
    /// Stop the shard permanently.
    Kill,
    /// Open a new connection. `resumable` keeps or clears the session.
    Reconnect { resumable: bool },
}

#[derive(Debug, Default)]
struct ShardState {
    sequence: Option<u64>,
    session_id: Option<String>,
    resume_gateway_url: Option<String>,
    last_send: Option<Instant>,
    last_ack: Option<Instant>,
    latency: Option<Duration>,
    last_activity: Option<SystemTime>,
}

impl ShardState {
    fn can_resume(&self) -> bool {
        self.session_id.is_some() && self.sequence.is_some()
    }

    fn clear_session(&mut self) {
        self.session_id = None;
        self.resume_gateway_url = None;
        self.sequence = None;
    }
}

/// Counts outbound frames against the gateway's per-connection send limit.
/// Heartbeats are exempt; a zombied connection must still be detectable.
struct SendLimiter {
    window_start: Instant,
    sent: u32,
}

impl SendLimiter {
    fn new() -> Self {
        Self {
            window_start: Instant::now(),
            sent: 0,
        }
    }

    /// Wait until a send slot is available, then consume it.
    async fn acquire(&mut self) {
        let now = Instant::now();
        if now.duration_since(self.window_start) >= SEND_WINDOW {
            self.window_start = now;
            self.sent = 0;
        }
        if self.sent >= SEND_LIMIT {
            let wait = SEND_WINDOW - now.duration_since(self.window_start);
            debug!(wait_ms = wait.as_millis() as u64, "send limit reached, waiting");
            tokio::time::sleep(wait).await;
            self.window_start = Instant::now();
            self.sent = 0;
        }
        self.sent += 1;
    }
}

/// One gateway shard.
pub struct Shard {
    /// Shard ID within the fleet.
    pub id: u32,
    config: Arc<GatewayConfig>,
    state: Arc<RwLock<ShardState>>,
    commands: mpsc::UnboundedSender<ShardCommand>,
    command_rx: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<ShardCommand>>>,
    events: mpsc::Sender<ShardEvent>,
    ready_tx: watch::Sender<bool>,
    ready_rx: watch::Receiver<bool>,
    task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl Shard {
    pub fn new(id: u32, config: Arc<GatewayConfig>, events: mpsc::Sender<ShardEvent>) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = watch::channel(false);
        Self {
            id,
            config,
            state: Arc::new(RwLock::new(ShardState::default())),
            commands,
            command_rx: parking_lot::Mutex::new(Some(command_rx)),
            events,
            ready_tx,
            ready_rx,
            task: parking_lot::Mutex::new(None),
        }
    }

    /// Spawn the connection task. Idempotent after the first call.
    pub fn start(&self) {
        let Some(command_rx) = self.command_rx.lock().take() else {
            return;
        };
        let runner = ShardRunner {
            id: self.id,
            config: Arc::clone(&self.config),
            state: Arc::clone(&self.state),
            events: self.events.clone(),
            ready_tx: self.ready_tx.clone(),
        };
        let handle = tokio::spawn(runner.run(command_rx));
        *self.task.lock() = Some(handle);
    }

    /// The current session ID, once READY has been received.
    pub fn session_id(&self) -> Option<String> {
        self.state.read().session_id.clone()
    }

    /// Wait until the shard has an active session.
    pub async fn wait_until_ready(&self) {
        let mut rx = self.ready_rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Queue a presence update.
    pub fn change_presence(&self, status: &PlayingStatus) {
        let payload = GatewayPayload::new(Opcode::PresenceUpdate, status.to_value());
        let _ = self
            .commands
            .send(ShardCommand::Send(serde_json::to_value(payload).unwrap_or_default()));
    }

    /// Queue a member-chunk request for a guild.
    pub fn request_guild_members(&self, guild_id: u64, query: &str, limit: u32) {
        let payload = GatewayPayload::request_guild_members(guild_id, query, limit);
        let _ = self
            .commands
            .send(ShardCommand::Send(serde_json::to_value(payload).unwrap_or_default()));
    }

    /// Close the connection. With `kill` the run task is torn down and
    /// never reconnects; otherwise the connection cycles, resuming when
    /// `code` allows it.
    pub fn close(&self, code: u16, kill: bool) {
        if kill {
            // Aborting would cancel the task before a queued command runs,
            // so the socket closes by drop instead.
            if let Some(handle) = self.task.lock().take() {
                handle.abort();
            }
        } else {
            let _ = self.commands.send(ShardCommand::Close { code });
        }
    }

    /// Health snapshot for the status endpoint.
    pub fn snapshot(&self) -> ShardSnapshot {
        let state = self.state.read();
        let last_activity_ms = state.last_activity.and_then(|at| {
            at.duration_since(UNIX_EPOCH)
                .ok()
                .map(|d| d.as_millis() as u64)
        });
        let idle_ms = state
            .last_activity
            .and_then(|at| at.elapsed().ok())
            .map(|d| d.as_millis() as u64);
        let ping = match (state.last_send, state.last_ack) {
            (Some(send), Some(ack)) if ack >= send => Some((ack - send).as_secs_f64()),
            _ => None,
        };
        ShardSnapshot {
            id: self.id,
            ping,
            latency: state.latency.map(|d| d.as_secs_f64()),
            last_activity_ms,
            idle_ms,
            ready: state.session_id.is_some(),
        }
    }
}

struct ShardRunner {
    id: u32,
    config: Arc<GatewayConfig>,
    state: Arc<RwLock<ShardState>>,
    events: mpsc::Sender<ShardEvent>,
    ready_tx: watch::Sender<bool>,
}

impl ShardRunner {
    /// Connection supervisor. Loops forever, opening a fresh connection
    /// each time the previous one ends, until told to kill.
    #[instrument(skip_all, fields(shard_id = self.id))]
    async fn run(self, mut commands: mpsc::UnboundedReceiver<ShardCommand>) {
        let mut attempt: u32 = 0;
        loop {
            match self.run_connection(&mut commands).await {
                Ok(ConnectionEnd::Kill) => {
                    info!("shard stopped");
                    break;
                }
                Ok(ConnectionEnd::Reconnect { resumable }) => {
                    if !resumable {
                        self.state.write().clear_session();
                        let _ = self.ready_tx.send(false);
                    }
                    attempt = 0;
                    info!(resumable, "reconnecting");
                }
                Err(e) => {
                    attempt += 1;
                    warn!(error = %e, attempt, "connection failed, retrying");
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }
    }

    /// Connect, handshake, then pump frames until the connection ends.
    async fn run_connection(
        &self,
        commands: &mut mpsc::UnboundedReceiver<ShardCommand>,
    ) -> GatewayResult<ConnectionEnd> {
        let resuming = self.state.read().can_resume();
        let base_url = if resuming {
            self.state
                .read()
                .resume_gateway_url
                .clone()
                .unwrap_or_else(|| self.config.gateway_url.clone())
        } else {
            self.config.gateway_url.clone()
        };
        let ws_url = format!(
            "{}/?v={}&encoding=json",
            base_url.trim_end_matches('/'),
            self.config.api_version
        );

        debug!(url = %ws_url, resuming, "connecting");
        let (ws_stream, _) = connect_async(&ws_url).await?;
        let (mut write, mut read) = ws_stream.split();

        let hello = self.await_hello(&mut read).await?;
        let heartbeat_interval = Duration::from_millis(hello.heartbeat_interval);

        let handshake = if resuming {
            let state = self.state.read();
            GatewayPayload::resume(
                &self.config.token,
                state.session_id.as_deref().unwrap_or_default(),
                state.sequence.unwrap_or_default(),
            )
        } else {
            GatewayPayload::identify(
                &self.config.token,
                self.config.intents,
                self.config.shard_count.map(|count| [self.id, count]),
                self.config.playing_status.as_ref(),
            )
        };
        send_payload(&mut write, &handshake).await?;

        let mut limiter = SendLimiter::new();
        let mut heartbeat_acked = true;
        let mut ticker = tokio::time::interval(heartbeat_interval);
        // The first tick fires immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !heartbeat_acked {
                        warn!("heartbeat not acknowledged, assuming zombied connection");
                        let _ = close_socket(&mut write, 4000).await;
                        return Ok(ConnectionEnd::Reconnect { resumable: true });
                    }
                    let sequence = self.state.read().sequence;
                    send_payload(&mut write, &GatewayPayload::heartbeat(sequence)).await?;
                    heartbeat_acked = false;
                    self.state.write().last_send = Some(Instant::now());
                }

                command = commands.recv() => {
                    match command {
                        Some(ShardCommand::Send(value)) => {
                            limiter.acquire().await;
                            let text = serde_json::to_string(&value)?;
                            write.send(WsMessage::Text(text.into())).await?;
                        }
                        Some(ShardCommand::Close { code }) => {
                            let _ = close_socket(&mut write, code).await;
                            return Ok(ConnectionEnd::Reconnect {
                                resumable: is_resumable_close(code),
                            });
                        }
                        None => {
                            let _ = close_socket(&mut write, 1000).await;
                            return Ok(ConnectionEnd::Kill);
                        }
                    }
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(WsMessage::Text(text))) => {
                            let payload: GatewayPayload = match serde_json::from_str(&text) {
                                Ok(p) => p,
                                Err(e) => {
                                    warn!(error = %e, "unparseable gateway frame");
                                    continue;
                                }
                            };
                            if let Some(end) = self
                                .handle_frame(payload, &mut write, &mut heartbeat_acked)
                                .await?
                            {
                                return Ok(end);
                            }
                        }
                        Some(Ok(WsMessage::Close(frame))) => {
                            let code = frame.as_ref().map_or(1000, |f| u16::from(f.code));
                            if is_fatal_close(code) {
                                error!(code, "gateway refused the session, stopping shard");
                                return Ok(ConnectionEnd::Kill);
                            }
                            let resumable = is_resumable_close(code);
                            info!(code, resumable, "gateway closed the connection");
                            return Ok(ConnectionEnd::Reconnect { resumable });
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            error!(error = %e, "websocket error");
                            return Ok(ConnectionEnd::Reconnect { resumable: true });
                        }
                        None => {
                            info!("gateway stream ended");
                            return Ok(ConnectionEnd::Reconnect { resumable: true });
                        }
                    }
                }
            }
        }
    }

    async fn await_hello(
        &self,
        read: &mut (impl StreamExt<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
              + Unpin),
    ) -> GatewayResult<Hello> {
        match read.next().await {
            Some(Ok(WsMessage::Text(text))) => {
                let payload: GatewayPayload = serde_json::from_str(&text)?;
                if payload.op != Opcode::Hello as u8 {
                    return Err(GatewayError::Handshake(format!(
                        "expected HELLO, got op {}",
                        payload.op
                    )));
                }
                Ok(serde_json::from_value(payload.d.unwrap_or_default())?)
            }
            Some(Ok(msg)) => Err(GatewayError::Handshake(format!(
                "unexpected message before HELLO: {msg:?}"
            ))),
            Some(Err(e)) => Err(GatewayError::WebSocket(e)),
            None => Err(GatewayError::Handshake(
                "connection closed before HELLO".into(),
            )),
        }
    }

    /// Process one inbound frame. Returns `Some` when the connection must end.
    async fn handle_frame(
        &self,
        payload: GatewayPayload,
        write: &mut (impl SinkExt<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Unpin),
        heartbeat_acked: &mut bool,
    ) -> GatewayResult<Option<ConnectionEnd>> {
        {
            let mut state = self.state.write();
            if let Some(s) = payload.s {
                state.sequence = Some(s);
            }
            state.last_activity = Some(SystemTime::now());
        }

        match Opcode::try_from(payload.op) {
            Ok(Opcode::Dispatch) => {
                let event_name = payload.t.unwrap_or_default();
                let data = payload.d.unwrap_or_default();
                self.handle_dispatch(&event_name, data).await;
            }
            Ok(Opcode::HeartbeatAck) => {
                *heartbeat_acked = true;
                let mut state = self.state.write();
                state.last_ack = Some(Instant::now());
                state.latency = state.last_send.map(|sent| sent.elapsed());
            }
            Ok(Opcode::Heartbeat) => {
                let sequence = self.state.read().sequence;
                send_payload(write, &GatewayPayload::heartbeat(sequence)).await?;
            }
            Ok(Opcode::Reconnect) => {
                info!("gateway requested reconnect");
                // 1013 keeps the session alive for the resume.
                let _ = close_socket(write, 1013).await;
                return Ok(Some(ConnectionEnd::Reconnect { resumable: true }));
            }
            Ok(Opcode::InvalidSession) => {
                let resumable = payload.d.and_then(|v| v.as_bool()).unwrap_or(false);
                warn!(resumable, "session invalidated");
                return Ok(Some(ConnectionEnd::Reconnect { resumable }));
            }
            Ok(_) => {}
            Err(op) => debug!(op, "unknown opcode"),
        }
        Ok(None)
    }

    async fn handle_dispatch(&self, event_name: &str, data: Value) {
        let event = match event_name {
            "READY" => {
                match serde_json::from_value::<Ready>(data.clone()) {
                    Ok(ready) => {
                        let mut state = self.state.write();
                        state.session_id = Some(ready.session_id.clone());
                        state.resume_gateway_url = Some(ready.resume_gateway_url);
                        drop(state);
                        info!(session_id = %ready.session_id, "shard ready");
                        let _ = self.ready_tx.send(true);
                    }
                    Err(e) => warn!(error = %e, "malformed READY payload"),
                }
                ShardEvent::Ready {
                    shard_id: self.id,
                    data,
                }
            }
            "RESUMED" => {
                info!("session resumed");
                let _ = self.ready_tx.send(true);
                ShardEvent::Resumed { shard_id: self.id }
            }
            _ => ShardEvent::Dispatch {
                shard_id: self.id,
                event: event_name.to_owned(),
                data,
            },
        };
        if self.events.send(event).await.is_err() {
            debug!("event receiver dropped");
        }
    }
}

async fn send_payload(
    write: &mut (impl SinkExt<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Unpin),
    payload: &GatewayPayload,
) -> GatewayResult<()> {
    let text = serde_json::to_string(payload)?;
    write.send(WsMessage::Text(text.into())).await?;
    Ok(())
}

async fn close_socket(
    write: &mut (impl SinkExt<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Unpin),
    code: u16,
) -> GatewayResult<()> {
    write
        .send(WsMessage::Close(Some(CloseFrame {
            code: CloseCode::from(code),
            reason: "".into(),
        })))
        .await?;
    Ok(())
}
