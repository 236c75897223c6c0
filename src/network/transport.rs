//! WebSocket Transport
//!
//! Owns the single connection to the relay. A background supervisor task
//! holds the socket, replays queued messages on every (re)open, keeps the
//! link alive, and reconnects with exponential backoff after an unexpected
//! close. Upper layers talk to it through synchronous `send_*` calls and
//! read typed [`TransportEvent`]s from a channel.

use std::collections::VecDeque;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, instrument, warn};

use crate::config::{with_room_query, SyncConfig};
use crate::core::clock::millis_since;
use crate::game::input::PlayerInput;
use crate::game::snapshot::GameStateSnapshot;
use crate::network::protocol::{
    ClientMessage, Decoded, JoinedInfo, PlayerInputInfo, PlayerJoinedInfo, PlayerLeftInfo,
    PlayerReadyInfo, ServerMessage,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Floor for timer periods; `interval` rejects zero.
const MIN_TIMER_PERIOD: Duration = Duration::from_millis(1);

// =============================================================================
// CONFIG / STATUS / EVENTS
// =============================================================================

/// Transport timing settings.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// How long to wait for a socket to open.
    pub connect_timeout: Duration,
    /// Reconnect attempts before giving up.
    pub max_reconnect_attempts: u32,
    /// First reconnect delay; doubles per attempt.
    pub reconnect_delay: Duration,
    /// Keep-alive period.
    pub heartbeat_interval: Duration,
    /// Latency ping period.
    pub ping_interval: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::from(&SyncConfig::default())
    }
}

impl From<&SyncConfig> for TransportConfig {
    fn from(config: &SyncConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout,
            max_reconnect_attempts: config.max_reconnect_attempts,
            reconnect_delay: config.reconnect_delay,
            heartbeat_interval: config.heartbeat_interval,
            ping_interval: config.ping_interval,
        }
    }
}

/// Link state as seen by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    /// Never connected, or torn down.
    Closed,
    /// Socket open, join sent.
    Open,
    /// Lost the socket; waiting on the given attempt.
    Reconnecting {
        /// Attempt number, starting at 1.
        attempt: u32,
    },
    /// Reconnect attempts exhausted. Needs a fresh `connect`.
    Failed,
}

/// Typed inbound events, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Socket (re)opened and `join` sent.
    Connected,
    /// Socket lost unexpectedly; reconnect pending.
    Disconnected {
        /// What ended the link.
        reason: String,
    },
    /// Relay acknowledged the join.
    Joined(JoinedInfo),
    /// Peer entered the room.
    PlayerJoined(PlayerJoinedInfo),
    /// Peer left the room.
    PlayerLeft(PlayerLeftInfo),
    /// Peer input, still untrusted.
    InputReceived(PlayerInputInfo),
    /// Host state, still unvalidated.
    GameStateUpdate(GameStateSnapshot),
    /// Peer readiness changed.
    PlayerReady(PlayerReadyInfo),
    /// Round trip measured.
    Ping {
        /// Round-trip time (ms).
        latency_ms: i64,
        /// Relay clock, when reported.
        server_time: Option<i64>,
    },
    /// Relay reported an error.
    Error(String),
    /// Reconnect attempts exhausted. Emitted once; the supervisor stops.
    ReconnectFailed {
        /// Attempts made.
        attempts: u32,
    },
}

/// Transport errors.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Socket did not open in time.
    #[error("connection timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Relay URL could not be parsed.
    #[error("invalid relay URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// `connect` called while a link is already supervised.
    #[error("already connected")]
    AlreadyConnected,

    /// Reconnect attempts exhausted.
    #[error("gave up reconnecting after {attempts} attempts")]
    ReconnectExhausted {
        /// Attempts made.
        attempts: u32,
    },
}

// =============================================================================
// RECONNECT POLICY
// =============================================================================

/// What to do after a connection failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Wait `delay`, then try again.
    Retry {
        /// Attempt number, starting at 1.
        attempt: u32,
        /// Backoff before the attempt.
        delay: Duration,
    },
    /// Cap reached. Returned exactly once.
    GiveUp {
        /// Attempts made.
        attempts: u32,
    },
    /// Already gave up.
    Stopped,
}

/// Exponential backoff with an attempt cap.
///
/// Attempt `n` waits `base * 2^(n-1)`.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    base: Duration,
    max_attempts: u32,
    attempts: u32,
    gave_up: bool,
}

impl ReconnectPolicy {
    /// Create a policy.
    pub fn new(base: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max_attempts,
            attempts: 0,
            gave_up: false,
        }
    }

    /// Decide the next step after a failure.
    pub fn next_decision(&mut self) -> ReconnectDecision {
        if self.gave_up {
            return ReconnectDecision::Stopped;
        }
        if self.attempts >= self.max_attempts {
            self.gave_up = true;
            return ReconnectDecision::GiveUp {
                attempts: self.attempts,
            };
        }
        self.attempts += 1;
        ReconnectDecision::Retry {
            attempt: self.attempts,
            delay: self.delay_for(self.attempts),
        }
    }

    /// Backoff for a given attempt number.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor)
    }

    /// Forget past failures after a successful open.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.gave_up = false;
    }

    /// Attempts made since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

// =============================================================================
// TRANSPORT
// =============================================================================

/// Handle to the relay connection.
pub struct Transport {
    config: TransportConfig,
    player_id: String,
    player_name: Option<String>,
    /// Messages sent before any connection exists.
    backlog: VecDeque<ClientMessage>,
    commands: Option<mpsc::UnboundedSender<ClientMessage>>,
    events: mpsc::UnboundedSender<TransportEvent>,
    status: watch::Sender<LinkStatus>,
    task: Option<JoinHandle<()>>,
}

impl Transport {
    /// Create a transport and the receiving end of its event stream.
    pub fn new(config: TransportConfig) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (status, _) = watch::channel(LinkStatus::Closed);

        let transport = Self {
            config,
            player_id: String::new(),
            player_name: None,
            backlog: VecDeque::new(),
            commands: None,
            events,
            status,
            task: None,
        };
        (transport, events_rx)
    }

    /// Display name announced in `join`.
    pub fn set_player_name(&mut self, name: impl Into<String>) {
        self.player_name = Some(name.into());
    }

    /// Open the connection and start supervising it.
    ///
    /// Sends `join` as soon as the socket opens. Fails with
    /// [`TransportError::ConnectTimeout`] if it does not open in time.
    #[instrument(skip(self))]
    pub async fn connect(
        &mut self,
        url: &str,
        room_id: &str,
        player_id: &str,
    ) -> Result<(), TransportError> {
        if self.is_supervised() {
            return Err(TransportError::AlreadyConnected);
        }

        let full_url = with_room_query(url, room_id)?;
        info!("Connecting to {}", full_url);

        let ws = open_socket(&full_url, self.config.connect_timeout).await?;
        info!("WebSocket connected");

        self.player_id = player_id.to_string();

        let (commands, commands_rx) = mpsc::unbounded_channel();
        for msg in self.backlog.drain(..) {
            let _ = commands.send(msg);
        }

        let link = Link {
            url: full_url,
            join: ClientMessage::join(room_id, player_id, self.player_name.as_deref()),
            player_id: player_id.to_string(),
            config: self.config.clone(),
            commands: commands_rx,
            events: self.events.clone(),
            status: self.status.clone(),
            pending: VecDeque::new(),
        };

        self.commands = Some(commands);
        self.task = Some(tokio::spawn(link.supervise(ws)));
        Ok(())
    }

    /// Send a local input sample.
    pub fn send_input(&mut self, input: PlayerInput, frame_number: u64) {
        let msg = ClientMessage::input(&self.player_id, input, frame_number);
        self.send(msg);
    }

    /// Send host state.
    pub fn send_game_state(&mut self, snapshot: GameStateSnapshot) {
        let msg = ClientMessage::state(&self.player_id, snapshot);
        self.send(msg);
    }

    /// Send lobby readiness.
    pub fn send_ready(&mut self, ready: bool) {
        let msg = ClientMessage::ready(&self.player_id, ready);
        self.send(msg);
    }

    /// Send a latency ping now.
    pub fn send_ping(&mut self) {
        let msg = ClientMessage::ping(&self.player_id);
        self.send(msg);
    }

    /// Enqueue a message. Written immediately when open, otherwise replayed
    /// in order on the next open. Dropped once reconnecting has given up.
    pub fn send(&mut self, msg: ClientMessage) {
        if self.status() == LinkStatus::Failed {
            debug!(kind = msg.kind(), "Link failed, dropping message");
            return;
        }
        match &self.commands {
            Some(commands) if !commands.is_closed() => {
                if let Err(mpsc::error::SendError(msg)) = commands.send(msg) {
                    self.backlog.push_back(msg);
                }
            }
            _ => self.backlog.push_back(msg),
        }
    }

    /// Tear the link down. Idempotent.
    ///
    /// Aborts the supervisor (including any backoff wait), drops queued
    /// messages and marks the link closed.
    pub fn disconnect(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            info!("Transport disconnected");
        }
        self.commands = None;
        self.backlog.clear();
        self.status.send_replace(LinkStatus::Closed);
    }

    /// Current link state.
    pub fn status(&self) -> LinkStatus {
        *self.status.borrow()
    }

    /// Check if the socket is open right now.
    pub fn is_connected(&self) -> bool {
        self.status() == LinkStatus::Open
    }

    /// Messages waiting for a first connection.
    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    fn is_supervised(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn open_socket(url: &str, limit: Duration) -> Result<WsStream, TransportError> {
    match timeout(limit, connect_async(url)).await {
        Ok(Ok((ws, _))) => Ok(ws),
        Ok(Err(e)) => Err(TransportError::WebSocket(e)),
        Err(_) => Err(TransportError::ConnectTimeout(limit)),
    }
}

// =============================================================================
// SUPERVISOR
// =============================================================================

/// Why a live connection ended.
enum LinkEnd {
    /// Relay side went away.
    Lost(String),
    /// Every `Transport` handle is gone.
    Abandoned,
}

/// State owned by the supervisor task.
struct Link {
    url: String,
    join: ClientMessage,
    player_id: String,
    config: TransportConfig,
    commands: mpsc::UnboundedReceiver<ClientMessage>,
    events: mpsc::UnboundedSender<TransportEvent>,
    status: watch::Sender<LinkStatus>,
    /// Serialized messages awaiting an open socket.
    pending: VecDeque<String>,
}

impl Link {
    async fn supervise(mut self, first: WsStream) {
        let mut policy =
            ReconnectPolicy::new(self.config.reconnect_delay, self.config.max_reconnect_attempts);
        let mut next = Some(first);

        loop {
            let ws = match next.take() {
                Some(ws) => ws,
                None => match self.reconnect(&mut policy).await {
                    Ok(Some(ws)) => ws,
                    Ok(None) => {
                        let attempts = policy.attempts();
                        error!(attempts, "Reconnect attempts exhausted");
                        self.status.send_replace(LinkStatus::Failed);
                        self.emit(TransportEvent::ReconnectFailed { attempts });
                        return;
                    }
                    Err(()) => return,
                },
            };

            policy.reset();
            self.status.send_replace(LinkStatus::Open);
            self.emit(TransportEvent::Connected);

            match self.run(ws).await {
                LinkEnd::Lost(reason) => {
                    warn!(%reason, "Connection lost");
                    self.status.send_replace(LinkStatus::Reconnecting { attempt: 1 });
                    self.emit(TransportEvent::Disconnected { reason });
                }
                LinkEnd::Abandoned => {
                    debug!("Transport handle dropped, supervisor exiting");
                    return;
                }
            }
        }
    }

    /// Back off and retry until a socket opens or the policy gives up.
    ///
    /// `Err` means the transport handle is gone.
    async fn reconnect(&mut self, policy: &mut ReconnectPolicy) -> Result<Option<WsStream>, ()> {
        loop {
            let (attempt, delay) = match policy.next_decision() {
                ReconnectDecision::Retry { attempt, delay } => (attempt, delay),
                ReconnectDecision::GiveUp { .. } | ReconnectDecision::Stopped => return Ok(None),
            };

            self.status.send_replace(LinkStatus::Reconnecting { attempt });
            info!(attempt, delay_ms = delay.as_millis() as u64, "Scheduling reconnect");
            self.buffer_during(delay).await?;

            match open_socket(&self.url, self.config.connect_timeout).await {
                Ok(ws) => {
                    info!(attempt, "Reconnected");
                    return Ok(Some(ws));
                }
                Err(e) => warn!(attempt, error = %e, "Reconnect attempt failed"),
            }
        }
    }

    /// Sleep for `delay`, queueing anything sent meanwhile.
    async fn buffer_during(&mut self, delay: Duration) -> Result<(), ()> {
        let wait = sleep(delay);
        tokio::pin!(wait);

        loop {
            tokio::select! {
                _ = &mut wait => return Ok(()),
                cmd = self.commands.recv() => match cmd {
                    Some(msg) => self.queue(&msg),
                    None => return Err(()),
                },
            }
        }
    }

    /// Drive one open socket until it ends.
    async fn run(&mut self, ws: WsStream) -> LinkEnd {
        let (mut sink, mut stream) = ws.split();

        match self.join.to_json() {
            Ok(join) => {
                if let Err(e) = sink.send(Message::Text(join)).await {
                    return LinkEnd::Lost(e.to_string());
                }
            }
            Err(e) => error!("Failed to serialize join: {}", e),
        }

        // Replay, oldest first
        while let Some(text) = self.pending.pop_front() {
            if let Err(e) = sink.send(Message::Text(text.clone())).await {
                self.pending.push_front(text);
                return LinkEnd::Lost(e.to_string());
            }
        }

        let start = Instant::now();
        let heartbeat_every = self.config.heartbeat_interval.max(MIN_TIMER_PERIOD);
        let mut heartbeat = interval_at(start + heartbeat_every, heartbeat_every);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let ping_every = self.config.ping_interval.max(MIN_TIMER_PERIOD);
        let mut ping = interval_at(start + ping_every, ping_every);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let outgoing = tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(msg) => msg,
                    None => {
                        let _ = sink.close().await;
                        return LinkEnd::Abandoned;
                    }
                },
                frame = stream.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => self.dispatch(&text),
                        Some(Ok(Message::Close(_))) | None => {
                            return LinkEnd::Lost("closed by relay".to_string());
                        }
                        Some(Err(e)) => return LinkEnd::Lost(e.to_string()),
                        Some(Ok(_)) => {}
                    }
                    continue;
                }
                _ = heartbeat.tick() => ClientMessage::heartbeat(&self.player_id),
                _ = ping.tick() => ClientMessage::ping(&self.player_id),
            };

            let text = match outgoing.to_json() {
                Ok(t) => t,
                Err(e) => {
                    error!("Failed to serialize {}: {}", outgoing.kind(), e);
                    continue;
                }
            };

            if let Err(e) = sink.send(Message::Text(text.clone())).await {
                self.pending.push_back(text);
                return LinkEnd::Lost(e.to_string());
            }
        }
    }

    fn queue(&mut self, msg: &ClientMessage) {
        match msg.to_json() {
            Ok(text) => self.pending.push_back(text),
            Err(e) => error!("Failed to serialize {}: {}", msg.kind(), e),
        }
    }

    fn dispatch(&self, text: &str) {
        #[cfg(feature = "debug-tracing")]
        tracing::trace!(%text, "inbound frame");

        let msg = match ServerMessage::decode(text) {
            Decoded::Message(msg) => msg,
            Decoded::Unknown(tag) => {
                debug!(%tag, "Ignoring unknown message type");
                return;
            }
            Decoded::Malformed(e) => {
                warn!("Dropping malformed frame: {}", e);
                return;
            }
        };

        let event = match msg {
            ServerMessage::Joined(info) => TransportEvent::Joined(info),
            ServerMessage::PlayerJoined(info) => TransportEvent::PlayerJoined(info),
            ServerMessage::PlayerLeft(info) => TransportEvent::PlayerLeft(info),
            ServerMessage::PlayerInput(info) => TransportEvent::InputReceived(info),
            ServerMessage::GameStateUpdate(info) => TransportEvent::GameStateUpdate(info.snapshot),
            ServerMessage::PlayerReady(info) => TransportEvent::PlayerReady(info),
            ServerMessage::Pong(pong) => TransportEvent::Ping {
                latency_ms: millis_since(pong.timestamp),
                server_time: pong.server_time,
            },
            ServerMessage::Error(e) => {
                warn!(message = %e.message, "Relay error");
                TransportEvent::Error(e.message)
            }
        };
        self.emit(event);
    }

    fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_schedule() {
        let mut policy = ReconnectPolicy::new(Duration::from_millis(1000), 5);
        let mut delays = Vec::new();
        while let ReconnectDecision::Retry { delay, .. } = policy.next_decision() {
            delays.push(delay.as_millis());
        }
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000]);
    }

    #[test]
    fn test_gives_up_exactly_once() {
        let mut policy = ReconnectPolicy::new(Duration::from_millis(10), 2);
        assert!(matches!(policy.next_decision(), ReconnectDecision::Retry { attempt: 1, .. }));
        assert!(matches!(policy.next_decision(), ReconnectDecision::Retry { attempt: 2, .. }));
        assert_eq!(policy.next_decision(), ReconnectDecision::GiveUp { attempts: 2 });
        assert_eq!(policy.next_decision(), ReconnectDecision::Stopped);
        assert_eq!(policy.next_decision(), ReconnectDecision::Stopped);
    }

    #[test]
    fn test_reset_restarts_schedule() {
        let mut policy = ReconnectPolicy::new(Duration::from_millis(100), 5);
        policy.next_decision();
        policy.next_decision();
        assert_eq!(policy.attempts(), 2);

        policy.reset();
        assert_eq!(
            policy.next_decision(),
            ReconnectDecision::Retry {
                attempt: 1,
                delay: Duration::from_millis(100)
            }
        );
    }

    #[test]
    fn test_zero_attempts_gives_up_immediately() {
        let mut policy = ReconnectPolicy::new(Duration::from_millis(100), 0);
        assert_eq!(policy.next_decision(), ReconnectDecision::GiveUp { attempts: 0 });
    }

    #[test]
    fn test_delay_saturates() {
        let policy = ReconnectPolicy::new(Duration::from_secs(1), 100);
        assert!(policy.delay_for(64) >= Duration::from_secs(u32::MAX as u64));
    }

    #[tokio::test]
    async fn test_send_before_connect_is_backlogged() {
        let (mut transport, _events) = Transport::new(TransportConfig::default());
        transport.send_ready(true);
        transport.send_ping();
        assert_eq!(transport.backlog_len(), 2);
        assert!(!transport.is_connected());

        transport.disconnect();
        assert_eq!(transport.backlog_len(), 0);
        transport.disconnect();
        assert_eq!(transport.status(), LinkStatus::Closed);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (mut transport, _events) = Transport::new(TransportConfig::default());
        let result = transport
            .connect(&format!("ws://{}", addr), "ROOM", "p1")
            .await;
        assert!(matches!(result, Err(TransportError::WebSocket(_))));
        assert_eq!(transport.status(), LinkStatus::Closed);
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_url() {
        let (mut transport, _events) = Transport::new(TransportConfig::default());
        let result = transport.connect("relay without scheme", "ROOM", "p1").await;
        assert!(matches!(result, Err(TransportError::InvalidUrl(_))));
        assert_eq!(transport.backlog_len(), 0);
    }

    #[tokio::test]
    async fn test_connect_times_out() {
        // Accepts TCP but never completes the WebSocket handshake
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _hold = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let config = TransportConfig {
            connect_timeout: Duration::from_millis(100),
            ..Default::default()
        };
        let (mut transport, _events) = Transport::new(config);
        let result = transport
            .connect(&format!("ws://{}", addr), "ROOM", "p1")
            .await;
        assert!(matches!(result, Err(TransportError::ConnectTimeout(_))));
    }
}
