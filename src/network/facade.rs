//! Session Facade
//!
//! The one object the simulation loop holds in multiplayer. It owns the
//! transport, both input validators and the room coordinator, and applies
//! inbound transport events on the caller's thread via [`SessionFacade::poll`].

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::game::input::{InputValidator, PlayerInput};
use crate::game::snapshot::GameStateSnapshot;
use crate::network::session::SessionCoordinator;
use crate::network::transport::{Transport, TransportConfig, TransportError, TransportEvent};

/// What the simulation or UI should react to after a poll.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Link (re)opened.
    Connected,
    /// Link dropped; reconnecting.
    Disconnected {
        /// Why.
        reason: String,
    },
    /// Reconnect attempts exhausted. Terminal until re-initialized.
    ConnectionLost {
        /// Attempts made.
        attempts: u32,
    },
    /// Local role settled or changed.
    RoleAssigned {
        /// Local side is host.
        is_host: bool,
    },
    /// Peer entered (or re-announced itself).
    PlayerJoined {
        /// Peer id.
        player_id: String,
        /// Peer display name.
        name: String,
    },
    /// Peer left for good.
    PlayerLeft {
        /// Peer id.
        player_id: String,
    },
    /// Validated host state (guest only).
    GameState(GameStateSnapshot),
    /// Peer readiness changed.
    PeerReady {
        /// Peer id.
        player_id: String,
        /// New readiness.
        ready: bool,
    },
    /// Both sides ready; the match can start.
    BothReady,
    /// Peer crossed the invalid-input threshold.
    PeerUntrusted,
    /// Relay reported an error.
    Error(String),
}

/// Session lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Multiplayer needs a display name.
    #[error("display name required for multiplayer")]
    MissingDisplayName,

    /// Multiplayer needs a room.
    #[error("no room id available")]
    MissingRoomId,

    /// Already initialized.
    #[error("session already initialized")]
    AlreadyInitialized,

    /// Transport failure.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Multiplayer session surface.
pub struct SessionFacade {
    relay_url: String,
    local_player_id: String,
    transport: Transport,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    coordinator: SessionCoordinator,
    local_validator: InputValidator,
    remote_validator: InputValidator,
    local_input: PlayerInput,
    last_sent: Option<PlayerInput>,
    initialized: bool,
    local_ready: bool,
    peer_ready: bool,
    peer_untrusted: bool,
    /// Relay stated our role in `joined`; peer announcements no longer move it.
    role_from_relay: bool,
    latency_ms: i64,
    latest_snapshot: Option<GameStateSnapshot>,
    terminal_error: Option<String>,
    /// Events raised by local calls, returned by the next poll.
    queued: Vec<SessionEvent>,
}

impl SessionFacade {
    /// Wire up a session. Nothing touches the network until `initialize`.
    pub fn new(
        config: &SyncConfig,
        relay_url: impl Into<String>,
        room_id: impl Into<String>,
        local_player_id: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        let room_id = room_id.into();
        let local_player_id = local_player_id.into();

        let (mut transport, events) = Transport::new(TransportConfig::from(config));
        transport.set_player_name(display_name);

        let mut coordinator = SessionCoordinator::new(room_id, local_player_id.clone())
            .with_bounds(config.snapshot_bounds);
        coordinator.set_snapshot_validation(config.validate_snapshots);

        Self {
            relay_url: relay_url.into(),
            local_player_id,
            transport,
            events,
            coordinator,
            local_validator: InputValidator::with_send_interval(config.input_send_interval),
            remote_validator: InputValidator::new(),
            local_input: PlayerInput::idle(),
            last_sent: None,
            initialized: false,
            local_ready: false,
            peer_ready: false,
            peer_untrusted: false,
            role_from_relay: false,
            latency_ms: 0,
            latest_snapshot: None,
            terminal_error: None,
            queued: Vec::new(),
        }
    }

    /// Open the relay connection. Allowed again after a terminal
    /// connection loss.
    pub async fn initialize(&mut self) -> Result<(), SessionError> {
        if self.initialized && self.terminal_error.is_none() {
            return Err(SessionError::AlreadyInitialized);
        }
        if self.terminal_error.is_some() {
            self.transport.disconnect();
        }

        let room_id = self.coordinator.state().room_id.clone();
        self.transport
            .connect(&self.relay_url, &room_id, &self.local_player_id)
            .await?;

        self.initialized = true;
        self.terminal_error = None;
        info!(room = %room_id, "Session initialized");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Outbound
    // -------------------------------------------------------------------------

    /// Sample local controls. Invalid values are ignored and the previous
    /// accepted input stays in effect.
    pub fn update_local_input(&mut self, x: f64, y: f64, fire: bool) {
        if let Some(input) = self.local_validator.validate_axes(x, y, fire) {
            self.local_input = input;
        }
    }

    /// Push the current local input for this frame, at most once per frame.
    ///
    /// Returns true when a message went out.
    pub fn send_input_to_server(&mut self) -> bool {
        if !self.is_live() || self.local_validator.has_too_many_invalid_inputs() {
            return false;
        }
        if !self.coordinator.should_send_input() || !self.local_validator.can_send_input() {
            return false;
        }

        let frame = self.coordinator.frame_number();
        let input = self.local_input;
        self.coordinator
            .record_input(&self.local_player_id, input, frame);
        self.coordinator.mark_input_sent();

        // Idle goes out once, then waits for a change
        let repeat_idle = InputValidator::is_idle(&input)
            && self.last_sent.is_some_and(|last| last.same_controls(&input));
        if repeat_idle {
            return false;
        }

        self.transport.send_input(input, frame);
        self.last_sent = Some(input);
        true
    }

    /// Publish host state. Dropped when the local side is guest or the
    /// snapshot is implausible.
    pub fn send_game_state_snapshot(&mut self, snapshot: GameStateSnapshot) -> bool {
        if !self.is_live() {
            return false;
        }
        if !self.coordinator.is_host() {
            debug!("Not host, dropping outbound snapshot");
            return false;
        }
        if !self.coordinator.validate_state_snapshot(&snapshot) {
            return false;
        }
        self.transport.send_game_state(snapshot);
        true
    }

    /// Announce lobby readiness.
    pub fn send_ready(&mut self, ready: bool) {
        if !self.is_live() {
            return;
        }
        let was_both = self.both_ready();
        self.local_ready = ready;
        self.transport.send_ready(ready);
        if !was_both && self.both_ready() {
            self.queued.push(SessionEvent::BothReady);
        }
    }

    // -------------------------------------------------------------------------
    // Inbound
    // -------------------------------------------------------------------------

    /// Apply everything the transport delivered since the last poll.
    pub fn poll(&mut self) -> Vec<SessionEvent> {
        let mut out = std::mem::take(&mut self.queued);
        if !self.initialized {
            return out;
        }
        while let Ok(event) = self.events.try_recv() {
            self.handle(event, &mut out);
        }
        out
    }

    fn handle(&mut self, event: TransportEvent, out: &mut Vec<SessionEvent>) {
        match event {
            TransportEvent::Connected => {
                self.coordinator.set_all_connected(true);
                out.push(SessionEvent::Connected);
            }
            TransportEvent::Disconnected { reason } => {
                self.coordinator.set_all_connected(false);
                out.push(SessionEvent::Disconnected { reason });
            }
            TransportEvent::ReconnectFailed { attempts } => {
                let err = TransportError::ReconnectExhausted { attempts };
                warn!(%err, "Session connection lost");
                self.terminal_error = Some(err.to_string());
                self.coordinator.set_all_connected(false);
                out.push(SessionEvent::ConnectionLost { attempts });
            }
            TransportEvent::Joined(info) => {
                let verdict = info.is_host.or(info.player_index.map(|i| i == 0));
                if let Some(is_host) = verdict {
                    self.coordinator.set_role(is_host);
                    self.role_from_relay = true;
                }
                out.push(SessionEvent::RoleAssigned {
                    is_host: self.coordinator.is_host(),
                });
            }
            TransportEvent::PlayerJoined(info) => {
                if info.player_id == self.local_player_id {
                    return;
                }
                let was_host = self.coordinator.is_host();
                let local_is_host = match info.is_host {
                    Some(peer_is_host) if !self.role_from_relay => !peer_is_host,
                    _ => was_host,
                };
                let remote_index = if local_is_host { 1 } else { 0 };

                self.coordinator.add_remote_player(
                    &info.player_id,
                    &info.player_name,
                    !local_is_host,
                    remote_index,
                );
                if let Some(player) = self.coordinator.remote_player_mut(&info.player_id) {
                    player.name = info.player_name.clone();
                    player.is_connected = true;
                }
                self.coordinator.set_role(local_is_host);

                out.push(SessionEvent::PlayerJoined {
                    player_id: info.player_id,
                    name: info.player_name,
                });
                if was_host != local_is_host {
                    out.push(SessionEvent::RoleAssigned {
                        is_host: local_is_host,
                    });
                }
            }
            TransportEvent::PlayerLeft(info) => {
                if self.coordinator.remove_remote_player(&info.player_id).is_some() {
                    self.peer_ready = false;
                    out.push(SessionEvent::PlayerLeft {
                        player_id: info.player_id,
                    });
                }
            }
            TransportEvent::InputReceived(info) => {
                if info.player_id == self.local_player_id {
                    return;
                }
                match self.remote_validator.validate(&info.input) {
                    Some(input) => {
                        let frame = self.coordinator.frame_number();
                        self.coordinator.record_input(&info.player_id, input, frame);
                        self.peer_untrusted = false;
                    }
                    None => self.check_peer_trust(out),
                }
            }
            TransportEvent::GameStateUpdate(snapshot) => {
                if self.coordinator.is_host() {
                    debug!("Host ignoring inbound snapshot");
                    return;
                }
                if self.coordinator.validate_state_snapshot(&snapshot) {
                    self.coordinator.note_state_update();
                    self.latest_snapshot = Some(snapshot.clone());
                    out.push(SessionEvent::GameState(snapshot));
                } else {
                    self.remote_validator.record_rejection();
                    self.check_peer_trust(out);
                }
            }
            TransportEvent::PlayerReady(info) => {
                if info.player_id == self.local_player_id {
                    return;
                }
                let was_both = self.both_ready();
                self.peer_ready = info.ready;
                out.push(SessionEvent::PeerReady {
                    player_id: info.player_id,
                    ready: info.ready,
                });
                if !was_both && self.both_ready() {
                    out.push(SessionEvent::BothReady);
                }
            }
            TransportEvent::Ping {
                latency_ms,
                server_time,
            } => {
                self.latency_ms = latency_ms;
                self.coordinator.update_latency(latency_ms);
                if let Some(server_time) = server_time {
                    self.coordinator.sync_time(server_time);
                }
            }
            TransportEvent::Error(message) => out.push(SessionEvent::Error(message)),
        }
    }

    fn check_peer_trust(&mut self, out: &mut Vec<SessionEvent>) {
        if self.remote_validator.has_too_many_invalid_inputs() && !self.peer_untrusted {
            self.peer_untrusted = true;
            warn!(
                streak = self.remote_validator.invalid_streak(),
                "Peer exceeded invalid input threshold"
            );
            out.push(SessionEvent::PeerUntrusted);
        }
    }

    // -------------------------------------------------------------------------
    // Frames and queries
    // -------------------------------------------------------------------------

    /// Latest input from a remote player within the lookback window.
    pub fn get_remote_player_input(&self, player_id: &str) -> Option<PlayerInput> {
        self.coordinator.get_player_latest_input(player_id)
    }

    /// Latest input from the first known remote player.
    pub fn first_remote_input(&self) -> Option<PlayerInput> {
        let remote = self.coordinator.first_remote_player()?;
        self.coordinator.get_player_latest_input(&remote.id)
    }

    /// Advance the frame counter.
    pub fn next_frame(&mut self) {
        self.coordinator.next_frame();
    }

    /// Current frame.
    pub fn frame_number(&self) -> u64 {
        self.coordinator.frame_number()
    }

    /// Start a new match in the same room.
    pub fn reset_match(&mut self) {
        self.coordinator.reset();
        self.local_validator.reset();
        self.remote_validator.reset();
        self.peer_untrusted = false;
        self.local_ready = false;
        self.peer_ready = false;
        self.last_sent = None;
        self.latest_snapshot = None;
    }

    /// Most recent validated host snapshot.
    pub fn latest_game_state(&self) -> Option<&GameStateSnapshot> {
        self.latest_snapshot.as_ref()
    }

    /// Room model, read-only.
    pub fn coordinator(&self) -> &SessionCoordinator {
        &self.coordinator
    }

    /// Current accepted local input.
    pub fn local_input(&self) -> PlayerInput {
        self.local_input
    }

    /// Initialized and not terminally disconnected; outbound calls no-op
    /// otherwise.
    fn is_live(&self) -> bool {
        self.initialized && self.terminal_error.is_none()
    }

    /// Whether `initialize` succeeded and `cleanup` has not run.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Socket open right now.
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Local side is host.
    pub fn is_host(&self) -> bool {
        self.coordinator.is_host()
    }

    /// Both sides reported ready.
    pub fn both_ready(&self) -> bool {
        self.local_ready && self.peer_ready
    }

    /// Peer input is currently trusted.
    pub fn is_peer_trusted(&self) -> bool {
        !self.peer_untrusted
    }

    /// Last measured round trip (ms).
    pub fn latency_ms(&self) -> i64 {
        self.latency_ms
    }

    /// Terminal failure, if reconnecting gave up.
    pub fn terminal_error(&self) -> Option<&str> {
        self.terminal_error.as_deref()
    }

    /// Tear down. Safe to call repeatedly.
    pub fn cleanup(&mut self) {
        self.transport.disconnect();
        while self.events.try_recv().is_ok() {}
        self.queued.clear();
        if self.initialized {
            info!("Session cleaned up");
        }
        self.initialized = false;
    }
}

impl Drop for SessionFacade {
    fn drop(&mut self) {
        self.transport.disconnect();
    }
}

// =============================================================================
// TESTS
// =============================================================================
