//! Room Session Model
//!
//! `SessionCoordinator` is the single owner of everything known about the
//! current room: roster, frame counter, the frame-indexed input window and
//! the shared clock estimate. All mutation goes through its methods.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::core::clock::now_millis;
use crate::game::input::PlayerInput;
use crate::game::snapshot::{GameStateSnapshot, SnapshotBounds};

/// Frames of input history retained.
pub const INPUT_HISTORY_FRAMES: u64 = 60;

/// How far back `get_player_latest_input` looks.
pub const INPUT_LOOKBACK_FRAMES: u64 = 30;

// =============================================================================
// TYPES
// =============================================================================

/// A non-local participant.
#[derive(Debug, Clone, PartialEq)]
pub struct RemotePlayer {
    /// Player identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Whether this player produces snapshots.
    pub is_host: bool,
    /// Slot, complementary to the local slot.
    pub index: u8,
    /// Last input arrival (ms since epoch, 0 if none).
    pub last_input_time: i64,
    /// Last snapshot arrival (ms since epoch, 0 if none).
    pub last_state_update_time: i64,
    /// Reachable right now.
    pub is_connected: bool,
    /// Last measured round trip (ms).
    pub latency: i64,
}

/// Everything known about one room membership.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    /// Room identifier.
    pub room_id: String,
    /// Local participant.
    pub local_player_id: String,
    /// Remote participants by id.
    pub players: BTreeMap<String, RemotePlayer>,
    /// Local slot (0 or 1).
    pub local_player_index: u8,
    /// Local side produces snapshots.
    pub is_host: bool,
    /// Current simulation frame.
    pub frame_number: u64,
    /// Last relay clock reading (ms).
    pub server_time: i64,
    /// Local clock when `server_time` was read (ms).
    pub client_time: i64,
    /// `server_time - client_time`.
    pub time_drift: i64,
}

/// One buffered input.
#[derive(Debug, Clone, PartialEq)]
pub struct InputSnapshot {
    /// Who produced it.
    pub player_id: String,
    /// The sample.
    pub input: PlayerInput,
    /// Frame it is filed under.
    pub frame_number: u64,
    /// When it was filed (ms).
    pub timestamp: i64,
}

// =============================================================================
// COORDINATOR
// =============================================================================

/// Authoritative model of one room.
#[derive(Debug)]
pub struct SessionCoordinator {
    state: SessionState,
    /// Frame -> snapshots filed under it.
    input_buffer: BTreeMap<u64, Vec<InputSnapshot>>,
    last_input_sent_frame: Option<u64>,
    bounds: SnapshotBounds,
    validate_snapshots: bool,
}

impl SessionCoordinator {
    /// Start a room membership. The local side assumes host until told
    /// otherwise.
    pub fn new(room_id: impl Into<String>, local_player_id: impl Into<String>) -> Self {
        Self {
            state: SessionState {
                room_id: room_id.into(),
                local_player_id: local_player_id.into(),
                players: BTreeMap::new(),
                local_player_index: 0,
                is_host: true,
                frame_number: 0,
                server_time: 0,
                client_time: 0,
                time_drift: 0,
            },
            input_buffer: BTreeMap::new(),
            last_input_sent_frame: None,
            bounds: SnapshotBounds::default(),
            validate_snapshots: true,
        }
    }

    /// Use custom snapshot bounds.
    pub fn with_bounds(mut self, bounds: SnapshotBounds) -> Self {
        self.bounds = bounds;
        self
    }

    /// Read-only view of the room.
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    // -------------------------------------------------------------------------
    // Roster
    // -------------------------------------------------------------------------

    /// Register a remote player. Re-registering a known id changes nothing
    /// and returns the existing entry.
    pub fn add_remote_player(
        &mut self,
        id: &str,
        name: &str,
        is_host: bool,
        index: u8,
    ) -> &RemotePlayer {
        if self.state.players.contains_key(id) {
            debug!(player = %id, "Remote player already registered");
        } else {
            info!(player = %id, %name, is_host, index, "Remote player added");
        }

        self.state
            .players
            .entry(id.to_string())
            .or_insert_with(|| RemotePlayer {
                id: id.to_string(),
                name: name.to_string(),
                is_host,
                index,
                last_input_time: 0,
                last_state_update_time: 0,
                is_connected: true,
                latency: 0,
            })
    }

    /// Remove a remote player for good.
    pub fn remove_remote_player(&mut self, id: &str) -> Option<RemotePlayer> {
        let removed = self.state.players.remove(id);
        if removed.is_some() {
            info!(player = %id, "Remote player removed");
        }
        removed
    }

    /// Look up a remote player.
    pub fn remote_player(&self, id: &str) -> Option<&RemotePlayer> {
        self.state.players.get(id)
    }

    /// Mutable lookup.
    pub fn remote_player_mut(&mut self, id: &str) -> Option<&mut RemotePlayer> {
        self.state.players.get_mut(id)
    }

    /// First remote player by id order.
    pub fn first_remote_player(&self) -> Option<&RemotePlayer> {
        self.state.players.values().next()
    }

    /// Participants in the room, local included.
    pub fn player_count(&self) -> usize {
        1 + self.state.players.len()
    }

    /// Set the local role. Remote slots are kept complementary.
    pub fn set_role(&mut self, is_host: bool) {
        let local_index = if is_host { 0 } else { 1 };
        if self.state.is_host != is_host {
            info!(is_host, local_index, "Local role changed");
        }
        self.state.is_host = is_host;
        self.state.local_player_index = local_index;

        for player in self.state.players.values_mut() {
            player.is_host = !is_host;
            player.index = 1 - local_index;
        }
    }

    /// Whether the local side is host.
    pub fn is_host(&self) -> bool {
        self.state.is_host
    }

    /// Local slot.
    pub fn local_player_index(&self) -> u8 {
        self.state.local_player_index
    }

    /// Flip every remote player's connection flag.
    pub fn set_all_connected(&mut self, connected: bool) {
        for player in self.state.players.values_mut() {
            player.is_connected = connected;
        }
    }

    /// Record a latency measurement against every remote player.
    pub fn update_latency(&mut self, latency_ms: i64) {
        for player in self.state.players.values_mut() {
            player.latency = latency_ms;
        }
    }

    // -------------------------------------------------------------------------
    // Input buffer
    // -------------------------------------------------------------------------

    /// File an input under `frame_number`.
    pub fn record_input(&mut self, player_id: &str, input: PlayerInput, frame_number: u64) {
        let now = now_millis();
        self.input_buffer
            .entry(frame_number)
            .or_default()
            .push(InputSnapshot {
                player_id: player_id.to_string(),
                input,
                frame_number,
                timestamp: now,
            });

        if let Some(player) = self.state.players.get_mut(player_id) {
            player.last_input_time = now;
        }
    }

    /// Most recent input from `player_id` filed within the lookback window.
    ///
    /// `None` means nothing recent: hold the last known value or treat the
    /// player as idle.
    pub fn get_player_latest_input(&self, player_id: &str) -> Option<PlayerInput> {
        let current = self.state.frame_number;
        let oldest = current.saturating_sub(INPUT_LOOKBACK_FRAMES);

        self.input_buffer
            .range(oldest..=current)
            .rev()
            .find_map(|(_, snapshots)| {
                snapshots
                    .iter()
                    .rev()
                    .find(|s| s.player_id == player_id)
                    .map(|s| s.input)
            })
    }

    /// Distinct frames currently buffered.
    pub fn buffered_frames(&self) -> usize {
        self.input_buffer.len()
    }

    // -------------------------------------------------------------------------
    // Snapshots
    // -------------------------------------------------------------------------

    /// Plausibility check for an incoming snapshot. Always true while
    /// validation is disabled.
    pub fn validate_state_snapshot(&self, snapshot: &GameStateSnapshot) -> bool {
        if !self.validate_snapshots {
            return true;
        }
        match self.bounds.check(snapshot) {
            Ok(()) => true,
            Err(reason) => {
                warn!(%reason, frame = snapshot.frame_number, "Snapshot rejected");
                false
            }
        }
    }

    /// Turn snapshot validation on or off (off only for trusted play).
    pub fn set_snapshot_validation(&mut self, enabled: bool) {
        self.validate_snapshots = enabled;
    }

    /// Note that the host delivered a snapshot.
    pub fn note_state_update(&mut self) {
        let now = now_millis();
        for player in self.state.players.values_mut().filter(|p| p.is_host) {
            player.last_state_update_time = now;
        }
    }

    // -------------------------------------------------------------------------
    // Frames
    // -------------------------------------------------------------------------

    /// Advance one frame and drop input older than the history window.
    pub fn next_frame(&mut self) {
        self.state.frame_number += 1;

        let current = self.state.frame_number;
        if current >= INPUT_HISTORY_FRAMES {
            let keep_from = current - INPUT_HISTORY_FRAMES + 1;
            self.input_buffer = self.input_buffer.split_off(&keep_from);
        }
    }

    /// Current frame.
    pub fn frame_number(&self) -> u64 {
        self.state.frame_number
    }

    /// True when no input has gone out on the current frame yet.
    pub fn should_send_input(&self) -> bool {
        match self.last_input_sent_frame {
            Some(sent) => self.state.frame_number > sent,
            None => true,
        }
    }

    /// Close the send gate until the next frame.
    pub fn mark_input_sent(&mut self) {
        self.last_input_sent_frame = Some(self.state.frame_number);
    }

    // -------------------------------------------------------------------------
    // Clock
    // -------------------------------------------------------------------------

    /// Adopt a relay clock reading.
    pub fn sync_time(&mut self, server_time: i64) {
        let now = now_millis();
        self.state.server_time = server_time;
        self.state.client_time = now;
        self.state.time_drift = server_time - now;
        debug!(drift_ms = self.state.time_drift, "Clock synced");
    }

    /// Best-effort shared clock (ms).
    pub fn get_time(&self) -> i64 {
        now_millis() + self.state.time_drift
    }

    /// Start a new match in the same room.
    pub fn reset(&mut self) {
        self.state.frame_number = 0;
        self.input_buffer.clear();
        self.last_input_sent_frame = None;
        info!(room = %self.state.room_id, "Session reset");
    }
}

// =============================================================================
// TESTS
// =============================================================================
