//! Game Session Manager
//!
//! Entry point for the game shell. Decides single- or multi-player from the
//! launch context and forwards per-frame calls to the session facade when
//! one exists. Every pass-through is a no-op without an initialized session,
//! so single-player code can call them unconditionally.

use tracing::{info, warn};

use crate::config::{resolve_relay_url, LaunchContext, SyncConfig};
use crate::game::input::PlayerInput;
use crate::game::snapshot::GameStateSnapshot;
use crate::network::facade::{SessionError, SessionEvent, SessionFacade};

/// How the game was launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameMode {
    /// Local play, no network.
    Single,
    /// Two players through the relay.
    Multi,
}

/// Multiplayer when the launch carries a non-blank room code.
pub fn detect_game_mode(ctx: &LaunchContext) -> GameMode {
    if ctx.room().is_some() {
        GameMode::Multi
    } else {
        GameMode::Single
    }
}

/// Snapshot of connection state for UI display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    /// Current mode.
    pub mode: GameMode,
    /// Socket open right now.
    pub connected: bool,
    /// Local side is host.
    pub is_host: bool,
    /// Participants, local included.
    pub player_count: usize,
    /// Room code, when in multiplayer.
    pub room_id: Option<String>,
    /// Last round trip (ms).
    pub latency_ms: i64,
    /// Set once reconnecting has given up.
    pub terminal_error: Option<String>,
}

/// Owns the optional multiplayer session.
pub struct GameSessionManager {
    config: SyncConfig,
    launch: LaunchContext,
    mode: GameMode,
    session: Option<SessionFacade>,
}

impl GameSessionManager {
    /// Create a manager; the mode comes from the launch context.
    pub fn new(config: SyncConfig, launch: LaunchContext) -> Self {
        let mode = detect_game_mode(&launch);
        Self {
            config,
            launch,
            mode,
            session: None,
        }
    }

    /// Detected or chosen mode.
    pub fn mode(&self) -> GameMode {
        self.mode
    }

    /// Whether a multiplayer session is live.
    pub fn is_multiplayer(&self) -> bool {
        self.session.is_some()
    }

    /// Drop any session and play locally.
    pub fn init_single_player(&mut self) {
        self.cleanup();
        self.mode = GameMode::Single;
        info!("Single player mode");
    }

    /// Join the room from the launch context.
    ///
    /// Fails before touching the network when the name or room is missing.
    /// On failure no session is kept.
    pub async fn init_multiplayer(
        &mut self,
        local_player_id: &str,
        display_name: &str,
    ) -> Result<(), SessionError> {
        let name = display_name.trim();
        if name.is_empty() {
            return Err(SessionError::MissingDisplayName);
        }
        let room_id = self
            .launch
            .room()
            .ok_or(SessionError::MissingRoomId)?
            .to_string();
        if self.session.is_some() {
            return Err(SessionError::AlreadyInitialized);
        }

        let url = resolve_relay_url(&self.config, &self.launch);
        info!(%url, room = %room_id, player = %local_player_id, "Starting multiplayer");

        let mut session = SessionFacade::new(&self.config, url, room_id, local_player_id, name);
        if let Err(e) = session.initialize().await {
            warn!(error = %e, "Multiplayer initialization failed");
            return Err(e);
        }

        self.mode = GameMode::Multi;
        self.session = Some(session);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Pass-throughs
    // -------------------------------------------------------------------------

    /// Sample local controls.
    pub fn update_input(&mut self, x: f64, y: f64, fire: bool) {
        if let Some(session) = &mut self.session {
            session.update_local_input(x, y, fire);
        }
    }

    /// Push this frame's input. Returns true when it went out.
    pub fn send_input(&mut self) -> bool {
        self.session
            .as_mut()
            .is_some_and(|session| session.send_input_to_server())
    }

    /// Latest input of the opponent. Only the first remote player exists in
    /// a two-player room, so `index` is informational.
    pub fn get_remote_player_input(&self, index: u8) -> Option<PlayerInput> {
        let session = self.session.as_ref()?;
        let remote = session.coordinator().first_remote_player()?;
        if remote.index != index {
            tracing::trace!(requested = index, actual = remote.index, "Remote index mismatch");
        }
        session.first_remote_input()
    }

    /// Advance one frame.
    pub fn next_frame(&mut self) {
        if let Some(session) = &mut self.session {
            session.next_frame();
        }
    }

    /// Current frame, zero without a session.
    pub fn get_frame_number(&self) -> u64 {
        self.session.as_ref().map_or(0, SessionFacade::frame_number)
    }

    /// Publish host state.
    pub fn send_game_state(&mut self, snapshot: GameStateSnapshot) -> bool {
        self.session
            .as_mut()
            .is_some_and(|session| session.send_game_state_snapshot(snapshot))
    }

    /// Announce lobby readiness.
    pub fn send_ready(&mut self, ready: bool) {
        if let Some(session) = &mut self.session {
            session.send_ready(ready);
        }
    }

    /// Both sides reported ready. False offline.
    pub fn both_ready(&self) -> bool {
        self.session.as_ref().is_some_and(SessionFacade::both_ready)
    }

    /// Apply and return pending session events.
    pub fn poll_events(&mut self) -> Vec<SessionEvent> {
        self.session
            .as_mut()
            .map(SessionFacade::poll)
            .unwrap_or_default()
    }

    /// Last validated host snapshot.
    pub fn latest_game_state(&self) -> Option<&GameStateSnapshot> {
        self.session.as_ref()?.latest_game_state()
    }

    /// Restart the match in the same room.
    pub fn reset_match(&mut self) {
        if let Some(session) = &mut self.session {
            session.reset_match();
        }
    }

    /// Whether the local side drives the simulation. Always true offline.
    pub fn is_host(&self) -> bool {
        self.session.as_ref().map_or(true, SessionFacade::is_host)
    }

    /// Connection state for display.
    pub fn connection_status(&self) -> ConnectionStatus {
        match &self.session {
            Some(session) => ConnectionStatus {
                mode: self.mode,
                connected: session.is_connected(),
                is_host: session.is_host(),
                player_count: session.coordinator().player_count(),
                room_id: Some(session.coordinator().state().room_id.clone()),
                latency_ms: session.latency_ms(),
                terminal_error: session.terminal_error().map(str::to_string),
            },
            None => ConnectionStatus {
                mode: self.mode,
                connected: false,
                is_host: true,
                player_count: 1,
                room_id: None,
                latency_ms: 0,
                terminal_error: None,
            },
        }
    }

    /// Tear down any session. Safe at any time.
    pub fn cleanup(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.cleanup();
        }
    }
}

impl Drop for GameSessionManager {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn launch(room: Option<&str>) -> LaunchContext {
        LaunchContext {
            room_id: room.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_mode_detection() {
        assert_eq!(detect_game_mode(&launch(None)), GameMode::Single);
        assert_eq!(detect_game_mode(&launch(Some(""))), GameMode::Single);
        assert_eq!(detect_game_mode(&launch(Some("  "))), GameMode::Single);
        assert_eq!(detect_game_mode(&launch(Some("AB12"))), GameMode::Multi);
    }

    #[test]
    fn test_pass_throughs_without_session() {
        let mut manager = GameSessionManager::new(SyncConfig::default(), launch(None));
        manager.update_input(0.5, 0.5, true);
        manager.next_frame();
        manager.send_ready(true);
        manager.reset_match();

        assert!(!manager.send_input());
        assert!(!manager.send_game_state(GameStateSnapshot::default()));
        assert_eq!(manager.get_frame_number(), 0);
        assert!(manager.get_remote_player_input(1).is_none());
        assert!(manager.poll_events().is_empty());
        assert!(manager.latest_game_state().is_none());
        assert!(manager.is_host());
        assert!(!manager.both_ready());
    }

    #[test]
    fn test_offline_status() {
        let manager = GameSessionManager::new(SyncConfig::default(), launch(None));
        let status = manager.connection_status();
        assert_eq!(status.mode, GameMode::Single);
        assert!(!status.connected);
        assert!(status.is_host);
        assert_eq!(status.player_count, 1);
        assert_eq!(status.room_id, None);
    }

    #[tokio::test]
    async fn test_blank_name_rejected() {
        let mut manager = GameSessionManager::new(SyncConfig::default(), launch(Some("AB12")));
        let result = manager.init_multiplayer("p1", "   ").await;
        assert!(matches!(result, Err(SessionError::MissingDisplayName)));
        assert!(!manager.is_multiplayer());
    }

    #[tokio::test]
    async fn test_missing_room_rejected() {
        let mut manager = GameSessionManager::new(SyncConfig::default(), launch(None));
        let result = manager.init_multiplayer("p1", "Ada").await;
        assert!(matches!(result, Err(SessionError::MissingRoomId)));
    }

    #[tokio::test]
    async fn test_failed_connect_keeps_no_session() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let config = SyncConfig {
            relay_url: Some(format!("ws://{}", addr)),
            ..Default::default()
        };
        let mut manager = GameSessionManager::new(config, launch(Some("AB12")));
        assert!(manager.init_multiplayer("p1", "Ada").await.is_err());
        assert!(!manager.is_multiplayer());
        assert_eq!(manager.mode(), GameMode::Multi);
    }

    #[test]
    fn test_cleanup_twice() {
        let mut manager = GameSessionManager::new(SyncConfig::default(), launch(Some("AB12")));
        manager.cleanup();
        manager.cleanup();
        manager.init_single_player();
        assert_eq!(manager.mode(), GameMode::Single);
    }
}
