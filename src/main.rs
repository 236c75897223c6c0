//! Duo Netplay headless client
//!
//! Joins the room from `ROOM_ID` (or plays offline without one) and drives
//! a 60 Hz frame loop with scripted input, logging session events.

use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use duo_netplay::{
    game::snapshot::{GameStateSnapshot, PlayerSnapshot, Position},
    GameMode, GameSessionManager, LaunchContext, SessionEvent, SyncConfig, TICK_RATE, VERSION,
};

/// Frames to run when `RUN_FRAMES` is unset (one minute).
const DEFAULT_RUN_FRAMES: u64 = 3600;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Duo Netplay v{}", VERSION);
    info!("Frame Rate: {} Hz", TICK_RATE);

    let config = SyncConfig::from_env();
    let launch = LaunchContext::from_env();
    let run_frames = std::env::var("RUN_FRAMES")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_RUN_FRAMES);

    let mut manager = GameSessionManager::new(config, launch);

    match manager.mode() {
        GameMode::Multi => {
            let player_id = uuid::Uuid::new_v4().to_string();
            let name = std::env::var("PLAYER_NAME").unwrap_or_else(|_| "Player".to_string());
            manager
                .init_multiplayer(&player_id, &name)
                .await
                .context("failed to join relay room")?;
            manager.send_ready(true);
        }
        GameMode::Single => manager.init_single_player(),
    }

    run(&mut manager, run_frames).await;

    let status = manager.connection_status();
    info!(
        frames = manager.get_frame_number(),
        latency_ms = status.latency_ms,
        players = status.player_count,
        "Session finished"
    );
    manager.cleanup();
    Ok(())
}

/// Fixed-rate loop: poll, sample input, send, publish state, advance.
async fn run(manager: &mut GameSessionManager, frames: u64) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1) / TICK_RATE);
    let mut pos = Position::new(50.0, 50.0);

    for t in 0..frames {
        ticker.tick().await;

        for event in manager.poll_events() {
            match event {
                SessionEvent::ConnectionLost { attempts } => {
                    warn!(attempts, "Relay unreachable, stopping");
                    return;
                }
                SessionEvent::GameState(snapshot) => {
                    pos = snapshot
                        .players
                        .iter()
                        .find(|p| p.index == 1)
                        .map_or(pos, |p| p.pos);
                }
                other => info!(?other, "Session event"),
            }
        }

        // Circle the stick, fire every half second
        let angle = t as f64 * 0.05;
        let fire = t % 30 == 0;
        manager.update_input(angle.cos(), angle.sin(), fire);
        manager.send_input();

        if manager.is_host() {
            pos.x = (pos.x + angle.cos()).clamp(0.0, 100.0);
            pos.y = (pos.y + angle.sin()).clamp(0.0, 100.0);
            let remote = manager.get_remote_player_input(1);
            manager.send_game_state(GameStateSnapshot {
                frame_number: manager.get_frame_number(),
                timestamp: duo_netplay::core::clock::now_millis(),
                players: vec![PlayerSnapshot {
                    index: 0,
                    pos,
                    health: 5.0,
                    alive: true,
                    cooldown: if remote.is_some_and(|i| i.fire) { 0.5 } else { 0.0 },
                }],
                ..Default::default()
            });
        }

        manager.next_frame();

        if t > 0 && t % (TICK_RATE as u64 * 10) == 0 {
            let status = manager.connection_status();
            info!(
                frame = t,
                connected = status.connected,
                host = status.is_host,
                latency_ms = status.latency_ms,
                "Status"
            );
        }
    }
}
