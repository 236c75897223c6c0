//! # Duo Netplay
//!
//! Client-side synchronization for two-player real-time sessions through a
//! WebSocket relay.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        DUO NETPLAY                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  manager.rs      - Mode detection, per-frame pass-throughs   │
//! │  config.rs       - Env config, relay URL resolution          │
//! │                                                              │
//! │  network/        - Relay link and room model                 │
//! │  ├── facade.rs   - Session surface, event application        │
//! │  ├── session.rs  - Roster, frames, input window, clock       │
//! │  ├── transport.rs- Socket, replay queue, reconnect backoff   │
//! │  └── protocol.rs - Wire messages                             │
//! │                                                              │
//! │  game/           - Data crossing the wire                    │
//! │  ├── input.rs    - Input sample and validation               │
//! │  └── snapshot.rs - Host snapshot and bounds                  │
//! │                                                              │
//! │  core/                                                       │
//! │  └── clock.rs    - Wall clock in milliseconds                │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Threading
//!
//! The transport runs on a tokio task. Everything it receives reaches the
//! session as [`network::TransportEvent`]s on a channel, drained by
//! [`network::SessionFacade::poll`] on the simulation thread. Session state
//! therefore has one owner and needs no locks.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod core;
pub mod game;
pub mod manager;
pub mod network;

// Re-export commonly used types
pub use config::{resolve_relay_url, LaunchContext, SyncConfig};
pub use game::input::{InputValidator, PlayerInput};
pub use game::snapshot::{GameStateSnapshot, SnapshotBounds};
pub use manager::{detect_game_mode, ConnectionStatus, GameMode, GameSessionManager};
pub use network::facade::{SessionError, SessionEvent, SessionFacade};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Simulation frame rate (Hz)
pub const TICK_RATE: u32 = 60;
