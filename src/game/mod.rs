//! Game-facing data: player input and host state snapshots.
//!
//! ## Module Structure
//!
//! - `input`: Input sample, validation, send throttling
//! - `snapshot`: Host state snapshot and plausibility bounds

pub mod input;
pub mod snapshot;

pub use input::{InputRejection, InputValidator, PlayerInput};
pub use snapshot::{GameStateSnapshot, SnapshotBounds, SnapshotRejection};
