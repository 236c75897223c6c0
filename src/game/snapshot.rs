//! Authoritative State Snapshots
//!
//! The host publishes a `GameStateSnapshot` for a frame; the guest checks it
//! against `SnapshotBounds` before handing it to the simulation.

use serde::{Deserialize, Serialize};

// =============================================================================
// SNAPSHOT TYPES
// =============================================================================

/// 2D position in arena units.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// X coordinate.
    pub x: f64,
    /// Y coordinate.
    pub y: f64,
}

impl Position {
    /// Create a position.
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Per-player slice of a snapshot.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerSnapshot {
    /// Player slot (0 or 1).
    pub index: u8,
    /// Ship position.
    pub pos: Position,
    /// Remaining health.
    pub health: f64,
    /// Still in play.
    pub alive: bool,
    /// Weapon cooldown remaining (frames).
    pub cooldown: f64,
}

/// Boss slice of a snapshot.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BossSnapshot {
    /// Boss position.
    pub pos: Position,
    /// Current hit points.
    pub hp: f64,
    /// Hit points at full health.
    pub hp_max: f64,
}

/// Host-authored simulation truth for one frame.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GameStateSnapshot {
    /// Frame this snapshot describes.
    pub frame_number: u64,
    /// Capture time (ms since epoch).
    pub timestamp: i64,
    /// Both players.
    pub players: Vec<PlayerSnapshot>,
    /// Boss, when one is on screen.
    pub boss: Option<BossSnapshot>,
    /// Live bullet count.
    pub bullets_count: i64,
}

// =============================================================================
// BOUNDS
// =============================================================================

/// Plausibility limits for incoming snapshots.
///
/// The defaults match the stock arena; a simulation with different world
/// dimensions should pass its own.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SnapshotBounds {
    /// Lowest accepted coordinate on either axis.
    pub min_pos: f64,
    /// Highest accepted coordinate on either axis.
    pub max_pos: f64,
    /// Highest accepted player health.
    pub max_health: f64,
    /// Highest accepted bullet count.
    pub max_bullets: i64,
    /// Boss hp may reach `hp_max * boss_hp_overhead`.
    pub boss_hp_overhead: f64,
}

impl Default for SnapshotBounds {
    fn default() -> Self {
        Self {
            min_pos: -100.0,
            max_pos: 200.0,
            max_health: 10.0,
            max_bullets: 1000,
            boss_hp_overhead: 2.0,
        }
    }
}

/// Why a snapshot was refused.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SnapshotRejection {
    /// A player coordinate left the arena.
    #[error("player {index} position ({x}, {y}) out of bounds")]
    PlayerPosition {
        /// Player slot.
        index: u8,
        /// X coordinate.
        x: f64,
        /// Y coordinate.
        y: f64,
    },

    /// A player health value is implausible.
    #[error("player {index} health {health} out of range")]
    PlayerHealth {
        /// Player slot.
        index: u8,
        /// Reported health.
        health: f64,
    },

    /// Boss hp negative or far above its maximum.
    #[error("boss hp {hp} out of range (max {hp_max})")]
    BossHp {
        /// Reported hp.
        hp: f64,
        /// Reported maximum.
        hp_max: f64,
    },

    /// Bullet count out of range.
    #[error("bullet count {0} out of range")]
    BulletCount(i64),
}

impl SnapshotBounds {
    /// Check a snapshot, reporting the first violation found.
    pub fn check(&self, snapshot: &GameStateSnapshot) -> Result<(), SnapshotRejection> {
        for player in &snapshot.players {
            let Position { x, y } = player.pos;
            if !self.pos_in_range(x) || !self.pos_in_range(y) {
                return Err(SnapshotRejection::PlayerPosition {
                    index: player.index,
                    x,
                    y,
                });
            }
            if !player.health.is_finite() || player.health < 0.0 || player.health > self.max_health
            {
                return Err(SnapshotRejection::PlayerHealth {
                    index: player.index,
                    health: player.health,
                });
            }
        }

        if let Some(boss) = &snapshot.boss {
            let ceiling = boss.hp_max * self.boss_hp_overhead;
            if !boss.hp.is_finite() || boss.hp < 0.0 || boss.hp > ceiling {
                return Err(SnapshotRejection::BossHp {
                    hp: boss.hp,
                    hp_max: boss.hp_max,
                });
            }
        }

        if snapshot.bullets_count < 0 || snapshot.bullets_count > self.max_bullets {
            return Err(SnapshotRejection::BulletCount(snapshot.bullets_count));
        }

        Ok(())
    }

    #[inline]
    fn pos_in_range(&self, v: f64) -> bool {
        v.is_finite() && v >= self.min_pos && v <= self.max_pos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge_snapshot() -> GameStateSnapshot {
        GameStateSnapshot {
            frame_number: 42,
            timestamp: 0,
            players: vec![
                PlayerSnapshot {
                    index: 0,
                    pos: Position::new(-100.0, 200.0),
                    health: 0.0,
                    alive: false,
                    cooldown: 0.0,
                },
                PlayerSnapshot {
                    index: 1,
                    pos: Position::new(200.0, -100.0),
                    health: 10.0,
                    alive: true,
                    cooldown: 3.0,
                },
            ],
            boss: Some(BossSnapshot {
                pos: Position::new(50.0, 20.0),
                hp: 0.0,
                hp_max: 500.0,
            }),
            bullets_count: 1000,
        }
    }

    #[test]
    fn test_accepts_edges() {
        let bounds = SnapshotBounds::default();
        assert_eq!(bounds.check(&edge_snapshot()), Ok(()));

        let mut snap = edge_snapshot();
        snap.bullets_count = 0;
        snap.boss.as_mut().unwrap().hp = 1000.0;
        assert_eq!(bounds.check(&snap), Ok(()));
    }

    #[test]
    fn test_rejects_negative_boss_hp() {
        let mut snap = edge_snapshot();
        snap.boss.as_mut().unwrap().hp = -1.0;
        assert!(matches!(
            SnapshotBounds::default().check(&snap),
            Err(SnapshotRejection::BossHp { .. })
        ));
    }

    #[test]
    fn test_rejects_boss_hp_over_double_max() {
        let mut snap = edge_snapshot();
        snap.boss.as_mut().unwrap().hp = 1000.5;
        assert!(SnapshotBounds::default().check(&snap).is_err());
    }

    #[test]
    fn test_rejects_player_out_of_arena() {
        let mut snap = edge_snapshot();
        snap.players[0].pos = Position::new(500.0, 0.0);
        assert!(matches!(
            SnapshotBounds::default().check(&snap),
            Err(SnapshotRejection::PlayerPosition { index: 0, .. })
        ));

        snap.players[0].pos = Position::new(0.0, -100.01);
        assert!(SnapshotBounds::default().check(&snap).is_err());
    }

    #[test]
    fn test_rejects_bad_health_and_bullets() {
        let mut snap = edge_snapshot();
        snap.players[1].health = 10.5;
        assert!(SnapshotBounds::default().check(&snap).is_err());

        let mut snap = edge_snapshot();
        snap.players[1].health = -0.1;
        assert!(SnapshotBounds::default().check(&snap).is_err());

        let mut snap = edge_snapshot();
        snap.bullets_count = 1001;
        assert_eq!(
            SnapshotBounds::default().check(&snap),
            Err(SnapshotRejection::BulletCount(1001))
        );

        snap.bullets_count = -1;
        assert!(SnapshotBounds::default().check(&snap).is_err());
    }

    #[test]
    fn test_rejects_nan() {
        let mut snap = edge_snapshot();
        snap.players[0].pos.x = f64::NAN;
        assert!(SnapshotBounds::default().check(&snap).is_err());
    }

    #[test]
    fn test_custom_bounds() {
        let wide = SnapshotBounds {
            min_pos: -1000.0,
            max_pos: 1000.0,
            ..Default::default()
        };
        let mut snap = edge_snapshot();
        snap.players[0].pos = Position::new(500.0, 0.0);
        assert_eq!(wide.check(&snap), Ok(()));
    }

    #[test]
    fn test_partial_json_defaults() {
        let snap: GameStateSnapshot =
            serde_json::from_str(r#"{"boss":{"hp":-1}}"#).unwrap();
        assert!(SnapshotBounds::default().check(&snap).is_err());

        let snap: GameStateSnapshot =
            serde_json::from_str(r#"{"players":[{"pos":{"x":500,"y":0}}]}"#).unwrap();
        assert!(SnapshotBounds::default().check(&snap).is_err());

        let snap: GameStateSnapshot = serde_json::from_str(
            r#"{"frameNumber":7,"players":[{"index":0,"pos":{"x":1,"y":2},"health":3,"alive":true,"cooldown":0}],"bulletsCount":4}"#,
        )
        .unwrap();
        assert_eq!(snap.frame_number, 7);
        assert_eq!(snap.bullets_count, 4);
        assert!(snap.boss.is_none());
        assert_eq!(SnapshotBounds::default().check(&snap), Ok(()));
    }
}
