//! Input Sampling and Validation
//!
//! `PlayerInput` is one analog control sample. `InputValidator` is the trust
//! boundary every sample crosses, local or remote, before the simulation is
//! allowed to read it.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::core::clock::now_millis;

// =============================================================================
// INPUT TYPES
// =============================================================================

/// A single control sample.
///
/// Once returned by [`InputValidator`] both axes are inside `[-1, 1]`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerInput {
    /// Horizontal axis, -1 (left) to +1 (right).
    pub x: f64,
    /// Vertical axis, -1 (down) to +1 (up).
    pub y: f64,
    /// Fire button held.
    pub fire: bool,
    /// Capture time (ms since epoch).
    pub timestamp: i64,
}

impl PlayerInput {
    /// Create an input stamped with the current time.
    pub fn new(x: f64, y: f64, fire: bool) -> Self {
        Self {
            x,
            y,
            fire,
            timestamp: now_millis(),
        }
    }

    /// Neutral stick, fire released.
    pub fn idle() -> Self {
        Self::new(0.0, 0.0, false)
    }

    /// Check if this sample carries no intent.
    #[inline]
    pub fn is_idle(&self) -> bool {
        self.x == 0.0 && self.y == 0.0 && !self.fire
    }

    /// Same control state, ignoring capture time.
    #[inline]
    pub fn same_controls(&self, other: &PlayerInput) -> bool {
        self.x == other.x && self.y == other.y && self.fire == other.fire
    }
}

/// Why an input sample was refused.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InputRejection {
    /// Payload was not a JSON object.
    #[error("input is not an object")]
    NotAnObject,

    /// A required field is absent or has the wrong type.
    #[error("field `{0}` missing or mistyped")]
    BadField(&'static str),

    /// Axis value is NaN or infinite.
    #[error("axis `{0}` is not finite")]
    NotFinite(&'static str),

    /// Axis magnitude beyond the accepted deadband.
    #[error("axis `{axis}` out of range: {value}")]
    OutOfRange {
        /// Offending axis name.
        axis: &'static str,
        /// Raw value received.
        value: f64,
    },
}

// =============================================================================
// VALIDATOR
// =============================================================================

/// Stateful guard over untrusted input.
///
/// Tracks consecutive rejections (the invalid streak) so callers can stop
/// trusting a source without dropping the connection, and rate-limits
/// outbound sends.
#[derive(Debug, Clone)]
pub struct InputValidator {
    invalid_streak: u32,
    send_interval: Duration,
    last_send: Option<Instant>,
}

impl Default for InputValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl InputValidator {
    /// Largest raw axis magnitude accepted before clamping.
    pub const MAX_AXIS: f64 = 1.5;

    /// Streak length tolerated before the breaker trips.
    pub const MAX_INVALID_STREAK: u32 = 10;

    /// Default minimum spacing between outbound inputs.
    pub const DEFAULT_SEND_INTERVAL: Duration = Duration::from_millis(16);

    /// Create a validator with the default send interval.
    pub fn new() -> Self {
        Self::with_send_interval(Self::DEFAULT_SEND_INTERVAL)
    }

    /// Create a validator with a custom send interval.
    pub fn with_send_interval(send_interval: Duration) -> Self {
        Self {
            invalid_streak: 0,
            send_interval,
            last_send: None,
        }
    }

    /// Validate an untrusted JSON payload.
    ///
    /// Returns `None` and extends the invalid streak on any rejection. An
    /// accepted value is clamped into `[-1, 1]` and freshly timestamped.
    pub fn validate(&mut self, raw: &Value) -> Option<PlayerInput> {
        let checked = parse_fields(raw).and_then(|(x, y, fire)| check_axes(x, y, fire));
        self.settle(checked)
    }

    /// Validate locally sampled axes.
    pub fn validate_axes(&mut self, x: f64, y: f64, fire: bool) -> Option<PlayerInput> {
        let checked = check_axes(x, y, fire);
        self.settle(checked)
    }

    /// Count a rejection decided elsewhere (e.g. a bad state snapshot).
    pub fn record_rejection(&mut self) {
        self.invalid_streak = self.invalid_streak.saturating_add(1);
    }

    /// Breaker state: true once the streak exceeds the tolerated length.
    pub fn has_too_many_invalid_inputs(&self) -> bool {
        self.invalid_streak > Self::MAX_INVALID_STREAK
    }

    /// Current consecutive rejection count.
    pub fn invalid_streak(&self) -> u32 {
        self.invalid_streak
    }

    /// Outbound throttle. Returns true at most once per send interval.
    pub fn can_send_input(&mut self) -> bool {
        let now = Instant::now();
        match self.last_send {
            Some(last) if now.duration_since(last) < self.send_interval => false,
            _ => {
                self.last_send = Some(now);
                true
            }
        }
    }

    /// Check if `input` is a no-op sample.
    pub fn is_idle(input: &PlayerInput) -> bool {
        input.is_idle()
    }

    /// Clear the streak and throttle.
    pub fn reset(&mut self) {
        self.invalid_streak = 0;
        self.last_send = None;
    }

    fn settle(&mut self, checked: Result<PlayerInput, InputRejection>) -> Option<PlayerInput> {
        match checked {
            Ok(input) => {
                self.invalid_streak = 0;
                Some(input)
            }
            Err(reason) => {
                self.record_rejection();
                debug!(%reason, streak = self.invalid_streak, "input rejected");
                None
            }
        }
    }
}

fn parse_fields(raw: &Value) -> Result<(f64, f64, bool), InputRejection> {
    let obj = raw.as_object().ok_or(InputRejection::NotAnObject)?;

    let x = obj
        .get("x")
        .and_then(Value::as_f64)
        .ok_or(InputRejection::BadField("x"))?;
    let y = obj
        .get("y")
        .and_then(Value::as_f64)
        .ok_or(InputRejection::BadField("y"))?;
    let fire = obj
        .get("fire")
        .and_then(Value::as_bool)
        .ok_or(InputRejection::BadField("fire"))?;

    Ok((x, y, fire))
}

fn check_axes(x: f64, y: f64, fire: bool) -> Result<PlayerInput, InputRejection> {
    Ok(PlayerInput::new(
        check_axis("x", x)?,
        check_axis("y", y)?,
        fire,
    ))
}

fn check_axis(axis: &'static str, value: f64) -> Result<f64, InputRejection> {
    if !value.is_finite() {
        return Err(InputRejection::NotFinite(axis));
    }
    if value.abs() > InputValidator::MAX_AXIS {
        return Err(InputRejection::OutOfRange { axis, value });
    }
    Ok(value.clamp(-1.0, 1.0))
}

// =============================================================================
// TESTS
// =============================================================================
