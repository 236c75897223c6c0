//! Core primitives shared by every layer.

pub mod clock;

pub use clock::{millis_since, now_millis};
