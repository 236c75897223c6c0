//! Network Layer
//!
//! Relay link, wire messages and the room-level session model.
//! Nothing here runs game logic; inbound data is validated before it
//! reaches the simulation.

pub mod facade;
pub mod protocol;
pub mod session;
pub mod transport;

pub use facade::{SessionError, SessionEvent, SessionFacade};
pub use protocol::{ClientMessage, Decoded, ServerMessage};
pub use session::{InputSnapshot, RemotePlayer, SessionCoordinator, SessionState};
pub use transport::{
    LinkStatus, ReconnectDecision, ReconnectPolicy, Transport, TransportConfig, TransportError,
    TransportEvent,
};
