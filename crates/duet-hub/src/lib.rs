//! Duet Hub
//!
//! The hub is the transport-agnostic core of the signaling server:
//! - Manages client sessions and their bounded outbound queues
//! - Tracks rooms (at most two participants) and the host designation
//! - Relays SDP offers/answers and trickled ICE between peers
//! - Fans occupancy updates out to room watchers
//! - Evicts ghost participants and stale half-duplex sessions
//!
//! Transports hand raw frames to [`Hub::deliver`] and drain each session's
//! queue back to the wire; the hub never touches a socket itself.

pub mod hub;
pub mod room;
pub mod session;

pub use hub::{Hub, SSE_GRACE_PERIOD, SSE_REAPER_INTERVAL, SSE_STALE_TIMEOUT};
pub use room::Room;
pub use session::{Session, SessionId, TransportKind, OUTBOUND_QUEUE_CAPACITY};
