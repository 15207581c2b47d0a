//! Duet Core
//!
//! Core types and primitives for the Duet signaling hub:
//! - Wire protocol envelope and typed payloads ([`Envelope`], [`message`])
//! - Error codes surfaced to clients ([`ErrorCode`])
//! - Self-authenticating room identifiers ([`RoomIds`])
//! - Session / client ID minting ([`ids`])
//! - Time-bounded relay-credential tokens ([`TokenStore`])

pub mod error;
pub mod ids;
pub mod message;
pub mod room_id;
pub mod tokens;

pub use error::{Error, ErrorCode, Result};
pub use message::Envelope;
pub use room_id::RoomIds;
pub use tokens::{TokenError, TokenKind, TokenStore};

/// Wire protocol version carried in every envelope.
pub const PROTOCOL_VERSION: i64 = 1;

/// Maximum size of a single protocol message, on any transport (64 KiB).
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;
