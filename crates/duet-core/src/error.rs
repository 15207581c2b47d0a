//! Error types for Duet

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for Duet operations
pub type Result<T> = std::result::Result<T, Error>;

/// Duet core error types
#[derive(Error, Debug)]
pub enum Error {
    /// Room-ID secret is not configured
    #[error("room id secret not configured")]
    SecretMissing,

    /// Room identifier failed validation
    #[error("invalid room id: {0}")]
    InvalidRoomId(&'static str),

    /// JSON encoding/decoding error
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Error codes carried in `error` messages to clients.
///
/// Serialized in SCREAMING_SNAKE_CASE on the wire (`ROOM_FULL`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    BadRequest,
    UnsupportedVersion,
    InvalidRoomId,
    ServerNotConfigured,
    RoomFull,
    NotHost,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::BadRequest => "BAD_REQUEST",
            ErrorCode::UnsupportedVersion => "UNSUPPORTED_VERSION",
            ErrorCode::InvalidRoomId => "INVALID_ROOM_ID",
            ErrorCode::ServerNotConfigured => "SERVER_NOT_CONFIGURED",
            ErrorCode::RoomFull => "ROOM_FULL",
            ErrorCode::NotHost => "NOT_HOST",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
