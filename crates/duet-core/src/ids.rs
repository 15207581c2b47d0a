//! Session and client identifier minting.
//!
//! Identifiers carry 64 bits of CSPRNG output, hex-encoded, with a short
//! prefix so log lines stay legible (`S-` for sessions, `C-` for room
//! participants). Uniqueness is probabilistic; a collision within one
//! process uptime is treated as impossible.

use ring::rand::{SecureRandom, SystemRandom};

/// Prefix for session identifiers.
pub const SESSION_ID_PREFIX: &str = "S-";

/// Prefix for per-room client identifiers.
pub const CLIENT_ID_PREFIX: &str = "C-";

/// Mint an identifier with the given prefix and 8 random bytes.
pub fn generate_id(prefix: &str) -> String {
    let rng = SystemRandom::new();
    let mut bytes = [0u8; 8];
    // CSPRNG fill on 8 bytes only fails if the OS entropy source is broken.
    rng.fill(&mut bytes).expect("CSPRNG fill failed");
    format!("{}{}", prefix, hex::encode(bytes))
}

/// Mint a fresh session identifier (`S-` + 16 hex chars).
pub fn session_id() -> String {
    generate_id(SESSION_ID_PREFIX)
}

/// Mint a fresh client identifier (`C-` + 16 hex chars).
pub fn client_id() -> String {
    generate_id(CLIENT_ID_PREFIX)
}
