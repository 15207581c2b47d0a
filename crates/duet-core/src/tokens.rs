//! Relay-credential token store.
//!
//! Maps opaque tokens to issuance facts with a short TTL. Expiry is
//! authoritative; tokens are not single-use and may be consumed again
//! within their TTL. The store never performs I/O and is safe to call
//! from any task.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use ring::rand::{SecureRandom, SystemRandom};
use thiserror::Error;

/// TTL for tokens minted on a successful room join.
pub const CALL_TOKEN_TTL: Duration = Duration::from_secs(5 * 60);

/// TTL for tokens minted for the device-check page.
pub const DIAGNOSTIC_TOKEN_TTL: Duration = Duration::from_secs(5);

/// What a token was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Call,
    Diagnostic,
}

/// Issuance facts recorded for each token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub ip: IpAddr,
    pub issued_at: SystemTime,
    pub expires_at: SystemTime,
    pub kind: TokenKind,
}

/// Token consumption failures
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    #[error("unknown token")]
    Unknown,
    #[error("token expired")]
    Expired,
}

/// In-memory token store guarded by a mutex.
pub struct TokenStore {
    entries: Mutex<HashMap<String, IssuedToken>>,
    rng: SystemRandom,
}

impl TokenStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            rng: SystemRandom::new(),
        }
    }

    /// Insert a fresh token bound to `ip` and return it with its expiry.
    pub fn issue(&self, ip: IpAddr, ttl: Duration, kind: TokenKind) -> (String, SystemTime) {
        let mut bytes = [0u8; 16];
        // CSPRNG fill on 16 bytes only fails if the OS entropy source is broken.
        self.rng.fill(&mut bytes).expect("CSPRNG fill failed");
        let token = hex::encode(bytes);

        let now = SystemTime::now();
        let expires_at = now + ttl;
        self.entries.lock().insert(
            token.clone(),
            IssuedToken {
                ip,
                issued_at: now,
                expires_at,
                kind,
            },
        );
        (token, expires_at)
    }

    /// Look up a token. Does not delete; re-use within TTL is permitted.
    pub fn consume(&self, token: &str) -> Result<IssuedToken, TokenError> {
        let entries = self.entries.lock();
        let record = entries.get(token).ok_or(TokenError::Unknown)?;
        if record.expires_at <= SystemTime::now() {
            return Err(TokenError::Expired);
        }
        Ok(record.clone())
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = SystemTime::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, record| record.expires_at > now);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for TokenStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip() -> IpAddr {
        "203.0.113.9".parse().unwrap()
    }

    #[test]
    fn issue_and_consume() {
        let store = TokenStore::new();
        let (token, expires_at) = store.issue(ip(), Duration::from_secs(60), TokenKind::Call);
        assert_eq!(token.len(), 32); // 16 bytes hex

        let record = store.consume(&token).unwrap();
        assert_eq!(record.ip, ip());
        assert_eq!(record.kind, TokenKind::Call);
        assert_eq!(record.expires_at, expires_at);

        // Not single-use: a second consume within TTL succeeds.
        assert!(store.consume(&token).is_ok());
    }

    #[test]
    fn unknown_token() {
        let store = TokenStore::new();
        assert_eq!(store.consume("nope"), Err(TokenError::Unknown));
    }

    #[test]
    fn expired_token() {
        let store = TokenStore::new();
        let (token, _) = store.issue(ip(), Duration::from_secs(0), TokenKind::Diagnostic);
        assert_eq!(store.consume(&token), Err(TokenError::Expired));
    }

    #[test]
    fn sweep_removes_expired_only() {
        let store = TokenStore::new();
        let (_live, _) = store.issue(ip(), Duration::from_secs(60), TokenKind::Call);
        let (_dead, _) = store.issue(ip(), Duration::from_secs(0), TokenKind::Call);

        assert_eq!(store.len(), 2);
        assert_eq!(store.sweep(), 1);
        assert_eq!(store.len(), 1);
    }
}
