//! TURN relay credential assembly.
//!
//! Credentials follow the TURN REST API convention understood by coturn:
//! the username is `<unix-expiry>:<random>` and the password is the
//! base64 of `HMAC-SHA1(shared-secret, username)`. The relay verifies the
//! pair without ever talking to this server.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ring::hmac;
use ring::rand::{SecureRandom, SystemRandom};
use serde::Serialize;

/// Lifetime of minted relay credentials.
pub const CREDENTIAL_TTL: Duration = Duration::from_secs(3600);

/// TURN relay coordinates, fixed at startup.
#[derive(Debug, Clone)]
pub struct TurnConfig {
    pub host: String,
    pub secret: String,
}

/// Credential set returned to clients.
#[derive(Debug, Clone, Serialize)]
pub struct RelayCredentials {
    pub uris: Vec<String>,
    pub username: String,
    pub password: String,
    pub ttl: u64,
}

impl TurnConfig {
    pub fn new(host: String, secret: String) -> Self {
        Self { host, secret }
    }

    /// Mint a time-limited credential pair.
    pub fn mint(&self) -> RelayCredentials {
        let expiry = SystemTime::now() + CREDENTIAL_TTL;
        let expiry_unix = expiry
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let rng = SystemRandom::new();
        let mut suffix = [0u8; 8];
        // CSPRNG fill on 8 bytes only fails if the OS entropy source is broken.
        rng.fill(&mut suffix).expect("CSPRNG fill failed");

        let username = format!("{}:{}", expiry_unix, hex::encode(suffix));
        // coturn's REST mode mandates SHA-1 here.
        let key = hmac::Key::new(hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY, self.secret.as_bytes());
        let tag = hmac::sign(&key, username.as_bytes());
        let password = STANDARD.encode(tag.as_ref());

        RelayCredentials {
            uris: vec![
                format!("turn:{}:3478?transport=udp", self.host),
                format!("turn:{}:3478?transport=tcp", self.host),
                format!("turns:{}:5349?transport=tcp", self.host),
            ],
            username,
            password,
            ttl: CREDENTIAL_TTL.as_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_shape() {
        let turn = TurnConfig::new("relay.example.com".into(), "s3cret".into());
        let creds = turn.mint();

        assert_eq!(creds.uris.len(), 3);
        assert!(creds.uris[0].starts_with("turn:relay.example.com:3478"));
        assert!(creds.uris[2].starts_with("turns:relay.example.com:5349"));
        assert_eq!(creds.ttl, 3600);

        let (expiry, suffix) = creds.username.split_once(':').unwrap();
        let expiry: u64 = expiry.parse().unwrap();
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();
        assert!(expiry > now);
        assert_eq!(suffix.len(), 16);

        // The password must be exactly the relay's own recomputation.
        let key = hmac::Key::new(hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY, b"s3cret");
        let expected = STANDARD.encode(hmac::sign(&key, creds.username.as_bytes()).as_ref());
        assert_eq!(creds.password, expected);
    }

    #[test]
    fn usernames_are_unique() {
        let turn = TurnConfig::new("relay.example.com".into(), "s3cret".into());
        assert_ne!(turn.mint().username, turn.mint().username);
    }
}
