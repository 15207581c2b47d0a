//! Self-authenticating room identifiers.
//!
//! A room ID is a capability token: 12 random bytes followed by an 8-byte
//! truncated HMAC-SHA-256 tag, base64url-encoded without padding to exactly
//! 27 characters. The MAC is keyed by a process-wide secret and bound to a
//! context string `id:v1|<env>|room`, so tokens never validate across
//! deployments. The server persists nothing: any 27-character string whose
//! tag verifies names a valid room, and nobody without the secret can forge
//! one.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ring::rand::{SecureRandom, SystemRandom};
use ring::{constant_time, hmac};

use crate::error::{Error, Result};

const ROOM_ID_VERSION: &str = "v1";
const ROOM_ID_ENTITY: &str = "room";
const ROOM_ID_RANDOM_BYTES: usize = 12;
const ROOM_ID_TAG_BYTES: usize = 8;
const ROOM_ID_TOTAL_BYTES: usize = ROOM_ID_RANDOM_BYTES + ROOM_ID_TAG_BYTES;

/// Encoded length of a room ID: 20 bytes in unpadded base64url.
pub const ROOM_ID_ENCODED_LEN: usize = 27;

/// Mints and validates room identifiers with a process-wide secret.
pub struct RoomIds {
    key: Option<hmac::Key>,
    context: String,
    rng: SystemRandom,
}

impl RoomIds {
    /// Build from an optional secret and the deployment environment tag.
    ///
    /// An unset secret yields a signer that fails every operation with
    /// [`RoomIdError::NotConfigured`]; the decision to run anyway belongs
    /// to the caller.
    pub fn new(secret: Option<&str>, env: &str) -> Self {
        let key = secret
            .filter(|s| !s.is_empty())
            .map(|s| hmac::Key::new(hmac::HMAC_SHA256, s.as_bytes()));
        Self {
            key,
            context: format!("id:{}|{}|{}", ROOM_ID_VERSION, env, ROOM_ID_ENTITY),
            rng: SystemRandom::new(),
        }
    }

    /// Whether a secret is configured.
    pub fn is_configured(&self) -> bool {
        self.key.is_some()
    }

    /// Mint a fresh room identifier.
    pub fn generate(&self) -> Result<String> {
        let key = self.key.as_ref().ok_or(Error::SecretMissing)?;

        let mut random = [0u8; ROOM_ID_RANDOM_BYTES];
        self.rng
            .fill(&mut random)
            .map_err(|_| Error::InvalidRoomId("entropy unavailable"))?;

        let tag = self.tag(key, &random);

        let mut token = Vec::with_capacity(ROOM_ID_TOTAL_BYTES);
        token.extend_from_slice(&random);
        token.extend_from_slice(&tag);

        Ok(URL_SAFE_NO_PAD.encode(token))
    }

    /// Validate a room identifier in constant time.
    pub fn validate(&self, room_id: &str) -> Result<()> {
        if room_id.len() != ROOM_ID_ENCODED_LEN {
            return Err(Error::InvalidRoomId("must be a 27-character token"));
        }

        let key = self.key.as_ref().ok_or(Error::SecretMissing)?;

        let raw = URL_SAFE_NO_PAD
            .decode(room_id)
            .map_err(|_| Error::InvalidRoomId("not base64url"))?;
        if raw.len() != ROOM_ID_TOTAL_BYTES {
            return Err(Error::InvalidRoomId("wrong decoded length"));
        }

        let (random, tag) = raw.split_at(ROOM_ID_RANDOM_BYTES);
        let expected = self.tag(key, random);

        constant_time::verify_slices_are_equal(tag, &expected)
            .map_err(|_| Error::InvalidRoomId("tag mismatch"))
    }

    fn tag(&self, key: &hmac::Key, random: &[u8]) -> [u8; ROOM_ID_TAG_BYTES] {
        let mut ctx = hmac::Context::with_key(key);
        ctx.update(random);
        ctx.update(self.context.as_bytes());
        let full = ctx.sign();

        let mut tag = [0u8; ROOM_ID_TAG_BYTES];
        tag.copy_from_slice(&full.as_ref()[..ROOM_ID_TAG_BYTES]);
        tag
    }
}
