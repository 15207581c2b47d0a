//! Wire protocol envelope and typed payloads.
//!
//! Every message on every transport is one JSON object:
//!
//! ```json
//! {"v":1,"type":"join","rid":"...","payload":{...}}
//! ```
//!
//! The envelope is validated strictly (`v` must equal 1, `type` is
//! required); payloads are parsed tolerantly so unknown inner fields never
//! abort a message.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ErrorCode, Result};
use crate::PROTOCOL_VERSION;

/// The JSON envelope shared by all protocol messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub v: i64,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl Envelope {
    /// Start a server-originated message of the given type.
    pub fn event(kind: &str) -> Self {
        Self {
            v: PROTOCOL_VERSION,
            kind: kind.to_string(),
            rid: None,
            sid: None,
            cid: None,
            to: None,
            payload: None,
        }
    }

    pub fn with_rid(mut self, rid: impl Into<String>) -> Self {
        self.rid = Some(rid.into());
        self
    }

    pub fn with_sid(mut self, sid: impl Into<String>) -> Self {
        self.sid = Some(sid.into());
        self
    }

    pub fn with_cid(mut self, cid: impl Into<String>) -> Self {
        self.cid = Some(cid.into());
        self
    }

    pub fn with_payload<T: Serialize>(mut self, payload: &T) -> Result<Self> {
        self.payload = Some(serde_json::to_value(payload)?);
        Ok(self)
    }

    pub fn with_payload_value(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Decode an envelope from raw bytes. Unknown fields are ignored.
    pub fn decode(raw: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(raw)?)
    }

    /// Encode to a single JSON frame.
    pub fn encode(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    /// Build an `error` message.
    pub fn error(code: ErrorCode, message: &str, rid: Option<&str>) -> Self {
        let mut env = Envelope::event("error").with_payload_value(serde_json::json!({
            "code": code,
            "message": message,
        }));
        if let Some(rid) = rid {
            env = env.with_rid(rid);
        }
        env
    }
}

/// One room participant, as listed in `joined` and `room_state` payloads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Participant {
    pub cid: String,
}

/// Client payload of `join`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinPayload {
    #[serde(default)]
    pub capabilities: Option<Value>,
    #[serde(default)]
    pub reconnect_cid: Option<String>,
}

/// Client payload of `watch_rooms`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WatchRoomsPayload {
    #[serde(default)]
    pub rids: Vec<String>,
}

/// Server payload of `joined`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinedPayload {
    pub host_cid: String,
    pub participants: Vec<Participant>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_token_expires_at: Option<u64>,
}

/// Server payload of `room_state`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomStatePayload {
    pub host_cid: String,
    pub participants: Vec<Participant>,
}

/// Server payload of `room_ended`.
#[derive(Debug, Clone, Serialize)]
pub struct RoomEndedPayload {
    pub by: String,
    pub reason: &'static str,
}

/// Server payload of `room_status_update`.
#[derive(Debug, Clone, Serialize)]
pub struct RoomStatusUpdatePayload {
    pub rid: String,
    pub count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_ignores_unknown_fields() {
        let raw = br#"{"v":1,"type":"join","rid":"R1","extra":"x","payload":{"future":true}}"#;
        let env = Envelope::decode(raw).unwrap();
        assert_eq!(env.v, 1);
        assert_eq!(env.kind, "join");
        assert_eq!(env.rid.as_deref(), Some("R1"));
    }

    #[test]
    fn decode_rejects_non_json() {
        assert!(Envelope::decode(b"not json").is_err());
    }

    #[test]
    fn encode_skips_empty_fields() {
        let env = Envelope::event("ping");
        let text = String::from_utf8(env.encode().unwrap().to_vec()).unwrap();
        assert_eq!(text, r#"{"v":1,"type":"ping"}"#);
    }

    #[test]
    fn error_message_shape() {
        let env = Envelope::error(ErrorCode::RoomFull, "Room is full", Some("R1"));
        let text = String::from_utf8(env.encode().unwrap().to_vec()).unwrap();
        assert!(text.contains(r#""type":"error""#));
        assert!(text.contains(r#""code":"ROOM_FULL""#));
        assert!(text.contains(r#""rid":"R1""#));
    }

    #[test]
    fn join_payload_tolerates_extras() {
        let value = serde_json::json!({
            "capabilities": {"video": true},
            "reconnectCid": "C-1234",
            "somethingNew": 42
        });
        let payload: JoinPayload = serde_json::from_value(value).unwrap();
        assert_eq!(payload.reconnect_cid.as_deref(), Some("C-1234"));
        assert!(payload.capabilities.is_some());
    }

    #[test]
    fn joined_payload_camel_case() {
        let payload = JoinedPayload {
            host_cid: "C-a".into(),
            participants: vec![Participant { cid: "C-a".into() }],
            turn_token: Some("T1".into()),
            turn_token_expires_at: Some(1_700_000_000),
        };
        let text = serde_json::to_string(&payload).unwrap();
        assert!(text.contains("\"hostCid\":\"C-a\""));
        assert!(text.contains("\"turnToken\":\"T1\""));
        assert!(text.contains("\"turnTokenExpiresAt\""));
    }
}
