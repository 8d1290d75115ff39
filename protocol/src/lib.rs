//! Wire envelopes exchanged between presence clients and the signaling relay.
//!
//! Every frame is a JSON object `{type, ...payload}`. Clients additionally stamp
//! their nickname onto every envelope they send as a top-level `nickname` field.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Opaque negotiation payload (SDP, ICE candidate, ...). The relay never looks inside.
pub type NegotiationBlob = Map<String, Value>;

pub const TYPE_PING: &str = "ping";
pub const TYPE_RESERVE_REQUEST: &str = "reserve_request";
pub const TYPE_RELEASE_REQUEST: &str = "release_request";

/// Relay rejection codes carried in `error.message`.
pub const ERR_ROOM_FULL: &str = "room_full";
pub const ERR_MISSING_ADDRESS: &str = "missing_address";
pub const ERR_INVALID_ADDRESS: &str = "invalid_address";
pub const ERR_UNKNOWN_CONNECTION: &str = "unknown_connection";
pub const ERR_INVALID_TTL: &str = "invalid_ttl";

/// Collapse reasons produced by the relay and the client state machine.
pub const REASON_PEER_LEFT: &str = "peer_left";
pub const REASON_REMOTE_END: &str = "remote_end";
pub const REASON_GRACE_EXPIRED: &str = "grace_expired";
pub const REASON_USER_TERMINATED: &str = "user_terminated";

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Envelope is not a JSON object")]
    NotAnObject,
    #[error("Envelope has no string `type` field")]
    MissingType,
}

/// Negotiation role handed out by the relay once a room holds two members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// First member in the room. Yields on offer collisions.
    Polite,
    /// Second member in the room. Sends the first offer and never yields.
    Initiator,
}

impl Role {
    pub fn other(self) -> Role {
        match self {
            Role::Polite => Role::Initiator,
            Role::Initiator => Role::Polite,
        }
    }

    pub fn is_polite(self) -> bool {
        self == Role::Polite
    }
}

// ============================================
// Signaling Messages
// ============================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Signal {
    /// Relay tells both room members their negotiation role
    Ready { role: Role },
    WebrtcOffer {
        #[serde(flatten)]
        blob: NegotiationBlob,
    },
    WebrtcAnswer {
        #[serde(flatten)]
        blob: NegotiationBlob,
    },
    WebrtcIce {
        #[serde(flatten)]
        blob: NegotiationBlob,
    },
    Ping,
    Pong,
    Text { text: String },
    Hold { holding: bool },
    Clear,
    /// Base64-encoded image frame
    RevealFrame { data: String, width: u32, height: u32 },
    VoiceMaskUpdate { profile: String },
    PeerObstructed {
        seconds: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    PeerRestored,
    /// Terminal for the session that receives it
    Collapse {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// Registry upsert, consumed by the relay
    ReserveRequest {
        address: String,
        nickname: String,
        hours: u32,
    },
    /// Registry delete, consumed by the relay
    ReleaseRequest { address: String },
    /// Relay rejection notice sent right before close
    Error { message: String },
}

impl Signal {
    /// The wire `type` tag for this signal.
    pub fn kind(&self) -> &'static str {
        match self {
            Signal::Ready { .. } => "ready",
            Signal::WebrtcOffer { .. } => "webrtc_offer",
            Signal::WebrtcAnswer { .. } => "webrtc_answer",
            Signal::WebrtcIce { .. } => "webrtc_ice",
            Signal::Ping => TYPE_PING,
            Signal::Pong => "pong",
            Signal::Text { .. } => "text",
            Signal::Hold { .. } => "hold",
            Signal::Clear => "clear",
            Signal::RevealFrame { .. } => "reveal_frame",
            Signal::VoiceMaskUpdate { .. } => "voice_mask_update",
            Signal::PeerObstructed { .. } => "peer_obstructed",
            Signal::PeerRestored => "peer_restored",
            Signal::Collapse { .. } => "collapse",
            Signal::ReserveRequest { .. } => TYPE_RESERVE_REQUEST,
            Signal::ReleaseRequest { .. } => TYPE_RELEASE_REQUEST,
            Signal::Error { .. } => "error",
        }
    }
}

/// A signal plus the sender's nickname, as carried on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub signal: Signal,
    pub nickname: Option<String>,
}

impl Envelope {
    pub fn new(signal: Signal) -> Self {
        Self {
            signal,
            nickname: None,
        }
    }

    pub fn with_nickname(signal: Signal, nickname: Option<String>) -> Self {
        Self { signal, nickname }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        let mut value = serde_json::to_value(&self.signal)?;
        if let (Some(nick), Value::Object(map)) = (&self.nickname, &mut value) {
            map.insert("nickname".to_string(), Value::String(nick.clone()));
        }
        Ok(serde_json::to_string(&value)?)
    }

    pub fn decode(raw: &str) -> Result<Self, ProtocolError> {
        let mut value: Value = serde_json::from_str(raw)?;
        let map = value.as_object_mut().ok_or(ProtocolError::NotAnObject)?;
        let nickname = match map.remove("nickname") {
            Some(Value::String(nick)) => Some(nick),
            _ => None,
        };
        let signal = serde_json::from_value(value)?;
        Ok(Self { signal, nickname })
    }
}

/// Encode a relay-originated signal (no nickname).
pub fn encode_signal(signal: &Signal) -> Result<String, ProtocolError> {
    Envelope::new(signal.clone()).encode()
}

/// Read only the `type` tag of a frame without interpreting the payload.
///
/// The relay uses this to route frames it forwards verbatim.
pub fn peek_type(raw: &str) -> Result<String, ProtocolError> {
    let value: Value = serde_json::from_str(raw)?;
    let map = value.as_object().ok_or(ProtocolError::NotAnObject)?;
    match map.get("type") {
        Some(Value::String(kind)) => Ok(kind.clone()),
        _ => Err(ProtocolError::MissingType),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ready_uses_snake_case_role() {
        let json = encode_signal(&Signal::Ready {
            role: Role::Initiator,
        })
        .unwrap();
        assert_eq!(json, r#"{"role":"initiator","type":"ready"}"#);
    }

    #[test]
    fn nickname_is_stamped_and_stripped() {
        let env = Envelope::with_nickname(
            Signal::Text {
                text: "hi".to_string(),
            },
            Some("ROO".to_string()),
        );
        let raw = env.encode().unwrap();
        let value: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["nickname"], "ROO");
        assert_eq!(value["type"], "text");

        let back = Envelope::decode(&raw).unwrap();
        assert_eq!(back, env);
    }

    #[test]
    fn negotiation_blob_keeps_every_field() {
        let raw = json!({
            "type": "webrtc_offer",
            "sdp": "v=0",
            "sdpType": "offer",
            "nickname": "A",
        })
        .to_string();
        let env = Envelope::decode(&raw).unwrap();
        match env.signal {
            Signal::WebrtcOffer { blob } => {
                assert_eq!(blob.get("sdp"), Some(&json!("v=0")));
                assert_eq!(blob.get("sdpType"), Some(&json!("offer")));
                assert!(!blob.contains_key("type"));
                assert!(!blob.contains_key("nickname"));
            }
            other => panic!("unexpected signal {:?}", other),
        }
        assert_eq!(env.nickname.as_deref(), Some("A"));
    }

    #[test]
    fn collapse_reason_is_optional() {
        let env = Envelope::decode(r#"{"type":"collapse"}"#).unwrap();
        assert_eq!(env.signal, Signal::Collapse { reason: None });
    }

    #[test]
    fn unknown_type_is_a_decode_error() {
        assert!(Envelope::decode(r#"{"type":"join","address":"X"}"#).is_err());
        assert!(Envelope::decode("[1,2]").is_err());
        assert!(Envelope::decode("not json").is_err());
    }

    #[test]
    fn peek_type_reads_only_the_tag() {
        assert_eq!(peek_type(r#"{"type":"ping"}"#).unwrap(), TYPE_PING);
        assert_eq!(
            peek_type(r#"{"type":"custom_thing","x":1}"#).unwrap(),
            "custom_thing"
        );
        assert!(matches!(
            peek_type(r#"{"x":1}"#),
            Err(ProtocolError::MissingType)
        ));
        assert!(matches!(peek_type("3"), Err(ProtocolError::NotAnObject)));
    }

    #[test]
    fn kind_matches_serialized_tag() {
        let samples = vec![
            Signal::Ping,
            Signal::Clear,
            Signal::PeerRestored,
            Signal::Hold { holding: true },
            Signal::PeerObstructed {
                seconds: 10,
                reason: None,
            },
            Signal::ReleaseRequest {
                address: "X1".to_string(),
            },
        ];
        for signal in samples {
            let raw = encode_signal(&signal).unwrap();
            assert_eq!(peek_type(&raw).unwrap(), signal.kind());
        }
    }
}
