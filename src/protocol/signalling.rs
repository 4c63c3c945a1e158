//! Signalling message codec
//!
//! Client→server: a single `HELLO <peer_id>` (optionally with base64
//! metadata appended) after socket open, then JSON `{"sdp": …}` /
//! `{"ice": …}` frames. Server→client: the literal `HELLO` acknowledging
//! registration, literal strings starting with `ERROR`, and the same JSON
//! frames in the other direction.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::{ClientError, Result};

/// SDP description kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

/// A session description as carried on the signalling wire
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE candidate as carried on the signalling wire
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
    #[serde(rename = "usernameFragment")]
    pub username_fragment: Option<String>,
}

/// Envelope used for outbound JSON frames
#[derive(Serialize)]
struct SdpEnvelope<'a> {
    sdp: &'a SessionDescription,
}

#[derive(Serialize)]
struct IceEnvelope<'a> {
    ice: &'a IceCandidate,
}

/// Inbound JSON frame; exactly one field is expected to be set
#[derive(Deserialize)]
struct InboundEnvelope {
    sdp: Option<SessionDescription>,
    ice: Option<IceCandidate>,
}

/// Decoded server→client signalling message
#[derive(Debug, Clone)]
pub enum ServerMessage {
    /// Literal `HELLO`: registration acknowledged
    Registered,
    /// Literal `ERROR…`: fatal signalling error, payload is the remainder
    Error(String),
    /// `{"sdp": …}`
    Sdp(SessionDescription),
    /// `{"ice": …}`
    Ice(IceCandidate),
}

/// Encode the registration message sent right after socket open.
///
/// `meta`, when present, is serialized to JSON and appended base64-encoded;
/// the host treats it as opaque session metadata.
pub fn encode_hello(peer_id: u32, meta: Option<&serde_json::Value>) -> String {
    match meta {
        Some(value) => {
            let encoded = BASE64.encode(value.to_string());
            format!("HELLO {peer_id} {encoded}")
        }
        None => format!("HELLO {peer_id}"),
    }
}

/// Encode an outbound SDP frame
pub fn encode_sdp(sdp: &SessionDescription) -> Result<String> {
    Ok(serde_json::to_string(&SdpEnvelope { sdp })?)
}

/// Encode an outbound ICE frame
pub fn encode_ice(ice: &IceCandidate) -> Result<String> {
    Ok(serde_json::to_string(&IceEnvelope { ice })?)
}

/// Decode a server→client signalling payload.
///
/// A payload that is neither a known literal nor a JSON frame carrying
/// exactly one of `sdp`/`ice` is a protocol error.
pub fn decode_server_message(payload: &str) -> Result<ServerMessage> {
    if payload == "HELLO" {
        return Ok(ServerMessage::Registered);
    }
    if let Some(rest) = payload.strip_prefix("ERROR") {
        return Ok(ServerMessage::Error(rest.trim_start().to_string()));
    }

    let envelope: InboundEnvelope = serde_json::from_str(payload)
        .map_err(|_| ClientError::Protocol(format!("failed to parse message: {payload}")))?;

    match (envelope.sdp, envelope.ice) {
        (Some(sdp), None) => Ok(ServerMessage::Sdp(sdp)),
        (None, Some(ice)) => Ok(ServerMessage::Ice(ice)),
        _ => Err(ClientError::Protocol(format!(
            "unhandled JSON message: {payload}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_hello_plain() {
        assert_eq!(encode_hello(1, None), "HELLO 1");
        assert_eq!(encode_hello(42, None), "HELLO 42");
    }

    #[test]
    fn test_encode_hello_with_meta() {
        let meta = serde_json::json!({ "res": "1920x1080" });
        let hello = encode_hello(1, Some(&meta));
        let parts: Vec<&str> = hello.split(' ').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "HELLO");
        assert_eq!(parts[1], "1");

        let decoded = BASE64.decode(parts[2]).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&decoded).unwrap();
        assert_eq!(value["res"], "1920x1080");
    }

    #[test]
    fn test_decode_registered() {
        assert!(matches!(
            decode_server_message("HELLO").unwrap(),
            ServerMessage::Registered
        ));
    }

    #[test]
    fn test_decode_error() {
        match decode_server_message("ERROR no host session").unwrap() {
            ServerMessage::Error(text) => assert_eq!(text, "no host session"),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_decode_sdp_offer() {
        let payload = r#"{"sdp":{"type":"offer","sdp":"v=0\r\n"}}"#;
        match decode_server_message(payload).unwrap() {
            ServerMessage::Sdp(desc) => {
                assert_eq!(desc.kind, SdpKind::Offer);
                assert_eq!(desc.sdp, "v=0\r\n");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_decode_ice() {
        let payload =
            r#"{"ice":{"candidate":"candidate:1 1 UDP 2122 10.0.0.1 50000 typ host","sdpMid":"0","sdpMLineIndex":0}}"#;
        match decode_server_message(payload).unwrap() {
            ServerMessage::Ice(ice) => {
                assert_eq!(ice.sdp_mid.as_deref(), Some("0"));
                assert_eq!(ice.sdp_mline_index, Some(0));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_decode_unhandled_json() {
        let err = decode_server_message(r#"{"something":"else"}"#).unwrap_err();
        assert!(matches!(err, ClientError::Protocol(_)));
    }

    #[test]
    fn test_decode_garbage() {
        let err = decode_server_message("not json at all").unwrap_err();
        assert!(matches!(err, ClientError::Protocol(_)));
    }

    #[test]
    fn test_sdp_roundtrip() {
        let desc = SessionDescription::answer("v=0\r\nm=video 9 UDP/TLS/RTP/SAVPF 96\r\n");
        let encoded = encode_sdp(&desc).unwrap();
        match decode_server_message(&encoded).unwrap() {
            ServerMessage::Sdp(back) => {
                assert_eq!(back.kind, SdpKind::Answer);
                assert_eq!(back.sdp, desc.sdp);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }
}
