//! Host→client control message decoding
//!
//! Control messages arrive on the data channel as JSON `{type, data}`
//! objects. One legacy exception: a raw payload starting with the reserved
//! `cw,` prefix carries clipboard text outside the JSON framing.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::{ClientError, Result};

/// Reserved prefix of the legacy raw-clipboard message
const LEGACY_CLIPBOARD_PREFIX: &str = "cw,";

/// Remote cursor description pushed by the host
///
/// `handle` 0 means "restore the default cursor". Identical handles always
/// carry identical images, so consumers may cache by handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CursorDescriptor {
    pub handle: u64,
    /// Base64-encoded cursor image, empty when `handle` is 0
    #[serde(default)]
    pub curdata: String,
    #[serde(default)]
    pub hotspot: Hotspot,
    /// Optional CSS-level cursor override keyword
    #[serde(default)]
    pub r#override: Option<String>,
}

/// Cursor hotspot in image pixels
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Hotspot {
    pub x: i32,
    pub y: i32,
}

/// Decoded control message
#[derive(Debug, Clone)]
pub enum ControlMessage {
    /// Host pipeline status text
    Pipeline(String),
    /// GPU telemetry, forwarded verbatim
    GpuStats(serde_json::Value),
    /// Clipboard content (already base64-decoded)
    Clipboard(String),
    /// Cursor change
    Cursor(CursorDescriptor),
    /// System action request (e.g. `reload`)
    System(String),
    /// Keepalive probe; must be answered with `pong,<epochSeconds>`
    Ping,
    /// System telemetry, forwarded verbatim
    SystemStats(serde_json::Value),
    /// Host-side latency measurement in milliseconds
    LatencyMeasurement(f64),
}

#[derive(Deserialize)]
struct Envelope {
    r#type: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Deserialize)]
struct PipelineData {
    status: String,
}

#[derive(Deserialize)]
struct ClipboardData {
    content: String,
}

#[derive(Deserialize)]
struct SystemData {
    action: String,
}

#[derive(Deserialize)]
struct LatencyData {
    latency_ms: f64,
}

/// Decode a data-channel payload from the host.
///
/// Non-JSON payloads are only accepted in the legacy raw-clipboard form;
/// anything else is a protocol error. Unknown `type` values are protocol
/// errors too, so new host message types surface loudly instead of being
/// dropped.
pub fn decode_control_message(payload: &str) -> Result<ControlMessage> {
    let envelope: Envelope = match serde_json::from_str(payload) {
        Ok(envelope) => envelope,
        Err(_) => {
            if let Some(content) = payload.strip_prefix(LEGACY_CLIPBOARD_PREFIX) {
                return Ok(ControlMessage::Clipboard(content.to_string()));
            }
            return Err(ClientError::Protocol(format!(
                "error parsing data channel message as JSON: {payload}"
            )));
        }
    };

    match envelope.r#type.as_str() {
        "pipeline" => {
            let data: PipelineData = serde_json::from_value(envelope.data)?;
            Ok(ControlMessage::Pipeline(data.status))
        }
        "gpu_stats" => Ok(ControlMessage::GpuStats(envelope.data)),
        "clipboard" => {
            let data: ClipboardData = serde_json::from_value(envelope.data)?;
            let bytes = BASE64.decode(&data.content).map_err(|e| {
                ClientError::Protocol(format!("invalid base64 clipboard content: {e}"))
            })?;
            let text = String::from_utf8(bytes).map_err(|e| {
                ClientError::Protocol(format!("clipboard content is not UTF-8: {e}"))
            })?;
            Ok(ControlMessage::Clipboard(text))
        }
        "cursor" => {
            let cursor: CursorDescriptor = serde_json::from_value(envelope.data)?;
            Ok(ControlMessage::Cursor(cursor))
        }
        "system" => {
            let data: SystemData = serde_json::from_value(envelope.data)?;
            Ok(ControlMessage::System(data.action))
        }
        "ping" => Ok(ControlMessage::Ping),
        "system_stats" => Ok(ControlMessage::SystemStats(envelope.data)),
        "latency_measurement" => {
            let data: LatencyData = serde_json::from_value(envelope.data)?;
            Ok(ControlMessage::LatencyMeasurement(data.latency_ms))
        }
        other => Err(ClientError::Protocol(format!(
            "unhandled message received: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_status() {
        let payload = r#"{"type":"pipeline","data":{"status":"streaming"}}"#;
        match decode_control_message(payload).unwrap() {
            ControlMessage::Pipeline(status) => assert_eq!(status, "streaming"),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_clipboard_base64() {
        let content = BASE64.encode("copied text");
        let payload = format!(r#"{{"type":"clipboard","data":{{"content":"{content}"}}}}"#);
        match decode_control_message(&payload).unwrap() {
            ControlMessage::Clipboard(text) => assert_eq!(text, "copied text"),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_legacy_clipboard() {
        match decode_control_message("cw,raw clipboard text").unwrap() {
            ControlMessage::Clipboard(text) => assert_eq!(text, "raw clipboard text"),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_cursor() {
        let payload = r#"{"type":"cursor","data":{"handle":7,"curdata":"aGk=","hotspot":{"x":4,"y":5},"override":null}}"#;
        match decode_control_message(payload).unwrap() {
            ControlMessage::Cursor(cursor) => {
                assert_eq!(cursor.handle, 7);
                assert_eq!(cursor.curdata, "aGk=");
                assert_eq!(cursor.hotspot.x, 4);
                assert_eq!(cursor.hotspot.y, 5);
                assert!(cursor.r#override.is_none());
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_default_cursor_restore() {
        let payload = r#"{"type":"cursor","data":{"handle":0}}"#;
        match decode_control_message(payload).unwrap() {
            ControlMessage::Cursor(cursor) => {
                assert_eq!(cursor.handle, 0);
                assert!(cursor.curdata.is_empty());
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_system_action() {
        let payload = r#"{"type":"system","data":{"action":"reload"}}"#;
        match decode_control_message(payload).unwrap() {
            ControlMessage::System(action) => assert_eq!(action, "reload"),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_ping() {
        let payload = r#"{"type":"ping","data":{"start_time":123}}"#;
        assert!(matches!(
            decode_control_message(payload).unwrap(),
            ControlMessage::Ping
        ));
    }

    #[test]
    fn test_latency_measurement() {
        let payload = r#"{"type":"latency_measurement","data":{"latency_ms":42.5}}"#;
        match decode_control_message(payload).unwrap() {
            ControlMessage::LatencyMeasurement(latency) => assert_eq!(latency, 42.5),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_type() {
        let err = decode_control_message(r#"{"type":"surprise","data":{}}"#).unwrap_err();
        assert!(matches!(err, ClientError::Protocol(_)));
    }

    #[test]
    fn test_non_json_non_legacy() {
        let err = decode_control_message("definitely not json").unwrap_err();
        assert!(matches!(err, ClientError::Protocol(_)));
    }
}
