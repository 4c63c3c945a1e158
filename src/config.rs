//! Session configuration

use serde::{Deserialize, Serialize};

/// Signalling retry policy: fixed delay between attempts, bounded count.
pub const SIGNALLING_RETRY_DELAY_SECS: u64 = 3;
pub const SIGNALLING_MAX_RETRIES: u32 = 3;

/// Delay before reconnecting after a reset that interrupted an unstable
/// negotiation, giving the host side time to settle.
pub const RESET_SETTLE_DELAY_SECS: u64 = 3;

/// Client session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Signalling endpoint URL (ws:// or wss://)
    pub signalling_url: String,
    /// Peer ID announced in the HELLO message
    pub peer_id: u32,
    /// STUN server URLs
    pub stun_servers: Vec<String>,
    /// TURN server configuration
    pub turn_servers: Vec<TurnServer>,
    /// Force all traffic through TURN relays
    pub force_turn: bool,
    /// Initial requested video bitrate in kbps
    pub video_bitrate_kbps: u32,
    /// Initial requested audio bitrate in kbps
    pub audio_bitrate_kbps: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            signalling_url: "ws://localhost:8080/webrtc/signalling/".to_string(),
            peer_id: 1,
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            turn_servers: vec![],
            force_turn: false,
            video_bitrate_kbps: 8000,
            audio_bitrate_kbps: 128,
        }
    }
}

/// TURN server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnServer {
    /// TURN server URLs (e.g., ["turn:turn.example.com:3478?transport=udp"])
    pub urls: Vec<String>,
    /// Username for TURN authentication
    pub username: String,
    /// Credential for TURN authentication
    pub credential: String,
}

impl TurnServer {
    /// Create a TurnServer with a single URL
    pub fn new(url: String, username: String, credential: String) -> Self {
        Self {
            urls: vec![url],
            username,
            credential,
        }
    }
}

/// Desired quality parameters forwarded to the host.
///
/// The client does not persist these; callers hand them in and the session
/// forwards them over the data channel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QualityRequest {
    /// Video bitrate in kbps
    pub video_bitrate_kbps: Option<u32>,
    /// Audio bitrate in kbps
    pub audio_bitrate_kbps: Option<u32>,
    /// Target framerate
    pub framerate: Option<u32>,
    /// Remote frame resolution (width, height)
    pub resolution: Option<(u32, u32)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SessionConfig::default();
        assert_eq!(config.peer_id, 1);
        assert!(!config.force_turn);
        assert!(config.turn_servers.is_empty());
        assert_eq!(config.stun_servers.len(), 1);
    }

    #[test]
    fn test_config_roundtrip() {
        let mut config = SessionConfig::default();
        config.turn_servers.push(TurnServer::new(
            "turn:turn.example.com:3478".to_string(),
            "user".to_string(),
            "pass".to_string(),
        ));

        let json = serde_json::to_string(&config).unwrap();
        let back: SessionConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.turn_servers.len(), 1);
        assert_eq!(back.turn_servers[0].username, "user");
    }
}
