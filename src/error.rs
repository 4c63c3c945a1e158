use thiserror::Error;

/// Client-wide error type
///
/// Variants map to how the session layer reacts to a failure:
/// transport and negotiation errors fail the current connection attempt,
/// protocol and permission errors are surfaced without touching session
/// state, and `UserGestureRequired` is a deferred-action signal rather
/// than a real failure.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Negotiation error: {0}")]
    Negotiation(String),

    #[error("User gesture required to start playback")]
    UserGestureRequired,

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Metadata error: {0}")]
    Metadata(String),
}

impl ClientError {
    /// Whether this error fails the current connection attempt.
    ///
    /// Fatal errors bubble to the session-state callback as `Failed`;
    /// non-fatal ones only go through the error event channel.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ClientError::Transport(_) | ClientError::Negotiation(_)
        )
    }
}

/// Result type alias used throughout the crate
pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(ClientError::Transport("socket gone".into()).is_fatal());
        assert!(ClientError::Negotiation("bad sdp".into()).is_fatal());
        assert!(!ClientError::Protocol("unhandled message".into()).is_fatal());
        assert!(!ClientError::PermissionDenied("clipboard".into()).is_fatal());
        assert!(!ClientError::UserGestureRequired.is_fatal());
    }
}
