//! Session event bus
//!
//! The source-of-truth for everything the embedding layer may want to
//! observe: status text, errors, state transitions, control messages routed
//! from the host, and stats snapshots. Uses a tokio broadcast channel so
//! multiple subscribers (UI, logging, tests) can listen independently.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::protocol::control::CursorDescriptor;
use crate::stats::StatsSnapshot;

/// Event channel capacity (ring buffer size)
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Peer session lifecycle state
///
/// Owned exclusively by the `PeerSession`; other components only read it.
/// `Failed`, `Closed` and `Disconnected` look terminal but may be followed
/// by a fresh `Connecting` cycle when the supervisor issues a reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Disconnected,
    Connecting,
    SignallingConnected,
    Negotiating,
    Connected,
    Failed,
    Closed,
}

impl SessionState {
    /// States after which only a supervisor-driven reconnect makes progress.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Failed | SessionState::Closed | SessionState::Disconnected
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "disconnected"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::SignallingConnected => write!(f, "signalling-connected"),
            SessionState::Negotiating => write!(f, "negotiating"),
            SessionState::Connected => write!(f, "connected"),
            SessionState::Failed => write!(f, "failed"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

/// Events published by the session layer
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Human-readable status line
    Status(String),
    /// Non-fatal error surfaced to the caller
    Error(String),
    /// Session state transition
    StateChanged(SessionState),
    /// Data channel became usable
    DataChannelOpen,
    /// Data channel closed
    DataChannelClose,
    /// Autoplay was rejected; the caller must gate playback behind a gesture
    PlayStreamRequired,
    /// Host pushed clipboard content (already decoded)
    ClipboardContent(String),
    /// Host changed the cursor
    CursorChanged(CursorDescriptor),
    /// Host requested a system action (e.g. reload)
    SystemAction(String),
    /// GPU telemetry from the host, forwarded verbatim
    GpuStats(serde_json::Value),
    /// System telemetry from the host, forwarded verbatim
    SystemStats(serde_json::Value),
    /// Host-measured end-to-end latency in milliseconds
    LatencyMeasurement(f64),
    /// Menu-toggle hotkey pressed locally
    MenuHotkey,
    /// Fullscreen-toggle hotkey pressed locally
    FullscreenHotkey,
    /// Gamepad appeared in the poll snapshot
    GamepadConnected(usize),
    /// Gamepad vanished from the poll snapshot
    GamepadDisconnected(usize),
    /// New stats snapshot from the sampler
    StatsUpdated(StatsSnapshot),
}

/// Broadcast bus distributing [`SessionEvent`]s to all subscribers.
///
/// Events are fire-and-forget; publishing with no subscribers is fine.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: SessionEvent) {
        // Err here only means "no subscribers", which is normal
        let _ = self.tx.send(event);
    }

    /// Convenience wrapper for status lines
    pub fn status(&self, message: impl Into<String>) {
        self.publish(SessionEvent::Status(message.into()));
    }

    /// Convenience wrapper for surfaced errors
    pub fn error(&self, message: impl Into<String>) {
        self.publish(SessionEvent::Error(message.into()));
    }

    /// Subscribe to events
    ///
    /// The receiver uses a ring buffer; a subscriber that falls too far
    /// behind gets a `Lagged` error and misses events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(SessionEvent::StateChanged(SessionState::Connecting));

        let event = rx.recv().await.unwrap();
        assert!(matches!(
            event,
            SessionEvent::StateChanged(SessionState::Connecting)
        ));
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        assert_eq!(bus.tx.receiver_count(), 2);
        bus.status("negotiating");

        assert!(matches!(rx1.recv().await.unwrap(), SessionEvent::Status(_)));
        assert!(matches!(rx2.recv().await.unwrap(), SessionEvent::Status(_)));
    }

    #[test]
    fn test_no_subscribers() {
        let bus = EventBus::new();
        assert_eq!(bus.tx.receiver_count(), 0);
        // Must not panic with nobody listening
        bus.error("lost connection");
    }

    #[test]
    fn test_terminal_states() {
        assert!(SessionState::Failed.is_terminal());
        assert!(SessionState::Closed.is_terminal());
        assert!(SessionState::Disconnected.is_terminal());
        assert!(!SessionState::Connected.is_terminal());
        assert!(!SessionState::Negotiating.is_terminal());
    }
}
