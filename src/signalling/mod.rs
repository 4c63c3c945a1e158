//! Signalling channel
//!
//! Owns the WebSocket to the signalling endpoint. Sends `HELLO <peer_id>`
//! exactly once per socket lifetime right after open, relays SDP and ICE
//! frames in both directions, and retries transport errors on a fixed delay
//! with a bounded budget. Everything observed on the socket is forwarded as
//! [`SignallingEvent`]s; the channel itself never touches session state.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{SIGNALLING_MAX_RETRIES, SIGNALLING_RETRY_DELAY_SECS};
use crate::error::{ClientError, Result};
use crate::protocol::signalling::{
    decode_server_message, encode_hello, encode_ice, encode_sdp, IceCandidate, ServerMessage,
    SessionDescription,
};

/// Signalling socket state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignallingState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the signalling channel
#[derive(Debug, Clone)]
pub enum SignallingEvent {
    /// Socket opened and HELLO sent
    Connected,
    /// Server acknowledged registration
    Registered,
    /// Remote session description received
    RemoteSdp(SessionDescription),
    /// Remote ICE candidate received
    RemoteIce(IceCandidate),
    /// Non-fatal error to surface (protocol violations, transient transport)
    Error(String),
    /// Server closed the connection cleanly
    Disconnected,
    /// Retry budget exhausted; the channel gave up
    Fatal(String),
}

/// Decision produced by the retry policy after a transport error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

/// Bounded fixed-delay retry policy.
///
/// The counter resets whenever a socket opens successfully, so the budget
/// applies to consecutive failures only.
struct RetryPolicy {
    count: u32,
    max: u32,
    delay: Duration,
}

impl RetryPolicy {
    fn new(max: u32, delay: Duration) -> Self {
        Self {
            count: 0,
            max,
            delay,
        }
    }

    fn on_open(&mut self) {
        self.count = 0;
    }

    fn on_error(&mut self) -> RetryDecision {
        self.count += 1;
        if self.count >= self.max {
            RetryDecision::GiveUp
        } else {
            RetryDecision::RetryAfter(self.delay)
        }
    }
}

/// Bidirectional message socket to the signalling endpoint
pub struct SignallingChannel {
    url: String,
    peer_id: u32,
    /// Opaque session metadata appended base64-encoded to HELLO
    meta: Mutex<Option<serde_json::Value>>,
    state_tx: watch::Sender<SignallingState>,
    state_rx: watch::Receiver<SignallingState>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    events_tx: mpsc::UnboundedSender<SignallingEvent>,
    cancel: Mutex<Option<CancellationToken>>,
}

impl SignallingChannel {
    /// Create a channel; events are delivered on the returned receiver.
    pub fn new(
        url: impl Into<String>,
        peer_id: u32,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<SignallingEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SignallingState::Disconnected);

        let channel = Arc::new(Self {
            url: url.into(),
            peer_id,
            meta: Mutex::new(None),
            state_tx,
            state_rx,
            outbound: Mutex::new(None),
            events_tx,
            cancel: Mutex::new(None),
        });

        (channel, events_rx)
    }

    /// Current socket state
    pub fn state(&self) -> SignallingState {
        *self.state_rx.borrow()
    }

    /// Set the metadata blob carried in the next HELLO
    pub fn set_meta(&self, meta: Option<serde_json::Value>) {
        *self.meta.lock() = meta;
    }

    /// Open the socket and start the read/write loop.
    ///
    /// Safe to call again after a disconnect; an existing loop is cancelled
    /// first so at most one socket is live per channel.
    pub fn connect(self: &Arc<Self>) {
        let token = CancellationToken::new();
        if let Some(previous) = self.cancel.lock().replace(token.clone()) {
            previous.cancel();
        }

        let _ = self.state_tx.send(SignallingState::Connecting);

        let channel = self.clone();
        tokio::spawn(async move {
            channel.run(token).await;
        });
    }

    /// Close the socket without reporting an error.
    pub fn disconnect(&self) {
        if let Some(token) = self.cancel.lock().take() {
            token.cancel();
        }
        *self.outbound.lock() = None;
        let _ = self.state_tx.send(SignallingState::Disconnected);
    }

    /// Send a local session description as `{"sdp": …}`.
    pub fn send_sdp(&self, sdp: &SessionDescription) -> Result<()> {
        debug!("sending local sdp ({:?})", sdp.kind);
        self.send_text(encode_sdp(sdp)?)
    }

    /// Send a local ICE candidate as `{"ice": …}`.
    pub fn send_ice(&self, ice: &IceCandidate) -> Result<()> {
        debug!("sending ice candidate: {}", ice.candidate);
        self.send_text(encode_ice(ice)?)
    }

    fn send_text(&self, text: String) -> Result<()> {
        let outbound = self.outbound.lock();
        let tx = outbound.as_ref().ok_or_else(|| {
            ClientError::Transport("attempt to send before signalling socket open".into())
        })?;
        tx.send(Message::Text(text))
            .map_err(|_| ClientError::Transport("signalling socket closed".into()))
    }

    fn emit(&self, event: SignallingEvent) {
        let _ = self.events_tx.send(event);
    }

    /// Connect/read/retry loop; lives until cancellation, a clean server
    /// close, or retry exhaustion.
    async fn run(self: Arc<Self>, token: CancellationToken) {
        let mut retry = RetryPolicy::new(
            SIGNALLING_MAX_RETRIES,
            Duration::from_secs(SIGNALLING_RETRY_DELAY_SECS),
        );

        loop {
            let _ = self.state_tx.send(SignallingState::Connecting);

            let stream = tokio::select! {
                result = connect_async(&self.url) => result,
                _ = token.cancelled() => return,
            };

            match stream {
                Ok((ws, _response)) => {
                    retry.on_open();
                    info!("signalling socket open: {}", self.url);

                    match self.serve_socket(ws, &token).await {
                        SocketOutcome::Cancelled => return,
                        SocketOutcome::ServerClosed => {
                            // A close outside the connect phase is the server
                            // dropping us; report it and stop, the supervisor
                            // decides whether to reconnect.
                            let _ = self.state_tx.send(SignallingState::Disconnected);
                            self.emit(SignallingEvent::Error(
                                "server closed connection".into(),
                            ));
                            self.emit(SignallingEvent::Disconnected);
                            return;
                        }
                        SocketOutcome::TransportError => {}
                    }
                }
                Err(e) => {
                    debug!("signalling connect failed: {e}");
                }
            }

            // Transport error path (failed connect or mid-session socket error)
            self.emit(SignallingEvent::Error(format!(
                "connection error, retry in {SIGNALLING_RETRY_DELAY_SECS} seconds"
            )));
            match retry.on_error() {
                RetryDecision::RetryAfter(delay) => {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = token.cancelled() => return,
                    }
                }
                RetryDecision::GiveUp => {
                    warn!(
                        "signalling gave up after {} consecutive errors",
                        SIGNALLING_MAX_RETRIES
                    );
                    let _ = self.state_tx.send(SignallingState::Disconnected);
                    self.emit(SignallingEvent::Fatal(format!(
                        "could not connect after {SIGNALLING_MAX_RETRIES} retries"
                    )));
                    return;
                }
            }
        }
    }

    /// Drive one established socket until it ends.
    async fn serve_socket(
        &self,
        ws: tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
        token: &CancellationToken,
    ) -> SocketOutcome {
        let (mut write, mut read) = ws.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

        // HELLO goes out first, exactly once per socket lifetime
        let hello = encode_hello(self.peer_id, self.meta.lock().as_ref());
        if outbound_tx.send(Message::Text(hello)).is_err() {
            return SocketOutcome::TransportError;
        }

        *self.outbound.lock() = Some(outbound_tx);
        let _ = self.state_tx.send(SignallingState::Connected);
        self.emit(SignallingEvent::Connected);

        let outcome = loop {
            tokio::select! {
                _ = token.cancelled() => break SocketOutcome::Cancelled,

                outgoing = outbound_rx.recv() => {
                    match outgoing {
                        Some(message) => {
                            if let Err(e) = write.send(message).await {
                                debug!("signalling write failed: {e}");
                                break SocketOutcome::TransportError;
                            }
                        }
                        None => break SocketOutcome::Cancelled,
                    }
                }

                incoming = read.next() => {
                    match incoming {
                        Some(Ok(Message::Text(payload))) => self.handle_payload(&payload),
                        Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_) | Message::Frame(_))) => {}
                        Some(Ok(Message::Close(_))) | None => break SocketOutcome::ServerClosed,
                        Some(Err(e)) => {
                            debug!("signalling read failed: {e}");
                            break SocketOutcome::TransportError;
                        }
                    }
                }
            }
        };

        *self.outbound.lock() = None;
        outcome
    }

    fn handle_payload(&self, payload: &str) {
        match decode_server_message(payload) {
            Ok(ServerMessage::Registered) => {
                info!("registered with signalling server, peer id {}", self.peer_id);
                self.emit(SignallingEvent::Registered);
            }
            Ok(ServerMessage::Error(text)) => {
                self.emit(SignallingEvent::Error(format!("error from server: {text}")));
            }
            Ok(ServerMessage::Sdp(sdp)) => self.emit(SignallingEvent::RemoteSdp(sdp)),
            Ok(ServerMessage::Ice(ice)) => self.emit(SignallingEvent::RemoteIce(ice)),
            Err(e) => self.emit(SignallingEvent::Error(e.to_string())),
        }
    }
}

enum SocketOutcome {
    Cancelled,
    ServerClosed,
    TransportError,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy_resets_on_open() {
        let mut policy = RetryPolicy::new(3, Duration::from_secs(3));
        assert!(matches!(policy.on_error(), RetryDecision::RetryAfter(_)));
        assert!(matches!(policy.on_error(), RetryDecision::RetryAfter(_)));
        policy.on_open();
        // Budget restored after a successful open
        assert!(matches!(policy.on_error(), RetryDecision::RetryAfter(_)));
    }

    #[test]
    fn test_retry_policy_gives_up_after_budget() {
        let mut policy = RetryPolicy::new(3, Duration::from_secs(3));
        assert!(matches!(policy.on_error(), RetryDecision::RetryAfter(_)));
        assert!(matches!(policy.on_error(), RetryDecision::RetryAfter(_)));
        // Third consecutive error exhausts the budget; no further retry
        assert_eq!(policy.on_error(), RetryDecision::GiveUp);
    }

    #[test]
    fn test_send_before_open_fails() {
        let (channel, _events) = SignallingChannel::new("ws://localhost:9/none", 1);
        let err = channel
            .send_sdp(&SessionDescription::answer("v=0\r\n"))
            .unwrap_err();
        assert!(matches!(err, ClientError::Transport(_)));
        assert_eq!(channel.state(), SignallingState::Disconnected);
    }

    #[tokio::test]
    async fn test_hello_sent_once_then_registered() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Minimal server: expect one HELLO, acknowledge, hold the socket.
        let server = tokio::spawn(async move {
            let (stream, _peer) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let first = ws.next().await.unwrap().unwrap();
            assert_eq!(first.into_text().unwrap(), "HELLO 7");
            ws.send(Message::Text("HELLO".into())).await.unwrap();
            // Keep the socket open until the client goes away
            while ws.next().await.is_some() {}
        });

        let (channel, mut events) = SignallingChannel::new(format!("ws://{addr}"), 7);
        channel.connect();

        let mut connected = false;
        let mut registered = false;
        while let Some(event) = events.recv().await {
            match event {
                SignallingEvent::Connected => connected = true,
                SignallingEvent::Registered => {
                    registered = true;
                    break;
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert!(connected && registered);
        assert_eq!(channel.state(), SignallingState::Connected);

        channel.disconnect();
        server.abort();
    }

    #[tokio::test]
    async fn test_connect_failure_exhausts_budget() {
        tokio::time::pause();

        // Nothing listens on this port; every attempt fails immediately.
        let (channel, mut events) = SignallingChannel::new("ws://127.0.0.1:1/signalling", 1);
        channel.connect();

        let mut errors = 0;
        let mut fatal = false;
        while let Some(event) = events.recv().await {
            match event {
                SignallingEvent::Error(_) => errors += 1,
                SignallingEvent::Fatal(_) => {
                    fatal = true;
                    break;
                }
                _ => {}
            }
        }
        assert!(fatal);
        assert_eq!(errors, SIGNALLING_MAX_RETRIES);
        assert_eq!(channel.state(), SignallingState::Disconnected);
    }
}
