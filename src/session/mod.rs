//! Peer session
//!
//! Owns the WebRTC peer connection, reacts to signalling, negotiates the
//! answer, routes inbound media to the sink and control messages to the
//! event bus, and carries the input encoder's tokens out over the data
//! channel.
//!
//! The session is the only writer of [`SessionState`]; everything else
//! observes it through a watch channel. Remote ICE candidates arriving
//! before the offer are buffered and applied right after the remote
//! description lands, so early candidates are never lost to trickle-ICE
//! ordering races.

pub mod munge;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice::mdns::MulticastDnsMode;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::ice_transport_policy::RTCIceTransportPolicy;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_remote::TrackRemote;

use crate::config::{QualityRequest, SessionConfig, RESET_SETTLE_DELAY_SECS};
use crate::error::{ClientError, Result};
use crate::events::{EventBus, SessionEvent, SessionState};
use crate::input::gamepad::GamepadSource;
use crate::input::InputEncoder;
use crate::protocol::control::{decode_control_message, ControlMessage, CursorDescriptor};
use crate::protocol::signalling::{SdpKind, SessionDescription};
use crate::protocol::InputToken;
use crate::signalling::{SignallingChannel, SignallingEvent};
use crate::sink::VideoSink;
use crate::stats::{StatsSampler, StatsSnapshot};

/// One streaming session against a single host
pub struct PeerSession {
    config: SessionConfig,
    events: EventBus,
    signalling: Arc<SignallingChannel>,
    signalling_events: Mutex<Option<mpsc::UnboundedReceiver<SignallingEvent>>>,
    sink: Arc<dyn VideoSink>,
    encoder: Arc<InputEncoder>,
    channel_open: Arc<AtomicBool>,
    input_tx: mpsc::UnboundedSender<String>,
    input_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    state_tx: watch::Sender<SessionState>,
    state_rx: watch::Receiver<SessionState>,
    pc: Mutex<Option<Arc<RTCPeerConnection>>>,
    data_channel: Mutex<Option<Arc<RTCDataChannel>>>,
    pending_ice: Mutex<Vec<RTCIceCandidateInit>>,
    cursor_cache: Mutex<HashMap<u64, CursorDescriptor>>,
    sampler: StatsSampler,
    /// Incremented on every teardown; callbacks from an older connection
    /// compare against it and go quiet instead of mutating fresh state.
    epoch: AtomicU64,
    conn_cancel: Mutex<Option<CancellationToken>>,
    shutdown: CancellationToken,
    loops_started: AtomicBool,
}

impl PeerSession {
    pub fn new(config: SessionConfig, sink: Arc<dyn VideoSink>) -> Arc<Self> {
        Self::with_gamepads(config, sink, None)
    }

    /// Create a session with an optional gamepad source for the encoder.
    pub fn with_gamepads(
        config: SessionConfig,
        sink: Arc<dyn VideoSink>,
        gamepads: Option<Arc<dyn GamepadSource>>,
    ) -> Arc<Self> {
        let events = EventBus::new();
        let (signalling, signalling_events) =
            SignallingChannel::new(config.signalling_url.clone(), config.peer_id);
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let channel_open = Arc::new(AtomicBool::new(false));
        let (state_tx, state_rx) = watch::channel(SessionState::Disconnected);

        let mut encoder = InputEncoder::new(
            input_tx.clone(),
            Arc::clone(&channel_open),
            events.clone(),
        );
        if let Some(source) = gamepads {
            encoder = encoder.with_gamepad_source(source);
        }

        Arc::new(Self {
            config,
            events,
            signalling,
            signalling_events: Mutex::new(Some(signalling_events)),
            sink,
            encoder: Arc::new(encoder),
            channel_open,
            input_tx,
            input_rx: Mutex::new(Some(input_rx)),
            state_tx,
            state_rx,
            pc: Mutex::new(None),
            data_channel: Mutex::new(None),
            pending_ice: Mutex::new(Vec::new()),
            cursor_cache: Mutex::new(HashMap::new()),
            sampler: StatsSampler::new(),
            epoch: AtomicU64::new(0),
            conn_cancel: Mutex::new(None),
            shutdown: CancellationToken::new(),
            loops_started: AtomicBool::new(false),
        })
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Input encoder; the embedding layer feeds device events into it.
    pub fn input(&self) -> &Arc<InputEncoder> {
        &self.encoder
    }

    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    /// Watch channel for state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    /// Latest stats snapshot, if the sampler has ticked since connecting
    pub fn stats_snapshot(&self) -> Option<StatsSnapshot> {
        self.sampler.latest()
    }

    /// Attach the reconnect nonce (or other metadata) carried in HELLO.
    pub fn set_session_meta(&self, meta: Option<serde_json::Value>) {
        self.signalling.set_meta(meta);
    }

    /// Open the signalling socket and prepare a peer connection.
    ///
    /// Idempotent: calling while a connection exists does nothing.
    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        if self.pc.lock().is_some() {
            return Ok(());
        }
        self.set_state(SessionState::Connecting);
        self.events.status("connecting to signalling server");

        self.spawn_connection().await?;
        self.start_loops();
        self.signalling.connect();
        Ok(())
    }

    /// Tear everything down. The session cannot be reused afterwards.
    pub async fn disconnect(&self) {
        self.shutdown.cancel();
        self.teardown_connection().await;
        self.signalling.disconnect();
        self.set_state(SessionState::Closed);
    }

    /// Drop the current peer connection and negotiate a fresh one.
    ///
    /// If the old connection was torn down mid-negotiation, reconnecting is
    /// delayed a few seconds so the host side can settle first.
    pub async fn reset(self: &Arc<Self>) -> Result<()> {
        let was_stable = self
            .pc
            .lock()
            .as_ref()
            .map(|pc| pc.signaling_state() == RTCSignalingState::Stable)
            .unwrap_or(true);

        self.teardown_connection().await;
        self.set_state(SessionState::Connecting);

        if !was_stable {
            self.events.status(format!(
                "negotiation was in flight, reconnecting in {RESET_SETTLE_DELAY_SECS} seconds"
            ));
            tokio::time::sleep(Duration::from_secs(RESET_SETTLE_DELAY_SECS)).await;
        }

        self.spawn_connection().await?;
        self.start_loops();
        self.signalling.connect();
        Ok(())
    }

    /// Resume playback after the embedding layer confirmed a user gesture.
    pub async fn play_stream(&self) -> Result<()> {
        self.sink.play().await
    }

    /// Forward quality preferences to the host over the data channel.
    pub async fn send_quality(&self, request: &QualityRequest) -> Result<()> {
        if let Some((width, height)) = request.resolution {
            self.encoder.set_frame_size(width, height);
        }
        for token in quality_tokens(request) {
            self.send_message(token.encode()).await?;
        }
        Ok(())
    }

    /// Tell the host this client accepts clipboard pushes.
    pub async fn clipboard_ready(&self) -> Result<()> {
        self.send_message(InputToken::ClipboardReady.encode()).await
    }

    /// Push local clipboard content to the host.
    pub async fn push_clipboard(&self, text: impl Into<String>) -> Result<()> {
        self.send_message(InputToken::ClipboardWrite(text.into()).encode())
            .await
    }

    /// Send a raw payload on the data channel.
    ///
    /// Unlike encoder tokens this fails loudly when the channel is not
    /// open; callers of the control surface need to know.
    pub async fn send_message(&self, text: impl Into<String>) -> Result<()> {
        let dc = self
            .data_channel
            .lock()
            .clone()
            .ok_or_else(|| ClientError::Transport("data channel is not open".into()))?;
        if dc.ready_state() != RTCDataChannelState::Open {
            return Err(ClientError::Transport("data channel is not open".into()));
        }
        dc.send_text(text.into())
            .await
            .map_err(|e| ClientError::Transport(format!("data channel send failed: {e}")))?;
        Ok(())
    }

    fn set_state(&self, next: SessionState) {
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            info!("session state: {next}");
            self.events.publish(SessionEvent::StateChanged(next));
        }
    }

    fn current_pc(&self) -> Option<Arc<RTCPeerConnection>> {
        self.pc.lock().clone()
    }

    fn stale(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::Acquire) != epoch
    }

    /// Build a peer connection, install callbacks and start its sampler.
    async fn spawn_connection(self: &Arc<Self>) -> Result<()> {
        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        let pc = self.build_peer().await?;
        self.install_callbacks(&pc, epoch);
        *self.pc.lock() = Some(pc.clone());

        let cancel = CancellationToken::new();
        self.sampler.spawn(
            pc,
            Arc::clone(&self.sink),
            self.events.clone(),
            self.state_rx.clone(),
            cancel.clone(),
        );
        if let Some(previous) = self.conn_cancel.lock().replace(cancel) {
            previous.cancel();
        }
        Ok(())
    }

    async fn build_peer(&self) -> Result<Arc<RTCPeerConnection>> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| ClientError::Negotiation(format!("failed to register codecs: {e}")))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| ClientError::Negotiation(format!("failed to register interceptors: {e}")))?;

        let mut setting_engine = SettingEngine::default();
        setting_engine.set_ice_multicast_dns_mode(MulticastDnsMode::Disabled);

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .with_setting_engine(setting_engine)
            .build();

        let mut ice_servers = Vec::new();
        if !self.config.stun_servers.is_empty() {
            ice_servers.push(RTCIceServer {
                urls: self.config.stun_servers.clone(),
                ..Default::default()
            });
        }
        for turn in &self.config.turn_servers {
            ice_servers.push(RTCIceServer {
                urls: turn.urls.clone(),
                username: turn.username.clone(),
                credential: turn.credential.clone(),
                ..Default::default()
            });
        }

        let rtc_config = RTCConfiguration {
            ice_servers,
            ice_transport_policy: if self.config.force_turn {
                RTCIceTransportPolicy::Relay
            } else {
                RTCIceTransportPolicy::All
            },
            ..Default::default()
        };

        let pc = api
            .new_peer_connection(rtc_config)
            .await
            .map_err(|e| ClientError::Negotiation(format!("failed to create peer connection: {e}")))?;
        Ok(Arc::new(pc))
    }

    fn install_callbacks(self: &Arc<Self>, pc: &Arc<RTCPeerConnection>, epoch: u64) {
        let weak = Arc::downgrade(self);
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let weak = weak.clone();
            Box::pin(async move {
                let Some(session) = weak.upgrade() else { return };
                if session.stale(epoch) {
                    return;
                }
                let Some(candidate) = candidate else { return };
                match candidate.to_json() {
                    Ok(init) => {
                        let ice = crate::protocol::signalling::IceCandidate {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_mline_index: init.sdp_mline_index,
                            username_fragment: init.username_fragment,
                        };
                        if let Err(e) = session.signalling.send_ice(&ice) {
                            warn!("failed to send local ice candidate: {e}");
                        }
                    }
                    Err(e) => warn!("failed to serialize local ice candidate: {e}"),
                }
            })
        }));

        let weak = Arc::downgrade(self);
        pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let weak = weak.clone();
                Box::pin(async move {
                    let Some(session) = weak.upgrade() else { return };
                    if session.stale(epoch) {
                        return;
                    }
                    session
                        .events
                        .status(format!("received {} track", track.kind()));
                    session.sink.attach_track(track).await;
                    match session.sink.play().await {
                        Ok(()) => {}
                        Err(ClientError::UserGestureRequired) => {
                            session.events.publish(SessionEvent::PlayStreamRequired);
                        }
                        Err(e) => session.events.error(format!("playback failed: {e}")),
                    }
                })
            },
        ));

        let weak = Arc::downgrade(self);
        pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            let weak = weak.clone();
            Box::pin(async move {
                let Some(session) = weak.upgrade() else { return };
                if session.stale(epoch) {
                    return;
                }
                session.register_data_channel(dc, epoch);
            })
        }));

        let weak = Arc::downgrade(self);
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let weak = weak.clone();
            Box::pin(async move {
                let Some(session) = weak.upgrade() else { return };
                if session.stale(epoch) {
                    return;
                }
                debug!("peer connection state: {state}");
                match state {
                    RTCPeerConnectionState::Connected => {
                        session.events.status("connection established");
                        session.set_state(SessionState::Connected);
                    }
                    RTCPeerConnectionState::Disconnected | RTCPeerConnectionState::Failed => {
                        session.channel_open.store(false, Ordering::Release);
                        session.encoder.detach();
                        session.events.error("connection lost");
                        session.set_state(SessionState::Failed);
                    }
                    RTCPeerConnectionState::Closed => {
                        session.channel_open.store(false, Ordering::Release);
                        session.encoder.detach();
                        session.set_state(SessionState::Closed);
                    }
                    _ => {}
                }
            })
        }));
    }

    fn register_data_channel(self: &Arc<Self>, dc: Arc<RTCDataChannel>, epoch: u64) {
        info!("host opened data channel: {}", dc.label());
        *self.data_channel.lock() = Some(dc.clone());

        let weak = Arc::downgrade(self);
        dc.on_open(Box::new(move || {
            let weak = weak.clone();
            Box::pin(async move {
                let Some(session) = weak.upgrade() else { return };
                if session.stale(epoch) {
                    return;
                }
                session.channel_open.store(true, Ordering::Release);
                session.encoder.attach();
                session.events.publish(SessionEvent::DataChannelOpen);
                // Announce initial quality preferences
                let _ = session
                    .input_tx
                    .send(InputToken::VideoBitrate(session.config.video_bitrate_kbps).encode());
                let _ = session
                    .input_tx
                    .send(InputToken::AudioBitrate(session.config.audio_bitrate_kbps).encode());
            })
        }));

        let weak = Arc::downgrade(self);
        dc.on_close(Box::new(move || {
            let weak = weak.clone();
            Box::pin(async move {
                let Some(session) = weak.upgrade() else { return };
                session.handle_channel_close(epoch);
            })
        }));

        let weak = Arc::downgrade(self);
        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            let weak = weak.clone();
            Box::pin(async move {
                let Some(session) = weak.upgrade() else { return };
                if session.stale(epoch) {
                    return;
                }
                let payload = String::from_utf8_lossy(&msg.data).to_string();
                session.handle_control(&payload).await;
            })
        }));
    }

    /// A close notification from a channel belonging to an older, already
    /// torn-down connection must not touch the current encoder.
    fn handle_channel_close(&self, epoch: u64) {
        if self.stale(epoch) {
            return;
        }
        self.channel_open.store(false, Ordering::Release);
        self.encoder.detach();
        self.events.publish(SessionEvent::DataChannelClose);
    }

    /// Dispatch one decoded control message from the host
    async fn handle_control(&self, payload: &str) {
        match decode_control_message(payload) {
            Ok(ControlMessage::Pipeline(status)) => {
                self.events.status(format!("pipeline: {status}"));
            }
            Ok(ControlMessage::GpuStats(stats)) => {
                self.events.publish(SessionEvent::GpuStats(stats));
            }
            Ok(ControlMessage::Clipboard(text)) => {
                self.events.publish(SessionEvent::ClipboardContent(text));
            }
            Ok(ControlMessage::Cursor(cursor)) => {
                let resolved = resolve_cursor(&mut self.cursor_cache.lock(), cursor);
                self.events.publish(SessionEvent::CursorChanged(resolved));
            }
            Ok(ControlMessage::System(action)) => {
                self.events.publish(SessionEvent::SystemAction(action));
            }
            Ok(ControlMessage::Ping) => {
                let epoch_seconds = chrono::Utc::now().timestamp_millis() as f64 / 1000.0;
                if let Err(e) = self
                    .send_message(InputToken::Pong { epoch_seconds }.encode())
                    .await
                {
                    debug!("failed to answer ping: {e}");
                }
            }
            Ok(ControlMessage::SystemStats(stats)) => {
                self.events.publish(SessionEvent::SystemStats(stats));
            }
            Ok(ControlMessage::LatencyMeasurement(latency_ms)) => {
                self.events
                    .publish(SessionEvent::LatencyMeasurement(latency_ms));
            }
            Err(e) => self.events.error(e.to_string()),
        }
    }

    /// Start the long-lived signalling and data-channel writer loops.
    fn start_loops(self: &Arc<Self>) {
        if self.loops_started.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(mut events) = self.signalling_events.lock().take() {
            let session = Arc::clone(self);
            let shutdown = self.shutdown.clone();
            tokio::spawn(async move {
                loop {
                    let event = tokio::select! {
                        _ = shutdown.cancelled() => return,
                        event = events.recv() => match event {
                            Some(event) => event,
                            None => return,
                        },
                    };
                    session.handle_signalling_event(event).await;
                }
            });
        }

        if let Some(mut input) = self.input_rx.lock().take() {
            let session = Arc::clone(self);
            let shutdown = self.shutdown.clone();
            tokio::spawn(async move {
                loop {
                    let text = tokio::select! {
                        _ = shutdown.cancelled() => return,
                        text = input.recv() => match text {
                            Some(text) => text,
                            None => return,
                        },
                    };
                    let dc = session.data_channel.lock().clone();
                    let Some(dc) = dc else { continue };
                    if dc.ready_state() != RTCDataChannelState::Open {
                        continue;
                    }
                    if let Err(e) = dc.send_text(text).await {
                        debug!("input token send failed: {e}");
                    }
                }
            });
        }
    }

    async fn handle_signalling_event(self: &Arc<Self>, event: SignallingEvent) {
        match event {
            SignallingEvent::Connected => {
                self.events.status("connected to signalling server");
                self.set_state(SessionState::SignallingConnected);
            }
            SignallingEvent::Registered => {
                self.events.status("registered with server, waiting for stream");
            }
            SignallingEvent::RemoteSdp(sdp) => {
                if let Err(e) = self.handle_remote_sdp(sdp).await {
                    self.fail_on_fatal(e);
                }
            }
            SignallingEvent::RemoteIce(ice) => {
                if let Err(e) = self.handle_remote_ice(ice).await {
                    self.fail_on_fatal(e);
                }
            }
            SignallingEvent::Error(text) => self.events.error(text),
            SignallingEvent::Disconnected => {
                self.set_state(SessionState::Disconnected);
            }
            SignallingEvent::Fatal(text) => {
                self.events.error(text);
                self.set_state(SessionState::Failed);
            }
        }
    }

    /// Surface an error; transport and negotiation failures also fail the
    /// session so the supervisor can offer a reconnect.
    fn fail_on_fatal(&self, error: ClientError) {
        let fatal = error.is_fatal();
        self.events.error(error.to_string());
        if fatal {
            self.set_state(SessionState::Failed);
        }
    }

    /// Apply the host's offer and answer it.
    ///
    /// Anything other than an offer is a protocol error and leaves the
    /// remote description untouched.
    async fn handle_remote_sdp(&self, desc: SessionDescription) -> Result<()> {
        if desc.kind != SdpKind::Offer {
            return Err(ClientError::Protocol(format!(
                "expected an sdp offer, got {:?}",
                desc.kind
            )));
        }
        let Some(pc) = self.current_pc() else {
            return Ok(());
        };

        self.set_state(SessionState::Negotiating);
        self.events.status("negotiating connection");

        let offer = RTCSessionDescription::offer(desc.sdp)
            .map_err(|e| ClientError::Negotiation(format!("invalid offer sdp: {e}")))?;
        pc.set_remote_description(offer)
            .await
            .map_err(|e| ClientError::Negotiation(format!("error setting remote description: {e}")))?;

        // Candidates that raced ahead of the offer can be applied now
        let buffered: Vec<RTCIceCandidateInit> = self.pending_ice.lock().drain(..).collect();
        for init in buffered {
            if let Err(e) = pc.add_ice_candidate(init).await {
                warn!("failed to apply buffered ice candidate: {e}");
            }
        }

        let answer = pc
            .create_answer(None)
            .await
            .map_err(|e| ClientError::Negotiation(format!("error creating answer: {e}")))?;
        let munged = munge::munge_answer(&answer.sdp);
        let local = RTCSessionDescription::answer(munged)
            .map_err(|e| ClientError::Negotiation(format!("munged answer is invalid: {e}")))?;
        pc.set_local_description(local.clone())
            .await
            .map_err(|e| ClientError::Negotiation(format!("error setting local description: {e}")))?;

        self.signalling
            .send_sdp(&SessionDescription::answer(local.sdp))?;
        Ok(())
    }

    async fn handle_remote_ice(
        &self,
        ice: crate::protocol::signalling::IceCandidate,
    ) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: ice.candidate,
            sdp_mid: ice.sdp_mid,
            sdp_mline_index: ice.sdp_mline_index,
            username_fragment: ice.username_fragment,
        };

        let Some(pc) = self.current_pc() else {
            self.pending_ice.lock().push(init);
            return Ok(());
        };
        if pc.remote_description().await.is_none() {
            debug!("buffering ice candidate until remote description is set");
            self.pending_ice.lock().push(init);
            return Ok(());
        }
        pc.add_ice_candidate(init)
            .await
            .map_err(|e| ClientError::Negotiation(format!("error adding ice candidate: {e}")))
    }

    /// Close and forget the current peer connection.
    async fn teardown_connection(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        if let Some(cancel) = self.conn_cancel.lock().take() {
            cancel.cancel();
        }

        self.channel_open.store(false, Ordering::Release);
        self.encoder.detach();

        let dc = self.data_channel.lock().take();
        if let Some(dc) = dc {
            if let Err(e) = dc.close().await {
                debug!("data channel close failed: {e}");
            }
        }
        let pc = self.pc.lock().take();
        if let Some(pc) = pc {
            if let Err(e) = pc.close().await {
                debug!("peer connection close failed: {e}");
            }
        }

        self.pending_ice.lock().clear();
        self.cursor_cache.lock().clear();
        self.sink.reset().await;
        self.set_state(SessionState::Disconnected);
    }
}

/// Encode a quality request into its wire tokens
fn quality_tokens(request: &QualityRequest) -> Vec<InputToken> {
    let mut tokens = Vec::new();
    if let Some(kbps) = request.video_bitrate_kbps {
        tokens.push(InputToken::VideoBitrate(kbps));
    }
    if let Some(kbps) = request.audio_bitrate_kbps {
        tokens.push(InputToken::AudioBitrate(kbps));
    }
    if let Some(fps) = request.framerate {
        tokens.push(InputToken::Framerate(fps));
    }
    if let Some((width, height)) = request.resolution {
        tokens.push(InputToken::Resolution { width, height });
    }
    tokens
}

/// Resolve a cursor message against the handle cache.
///
/// Non-zero handles with image data populate the cache; non-zero handles
/// without data are served from it. Handle 0 (default cursor) is passed
/// through untouched.
fn resolve_cursor(
    cache: &mut HashMap<u64, CursorDescriptor>,
    cursor: CursorDescriptor,
) -> CursorDescriptor {
    if cursor.handle != 0 {
        if cursor.curdata.is_empty() {
            if let Some(cached) = cache.get(&cursor.handle) {
                let mut full = cached.clone();
                full.r#override = cursor.r#override.clone();
                return full;
            }
        } else {
            cache.insert(cursor.handle, cursor.clone());
        }
    }
    cursor
}
