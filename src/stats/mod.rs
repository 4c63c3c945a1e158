//! Connection statistics
//!
//! A sampler task polls the peer connection once a second while the
//! session is connected and publishes derived [`StatsSnapshot`]s on the
//! event bus. Everything rate-based is computed here from successive raw
//! samples; the WebRTC stats report itself only carries cumulative
//! counters.
//!
//! The translation from the `webrtc` crate's report types into
//! [`RawSample`] lives in one adapter function so the derivation logic
//! stays pure and testable.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::stats::StatsReportType;

use crate::events::{EventBus, SessionEvent, SessionState};
use crate::sink::{PlaybackStats, VideoSink};

/// Sampling cadence
pub const STATS_INTERVAL: Duration = Duration::from_secs(1);

/// Derived statistics published once per sampling tick.
///
/// Rate fields are `None` on the first tick after (re)connecting; there is
/// no previous sample to difference against.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub packets_received: u64,
    pub packets_lost: i64,
    /// Current RTT to the host in milliseconds, from the nominated pair
    pub round_trip_time_ms: Option<f64>,
    /// Remote candidate type of the nominated pair ("host", "relay", ...)
    pub connection_type: Option<String>,

    pub frame_width: u32,
    pub frame_height: u32,
    pub frames_decoded: u64,
    pub frames_dropped: u64,
    pub frames_per_second: f64,
    pub video_bitrate_kbps: Option<f64>,
    /// RTT plus average jitter-buffer dwell over the last interval
    pub video_latency_ms: Option<f64>,
    pub decoder: Option<String>,
    pub video_codec: Option<String>,

    pub audio_bitrate_kbps: Option<f64>,
    pub audio_codec: Option<String>,
}

/// Cumulative counters for one inbound RTP stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawRtpStream {
    pub bytes_received: u64,
    pub packets_received: u64,
    pub packets_lost: i64,
}

/// One raw poll of the connection, before any differencing
#[derive(Debug, Clone)]
pub struct RawSample {
    pub taken_at: Instant,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    /// Seconds, from the nominated candidate pair
    pub round_trip_time: Option<f64>,
    pub connection_type: Option<String>,
    pub video: RawRtpStream,
    pub audio: RawRtpStream,
    pub playback: PlaybackStats,
}

impl RawSample {
    pub fn empty(taken_at: Instant) -> Self {
        Self {
            taken_at,
            bytes_sent: 0,
            bytes_received: 0,
            round_trip_time: None,
            connection_type: None,
            video: RawRtpStream::default(),
            audio: RawRtpStream::default(),
            playback: PlaybackStats::default(),
        }
    }
}

/// Difference two raw samples into a published snapshot
pub fn derive(prev: Option<&RawSample>, cur: &RawSample) -> StatsSnapshot {
    let elapsed = prev.and_then(|p| {
        let dt = cur.taken_at.duration_since(p.taken_at).as_secs_f64();
        (dt > 0.0).then_some(dt)
    });

    let bitrate_kbps = |prev_bytes: u64, cur_bytes: u64| -> Option<f64> {
        let dt = elapsed?;
        Some(cur_bytes.saturating_sub(prev_bytes) as f64 * 8.0 / dt / 1000.0)
    };

    let video_bitrate_kbps = prev
        .and_then(|p| bitrate_kbps(p.video.bytes_received, cur.video.bytes_received));
    let audio_bitrate_kbps = prev
        .and_then(|p| bitrate_kbps(p.audio.bytes_received, cur.audio.bytes_received));

    let rtt_ms = cur.round_trip_time.map(|rtt| rtt * 1000.0);

    // Average time a frame spent in the jitter buffer over this interval
    let jitter_ms = prev.and_then(|p| {
        let frames = cur
            .playback
            .jitter_buffer_emitted_count
            .saturating_sub(p.playback.jitter_buffer_emitted_count);
        if frames == 0 {
            return None;
        }
        let delay = cur.playback.jitter_buffer_delay - p.playback.jitter_buffer_delay;
        Some(delay / frames as f64 * 1000.0)
    });
    let video_latency_ms = match (rtt_ms, jitter_ms) {
        (Some(rtt), Some(jitter)) => Some(rtt + jitter),
        (Some(rtt), None) => Some(rtt),
        (None, Some(jitter)) => Some(jitter),
        (None, None) => None,
    };

    StatsSnapshot {
        bytes_sent: cur.bytes_sent,
        bytes_received: cur.bytes_received,
        packets_received: cur.video.packets_received + cur.audio.packets_received,
        packets_lost: cur.video.packets_lost + cur.audio.packets_lost,
        round_trip_time_ms: rtt_ms,
        connection_type: cur.connection_type.clone(),
        frame_width: cur.playback.frame_width,
        frame_height: cur.playback.frame_height,
        frames_decoded: cur.playback.frames_decoded,
        frames_dropped: cur.playback.frames_dropped,
        frames_per_second: cur.playback.frames_per_second,
        video_bitrate_kbps,
        video_latency_ms,
        decoder: cur.playback.decoder.clone(),
        video_codec: cur.playback.video_codec.clone(),
        audio_bitrate_kbps,
        audio_codec: cur.playback.audio_codec.clone(),
    }
}

/// Fold a WebRTC stats report and the sink's playback counters into one
/// raw sample. This is the only place that touches the report types.
pub(crate) async fn collect_raw_sample(
    pc: &RTCPeerConnection,
    playback: PlaybackStats,
    taken_at: Instant,
) -> RawSample {
    let report = pc.get_stats().await;
    let mut sample = RawSample::empty(taken_at);
    sample.playback = playback;

    let mut nominated_remote_id: Option<String> = None;
    for entry in report.reports.values() {
        match entry {
            StatsReportType::Transport(transport) => {
                sample.bytes_sent += transport.bytes_sent as u64;
                sample.bytes_received += transport.bytes_received as u64;
            }
            StatsReportType::CandidatePair(pair) if pair.nominated => {
                sample.round_trip_time = Some(pair.current_round_trip_time);
                nominated_remote_id = Some(pair.remote_candidate_id.clone());
            }
            StatsReportType::InboundRTP(rtp) => {
                let stream = match rtp.kind.as_str() {
                    "video" => &mut sample.video,
                    "audio" => &mut sample.audio,
                    _ => continue,
                };
                stream.bytes_received = rtp.bytes_received;
                stream.packets_received = rtp.packets_received;
            }
            StatsReportType::RemoteInboundRTP(remote) => {
                let stream = match remote.kind.as_str() {
                    "video" => &mut sample.video,
                    "audio" => &mut sample.audio,
                    _ => continue,
                };
                stream.packets_lost = remote.packets_lost;
            }
            _ => {}
        }
    }

    if let Some(remote_id) = nominated_remote_id {
        if let Some(StatsReportType::RemoteCandidate(candidate)) = report.reports.get(&remote_id)
        {
            sample.connection_type = Some(candidate.candidate_type.to_string());
        }
    }

    sample
}

/// Owns the latest snapshot and the sampling task
pub struct StatsSampler {
    latest: Arc<Mutex<Option<StatsSnapshot>>>,
}

impl StatsSampler {
    pub fn new() -> Self {
        Self {
            latest: Arc::new(Mutex::new(None)),
        }
    }

    /// Most recent snapshot, if any tick has run since connecting
    pub fn latest(&self) -> Option<StatsSnapshot> {
        self.latest.lock().clone()
    }

    /// Start sampling. The task idles while the session is not connected
    /// and forgets its previous sample on every disconnect, so rates never
    /// span a reconnect.
    pub fn spawn(
        &self,
        pc: Arc<RTCPeerConnection>,
        sink: Arc<dyn VideoSink>,
        events: EventBus,
        state_rx: watch::Receiver<SessionState>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let latest = Arc::clone(&self.latest);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(STATS_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut prev: Option<RawSample> = None;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("stats sampler stopped");
                        return;
                    }
                    _ = ticker.tick() => {}
                }

                if *state_rx.borrow() != SessionState::Connected {
                    prev = None;
                    continue;
                }

                let raw =
                    collect_raw_sample(&pc, sink.playback_stats(), Instant::now()).await;
                let snapshot = derive(prev.as_ref(), &raw);
                *latest.lock() = Some(snapshot.clone());
                events.publish(SessionEvent::StatsUpdated(snapshot));
                prev = Some(raw);
            }
        })
    }
}

impl Default for StatsSampler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_at(base: Instant, secs: u64) -> RawSample {
        RawSample::empty(base + Duration::from_secs(secs))
    }

    #[test]
    fn test_first_tick_has_no_rates() {
        let cur = RawSample::empty(Instant::now());
        let snapshot = derive(None, &cur);
        assert_eq!(snapshot.video_bitrate_kbps, None);
        assert_eq!(snapshot.audio_bitrate_kbps, None);
    }

    #[test]
    fn test_bitrate_from_byte_delta() {
        let base = Instant::now();
        let mut prev = sample_at(base, 0);
        prev.video.bytes_received = 0;

        let mut cur = sample_at(base, 1);
        // 125000 bytes over one second is 1000 kbit/s
        cur.video.bytes_received = 125_000;
        cur.audio.bytes_received = 4_000;

        let snapshot = derive(Some(&prev), &cur);
        assert_eq!(snapshot.video_bitrate_kbps, Some(1000.0));
        assert_eq!(snapshot.audio_bitrate_kbps, Some(32.0));
    }

    #[test]
    fn test_counter_reset_does_not_go_negative() {
        let base = Instant::now();
        let mut prev = sample_at(base, 0);
        prev.video.bytes_received = 1_000_000;
        let mut cur = sample_at(base, 1);
        cur.video.bytes_received = 500;

        let snapshot = derive(Some(&prev), &cur);
        assert_eq!(snapshot.video_bitrate_kbps, Some(4.0));
    }

    #[test]
    fn test_video_latency_combines_rtt_and_jitter() {
        let base = Instant::now();
        let mut prev = sample_at(base, 0);
        prev.playback.jitter_buffer_delay = 1.0;
        prev.playback.jitter_buffer_emitted_count = 100;

        let mut cur = sample_at(base, 1);
        cur.round_trip_time = Some(0.020);
        // 60 frames spent a total of 0.6s buffered: 10ms average
        cur.playback.jitter_buffer_delay = 1.6;
        cur.playback.jitter_buffer_emitted_count = 160;

        let snapshot = derive(Some(&prev), &cur);
        let latency = snapshot.video_latency_ms.unwrap();
        assert!((latency - 30.0).abs() < 1e-9, "latency was {latency}");
    }

    #[test]
    fn test_rtt_alone_when_no_frames_emitted() {
        let base = Instant::now();
        let prev = sample_at(base, 0);
        let mut cur = sample_at(base, 1);
        cur.round_trip_time = Some(0.050);

        let snapshot = derive(Some(&prev), &cur);
        assert_eq!(snapshot.round_trip_time_ms, Some(50.0));
        assert_eq!(snapshot.video_latency_ms, Some(50.0));
    }

    #[test]
    fn test_packet_counters_sum_streams() {
        let mut cur = RawSample::empty(Instant::now());
        cur.video.packets_received = 600;
        cur.audio.packets_received = 50;
        cur.video.packets_lost = 7;
        cur.audio.packets_lost = 3;

        let snapshot = derive(None, &cur);
        assert_eq!(snapshot.packets_received, 650);
        assert_eq!(snapshot.packets_lost, 10);
    }

    #[test]
    fn test_playback_fields_passed_through() {
        let mut cur = RawSample::empty(Instant::now());
        cur.playback.frame_width = 1920;
        cur.playback.frame_height = 1080;
        cur.playback.frames_decoded = 3600;
        cur.playback.frames_dropped = 2;
        cur.playback.frames_per_second = 59.8;
        cur.playback.video_codec = Some("video/H264".to_string());
        cur.connection_type = Some("relay".to_string());

        let snapshot = derive(None, &cur);
        assert_eq!(snapshot.frame_width, 1920);
        assert_eq!(snapshot.frames_decoded, 3600);
        assert_eq!(snapshot.frames_dropped, 2);
        assert_eq!(snapshot.frames_per_second, 59.8);
        assert_eq!(snapshot.video_codec.as_deref(), Some("video/H264"));
        assert_eq!(snapshot.connection_type.as_deref(), Some("relay"));
    }
}
