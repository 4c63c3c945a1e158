//! Media sink abstraction
//!
//! The session hands inbound tracks to a [`VideoSink`] and never assumes a
//! renderer exists. A real embedding (GUI shell, recorder) supplies its own
//! sink; the bundled [`RtpDrainSink`] just drains RTP so the connection
//! stays healthy when running headless.
//!
//! `play` is where autoplay policy surfaces: a sink gated on a user
//! gesture returns [`ClientError::UserGestureRequired`] and the session
//! raises `PlayStreamRequired` instead of failing the connection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, trace};
use webrtc::track::track_remote::TrackRemote;

use crate::error::Result;

/// Playback-side counters the stats sampler folds into its snapshots.
///
/// Cumulative fields carry totals since attach; the sampler differences
/// them between ticks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaybackStats {
    pub frame_width: u32,
    pub frame_height: u32,
    pub frames_decoded: u64,
    pub frames_dropped: u64,
    pub frames_per_second: f64,
    /// Cumulative seconds frames spent in the jitter buffer
    pub jitter_buffer_delay: f64,
    /// Frames that left the jitter buffer, for averaging the delay
    pub jitter_buffer_emitted_count: u64,
    pub decoder: Option<String>,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
}

/// Destination for inbound media tracks
#[async_trait]
pub trait VideoSink: Send + Sync {
    /// Take ownership of an inbound track. Called once per track as the
    /// host's media arrives.
    async fn attach_track(&self, track: Arc<TrackRemote>);

    /// Start (or resume) playback. `UserGestureRequired` means playback is
    /// blocked until the embedding confirms a gesture and calls again.
    async fn play(&self) -> Result<()>;

    /// Current playback counters
    fn playback_stats(&self) -> PlaybackStats;

    /// Drop all tracks and reset counters
    async fn reset(&self);
}

/// Headless sink: drains RTP from every track and keeps packet counters.
///
/// Dropping inbound packets on the floor is deliberate; without a reader
/// the interceptors never see the stream and RTCP feedback stalls.
pub struct RtpDrainSink {
    packets: Arc<AtomicU64>,
    bytes: Arc<AtomicU64>,
    codecs: Arc<Mutex<CodecInfo>>,
    readers: Mutex<Vec<JoinHandle<()>>>,
}

#[derive(Default)]
struct CodecInfo {
    video: Option<String>,
    audio: Option<String>,
}

impl RtpDrainSink {
    pub fn new() -> Self {
        Self {
            packets: Arc::new(AtomicU64::new(0)),
            bytes: Arc::new(AtomicU64::new(0)),
            codecs: Arc::new(Mutex::new(CodecInfo::default())),
            readers: Mutex::new(Vec::new()),
        }
    }

    pub fn packets_received(&self) -> u64 {
        self.packets.load(Ordering::Relaxed)
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

impl Default for RtpDrainSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VideoSink for RtpDrainSink {
    async fn attach_track(&self, track: Arc<TrackRemote>) {
        let mime = track.codec().capability.mime_type;
        debug!(mime, "draining inbound track");
        {
            let mut codecs = self.codecs.lock();
            if mime.starts_with("video/") {
                codecs.video = Some(mime.clone());
            } else if mime.starts_with("audio/") {
                codecs.audio = Some(mime.clone());
            }
        }

        let packets = Arc::clone(&self.packets);
        let bytes = Arc::clone(&self.bytes);
        let reader = tokio::spawn(async move {
            loop {
                match track.read_rtp().await {
                    Ok((packet, _attributes)) => {
                        packets.fetch_add(1, Ordering::Relaxed);
                        bytes.fetch_add(packet.payload.len() as u64, Ordering::Relaxed);
                    }
                    Err(e) => {
                        trace!(error = %e, "track reader finished");
                        break;
                    }
                }
            }
        });
        self.readers.lock().push(reader);
    }

    async fn play(&self) -> Result<()> {
        // Nothing renders, so nothing can be blocked on a gesture
        Ok(())
    }

    fn playback_stats(&self) -> PlaybackStats {
        let codecs = self.codecs.lock();
        PlaybackStats {
            video_codec: codecs.video.clone(),
            audio_codec: codecs.audio.clone(),
            ..PlaybackStats::default()
        }
    }

    async fn reset(&self) {
        for reader in self.readers.lock().drain(..) {
            reader.abort();
        }
        self.packets.store(0, Ordering::Relaxed);
        self.bytes.store(0, Ordering::Relaxed);
        *self.codecs.lock() = CodecInfo::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn test_drain_sink_play_never_blocks() {
        let sink = RtpDrainSink::new();
        tokio_test::assert_ok!(sink.play().await);
    }

    #[tokio::test]
    async fn test_drain_sink_reset_clears_counters() {
        let sink = RtpDrainSink::new();
        sink.packets.fetch_add(10, Ordering::Relaxed);
        sink.bytes.fetch_add(1000, Ordering::Relaxed);
        sink.codecs.lock().video = Some("video/H264".to_string());

        sink.reset().await;
        assert_eq!(sink.packets_received(), 0);
        assert_eq!(sink.bytes_received(), 0);
        assert_eq!(sink.playback_stats(), PlaybackStats::default());
    }
}
