use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use selkies_client::config::{SessionConfig, TurnServer};
use selkies_client::events::SessionEvent;
use selkies_client::metadata::fetch_game_metadata;
use selkies_client::session::PeerSession;
use selkies_client::sink::RtpDrainSink;
use selkies_client::supervisor::ReconnectionSupervisor;

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// Selkies client command line arguments
#[derive(Parser, Debug)]
#[command(name = "selkies-client")]
#[command(version, about = "Headless client for Selkies remote interaction streams", long_about = None)]
struct CliArgs {
    /// Signalling endpoint URL (ws:// or wss://)
    #[arg(value_name = "URL")]
    signalling_url: String,

    /// Peer ID announced to the signalling server
    #[arg(short = 'p', long, value_name = "ID", default_value_t = 1)]
    peer_id: u32,

    /// STUN server URL (repeatable)
    #[arg(long, value_name = "URL")]
    stun: Vec<String>,

    /// TURN server as url,username,credential (repeatable)
    #[arg(long, value_name = "URL,USER,CRED")]
    turn: Vec<String>,

    /// Force all traffic through TURN relays
    #[arg(long)]
    force_relay: bool,

    /// Requested video bitrate in kbps
    #[arg(long, value_name = "KBPS", default_value_t = 8000)]
    video_bitrate: u32,

    /// Requested audio bitrate in kbps
    #[arg(long, value_name = "KBPS", default_value_t = 128)]
    audio_bitrate: u32,

    /// Game ID to look up in the catalogue
    #[arg(long, value_name = "ID", requires = "api_url")]
    game_id: Option<String>,

    /// Catalogue API base URL
    #[arg(long, value_name = "URL")]
    api_url: Option<String>,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose);

    tracing::info!("Starting selkies-client v{}", env!("CARGO_PKG_VERSION"));

    let config = SessionConfig {
        signalling_url: args.signalling_url.clone(),
        peer_id: args.peer_id,
        stun_servers: if args.stun.is_empty() {
            SessionConfig::default().stun_servers
        } else {
            args.stun.clone()
        },
        turn_servers: parse_turn_servers(&args.turn)?,
        force_turn: args.force_relay,
        video_bitrate_kbps: args.video_bitrate,
        audio_bitrate_kbps: args.audio_bitrate,
    };

    if let (Some(game_id), Some(api_url)) = (&args.game_id, &args.api_url) {
        match fetch_game_metadata(api_url, game_id).await {
            Ok(meta) => {
                tracing::info!("streaming title: {}", meta.title);
                if let Some(url) = meta.artwork() {
                    tracing::debug!("title artwork: {url}");
                }
            }
            Err(e) => tracing::warn!("metadata lookup failed: {e}"),
        }
    }

    let sink = Arc::new(RtpDrainSink::new());
    let session = PeerSession::new(config, sink);
    let supervisor = ReconnectionSupervisor::new(Arc::clone(&session));

    let mut events = session.events().subscribe();
    session.connect().await?;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    tracing::info!("commands: r = reconnect, s = stats, q = quit");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                break;
            }

            event = events.recv() => match event {
                Ok(event) => handle_event(&session, event).await,
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!("event stream lagged, {missed} events dropped");
                }
                Err(RecvError::Closed) => break,
            },

            line = stdin.next_line() => {
                let Ok(Some(line)) = line else { break };
                match line.trim() {
                    "q" => break,
                    "r" => {
                        if let Err(e) = supervisor.reconnect().await {
                            tracing::error!("reconnect failed: {e}");
                        }
                    }
                    "s" => match session.stats_snapshot() {
                        Some(snapshot) => tracing::info!(
                            "rtt {:?} ms, video {:?} kbps, audio {:?} kbps, lost {}, via {:?}",
                            snapshot.round_trip_time_ms,
                            snapshot.video_bitrate_kbps,
                            snapshot.audio_bitrate_kbps,
                            snapshot.packets_lost,
                            snapshot.connection_type,
                        ),
                        None => tracing::info!("no stats yet"),
                    },
                    "" => {}
                    other => tracing::warn!("unknown command: {other}"),
                }
            }
        }
    }

    session.disconnect().await;
    Ok(())
}

async fn handle_event(session: &Arc<PeerSession>, event: SessionEvent) {
    match event {
        SessionEvent::Status(message) => tracing::info!("{message}"),
        SessionEvent::Error(message) => tracing::error!("{message}"),
        SessionEvent::StateChanged(state) => tracing::info!("state: {state}"),
        SessionEvent::PlayStreamRequired => {
            // Headless: there is no autoplay policy to wait out
            if let Err(e) = session.play_stream().await {
                tracing::error!("failed to start playback: {e}");
            }
        }
        SessionEvent::ClipboardContent(text) => {
            tracing::info!("host clipboard: {} bytes", text.len());
        }
        SessionEvent::SystemAction(action) => tracing::info!("host requested: {action}"),
        SessionEvent::LatencyMeasurement(ms) => tracing::debug!("host latency: {ms} ms"),
        SessionEvent::StatsUpdated(snapshot) => {
            tracing::debug!(
                "stats: rtt {:?} ms, video {:?} kbps",
                snapshot.round_trip_time_ms,
                snapshot.video_bitrate_kbps,
            );
        }
        _ => {}
    }
}

fn parse_turn_servers(specs: &[String]) -> anyhow::Result<Vec<TurnServer>> {
    specs
        .iter()
        .map(|spec| {
            let mut parts = spec.splitn(3, ',');
            match (parts.next(), parts.next(), parts.next()) {
                (Some(url), Some(username), Some(credential)) => Ok(TurnServer::new(
                    url.to_string(),
                    username.to_string(),
                    credential.to_string(),
                )),
                _ => anyhow::bail!("invalid TURN spec (expected url,username,credential): {spec}"),
            }
        })
        .collect()
}

fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "selkies_client=error,webrtc=error",
        LogLevel::Warn => "selkies_client=warn,webrtc=warn",
        LogLevel::Info => "selkies_client=info,webrtc=warn",
        LogLevel::Verbose => "selkies_client=debug,webrtc=warn",
        LogLevel::Debug => "selkies_client=debug,webrtc=info",
        LogLevel::Trace => "selkies_client=trace,webrtc=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}
