use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use smartbow_viewer::channel::WsConnector;
use smartbow_viewer::config::{AppConfig, ConfigStore};
use smartbow_viewer::events::{EventBus, SystemEvent};
use smartbow_viewer::geometry::Viewport;
use smartbow_viewer::viewer::{StreamingSession, ViewerBackend, ViewerOptions};
use smartbow_viewer::webrtc::{
    HttpSignaling, MediaBackend, RtcTransportFactory, RtpFrameSink, TurnServer,
};

/// How often the status line is printed
const STATUS_INTERVAL: Duration = Duration::from_secs(10);

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

/// Smartbow viewer command line arguments
#[derive(Parser, Debug)]
#[command(name = "smartbow-viewer")]
#[command(version, about = "Dual camera archery viewer with live hit overlay", long_about = None)]
struct CliArgs {
    /// Target camera id (overrides database config)
    #[arg(short = 'c', long, value_name = "ID")]
    camera: Option<String>,

    /// Shooter camera id (overrides database config)
    #[arg(short = 's', long, value_name = "ID")]
    shooter: Option<String>,

    /// Signaling base URL, `webrtc/offer/{camera}` is appended
    #[arg(long, value_name = "URL", env = "SMARTBOW_SIGNALING_URL")]
    signaling_url: Option<String>,

    /// Event channel base URL, `hit/{camera}` is appended
    #[arg(long, value_name = "URL", env = "SMARTBOW_CHANNEL_URL")]
    channel_url: Option<String>,

    /// TURN relay as host:port (UDP and TCP)
    #[arg(long, value_name = "HOST:PORT", requires_all = ["turn_username", "turn_credential"])]
    turn: Option<String>,

    #[arg(long, value_name = "USER")]
    turn_username: Option<String>,

    #[arg(long, value_name = "SECRET", env = "SMARTBOW_TURN_CREDENTIAL")]
    turn_credential: Option<String>,

    /// Give up on a camera after this many consecutive failures
    #[arg(long, value_name = "N")]
    max_attempts: Option<u32>,

    /// Rendered target video size announced to the detector
    #[arg(long, value_name = "WxH", value_parser = parse_viewport, default_value = "900x1200")]
    viewport: Viewport,

    /// Data directory path (default: ~/.smartbow-viewer)
    #[arg(short = 'd', long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    init_logging(args.log_level, args.verbose, args.log_json);

    tracing::info!("Starting smartbow-viewer v{}", env!("CARGO_PKG_VERSION"));

    let data_dir = args.data_dir.clone().unwrap_or_else(get_data_dir);
    tracing::info!("Data directory: {}", data_dir.display());
    tokio::fs::create_dir_all(&data_dir).await?;

    let config_store = ConfigStore::new(&data_dir.join("smartbow-viewer.db")).await?;
    let mut config = (*config_store.get()).clone();
    apply_overrides(&mut config, &args);
    if config != *config_store.get() {
        config_store.set(config.clone()).await?;
        tracing::info!("Saved command line overrides");
    }

    let media = MediaBackend {
        factory: Arc::new(RtcTransportFactory::new(config.media.rtc_config())),
        signaling: Arc::new(HttpSignaling::new(
            config.media.signaling_url.clone(),
            config.media.offer_timeout(),
        )?),
        offer_timeout: config.media.offer_timeout(),
    };
    let backend = ViewerBackend {
        media,
        connector: Arc::new(WsConnector),
    };

    let target_sink = RtpFrameSink::new(config.cameras.target.clone());
    let shooter_sink = RtpFrameSink::new(config.cameras.shooter.clone());
    let target_stats = target_sink.stats_handle();
    let shooter_stats = shooter_sink.stats_handle();

    let events = Arc::new(EventBus::new());
    let event_rx = events.subscribe();

    let mut session = StreamingSession::start(
        ViewerOptions::from_config(&config),
        backend,
        Box::new(target_sink),
        Box::new(shooter_sink),
        events,
    )?;
    session.set_viewport(args.viewport)?;

    let event_logger = tokio::spawn(log_events(event_rx));

    let mut ticker = tokio::time::interval(STATUS_INTERVAL);
    ticker.tick().await;
    let shutdown_signal = tokio::signal::ctrl_c();
    tokio::pin!(shutdown_signal);

    loop {
        tokio::select! {
            result = &mut shutdown_signal => {
                if let Err(e) = result {
                    tracing::error!("Failed to listen for shutdown signal: {}", e);
                }
                tracing::info!("Shutdown signal received");
                break;
            }
            _ = ticker.tick() => {
                let status = session.status();
                let target = target_stats.snapshot();
                let shooter = shooter_stats.snapshot();
                tracing::info!(
                    channel = %status.label(),
                    online = status.is_online(),
                    target_state = %status.target.state,
                    shooter_state = %status.shooter.state,
                    target_frames = target.frames,
                    shooter_frames = shooter.frames,
                    hits = session.hit_log().len(),
                    "status"
                );
                if let Some(error) = status.current_error() {
                    tracing::warn!("{}", error);
                }
            }
        }
    }

    session.stop().await;
    event_logger.abort();
    tracing::info!("Goodbye");
    Ok(())
}

fn apply_overrides(config: &mut AppConfig, args: &CliArgs) {
    if let Some(camera) = &args.camera {
        config.cameras.target = camera.clone();
    }
    if let Some(shooter) = &args.shooter {
        config.cameras.shooter = shooter.clone();
    }
    if let Some(url) = &args.signaling_url {
        config.media.signaling_url = url.clone();
    }
    if let Some(url) = &args.channel_url {
        config.channel.base_url = url.clone();
    }
    if let (Some(host_port), Some(username), Some(credential)) =
        (&args.turn, &args.turn_username, &args.turn_credential)
    {
        config.media.turn_servers = vec![TurnServer::udp_and_tcp(
            host_port,
            username.clone(),
            credential.clone(),
        )];
    }
    if args.max_attempts.is_some() {
        config.media.max_attempts = args.max_attempts;
    }
}

async fn log_events(mut rx: broadcast::Receiver<SystemEvent>) {
    loop {
        match rx.recv().await {
            Ok(SystemEvent::HitDetected {
                id,
                tip,
                inside,
                target_point,
                ..
            }) => {
                tracing::info!(
                    id,
                    inside,
                    "hit at ({:.1}, {:.1}){}",
                    tip.x,
                    tip.y,
                    target_point
                        .map(|p| format!(" -> target ({:.1}, {:.1})", p.x, p.y))
                        .unwrap_or_default()
                );
            }
            Ok(event) => tracing::debug!("{}", event.event_name()),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!("Event logger lagged, skipped {} events", n);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn parse_viewport(s: &str) -> Result<Viewport, String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {}", s))?;
    let w: f64 = w.trim().parse().map_err(|_| format!("invalid width {}", w))?;
    let h: f64 = h.trim().parse().map_err(|_| format!("invalid height {}", h))?;
    let viewport = Viewport::new(w, h);
    if !viewport.is_valid() {
        return Err(format!("viewport must be positive, got {}", s));
    }
    Ok(viewport)
}

fn init_logging(level: LogLevel, verbose_count: u8, json: bool) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "smartbow_viewer=error,webrtc=error",
        LogLevel::Warn => "smartbow_viewer=warn,webrtc=warn",
        LogLevel::Info => "smartbow_viewer=info,webrtc=warn",
        LogLevel::Verbose => "smartbow_viewer=debug,webrtc=warn",
        LogLevel::Debug => "smartbow_viewer=debug,webrtc=info",
        LogLevel::Trace => "smartbow_viewer=trace,webrtc=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };
    if let Err(err) = result {
        eprintln!("failed to initialize tracing: {}", err);
    }
}

/// Get the application data directory
fn get_data_dir() -> PathBuf {
    if let Ok(path) = std::env::var("SMARTBOW_DATA_DIR") {
        return PathBuf::from(path);
    }

    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".smartbow-viewer"),
        None => PathBuf::from(".smartbow-viewer"),
    }
}
