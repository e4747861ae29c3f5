//! Drone uplink binary entry point.
//!
//! Connects to the signaling server named by `HOST`/`SCHEME` and relays the
//! local RTP feed to the negotiated remote viewer.
//!
//! # Usage
//!
//! ```bash
//! HOST=signal.example.org:8080 SCHEME=wss dronelink
//!
//! # or explicitly
//! dronelink --host 127.0.0.1:8080 --scheme ws --ingest-addr 127.0.0.1:5004
//! ```

use anyhow::Context;
use clap::Parser;
use dronelink::{
    register_signal_handlers, relay, DroneConfig, RetryPolicy, SessionManager, SignalingChannel,
    WebRtcEngine,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Drone uplink
///
/// Relays a local RTP stream to one remote viewer through a negotiated peer
/// session, coordinated over a WebSocket signaling channel.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Signaling server host (host or host:port)
    #[arg(long, env = "HOST")]
    host: String,

    /// Signaling transport scheme: ws or wss
    #[arg(long, env = "SCHEME")]
    scheme: String,

    /// Identity announced to the signaling server (default: generated)
    #[arg(long, env = "DRONE_ID")]
    drone_id: Option<String>,

    /// STUN servers (comma-separated)
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "stun:stun.l.google.com:19302"
    )]
    stun_servers: Vec<String>,

    /// Local RTP ingestion address
    #[arg(long, default_value = "127.0.0.1:5004", env = "RTP_INGEST_ADDR")]
    ingest_addr: SocketAddr,

    /// Ingest socket receive buffer in bytes
    #[arg(long, default_value_t = 300 * 1024, env = "RTP_RECV_BUFFER")]
    ingest_recv_buffer: usize,

    /// Liveness frame interval in seconds
    #[arg(long, default_value_t = 20, env = "HEARTBEAT_SECS")]
    heartbeat_secs: u64,

    /// Maximum session construction retries
    #[arg(long, default_value_t = 3, env = "SESSION_MAX_RETRIES")]
    session_max_retries: u32,
}

fn build_config(args: &Args) -> DroneConfig {
    DroneConfig {
        signaling_url: format!("{}://{}/", args.scheme, args.host),
        drone_id: args
            .drone_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        stun_servers: args.stun_servers.clone(),
        ingest_addr: args.ingest_addr,
        ingest_recv_buffer: args.ingest_recv_buffer,
        heartbeat_secs: args.heartbeat_secs,
        session_retry: RetryPolicy {
            max_retries: args.session_max_retries,
            ..Default::default()
        },
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();

    let config = build_config(&args);
    config.validate().context("invalid configuration")?;

    info!(
        version = dronelink::version(),
        url = %config.signaling_url,
        "drone uplink starting"
    );

    let ingest = relay::bind_ingest(config.ingest_addr, config.ingest_recv_buffer)
        .await
        .context("binding RTP ingest listener")?;

    let channel = Arc::new(
        SignalingChannel::connect(&config.signaling_url, config.heartbeat_interval())
            .await
            .context("connecting to signaling server")?,
    );

    let engine =
        Arc::new(WebRtcEngine::new(&config.stun_servers).context("building connectivity engine")?);

    let manager = SessionManager::start(engine, Arc::clone(&channel), Arc::new(ingest), &config)
        .await
        .context("opening initial peer session")?;

    register_signal_handlers(&channel, &manager).await;

    info!(drone_id = %config.drone_id, "drone uplink running");

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutdown signal received");

    manager.shutdown().await;
    channel.close().await;
    Ok(())
}
