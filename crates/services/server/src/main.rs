//! Periscope server binary entry point
//!
//! # Usage
//!
//! ```bash
//! # Serve on the default address with the chromium on PATH
//! cargo run -p periscope-server
//!
//! # Explicit browser binary and bind address
//! cargo run -p periscope-server -- \
//!   --bind 0.0.0.0:5000 \
//!   --browser /usr/bin/chromium \
//!   --artifacts-dir /var/lib/periscope
//! ```

use anyhow::Context;
use clap::Parser;
use periscope_core::{
    Config, ExecutionBridge, Janitor, LifecycleManager, PeerSweeper, SavedSessionStore,
    SessionRegistry,
};
use periscope_engine_cdp::CdpEngine;
use periscope_server::{build_router, AppState};
use periscope_webrtc::{SignalingManager, WebRtcTransportConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Periscope Server
///
/// On-demand isolated browser sessions with live WebRTC streaming and a
/// data-channel interaction protocol.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind the HTTP listener to
    #[arg(long, default_value = "0.0.0.0:5000", env = "PERISCOPE_BIND")]
    bind: String,

    /// Optional TOML configuration file
    #[arg(long, env = "PERISCOPE_CONFIG")]
    config: Option<PathBuf>,

    /// Chromium-family browser binary
    #[arg(long, default_value = "chromium", env = "PERISCOPE_BROWSER")]
    browser: PathBuf,

    /// Directory for screenshot artifacts (overrides the config file)
    #[arg(long, env = "PERISCOPE_ARTIFACTS_DIR")]
    artifacts_dir: Option<String>,

    /// STUN servers (comma-separated)
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "stun:stun.l.google.com:19302"
    )]
    stun_servers: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(artifacts_dir) = args.artifacts_dir.clone() {
        config.artifacts_dir = artifacts_dir;
    }
    config.validate()?;
    let config = Arc::new(config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        bind = %args.bind,
        browser = %args.browser.display(),
        "periscope server starting"
    );

    // The bridge worker is a startup precondition; nothing serves without it.
    let bridge = ExecutionBridge::start(config.bridge_timeout())?;

    let registry = Arc::new(SessionRegistry::new());
    let saved = Arc::new(SavedSessionStore::new());
    let lifecycle = Arc::new(LifecycleManager::new(
        Arc::new(CdpEngine::new(args.browser.clone())),
        Arc::clone(&registry),
        Arc::clone(&saved),
        Arc::clone(&config),
    ));
    let signaling = SignalingManager::new(
        Arc::clone(&registry),
        Arc::clone(&config),
        WebRtcTransportConfig {
            stun_servers: args.stun_servers.clone(),
            ..Default::default()
        },
    );

    let janitor = Janitor::new(
        Arc::clone(&registry),
        Arc::clone(&lifecycle),
        Arc::clone(&config),
    )
    .with_peer_sweeper(Arc::clone(&signaling) as Arc<dyn PeerSweeper>);
    bridge.spawn(move || janitor.run())?;

    let state = AppState {
        bridge: Arc::clone(&bridge),
        registry,
        saved,
        lifecycle: Arc::clone(&lifecycle),
        signaling: Arc::clone(&signaling),
        config,
    };
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(&args.bind)
        .await
        .with_context(|| format!("binding {}", args.bind))?;
    info!(bind = %args.bind, "listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    // Reclaim everything before exiting: peers first, then sessions.
    let cleanup_signaling = Arc::clone(&signaling);
    let cleanup_lifecycle = Arc::clone(&lifecycle);
    let (peers, sessions) = bridge
        .submit(move || async move {
            let peers = cleanup_signaling.remove_all().await;
            let sessions = cleanup_lifecycle.destroy_all().await;
            (peers, sessions)
        })
        .await
        .unwrap_or((0, 0));
    info!(peers, sessions, "shutdown cleanup complete");

    Ok(())
}
