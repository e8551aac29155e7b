//! # galunga_client
//!
//! Headless client: runs the demo scene locally, connects to a server over
//! UDP and periodically asks it to spawn entities.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use galunga_app::{AppConfig, ClientApplication, HeadlessFrontend, SpawnInput};
use galunga_bus::EventBus;
use galunga_net::{NetworkHost, UdpTransport};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "galunga_client", about = "Headless Galunga client over UDP")]
struct Args {
    /// Path to a JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Server address (overrides the config file and GALUNGA_SERVER_ADDR)
    #[arg(short, long)]
    server: Option<SocketAddr>,

    /// Local address to bind
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Ticks per second
    #[arg(short, long)]
    tick_rate: Option<f64>,

    /// Close after this many frames (0 = run until interrupted)
    #[arg(short, long, default_value_t = 0)]
    frames: u64,

    /// Milliseconds between spawn requests
    #[arg(long, default_value_t = 1000)]
    spawn_every_ms: u64,

    /// Seconds each requested entity lives
    #[arg(long, default_value_t = 2.0)]
    spawn_ttl: f32,

    /// Run without a server
    #[arg(long)]
    offline: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("galunga_client=info".parse()?)
                .add_directive("galunga_app=info".parse()?)
                .add_directive("galunga_net=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let mut config = AppConfig::load(args.config.as_deref())?;
    if let Some(server) = args.server {
        config.server_addr = server;
    }
    if let Some(bind) = args.bind {
        config.bind_addr = Some(bind);
    }
    if let Some(tick_rate) = args.tick_rate {
        config.tick.tick_rate = tick_rate;
    }
    config.validate()?;

    let network = if args.offline {
        None
    } else {
        let bind_addr = config.client_bind_addr();
        let transport = UdpTransport::bind(bind_addr)
            .with_context(|| format!("failed to bind {bind_addr}"))?;
        info!(server = %config.server_addr, "connecting");
        Some(NetworkHost::new(transport, config.server_addr, config.net.clone()))
    };

    let bus = EventBus::new();
    let mut frontend = HeadlessFrontend::new(&bus).with_frame_interval(Duration::from_millis(16));
    if args.frames > 0 {
        frontend = frontend.with_max_frames(args.frames);
    }
    let input = SpawnInput::new(Duration::from_millis(args.spawn_every_ms.max(1)), args.spawn_ttl);

    let mut app = ClientApplication::new("Galunga", &bus, frontend, input, network, &config)?;
    app.shutdown_flag()
        .watch_ctrl_c()
        .context("failed to install the interrupt handler")?;

    app.run()
}
