//! # galunga_server
//!
//! Binds a UDP socket and runs the authoritative simulation until the tick
//! limit is reached or the process is interrupted.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use galunga_app::{AppConfig, ServerApplication};
use galunga_bus::EventBus;
use galunga_net::{NetworkServer, UdpTransport};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "galunga_server", about = "Galunga simulation server over UDP")]
struct Args {
    /// Path to a JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind (overrides the config file and GALUNGA_BIND_ADDR)
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Ticks per second
    #[arg(short, long)]
    tick_rate: Option<f64>,

    /// Stop after this many ticks (0 = run until interrupted)
    #[arg(short, long)]
    max_ticks: Option<u64>,

    /// Refuse connections beyond this many peers
    #[arg(long)]
    max_peers: Option<usize>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("galunga_server=info".parse()?)
                .add_directive("galunga_app=info".parse()?)
                .add_directive("galunga_net=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let mut config = AppConfig::load(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        config.bind_addr = Some(bind);
    }
    if let Some(tick_rate) = args.tick_rate {
        config.tick.tick_rate = tick_rate;
    }
    if let Some(max_ticks) = args.max_ticks {
        config.tick.max_ticks = max_ticks;
    }
    if let Some(max_peers) = args.max_peers {
        config.net.max_peers = max_peers;
    }
    config.validate()?;

    let bind_addr = config.server_bind_addr();
    let transport = UdpTransport::bind(bind_addr)
        .with_context(|| format!("failed to bind {bind_addr}"))?;

    let bus = EventBus::new();
    let network = NetworkServer::new(transport, config.net.clone());
    let mut app = ServerApplication::new("Galunga", &bus, network, &config);
    app.shutdown_flag()
        .watch_ctrl_c()
        .context("failed to install the interrupt handler")?;

    app.run()?;
    info!("server shut down");
    Ok(())
}
