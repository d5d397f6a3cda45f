//! rfbcast server: entry point.
//!
//! ```text
//! rfbcast-server                     Run with rfbcast.toml (or defaults)
//! rfbcast-server --config <path>     Load a custom config TOML
//! rfbcast-server --gen-config        Write default config to stdout
//! rfbcast-server --listen 5901       Accept viewers on a TCP port
//! rfbcast-server --host relay:443    Dial a WebSocket relay
//! ```

use std::path::PathBuf;
use std::sync::Mutex;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use rfbcast_server::config::{ServerConfig, TransportMode};
use rfbcast_server::service::RfbService;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "rfbcast-server", about = "Frame-differencing VNC server")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "rfbcast.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// Dial this WebSocket relay host instead of listening.
    #[arg(long)]
    host: Option<String>,

    /// Session label shown in the logs.
    #[arg(long)]
    channel: Option<String>,

    /// Accept viewers on this TCP port.
    #[arg(long, conflicts_with = "host")]
    listen: Option<u16>,
}

impl Cli {
    fn apply(&self, config: &mut ServerConfig) {
        if let Some(host) = &self.host {
            config.transport.mode = TransportMode::Websocket;
            config.transport.host = host.clone();
        }
        if let Some(port) = self.listen {
            config.transport.mode = TransportMode::Listen;
            config.transport.listen_port = port;
        }
        if let Some(channel) = &self.channel {
            config.transport.channel = channel.clone();
        }
    }
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&ServerConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    // Load config, then apply command-line overrides.
    let mut config = ServerConfig::load(&cli.config);
    cli.apply(&mut config);

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    if config.logging.file.is_empty() {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    } else {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.logging.file)?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init();
    }

    info!("rfbcast-server v{}", env!("CARGO_PKG_VERSION"));
    match config.transport.mode {
        TransportMode::Listen => info!("listen port: {}", config.transport.listen_port),
        TransportMode::Websocket => info!("relay: {}", config.websocket_url()),
    }
    info!("channel: {}", config.transport.channel);
    info!("source: {:?}", config.capture.source);

    let service = RfbService::new(config);
    let stop = service.stop_handle();

    // Ctrl-C handler.
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        stop.store(false, std::sync::atomic::Ordering::SeqCst);
    });

    service.run().await?;

    Ok(())
}
