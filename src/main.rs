//! slotserve: a fixed-capacity HTTP/1.1 server.
//!
//! ```text
//!                 ┌──────────────────────────────────────────────┐
//!                 │                  slotserve                   │
//!   clients       │  ┌──────────┐   ┌────────────┐               │
//!   ──────────────┼─▶│ listener │──▶│  manager   │──┐            │
//!   (backlog = N) │  └──────────┘   │ tick loop  │  │ admit      │
//!                 │        ▲        └─────┬──────┘  ▼            │
//!                 │        │ pending      │   ┌──────────────┐   │
//!                 │        └──────────────┘   │ slots [0..N) │   │
//!                 │                           │ HttpConnection│  │
//!                 │                           └──────────────┘   │
//!                 └──────────────────────────────────────────────┘
//! ```

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use slotserve::config::{self, ConcurrencyMode, ServerConfig};
use slotserve::lifecycle::{self, signals, Shutdown};
use slotserve::observability::{logging, metrics};
use slotserve::{HttpConnectionFactory, Server, ServerSettings};

#[derive(Parser, Debug)]
#[command(name = "slotserve", version, about = "Fixed-capacity HTTP/1.1 server")]
struct Cli {
    /// Configuration file (TOML).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override listener.port.
    #[arg(short, long)]
    port: Option<u16>,

    /// Override listener.bind_address.
    #[arg(short, long)]
    bind: Option<Ipv4Addr>,

    /// Override listener.max_connections.
    #[arg(short = 'n', long)]
    max_connections: Option<u8>,

    /// Override execution.mode.
    #[arg(short, long, value_enum)]
    mode: Option<ConcurrencyMode>,
}

impl Cli {
    fn apply(&self, config: &mut ServerConfig) {
        if let Some(port) = self.port {
            config.listener.port = port;
        }
        if let Some(bind) = self.bind {
            config.listener.bind_address = bind;
        }
        if let Some(max) = self.max_connections {
            config.listener.max_connections = max;
        }
        if let Some(mode) = self.mode {
            config.execution.mode = mode;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => ServerConfig::default(),
    };
    cli.apply(&mut config);
    config::validate_config(&config).map_err(config::ConfigError::Validation)?;

    logging::init_logging(&config.observability)?;
    tracing::info!("slotserve v{} starting", env!("CARGO_PKG_VERSION"));

    tracing::info!(
        port = config.listener.port,
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        mode = ?config.execution.mode,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics endpoint");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let factory = HttpConnectionFactory::from_config(&config)?;
    tracing::info!(tls = factory.is_tls(), "Connection factory ready");
    let mut server = Server::with_settings(ServerSettings::from(&config), factory);
    for header in &config.default_headers {
        server.set_default_header(header.name.clone(), header.value.clone());
    }

    lifecycle::start_with_retry(&mut server, &config.startup).await?;

    let shutdown = Shutdown::new();
    signals::spawn_signal_listener(shutdown.clone());

    let budget = Duration::from_millis(config.execution.tick_ms);
    server.run_until(&shutdown, budget).await;

    let report = server.stop().await;
    tracing::info!(
        closed = report.closed,
        forced = report.forced,
        "Shutdown complete"
    );
    Ok(())
}
