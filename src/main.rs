//! Buffering proxy for the configuration service.
//!
//! ```text
//!   client ──▶ http server ──▶ dispatcher ──┬──▶ forwarder ──▶ upstream
//!                                           │        ▲
//!                      liveness monitor ◀───┤        │
//!                                           ├──▶ durable queue ──▶ sync worker
//!                                           └──▶ response cache ◀─┘
//! ```
//!
//! Writes go straight through while the upstream answers. When it does not,
//! they are queued in SQLite and replayed in order by the sync worker; reads
//! are served from the cache of earlier upstream answers.

use clap::Parser;
use std::path::PathBuf;
use tokio::net::TcpListener;

use buffer_proxy::config::{load_config, validation::validate_config, ConfigError, ProxyConfig};
use buffer_proxy::observability::{logging, metrics};
use buffer_proxy::{HttpServer, Shutdown};

#[derive(Parser)]
#[command(name = "buffer-proxy")]
#[command(about = "Store-and-forward proxy for the configuration service", long_about = None)]
struct Args {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `listener.bind_address`.
    #[arg(short, long)]
    bind: Option<String>,

    /// Override `upstream.base_url`.
    #[arg(short, long)]
    upstream: Option<String>,
}

fn resolve_config(args: &Args) -> Result<ProxyConfig, ConfigError> {
    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };
    if let Some(bind) = &args.bind {
        config.listener.bind_address = bind.clone();
    }
    if let Some(upstream) = &args.upstream {
        config.upstream.base_url = upstream.clone();
    }
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = resolve_config(&args)?;

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "buffer-proxy starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        upstream = %config.upstream.base_url,
        store = %config.store.path.display(),
        sync_interval_secs = config.sync.interval_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    shutdown.trigger_on_signal();

    let server = HttpServer::new(config)?;
    server.run(listener, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
