//! filter-proxy daemon.
//!
//! ```text
//!                 ┌──────────────────────── filter-proxy ────────────────────────┐
//!                 │                                                              │
//!   Client ──────▶│  net::listener ─▶ proxy::server ─▶ proxy::connection ────────┼──────▶ Backend
//!                 │                                      │        ▲              │
//!                 │                                      ▼        │              │
//!   Client ◀──────┼───────────────── http::parser + proxy::handler ◀─────────────┼─────── Backend
//!                 │                                      │                       │
//!                 │                                      ▼                       │
//!                 │                           filtering::chain                   │
//!                 │                                                              │
//!                 │  config (+ watcher)   observability   resilience   lifecycle │
//!                 └──────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use filter_proxy::config::loader::{load_config, resolve_config_path};
use filter_proxy::config::{ConfigWatcher, ProxyConfig};
use filter_proxy::filtering::FilterRegistry;
use filter_proxy::lifecycle::{signals, Shutdown};
use filter_proxy::net::Listener;
use filter_proxy::observability::{logging, metrics};
use filter_proxy::proxy::ProxyServer;

#[derive(Parser)]
#[command(name = "filter-proxy")]
#[command(about = "HTTP intercepting reverse proxy with a pluggable filter chain", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the proxy daemon
    Start {
        /// Configuration file (defaults to /etc/filter-proxy/proxy.toml if present)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Additional plugin search paths, separated like $PATH
        #[arg(short, long)]
        plugin_paths: Option<std::ffi::OsString>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            config,
            plugin_paths,
        } => start(config, plugin_paths),
    }
}

fn start(
    config_path: Option<PathBuf>,
    plugin_paths: Option<std::ffi::OsString>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = resolve_config_path(config_path.as_deref());
    let mut config = match &config_path {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };
    if let Some(paths) = plugin_paths {
        config.core.plugin_paths.extend(
            std::env::split_paths(&paths).map(|path| path.display().to_string()),
        );
    }

    logging::init_logging(&config.logging)?;

    tracing::info!(
        config = ?config_path,
        bind_address = %config.core.bind_address,
        max_connections = config.core.max_connections,
        "filter-proxy v{} starting",
        env!("CARGO_PKG_VERSION")
    );
    if !config.core.plugin_paths.is_empty() {
        tracing::info!(
            plugin_paths = ?config.core.plugin_paths,
            "Plugin paths accepted; filters resolve from the built-in registry"
        );
    }

    let mut runtime = tokio::runtime::Builder::new_multi_thread();
    runtime.enable_all();
    if config.core.workers > 0 {
        runtime.worker_threads(config.core.workers);
    }
    let runtime = runtime.build()?;

    runtime.block_on(serve(config, config_path))
}

async fn serve(
    config: ProxyConfig,
    config_path: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let registry = FilterRegistry::with_builtins();
    let server = ProxyServer::with_registry(&config, registry.clone())?;
    let listener = Listener::bind(&config.core).await?;

    // keep the watcher alive for the life of the server
    let (config_updates, _watcher) = match config_path {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(&path, registry);
            match watcher.run() {
                Ok(handle) => (updates, Some(handle)),
                Err(e) => {
                    tracing::warn!(error = %e, "Config watcher unavailable, hot reload disabled");
                    (tokio::sync::mpsc::unbounded_channel().1, None)
                }
            }
        }
        None => (tokio::sync::mpsc::unbounded_channel().1, None),
    };

    let shutdown = Shutdown::new();
    signals::spawn_signal_handler(shutdown.clone());

    server.run(listener, config_updates, shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
