//! bloomdex-server binary — thin CLI shell over the [`bloomdex_server`] library crate.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use bloomdex_core::indexer::load_index;
use bloomdex_server::config::ServerConfig;
use bloomdex_server::handlers::default_registry;
use bloomdex_server::net;

/// bloomdex-server — serves search/ping requests over a framed TCP protocol.
#[derive(Parser)]
#[command(name = "bloomdex-server", version, about)]
struct Cli {
    /// TOML config file (see `ServerConfig`); CLI flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Root directory to discover `<shard_id>/<column>.pickle` artifacts under
    #[arg(long)]
    index_root: Option<PathBuf>,

    /// Bucket name new artifacts are discovered into
    #[arg(long)]
    source: Option<String>,

    /// Address to listen on
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(long)]
    port: Option<u16>,
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("Received SIGINT, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to listen for Ctrl+C");
        info!("Received Ctrl+C, shutting down...");
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("bloomdex=info".parse().unwrap()),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => bloomdex_server::config::load_config(path).unwrap_or_else(|e| {
            error!(error = %e, "could not load config file");
            std::process::exit(1);
        }),
        None => ServerConfig::default(),
    };
    if let Some(root) = cli.index_root {
        config.index_root = root;
    }
    if let Some(source) = cli.source {
        config.source = source;
    }
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }

    let store = bloomdex_core::IndexStore::new();
    load_index(&config.index_root, &config.source, &store);
    info!(
        index_root = %config.index_root.display(),
        source = config.source.as_str(),
        nodes = store.size(),
        "index loaded"
    );
    let store = Arc::new(store);
    let registry = Arc::new(default_registry());

    let listener = net::bind(&config.host, config.port).await.unwrap_or_else(|e| {
        error!(host = config.host.as_str(), port = config.port, error = %e, "could not bind listener");
        std::process::exit(1);
    });

    tokio::select! {
        _ = net::serve(listener, registry, store) => {}
        _ = shutdown_signal() => {}
    }
}
