//! PulseDB Server - TCP and HTTP front end for the storage engine

mod api;
mod config;
mod tcp;

use config::ServerConfig;
use pulsedb_core::{Engine, EngineConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = ServerConfig::load(config_path.as_deref())?;

    info!("Starting PulseDB server...");
    info!("Data directory: {:?}", config.data_dir);

    let engine = Arc::new(Engine::open(EngineConfig {
        data_dir: config.data_dir.clone(),
        cache_size: config.cache_size,
        handle_capacity: config.handle_capacity,
    })?);

    let tcp_listener = tokio::net::TcpListener::bind(config.tcp_addr).await?;
    info!("TCP interface listening on {}", config.tcp_addr);
    let http_listener = tokio::net::TcpListener::bind(config.http_addr).await?;
    info!("HTTP interface listening on {}", config.http_addr);

    let tcp_task = tokio::spawn(tcp::serve(tcp_listener, engine.clone()));
    let app = api::create_router(engine.clone());
    let http_task = tokio::spawn(async move { axum::serve(http_listener, app).await });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("shutdown signal received"),
        result = tcp_task => result??,
        result = http_task => result??,
    }

    engine.flush()?;
    info!("flushed open handles, bye");
    Ok(())
}
