mod channel;
mod config;
mod connection;
mod control;
mod http;
mod relay;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Arg, Command};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::channel::{ChannelRegistry, RegistryConfig};
use crate::config::{Config, DEFAULT_CONFIG_FILE};
use crate::http::{AppState, RelayServer};
use crate::relay::FfmpegRelayFactory;

#[tokio::main]
async fn main() -> Result<()> {
    // 解析命令行参数
    let matches = Command::new("relay-server")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Multiplexes live video channels to WebSocket subscribers")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Path to the TOML config file")
                .default_value(DEFAULT_CONFIG_FILE),
        )
        .get_matches();

    let config_path = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or(DEFAULT_CONFIG_FILE);

    // 加载配置
    let config = Config::load(config_path)
        .await
        .with_context(|| format!("failed to load config from {}", config_path))?;

    // 初始化日志，RUST_LOG 优先
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .context("invalid log level")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("🚀 Relay server starting...");
    info!(
        "✓ Configuration loaded: {} channels, ffmpeg at {}",
        config.channels.len(),
        config.relay.ffmpeg_path
    );

    // 创建共享状态
    let factory = Arc::new(FfmpegRelayFactory::new(&config.relay.ffmpeg_path));
    let registry = Arc::new(ChannelRegistry::new(
        config.channels.clone(),
        factory,
        RegistryConfig {
            default_transport: config.relay.transport,
            event_capacity: config.relay.event_capacity,
        },
    ));
    let state = AppState::new(registry, config.server.outbound_capacity);

    let addr: SocketAddr = config
        .bind_address()
        .parse()
        .with_context(|| format!("invalid bind address {}", config.bind_address()))?;
    let server = RelayServer::new(addr, config.server.websocket_path.clone(), state);

    info!("✅ Relay server ready!");

    server.run_until(shutdown_signal()).await?;

    info!("Relay server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
