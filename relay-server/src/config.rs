use std::collections::HashSet;
use std::path::Path;

use common::{ChannelAddress, TransportMode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

/// 默认配置文件
pub const DEFAULT_CONFIG_FILE: &str = "relay.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {key}: {value}")]
    InvalidOverride { key: String, value: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// 服务配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub relay: RelayConfig,
    pub logging: LoggingConfig,
    /// 视频通道列表
    pub channels: Vec<ChannelAddress>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// WebSocket 接入路径
    pub websocket_path: String,
    /// 每个连接出站队列的容量
    pub outbound_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            websocket_path: "/rtsp".to_string(),
            outbound_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub ffmpeg_path: String,
    /// 通道未指定时的拉流方式
    pub transport: TransportMode,
    /// 每个中继事件队列的容量
    pub event_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            transport: TransportMode::Tcp,
            event_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// EnvFilter 语法，例如 `info` 或 `relay_server=debug,info`
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// 加载配置文件并应用环境变量
    ///
    /// 文件不存在时使用默认配置。
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut config = match tokio::fs::read_to_string(path).await {
            Ok(content) => Self::from_toml_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("Config file {} not found, using defaults", path.display());
                Self::default()
            }
            Err(e) => return Err(e.into()),
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// 按键名覆盖配置项
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("RELAY_SERVER_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("RELAY_SERVER_PORT") {
            self.server.port = port.parse().map_err(|_| ConfigError::InvalidOverride {
                key: "RELAY_SERVER_PORT".to_string(),
                value: port,
            })?;
        }
        if let Some(level) = lookup("RELAY_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(path) = lookup("RELAY_FFMPEG_PATH") {
            self.relay.ffmpeg_path = path;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Invalid("server.port must not be 0".to_string()));
        }
        if !self.server.websocket_path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "server.websocket_path must start with '/': {}",
                self.server.websocket_path
            )));
        }
        if self.server.outbound_capacity == 0 || self.relay.event_capacity == 0 {
            return Err(ConfigError::Invalid("queue capacity must be positive".to_string()));
        }

        let mut seen = HashSet::new();
        for channel in &self.channels {
            if !seen.insert(channel.number) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate channel number {}",
                    channel.number
                )));
            }
            if channel.url.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "channel {} has an empty url",
                    channel.number
                )));
            }
            channel
                .to_source(self.relay.transport)
                .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
