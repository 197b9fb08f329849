// HTTP/WebSocket 接入层
//
// - `websocket`: 订阅连接，文本帧承载控制消息，二进制帧承载带通道标记的媒体数据
// - `handlers`: 通道列表、活跃通道诊断、健康检查
// - `server`: 监听与优雅退出

pub mod handlers;
pub mod routes;
pub mod server;
pub mod websocket;

use std::sync::Arc;

use crate::channel::ChannelRegistry;
use crate::connection::ConnectionManager;
use crate::control::ControlRouter;

pub use server::RelayServer;

/// 路由共享状态
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ChannelRegistry>,
    pub connections: ConnectionManager,
    pub router: ControlRouter,
    /// 每个连接出站队列的容量
    pub outbound_capacity: usize,
}

impl AppState {
    pub fn new(registry: Arc<ChannelRegistry>, outbound_capacity: usize) -> Self {
        Self {
            connections: ConnectionManager::new(registry.clone()),
            router: ControlRouter::new(registry.clone()),
            registry,
            outbound_capacity,
        }
    }
}
