use std::future::Future;
use std::net::SocketAddr;

use common::Result;
use tracing::info;

use super::AppState;

/// 中继服务器
#[derive(Clone)]
pub struct RelayServer {
    addr: SocketAddr,
    websocket_path: String,
    state: AppState,
}

impl RelayServer {
    pub fn new(addr: SocketAddr, websocket_path: impl Into<String>, state: AppState) -> Self {
        Self {
            addr,
            websocket_path: websocket_path.into(),
            state,
        }
    }

    /// 运行直到 `shutdown` 完成，退出前停止所有通道
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = super::routes::create_router(self.state.clone(), &self.websocket_path);

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        info!(
            "Relay server listening on {} (WebSocket path {})",
            listener.local_addr()?,
            self.websocket_path
        );

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Server stopped accepting connections");
        self.state.registry.shutdown().await;
        Ok(())
    }
}
