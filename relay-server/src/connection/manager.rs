use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::subscriber::{ConnectionId, OutboundMessage, SubscriberConnection};
use crate::channel::ChannelRegistry;

/// 连接生命周期管理器
///
/// 连入时创建订阅者记录，断开时对其订阅的每个通道执行退订，
/// 最后一个订阅者离开的通道会随之停止中继。
#[derive(Clone)]
pub struct ConnectionManager {
    connections: Arc<DashMap<ConnectionId, Arc<SubscriberConnection>>>,
    registry: Arc<ChannelRegistry>,
}

impl ConnectionManager {
    pub fn new(registry: Arc<ChannelRegistry>) -> Self {
        Self {
            connections: Arc::new(DashMap::new()),
            registry,
        }
    }

    /// 登记新连接
    pub fn connect(&self, outbound: mpsc::Sender<OutboundMessage>) -> Arc<SubscriberConnection> {
        let connection = Arc::new(SubscriberConnection::new(outbound));
        self.connections.insert(connection.id(), connection.clone());
        info!(
            connection = %connection.id(),
            total = self.connections.len(),
            "Subscriber connected"
        );
        connection
    }

    /// 连接断开或出错
    pub async fn disconnect(&self, id: ConnectionId) {
        let Some((_, connection)) = self.connections.remove(&id) else {
            debug!(connection = %id, "Connection already removed");
            return;
        };

        let channels = connection.channels();
        for number in &channels {
            if connection.leave(*number) {
                self.registry.unsubscribe(*number, id).await;
            }
        }

        info!(
            connection = %id,
            channels = ?channels,
            total = self.connections.len(),
            "Subscriber disconnected"
        );
    }

    pub fn get(&self, id: ConnectionId) -> Option<Arc<SubscriberConnection>> {
        self.connections.get(&id).map(|entry| entry.value().clone())
    }

    pub fn count(&self) -> usize {
        self.connections.len()
    }
}
