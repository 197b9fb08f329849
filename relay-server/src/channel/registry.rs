use std::collections::HashMap;
use std::sync::Arc;

use common::{ChannelAddress, ControlMessage, RelayError, Result, TransportMode};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::broadcast;
use super::entry::{deliver_control, Channel, JoinOutcome, LeaveOutcome};
use crate::connection::{ConnectionId, SubscriberConnection};
use crate::relay::{RelayEventReceiver, RelayFactory};

/// 注册表参数
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// 通道未指定时使用的传输方式
    pub default_transport: TransportMode,
    /// 每个中继事件队列的容量
    pub event_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            default_transport: TransportMode::Tcp,
            event_capacity: 256,
        }
    }
}

/// 订阅结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// 新建通道，中继正在后台启动
    Created,
    /// 加入已有通道；`active` 为真时编码信息已同步下发
    Joined { active: bool },
}

/// 视频通道注册表
///
/// 通道在首次订阅时惰性创建，订阅者清空或中继关闭时移除。
/// 同一通道编号在任意时刻至多对应一个中继实例。
pub struct ChannelRegistry {
    channels: DashMap<u32, Arc<Channel>>,
    addresses: HashMap<u32, ChannelAddress>,
    factory: Arc<dyn RelayFactory>,
    config: RegistryConfig,
}

impl ChannelRegistry {
    pub fn new(
        addresses: impl IntoIterator<Item = ChannelAddress>,
        factory: Arc<dyn RelayFactory>,
        config: RegistryConfig,
    ) -> Self {
        let addresses = addresses
            .into_iter()
            .map(|address| (address.number, address))
            .collect();

        Self {
            channels: DashMap::new(),
            addresses,
            factory,
            config,
        }
    }

    /// 通道编号是否在配置中
    pub fn is_configured(&self, number: u32) -> bool {
        self.addresses.contains_key(&number)
    }

    /// 已配置的通道编号，顺序不保证
    pub fn configured_numbers(&self) -> Vec<u32> {
        self.addresses.keys().copied().collect()
    }

    pub fn address(&self, number: u32) -> Option<&ChannelAddress> {
        self.addresses.get(&number)
    }

    /// 获取或创建通道
    ///
    /// 检查与插入在同一个分片锁内完成，并发调用时只有一个调用者得到 `created = true`。
    /// 创建失败时不会留下任何注册项。新建通道的中继在后台启动。
    pub fn get_or_create(
        self: &Arc<Self>,
        number: u32,
        first: &Arc<SubscriberConnection>,
    ) -> Result<(Arc<Channel>, bool)> {
        let address = self
            .addresses
            .get(&number)
            .ok_or(RelayError::UnknownChannel(number as i64))?;

        let (channel, events) = match self.channels.entry(number) {
            Entry::Occupied(entry) => return Ok((entry.get().clone(), false)),
            Entry::Vacant(entry) => {
                let source = address
                    .to_source(self.config.default_transport)
                    .map_err(|e| RelayError::RelayConstruction(e.to_string()))?;
                let (tx, rx) = mpsc::channel(self.config.event_capacity);
                let relay = self.factory.create(&source, tx)?;

                let channel = Arc::new(Channel::new(source, relay, first.clone()));
                entry.insert(channel.clone());
                (channel, rx)
            }
        };

        info!(
            channel = number,
            connection = %first.id(),
            "Channel created, starting relay"
        );
        self.launch(channel.clone(), events);
        Ok((channel, true))
    }

    /// 把连接加入通道
    ///
    /// 已有通道处于 ACTIVE 时，编码消息和初始化分片会先发给该连接。
    pub async fn subscribe(
        self: &Arc<Self>,
        number: u32,
        connection: &Arc<SubscriberConnection>,
    ) -> Result<SubscribeOutcome> {
        loop {
            let (channel, created) = self.get_or_create(number, connection)?;
            if created {
                return Ok(SubscribeOutcome::Created);
            }

            match channel.join(connection).await {
                JoinOutcome::Joined { active } => {
                    debug!(
                        channel = number,
                        connection = %connection.id(),
                        active,
                        "Subscriber joined"
                    );
                    return Ok(SubscribeOutcome::Joined { active });
                }
                JoinOutcome::Retired => {
                    // 通道已拆除但尚未移除
                    self.detach(&channel);
                    tokio::task::yield_now().await;
                }
            }
        }
    }

    /// 把连接移出通道，最后一个订阅者离开时停止中继并移除通道
    pub async fn unsubscribe(&self, number: u32, id: ConnectionId) -> LeaveOutcome {
        let Some(channel) = self.lookup(number) else {
            return LeaveOutcome::NotSubscribed;
        };

        let outcome = channel.leave(id).await;
        if outcome == LeaveOutcome::Emptied {
            self.detach(&channel);
            channel.stop_relay();
            info!(channel = number, "Last subscriber left, channel removed");
        }
        outcome
    }

    pub fn lookup(&self, number: u32) -> Option<Arc<Channel>> {
        self.channels.get(&number).map(|entry| entry.value().clone())
    }

    /// 强制移除通道，当前订阅者会收到 ERROR
    pub async fn remove(&self, number: u32) -> Option<Arc<Channel>> {
        let (_, channel) = self.channels.remove(&number)?;
        self.teardown(&channel, &RelayError::ConnectionClosed).await;
        Some(channel)
    }

    /// 遍历当前通道
    ///
    /// 先复制通道句柄再调用 `f`，回调期间不持有分片锁。
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&Arc<Channel>),
    {
        let channels: Vec<_> = self
            .channels
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for channel in &channels {
            f(channel);
        }
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// 停止所有通道
    pub async fn shutdown(&self) {
        let mut channels = Vec::new();
        self.for_each(|channel| channels.push(channel.clone()));

        info!("Shutting down {} channels", channels.len());
        for channel in channels {
            self.teardown(&channel, &RelayError::ConnectionClosed).await;
        }
        self.channels.clear();
    }

    /// 中继关闭或启动失败
    ///
    /// 向当前订阅者发送 ERROR，清除其订阅关系并移除通道。通道已拆除时不做任何事。
    pub(super) async fn handle_closed(&self, channel: &Arc<Channel>, reason: &RelayError) {
        if !self.teardown(channel, reason).await {
            debug!(channel = channel.number(), "Redundant close ignored");
        }
    }

    async fn teardown(&self, channel: &Arc<Channel>, reason: &RelayError) -> bool {
        let number = channel.number();
        let Some(subscribers) = channel.retire().await else {
            return false;
        };

        self.detach(channel);
        channel.stop_relay();

        let message = ControlMessage::error(number as i64, reason.to_string());
        for connection in &subscribers {
            deliver_control(connection, &message);
        }

        warn!(
            channel = number,
            subscribers = subscribers.len(),
            reason = %reason,
            "Channel torn down"
        );
        true
    }

    /// 仅当注册项仍指向该通道实例时移除
    fn detach(&self, channel: &Arc<Channel>) {
        self.channels
            .remove_if(&channel.number(), |_, current| Arc::ptr_eq(current, channel));
    }

    fn launch(self: &Arc<Self>, channel: Arc<Channel>, events: RelayEventReceiver) {
        let registry = self.clone();
        let starting = channel.clone();
        tokio::spawn(async move {
            let number = starting.number();
            let cancel = starting.cancel_token().clone();
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(channel = number, "Relay start aborted");
                    return;
                }
                result = starting.relay().start() => result,
            };

            match result {
                Ok(()) => debug!(channel = number, "Relay started"),
                Err(e) => {
                    warn!(channel = number, error = %e, "Relay failed to start");
                    registry.handle_closed(&starting, &e).await;
                }
            }
        });

        tokio::spawn(broadcast::pump_events(self.clone(), channel, events));
    }
}
