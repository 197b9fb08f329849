// 视频通道状态
//
// 每个通道的状态、编码信息和订阅者集合由一把异步锁保护。
// 锁内只修改集合和状态，或向订阅者的出站队列入队；
// 中继的启动、停止以及真正的网络发送都在锁外进行。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use common::{ChannelSource, ControlMessage};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::connection::{ConnectionId, SubscriberConnection};
use crate::relay::UpstreamRelay;

/// 通道状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelState {
    /// 中继启动中，尚未收到编码信息
    Starting,
    /// 编码已就绪，正在转发
    Active,
    /// 已拆除，等待从注册表移除
    Inactive,
}

/// 加入通道的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// 已加入；`active` 表示加入时编码信息已下发
    Joined { active: bool },
    /// 通道已拆除，需要重新获取
    Retired,
}

/// 移除订阅者的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveOutcome {
    NotSubscribed,
    Remaining(usize),
    /// 最后一个订阅者已离开，通道已拆除
    Emptied,
}

struct ChannelInner {
    state: ChannelState,
    codec: Option<String>,
    header: Option<Bytes>,
    subscribers: HashMap<ConnectionId, Arc<SubscriberConnection>>,
    activated_at: Option<DateTime<Utc>>,
}

/// 单个视频通道
pub struct Channel {
    source: ChannelSource,
    relay: Arc<dyn UpstreamRelay>,
    inner: Mutex<ChannelInner>,
    cancel: CancellationToken,
    stopped: AtomicBool,
    created_at: DateTime<Utc>,
}

impl Channel {
    /// 创建通道，首个订阅者作为临时订阅者直接加入
    pub(super) fn new(
        source: ChannelSource,
        relay: Arc<dyn UpstreamRelay>,
        first: Arc<SubscriberConnection>,
    ) -> Self {
        let mut subscribers = HashMap::new();
        subscribers.insert(first.id(), first);

        Self {
            source,
            relay,
            inner: Mutex::new(ChannelInner {
                state: ChannelState::Starting,
                codec: None,
                header: None,
                subscribers,
                activated_at: None,
            }),
            cancel: CancellationToken::new(),
            stopped: AtomicBool::new(false),
            created_at: Utc::now(),
        }
    }

    pub fn number(&self) -> u32 {
        self.source.number
    }

    pub fn source(&self) -> &ChannelSource {
        &self.source
    }

    pub fn relay(&self) -> &Arc<dyn UpstreamRelay> {
        &self.relay
    }

    pub(super) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub async fn state(&self) -> ChannelState {
        self.inner.lock().await.state
    }

    pub async fn subscriber_count(&self) -> usize {
        self.inner.lock().await.subscribers.len()
    }

    pub async fn has_subscriber(&self, id: ConnectionId) -> bool {
        self.inner.lock().await.subscribers.contains_key(&id)
    }

    /// 加入订阅者
    ///
    /// 编码已就绪时，先向新订阅者下发编码消息和初始化分片，再加入订阅集合，
    /// 保证它收到的第一个媒体帧一定在初始化分片之后。
    pub(super) async fn join(&self, connection: &Arc<SubscriberConnection>) -> JoinOutcome {
        let mut inner = self.inner.lock().await;

        match inner.state {
            ChannelState::Inactive => return JoinOutcome::Retired,
            ChannelState::Active => {
                let number = self.number();
                if let Some(codec) = &inner.codec {
                    deliver_control(connection, &ControlMessage::subscribe(number, codec.clone()));
                }
                if let Some(header) = &inner.header {
                    deliver_frame(connection, number, header);
                }
            }
            ChannelState::Starting => {}
        }

        let active = inner.state == ChannelState::Active;
        inner.subscribers.insert(connection.id(), connection.clone());
        JoinOutcome::Joined { active }
    }

    /// 移除订阅者，集合清空时把通道标记为拆除并取消中继任务
    pub(super) async fn leave(&self, id: ConnectionId) -> LeaveOutcome {
        let mut inner = self.inner.lock().await;

        if inner.state == ChannelState::Inactive || inner.subscribers.remove(&id).is_none() {
            return LeaveOutcome::NotSubscribed;
        }

        if inner.subscribers.is_empty() {
            inner.state = ChannelState::Inactive;
            self.cancel.cancel();
            LeaveOutcome::Emptied
        } else {
            LeaveOutcome::Remaining(inner.subscribers.len())
        }
    }

    /// 编码就绪：保存编码信息并返回当前订阅者快照
    ///
    /// 通道已拆除时返回 `None`，事件应被丢弃。
    pub(super) async fn activate(
        &self,
        codec: String,
        header: Bytes,
    ) -> Option<Vec<Arc<SubscriberConnection>>> {
        let mut inner = self.inner.lock().await;

        match inner.state {
            ChannelState::Inactive => return None,
            ChannelState::Active => {
                warn!(channel = self.number(), "Codec re-announced by relay");
            }
            ChannelState::Starting => {
                inner.activated_at = Some(Utc::now());
            }
        }

        inner.state = ChannelState::Active;
        inner.codec = Some(codec);
        inner.header = Some(header);
        Some(inner.subscribers.values().cloned().collect())
    }

    /// 媒体帧的订阅者快照，仅在 ACTIVE 状态下返回
    pub(super) async fn frame_targets(&self) -> Option<Vec<Arc<SubscriberConnection>>> {
        let inner = self.inner.lock().await;
        match inner.state {
            ChannelState::Active => Some(inner.subscribers.values().cloned().collect()),
            ChannelState::Starting => {
                warn!(channel = self.number(), "Frame received before codec, dropped");
                None
            }
            ChannelState::Inactive => None,
        }
    }

    /// 拆除通道并取出全部订阅者，已拆除时返回 `None`
    ///
    /// 订阅者的通道登记在同一临界区内清除，先于注册项移除。
    pub(super) async fn retire(&self) -> Option<Vec<Arc<SubscriberConnection>>> {
        let mut inner = self.inner.lock().await;
        if inner.state == ChannelState::Inactive {
            return None;
        }
        inner.state = ChannelState::Inactive;
        self.cancel.cancel();

        let number = self.number();
        let subscribers: Vec<_> = inner.subscribers.drain().map(|(_, conn)| conn).collect();
        for connection in &subscribers {
            connection.leave(number);
        }
        Some(subscribers)
    }

    /// 停止中继，每个通道实例只会真正调用一次
    pub(super) fn stop_relay(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            debug!(channel = self.number(), "Stopping relay");
            self.relay.stop();
        }
    }

    pub async fn stats(&self) -> ChannelStats {
        let inner = self.inner.lock().await;
        ChannelStats {
            number: self.number(),
            state: inner.state,
            subscriber_count: inner.subscribers.len(),
            codec: inner.codec.clone(),
            created_at: self.created_at,
            activated_at: inner.activated_at,
        }
    }
}

/// 通道统计信息
#[derive(Debug, Clone, Serialize)]
pub struct ChannelStats {
    pub number: u32,
    pub state: ChannelState,
    pub subscriber_count: usize,
    pub codec: Option<String>,
    pub created_at: DateTime<Utc>,
    pub activated_at: Option<DateTime<Utc>>,
}

/// 向单个订阅者发送控制消息，失败只记录日志
pub(crate) fn deliver_control(connection: &SubscriberConnection, message: &ControlMessage) -> bool {
    match connection.send_control(message) {
        Ok(()) => true,
        Err(e) => {
            warn!(connection = %connection.id(), error = %e, "Failed to deliver control message");
            false
        }
    }
}

/// 向单个订阅者发送二进制帧，失败只记录日志
pub(crate) fn deliver_frame(connection: &SubscriberConnection, number: u32, payload: &[u8]) -> bool {
    match connection.send_frame(number, payload) {
        Ok(()) => true,
        Err(e) => {
            warn!(
                connection = %connection.id(),
                channel = number,
                error = %e,
                "Failed to deliver frame"
            );
            false
        }
    }
}
