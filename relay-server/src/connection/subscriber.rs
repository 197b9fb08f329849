use bytes::Bytes;
use chrono::{DateTime, Utc};
use common::{encode_frame, ControlMessage, RelayError, Result};
use dashmap::DashSet;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use uuid::Uuid;

pub type ConnectionId = Uuid;

/// 待写入传输层的消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    Text(String),
    Binary(Bytes),
}

/// 订阅者连接
///
/// 每个传输连接对应一个实例。发送只写入有界的出站队列，不做IO，
/// 由传输层的写任务负责真正的发送。
#[derive(Debug)]
pub struct SubscriberConnection {
    id: ConnectionId,
    outbound: mpsc::Sender<OutboundMessage>,
    /// 连入时间
    connected_at: DateTime<Utc>,
    /// 最新订阅触发时间
    last_subscribe_at: RwLock<Option<DateTime<Utc>>>,
    /// 订阅的视频通道编号
    channels: DashSet<u32>,
}

impl SubscriberConnection {
    pub fn new(outbound: mpsc::Sender<OutboundMessage>) -> Self {
        Self {
            id: Uuid::new_v4(),
            outbound,
            connected_at: Utc::now(),
            last_subscribe_at: RwLock::new(None),
            channels: DashSet::new(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub async fn last_subscribe_at(&self) -> Option<DateTime<Utc>> {
        *self.last_subscribe_at.read().await
    }

    pub async fn touch_subscribe(&self) {
        *self.last_subscribe_at.write().await = Some(Utc::now());
    }

    /// 登记通道，已登记时返回 false
    pub fn join(&self, number: u32) -> bool {
        self.channels.insert(number)
    }

    /// 移除通道，未登记时返回 false
    pub fn leave(&self, number: u32) -> bool {
        self.channels.remove(&number).is_some()
    }

    pub fn is_subscribed(&self, number: u32) -> bool {
        self.channels.contains(&number)
    }

    pub fn channels(&self) -> Vec<u32> {
        self.channels.iter().map(|n| *n).collect()
    }

    /// 发送控制消息
    pub fn send_control(&self, message: &ControlMessage) -> Result<()> {
        self.enqueue(OutboundMessage::Text(message.to_text()?))
    }

    /// 发送带通道标记的二进制帧
    pub fn send_frame(&self, number: u32, payload: &[u8]) -> Result<()> {
        self.enqueue(OutboundMessage::Binary(encode_frame(number, payload)))
    }

    fn enqueue(&self, message: OutboundMessage) -> Result<()> {
        self.outbound.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => {
                RelayError::SendFailed(format!("outbound queue full for connection {}", self.id))
            }
            TrySendError::Closed(_) => {
                RelayError::SendFailed(format!("connection {} already closed", self.id))
            }
        })
    }
}
