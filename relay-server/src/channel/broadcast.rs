// 中继事件分发
//
// 每个通道一个事件泵任务，按中继上报的顺序处理事件。
// 订阅者快照在通道锁内获取，实际入队在锁外完成。

use std::sync::Arc;

use bytes::Bytes;
use common::{ControlMessage, RelayError};
use tracing::{debug, trace};

use super::entry::{deliver_control, deliver_frame, Channel};
use super::registry::ChannelRegistry;
use crate::connection::SubscriberConnection;
use crate::relay::{RelayEvent, RelayEventReceiver};

/// 处理中继事件直到通道拆除或中继关闭
pub(super) async fn pump_events(
    registry: Arc<ChannelRegistry>,
    channel: Arc<Channel>,
    mut events: RelayEventReceiver,
) {
    let number = channel.number();
    let cancel = channel.cancel_token().clone();

    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = events.recv() => event,
        };

        match event {
            Some(RelayEvent::CodecReady { codec, header }) => {
                on_codec_ready(&channel, codec, header).await;
            }
            Some(RelayEvent::Frame(data)) => {
                on_frame(&channel, &data).await;
            }
            Some(RelayEvent::Closed) | None => {
                registry.handle_closed(&channel, &RelayError::ConnectionClosed).await;
                break;
            }
        }
    }

    debug!(channel = number, "Event pump finished");
}

async fn on_codec_ready(channel: &Channel, codec: String, header: Bytes) {
    let number = channel.number();
    let message = ControlMessage::subscribe(number, codec.clone());

    let Some(subscribers) = channel.activate(codec, header.clone()).await else {
        debug!(channel = number, "Codec for retired channel discarded");
        return;
    };

    let delivered = broadcast_codec(&subscribers, number, &message, &header);
    debug!(
        channel = number,
        delivered,
        total = subscribers.len(),
        "Codec broadcast"
    );
}

async fn on_frame(channel: &Channel, data: &[u8]) {
    let Some(subscribers) = channel.frame_targets().await else {
        return;
    };

    let delivered = broadcast_frame(&subscribers, channel.number(), data);
    trace!(
        channel = channel.number(),
        bytes = data.len(),
        delivered,
        "Frame broadcast"
    );
}

/// 向订阅者快照下发编码消息和初始化分片，返回全部送达的订阅者数
pub fn broadcast_codec(
    subscribers: &[Arc<SubscriberConnection>],
    number: u32,
    message: &ControlMessage,
    header: &[u8],
) -> usize {
    subscribers
        .iter()
        .filter(|connection| {
            deliver_control(connection, message) && deliver_frame(connection, number, header)
        })
        .count()
}

/// 向订阅者快照下发媒体帧，单个失败不影响其他订阅者
pub fn broadcast_frame(subscribers: &[Arc<SubscriberConnection>], number: u32, data: &[u8]) -> usize {
    subscribers
        .iter()
        .filter(|connection| deliver_frame(connection, number, data))
        .count()
}
