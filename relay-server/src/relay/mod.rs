// 上游中继模块
//
// 本模块定义了上游中继（每个视频通道一个）的抽象接口。中继负责连接媒体源，
// 并通过事件通道依次上报：编码就绪 -> 媒体帧 -> 关闭。
//
// # 核心组件
//
// - `UpstreamRelay`: 中继生命周期控制接口
// - `RelayFactory`: 根据通道源信息构造中继
// - `RelayEvent`: 中继上报的三类事件
// - `FfmpegRelay`: 基于ffmpeg进程的中继实现

pub mod ffmpeg;
pub mod fmp4;
#[cfg(test)]
pub mod mock;

use async_trait::async_trait;
use bytes::Bytes;
use common::{ChannelSource, Result};
use std::sync::Arc;
use tokio::sync::mpsc;

pub use ffmpeg::FfmpegRelayFactory;

/// 中继事件
///
/// 同一个中继上报的事件保证顺序：`CodecReady` 先于所有 `Frame`，`Closed` 为最后一个事件。
#[derive(Debug, Clone)]
pub enum RelayEvent {
    /// 编码信息就绪，附带初始化分片（ftyp + moov）
    CodecReady { codec: String, header: Bytes },
    /// 媒体分片（moof + mdat）
    Frame(Bytes),
    /// 中继已关闭
    Closed,
}

pub type RelayEventSender = mpsc::Sender<RelayEvent>;
pub type RelayEventReceiver = mpsc::Receiver<RelayEvent>;

/// 上游中继
#[async_trait]
pub trait UpstreamRelay: Send + Sync {
    /// 启动中继，可能涉及网络IO
    async fn start(&self) -> Result<()>;

    /// 停止中继，可重复调用
    fn stop(&self);

    /// 编码描述，仅在编码就绪后有效
    fn codec(&self) -> Option<String>;

    /// 初始化分片，仅在编码就绪后有效
    fn header(&self) -> Option<Bytes>;
}

/// 中继工厂
///
/// `create` 只做构造和参数校验，不允许阻塞或发起网络IO，
/// 它会在注册表的原子插入路径上被调用。
pub trait RelayFactory: Send + Sync {
    fn create(
        &self,
        source: &ChannelSource,
        events: RelayEventSender,
    ) -> Result<Arc<dyn UpstreamRelay>>;
}
