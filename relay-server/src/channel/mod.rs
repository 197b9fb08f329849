// 视频通道管理模块
//
// 负责通道的惰性创建与拆除、订阅关系维护以及中继事件的扇出。
//
// # 核心组件
//
// - `ChannelRegistry`: 通道编号到通道状态的并发映射，负责中继的创建与停止
// - `Channel`: 单个通道的状态机 STARTING -> ACTIVE -> INACTIVE
// - `broadcast`: 事件泵，把编码信息、初始化分片和媒体帧分发给订阅者

pub mod broadcast;
pub mod entry;
pub mod registry;

#[cfg(test)]
mod scenario_test;

pub use entry::{Channel, ChannelState, ChannelStats, JoinOutcome, LeaveOutcome};
pub use registry::{ChannelRegistry, RegistryConfig, SubscribeOutcome};
