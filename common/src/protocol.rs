use crate::error::{RelayError, Result};
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// 无法关联到通道时错误消息使用的编号
pub const NO_CORRELATION: i64 = -1;

/// 二进制帧头长度（通道编号，大端4字节）
pub const FRAME_HEADER_LEN: usize = 4;

/// 查询通道列表时 content 的取值
pub const QUERY_CHANNEL: &str = "channel";

/// 控制消息类型
///
/// 线上格式为大写字符串，未识别的类型保留原文以便回复错误。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageType {
    /// 订阅
    Subscribe,
    /// 取消订阅
    Unsubscribe,
    /// 查询
    Query,
    /// 错误
    Error,
    /// 未识别的类型
    Other(String),
}

impl From<String> for MessageType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "SUBSCRIBE" => MessageType::Subscribe,
            "UNSUBSCRIBE" => MessageType::Unsubscribe,
            "QUERY" => MessageType::Query,
            "ERROR" => MessageType::Error,
            _ => MessageType::Other(value),
        }
    }
}

impl From<MessageType> for String {
    fn from(value: MessageType) -> Self {
        match value {
            MessageType::Subscribe => "SUBSCRIBE".to_string(),
            MessageType::Unsubscribe => "UNSUBSCRIBE".to_string(),
            MessageType::Query => "QUERY".to_string(),
            MessageType::Error => "ERROR".to_string(),
            MessageType::Other(other) => other,
        }
    }
}

/// 消息内容：编码描述/错误文本，或通道编号列表
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Channels(Vec<u32>),
}

impl MessageContent {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(text) => Some(text),
            MessageContent::Channels(_) => None,
        }
    }
}

/// 控制消息
///
/// ```json
/// {"type": "SUBSCRIBE", "number": 1, "content": ""}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlMessage {
    #[serde(rename = "type")]
    pub message_type: MessageType,
    /// 视频通道编号，用于请求与响应的关联
    #[serde(default)]
    pub number: Option<i64>,
    #[serde(default)]
    pub content: Option<MessageContent>,
}

impl ControlMessage {
    /// 解析文本控制消息
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| RelayError::MalformedMessage(e.to_string()))
    }

    /// 序列化为文本
    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// 创建订阅应答，content 为编码描述
    pub fn subscribe(number: u32, codec: impl Into<String>) -> Self {
        Self {
            message_type: MessageType::Subscribe,
            number: Some(number as i64),
            content: Some(MessageContent::Text(codec.into())),
        }
    }

    /// 创建取消订阅请求
    pub fn unsubscribe(number: u32) -> Self {
        Self {
            message_type: MessageType::Unsubscribe,
            number: Some(number as i64),
            content: None,
        }
    }

    /// 创建查询消息
    pub fn query(number: Option<i64>, content: MessageContent) -> Self {
        Self {
            message_type: MessageType::Query,
            number,
            content: Some(content),
        }
    }

    /// 创建错误消息
    pub fn error(number: i64, message: impl Into<String>) -> Self {
        Self {
            message_type: MessageType::Error,
            number: Some(number),
            content: Some(MessageContent::Text(message.into())),
        }
    }

    /// 请求中的通道编号（仅当其为合法的u32时）
    pub fn channel(&self) -> Option<u32> {
        self.number.and_then(|n| u32::try_from(n).ok())
    }

    pub fn content_text(&self) -> Option<&str> {
        self.content.as_ref().and_then(MessageContent::as_text)
    }
}

/// 编码带通道标记的二进制帧：4字节大端通道编号 + 原始负载
pub fn encode_frame(channel: u32, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
    buf.put_u32(channel);
    buf.extend_from_slice(payload);
    buf.freeze()
}

/// 解码二进制帧，长度不足4字节时返回 `None`
pub fn decode_frame(frame: &[u8]) -> Option<(u32, &[u8])> {
    if frame.len() < FRAME_HEADER_LEN {
        return None;
    }
    let (head, payload) = frame.split_at(FRAME_HEADER_LEN);
    let channel = u32::from_be_bytes([head[0], head[1], head[2], head[3]]);
    Some((channel, payload))
}
