use thiserror::Error;

/// 中继错误
///
/// 协议类错误的 `Display` 文本即为下发给客户端的 ERROR 消息内容。
#[derive(Error, Debug)]
pub enum RelayError {
    // ========== 协议错误 ==========
    #[error("malformed control message")]
    MalformedMessage(String),

    #[error("unknown channel")]
    UnknownChannel(i64),

    #[error("already subscribed")]
    AlreadySubscribed(u32),

    #[error("unsupported query content")]
    UnsupportedQuery(String),

    #[error("unrecognized message type")]
    UnrecognizedType(String),

    // ========== 上游错误 ==========
    #[error("relay construction failed: {0}")]
    RelayConstruction(String),

    #[error("relay start failed: {0}")]
    RelayStart(String),

    #[error("connection closed")]
    ConnectionClosed,

    // ========== 传输错误 ==========
    #[error("send failed: {0}")]
    SendFailed(String),

    // ========== 其他错误 ==========
    #[error("Invalid source locator: {0}")]
    InvalidLocator(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RelayError>;
