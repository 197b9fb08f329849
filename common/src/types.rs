use crate::error::{RelayError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// 上游拉流的传输方式提示
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    #[default]
    Tcp,
    Udp,
}

impl TransportMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportMode::Tcp => "tcp",
            TransportMode::Udp => "udp",
        }
    }
}

/// 视频通道地址（静态配置）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelAddress {
    /// 视频通道编号
    pub number: u32,
    /// 名称
    #[serde(default)]
    pub name: String,
    /// 源地址，可能包含账号和密码
    pub url: String,
    /// 传输方式，未设置时使用全局默认值
    #[serde(default)]
    pub transport: Option<TransportMode>,
}

impl ChannelAddress {
    /// 拆分出不含账号密码的源地址和凭证
    pub fn to_source(&self, default_transport: TransportMode) -> Result<ChannelSource> {
        let mut locator = Url::parse(&self.url)
            .map_err(|e| RelayError::InvalidLocator(format!("{}: {}", self.number, e)))?;

        let credential = if locator.username().is_empty() {
            None
        } else {
            Some(Credential {
                username: locator.username().to_string(),
                password: locator.password().map(str::to_string),
            })
        };

        // 协议不支持账号信息时 set_username 会失败，此时地址本身也不会携带凭证
        let _ = locator.set_username("");
        let _ = locator.set_password(None);

        Ok(ChannelSource {
            number: self.number,
            locator,
            credential,
            transport: self.transport.unwrap_or(default_transport),
        })
    }
}

/// 用户名和密码凭证
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub password: Option<String>,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// 构造上游中继所需的信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSource {
    pub number: u32,
    /// 不含账号密码的源地址
    pub locator: Url,
    pub credential: Option<Credential>,
    pub transport: TransportMode,
}

impl ChannelSource {
    /// 带凭证的完整地址，仅用于交给上游客户端，不应写入日志
    pub fn authenticated_url(&self) -> String {
        let mut url = self.locator.clone();
        if let Some(credential) = &self.credential {
            let _ = url.set_username(&credential.username);
            let _ = url.set_password(credential.password.as_deref());
        }
        url.to_string()
    }
}
