use std::sync::Arc;

use common::{
    ControlMessage, MessageContent, MessageType, RelayError, Result, NO_CORRELATION, QUERY_CHANNEL,
};
use tracing::{debug, info, warn};

use crate::channel::{ChannelRegistry, SubscribeOutcome};
use crate::connection::SubscriberConnection;

/// 控制消息路由
///
/// 解析连接上的文本控制消息，校验后修改订阅关系并回复。
/// 协议错误只回复给发起请求的连接，连接保持打开。
#[derive(Clone)]
pub struct ControlRouter {
    registry: Arc<ChannelRegistry>,
}

impl ControlRouter {
    pub fn new(registry: Arc<ChannelRegistry>) -> Self {
        Self { registry }
    }

    /// 处理一条文本消息
    pub async fn handle_text(&self, connection: &Arc<SubscriberConnection>, text: &str) {
        let message = match ControlMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                debug!(connection = %connection.id(), error = ?e, "Malformed control message");
                self.reply_error(connection, NO_CORRELATION, &e);
                return;
            }
        };

        let correlation = message.number.unwrap_or(NO_CORRELATION);
        if let Err(e) = self.dispatch(connection, message).await {
            self.reply_error(connection, correlation, &e);
        }
    }

    async fn dispatch(
        &self,
        connection: &Arc<SubscriberConnection>,
        message: ControlMessage,
    ) -> Result<()> {
        match &message.message_type {
            MessageType::Subscribe => self.subscribe(connection, &message).await,
            MessageType::Unsubscribe => self.unsubscribe(connection, &message).await,
            MessageType::Query => self.query(connection, &message),
            MessageType::Error => Err(RelayError::UnrecognizedType("ERROR".to_string())),
            MessageType::Other(other) => Err(RelayError::UnrecognizedType(other.clone())),
        }
    }

    async fn subscribe(
        &self,
        connection: &Arc<SubscriberConnection>,
        message: &ControlMessage,
    ) -> Result<()> {
        let number = self.configured_channel(message)?;
        connection.touch_subscribe().await;

        if !connection.join(number) {
            return Err(RelayError::AlreadySubscribed(number));
        }

        match self.registry.subscribe(number, connection).await {
            Ok(outcome) => {
                let created = outcome == SubscribeOutcome::Created;
                info!(
                    connection = %connection.id(),
                    channel = number,
                    created,
                    "Subscribed"
                );
                Ok(())
            }
            Err(e) => {
                connection.leave(number);
                warn!(connection = %connection.id(), channel = number, error = %e, "Subscribe failed");
                Err(e)
            }
        }
    }

    async fn unsubscribe(
        &self,
        connection: &Arc<SubscriberConnection>,
        message: &ControlMessage,
    ) -> Result<()> {
        let Some(number) = message.channel() else {
            return Ok(());
        };

        if connection.leave(number) {
            let outcome = self.registry.unsubscribe(number, connection.id()).await;
            info!(connection = %connection.id(), channel = number, ?outcome, "Unsubscribed");
        }
        Ok(())
    }

    fn query(&self, connection: &Arc<SubscriberConnection>, message: &ControlMessage) -> Result<()> {
        match message.content_text() {
            Some(QUERY_CHANNEL) => {
                let numbers = self.registry.configured_numbers();
                let reply = ControlMessage::query(
                    message.number,
                    MessageContent::Channels(numbers),
                );
                connection.send_control(&reply)
            }
            other => Err(RelayError::UnsupportedQuery(
                other.unwrap_or_default().to_string(),
            )),
        }
    }

    fn configured_channel(&self, message: &ControlMessage) -> Result<u32> {
        message
            .channel()
            .filter(|number| self.registry.is_configured(*number))
            .ok_or(RelayError::UnknownChannel(
                message.number.unwrap_or(NO_CORRELATION),
            ))
    }

    fn reply_error(&self, connection: &SubscriberConnection, correlation: i64, error: &RelayError) {
        let reply = ControlMessage::error(correlation, error.to_string());
        if let Err(e) = connection.send_control(&reply) {
            warn!(connection = %connection.id(), error = %e, "Failed to send error reply");
        }
    }
}
