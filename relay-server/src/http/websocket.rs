use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::AppState;
use crate::connection::OutboundMessage;

/// 控制消息的最大长度
const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// 订阅连接入口
pub async fn websocket_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (tx, mut rx) = mpsc::channel::<OutboundMessage>(state.outbound_capacity);
    let connection = state.connections.connect(tx);
    let id = connection.id();

    let (mut sink, mut stream) = socket.split();

    // 出站队列 -> WebSocket
    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let frame = match message {
                OutboundMessage::Text(text) => Message::Text(text),
                OutboundMessage::Binary(data) => Message::Binary(data.to_vec()),
            };
            if let Err(e) = sink.send(frame).await {
                warn!(connection = %id, error = %e, "Failed to write WebSocket message");
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => state.router.handle_text(&connection, &text).await,
            Ok(Message::Close(_)) => break,
            Ok(Message::Binary(_)) => {
                debug!(connection = %id, "Ignoring inbound binary message");
            }
            // ping/pong 由 axum 处理
            Ok(_) => {}
            Err(e) => {
                warn!(connection = %id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    state.connections.disconnect(id).await;
    drop(connection);
    writer.abort();
    info!(connection = %id, "WebSocket connection closed");
}
