use axum::{extract::State, Json};
use serde::Serialize;

use super::AppState;
use crate::channel::ChannelStats;

#[derive(Serialize)]
pub struct ApiResponse<T> {
    status: String,
    data: Option<T>,
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn success(data: T) -> Self {
        Self {
            status: "success".to_string(),
            data: Some(data),
            error: None,
        }
    }
}

/// 健康检查
pub async fn health_check() -> Json<ApiResponse<String>> {
    Json(ApiResponse::success("OK".to_string()))
}

/// 已配置的通道编号
pub async fn list_channels(State(state): State<AppState>) -> Json<ApiResponse<Vec<u32>>> {
    let mut numbers = state.registry.configured_numbers();
    numbers.sort_unstable();
    Json(ApiResponse::success(numbers))
}

/// 当前活跃通道的诊断信息
pub async fn active_channels(
    State(state): State<AppState>,
) -> Json<ApiResponse<Vec<ChannelStats>>> {
    let mut channels = Vec::new();
    state.registry.for_each(|channel| channels.push(channel.clone()));

    let mut stats = Vec::with_capacity(channels.len());
    for channel in channels {
        stats.push(channel.stats().await);
    }
    stats.sort_by_key(|s| s.number);

    Json(ApiResponse::success(stats))
}
