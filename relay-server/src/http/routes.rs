use axum::{routing::get, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::AppState;

pub fn create_router(state: AppState, websocket_path: &str) -> Router {
    Router::new()
        // 订阅连接
        .route(websocket_path, get(super::websocket::websocket_handler))
        // 通道信息
        .route("/api/v1/channels", get(super::handlers::list_channels))
        .route(
            "/api/v1/channels/active",
            get(super::handlers::active_channels),
        )
        // 健康检查
        .route("/health", get(super::handlers::health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
