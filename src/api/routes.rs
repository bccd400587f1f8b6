use axum::{
    routing::{get, post},
    Router,
};

use crate::api::handlers::*;
use crate::server::ServerState;

/// API 라우터 생성
pub fn create_api_router() -> Router<ServerState> {
    Router::new()
        .route("/health", get(health))

        // 노드 API
        .route("/api/node/heartbeat", post(node_heartbeat))
        .route("/api/node/config", post(node_config))
        .route("/api/node/report", post(node_report))

        // 결제 API
        .route("/api/payment/confirm", post(confirm_payment))

        // 통계 API
        .route("/api/statistics/traffic/:user_id", get(get_traffic_statistics))
}
