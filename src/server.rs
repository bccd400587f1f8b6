use std::sync::Arc;

use axum::Router;
use log::info;
use sqlx::sqlite::SqlitePool;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::create_api_router;
use crate::cache::EphemeralStore;
use crate::config::{AppConfig, ServerConfig};
use crate::metering::HeartbeatProcessor;
use crate::node::NodeConfigBuilder;
use crate::settlement::{ConfirmationService, SettlementCoordinator};

/// 서버 상태
#[derive(Clone)]
pub struct ServerState {
    pub pool: SqlitePool,
    pub heartbeat: Arc<HeartbeatProcessor>,
    pub config_builder: Arc<NodeConfigBuilder>,
    pub confirmations: Arc<ConfirmationService>,
}

impl ServerState {
    pub fn new(pool: SqlitePool, store: Arc<dyn EphemeralStore>, config: &AppConfig) -> Self {
        let settlement = Arc::new(SettlementCoordinator::new(
            pool.clone(),
            store.clone(),
            config.settlement.lock_ttl,
        ));

        Self {
            heartbeat: Arc::new(HeartbeatProcessor::new(pool.clone(), store, &config.metering)),
            config_builder: Arc::new(NodeConfigBuilder::new(pool.clone())),
            confirmations: Arc::new(ConfirmationService::new(pool.clone(), settlement)),
            pool,
        }
    }
}

/// 라우터 + 공통 미들웨어 구성
pub fn build_app(state: ServerState) -> Router {
    create_api_router()
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// 서버 시작
pub async fn start_server(config: &ServerConfig, state: ServerState) -> Result<(), std::io::Error> {
    let app = build_app(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("🚀 서버가 성공적으로 시작되었습니다: http://{}", addr);

    axum::serve(listener, app).await
}
