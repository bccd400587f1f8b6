use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use log::{debug, error, info, warn};
use uuid::Uuid;

use crate::api::models::*;
use crate::db::{RuleRepository, TrafficLogRepository, UserRepository};
use crate::metering::HeartbeatError;
use crate::node::{self, NodeError};
use crate::server::ServerState;
use crate::settlement::{ConfirmationError, ConfirmationOutcome, SettlementError};

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: &str, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            message: message.into(),
        }),
    )
}

fn not_found(error: &str, message: &str) -> ApiError {
    api_error(StatusCode::NOT_FOUND, error, message)
}

fn database_error(request_id: &Uuid, err: &sqlx::Error) -> ApiError {
    error!("[{}] 데이터베이스 에러: {}", request_id, err);
    api_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "DATABASE_ERROR",
        "데이터베이스 처리 중 오류가 발생했습니다",
    )
}

fn node_error(request_id: &Uuid, err: NodeError) -> ApiError {
    match err {
        NodeError::Unauthorized(node_id) => {
            warn!("[{}] 노드 인증 실패: node={}", request_id, node_id);
            api_error(
                StatusCode::UNAUTHORIZED,
                "INVALID_NODE_SECRET",
                "유효하지 않은 노드 인증 정보입니다",
            )
        }
        NodeError::Database(e) => database_error(request_id, &e),
    }
}

/// 헬스 체크 핸들러
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: chrono::Utc::now().timestamp(),
    })
}

/// 노드 하트비트 핸들러
pub async fn node_heartbeat(
    State(state): State<ServerState>,
    Json(payload): Json<HeartbeatRequest>,
) -> Result<Json<HeartbeatResponse>, ApiError> {
    let request_id = Uuid::new_v4();
    debug!(
        "[{}] 하트비트 요청: node={} counters={}",
        request_id,
        payload.node_id,
        payload.traffic_stats.len()
    );

    match state.heartbeat.process(&request_id, &payload).await {
        Ok(outcome) => Ok(Json(HeartbeatResponse {
            status: "OK".to_string(),
            message: "하트비트가 처리되었습니다".to_string(),
            rules_updated: outcome.rules_updated,
            rules_disabled: outcome.rules_disabled,
            accounting_skipped: outcome.accounting_skipped,
        })),
        Err(HeartbeatError::Unauthorized(node_id)) => {
            Err(node_error(&request_id, NodeError::Unauthorized(node_id)))
        }
        Err(HeartbeatError::Database(e)) => Err(database_error(&request_id, &e)),
    }
}

/// 노드 설정 조회 핸들러
pub async fn node_config(
    State(state): State<ServerState>,
    Json(payload): Json<NodeConfigRequest>,
) -> Result<Json<NodeConfigResponse>, ApiError> {
    let request_id = Uuid::new_v4();

    let node = node::authenticate(&state.pool, payload.node_id, &payload.secret)
        .await
        .map_err(|e| node_error(&request_id, e))?;

    let config = state
        .config_builder
        .build(node.id)
        .await
        .map_err(|e| database_error(&request_id, &e))?;

    info!("[{}] 노드 설정 전달: node={} rules={}", request_id, node.id, config.rules.len());

    Ok(Json(NodeConfigResponse {
        node_id: node.id,
        config,
    }))
}

/// 노드 상태 보고 핸들러
pub async fn node_report(
    State(state): State<ServerState>,
    Json(payload): Json<NodeReportRequest>,
) -> Result<Json<NodeReportResponse>, ApiError> {
    let request_id = Uuid::new_v4();

    let node = node::authenticate(&state.pool, payload.node_id, &payload.secret)
        .await
        .map_err(|e| node_error(&request_id, e))?;

    if let Some(report) = &payload.report {
        if let Err(e) = state.heartbeat.probes().save(node.id, report).await {
            warn!("[{}] 프로브 데이터 저장 실패: node={} error={}", request_id, node.id, e);
        }
    }

    info!("[{}] 노드 보고 수신: node={} ({})", request_id, node.id, node.name);

    Ok(Json(NodeReportResponse {
        status: "OK".to_string(),
        message: "보고가 접수되었습니다".to_string(),
    }))
}

/// 결제 확인 핸들러
pub async fn confirm_payment(
    State(state): State<ServerState>,
    Json(payload): Json<PaymentConfirmRequest>,
) -> Result<Json<PaymentConfirmResponse>, ApiError> {
    let request_id = Uuid::new_v4();
    info!(
        "[{}] 결제 통지 수신: trade_no={} status={}",
        request_id, payload.trade_no, payload.status
    );

    let outcome = match state.confirmations.confirm(&payload).await {
        Ok(outcome) => outcome,
        Err(ConfirmationError::OrderNotFound(_))
        | Err(ConfirmationError::Settlement(SettlementError::OrderNotFound(_))) => {
            return Err(not_found("ORDER_NOT_FOUND", "주문을 찾을 수 없습니다"));
        }
        Err(ConfirmationError::AmountMismatch { expected, actual }) => {
            return Err(api_error(
                StatusCode::BAD_REQUEST,
                "AMOUNT_MISMATCH",
                format!("결제 금액이 일치하지 않습니다 (주문 {}, 통지 {})", expected, actual),
            ));
        }
        Err(ConfirmationError::PackageNotFound(_)) => {
            return Err(not_found("PACKAGE_NOT_FOUND", "패키지를 찾을 수 없습니다"));
        }
        Err(ConfirmationError::Settlement(SettlementError::UserNotFound(_))) => {
            return Err(not_found("USER_NOT_FOUND", "사용자를 찾을 수 없습니다"));
        }
        Err(ConfirmationError::Settlement(SettlementError::Database(e)))
        | Err(ConfirmationError::Database(e)) => {
            return Err(database_error(&request_id, &e));
        }
    };

    let message = match outcome {
        ConfirmationOutcome::Settled => "결제가 반영되었습니다",
        ConfirmationOutcome::AlreadyProcessed => "이미 처리된 주문입니다",
        ConfirmationOutcome::InFlightElsewhere => "다른 요청이 처리 중입니다",
        ConfirmationOutcome::MarkedFailed => "결제 실패로 처리되었습니다",
    };

    Ok(Json(PaymentConfirmResponse {
        trade_no: payload.trade_no,
        outcome,
        message: message.to_string(),
    }))
}

/// 사용자 트래픽 통계 핸들러
pub async fn get_traffic_statistics(
    State(state): State<ServerState>,
    Path(user_id): Path<i64>,
    Query(params): Query<TrafficStatisticsQuery>,
) -> Result<Json<TrafficStatisticsResponse>, ApiError> {
    let request_id = Uuid::new_v4();
    let since = params.since.unwrap_or(0).max(0);

    let user = UserRepository::new(state.pool.clone())
        .find_by_id(user_id)
        .await
        .map_err(|e| database_error(&request_id, &e))?
        .ok_or_else(|| not_found("USER_NOT_FOUND", "사용자를 찾을 수 없습니다"))?;

    let traffic_used = RuleRepository::new(state.pool.clone())
        .user_traffic_used(user.id)
        .await
        .map_err(|e| database_error(&request_id, &e))?;

    let stats = TrafficLogRepository::new(state.pool.clone())
        .user_traffic_stats(user.id, since)
        .await
        .map_err(|e| database_error(&request_id, &e))?;

    Ok(Json(TrafficStatisticsResponse {
        user_id: user.id,
        balance: user.balance,
        traffic_used,
        since,
        bytes_in: stats.bytes_in,
        bytes_out: stats.bytes_out,
    }))
}
