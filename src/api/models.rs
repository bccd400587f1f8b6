use serde::{Deserialize, Serialize};

use crate::node::{NodeConfig, ProbeData};
use crate::settlement::ConfirmationOutcome;

pub use crate::metering::HeartbeatReport as HeartbeatRequest;
pub use crate::settlement::PaymentConfirmation as PaymentConfirmRequest;

/// 헬스 체크 응답
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: i64,
}

/// 하트비트 응답
#[derive(Debug, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub status: String,
    pub message: String,
    pub rules_updated: usize,
    pub rules_disabled: Vec<i64>,
    pub accounting_skipped: bool,
}

/// 노드 설정 요청
#[derive(Debug, Serialize, Deserialize)]
pub struct NodeConfigRequest {
    pub node_id: i64,
    pub secret: String,
}

/// 노드 설정 응답
#[derive(Debug, Serialize, Deserialize)]
pub struct NodeConfigResponse {
    pub node_id: i64,
    pub config: NodeConfig,
}

/// 노드 상태 보고 요청 (프로브 데이터만)
#[derive(Debug, Serialize, Deserialize)]
pub struct NodeReportRequest {
    pub node_id: i64,
    pub secret: String,
    #[serde(default)]
    pub report: Option<ProbeData>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NodeReportResponse {
    pub status: String,
    pub message: String,
}

/// 결제 확인 응답
#[derive(Debug, Serialize)]
pub struct PaymentConfirmResponse {
    pub trade_no: String,
    pub outcome: ConfirmationOutcome,
    pub message: String,
}

/// 트래픽 통계 조회 파라미터
#[derive(Debug, Deserialize)]
pub struct TrafficStatisticsQuery {
    /// unix 초, 기본 0
    pub since: Option<i64>,
}

/// 사용자 트래픽 통계 응답
#[derive(Debug, Serialize, Deserialize)]
pub struct TrafficStatisticsResponse {
    pub user_id: i64,
    /// 남은 트래픽 잔액 (바이트)
    pub balance: i64,
    /// 소유 규칙 전체 누적 사용량
    pub traffic_used: i64,
    pub since: i64,
    pub bytes_in: i64,
    pub bytes_out: i64,
}

/// API 오류 응답
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}
