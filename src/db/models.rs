use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// 사용자 DB 모델
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserRecord {
    pub id: i64,
    pub username: String,
    /// 남은 사용 가능 트래픽 (바이트)
    pub balance: i64,
    pub user_group_id: i64,
}

/// 노드 DB 모델
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct NodeRecord {
    pub id: i64,
    pub name: String,
    pub host: String,
    pub port: i64,
    #[serde(skip_serializing)]
    pub secret: String,
    pub status: String,
    /// JSON 배열 문자열: ["gost","iptables"]
    pub protocols: String,
    pub last_seen: Option<i64>,
}

impl NodeRecord {
    /// 지원 프로토콜 목록. JSON 배열이 아니면 단일 값으로 취급
    pub fn protocol_list(&self) -> Vec<String> {
        if self.protocols.is_empty() {
            return Vec::new();
        }
        serde_json::from_str::<Vec<String>>(&self.protocols)
            .unwrap_or_else(|_| vec![self.protocols.clone()])
    }
}

/// 포워딩 규칙 DB 모델
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RuleRecord {
    pub id: i64,
    pub node_id: i64,
    pub user_id: i64,
    pub name: String,
    pub protocol: String,
    pub enabled: bool,
    pub traffic_used: i64,
    pub traffic_limit: i64,
    /// kbps
    pub speed_limit: i64,
    pub mode: String,
    pub listen_port: i64,
}

/// 규칙 생성 입력
#[derive(Debug, Clone)]
pub struct NewRule {
    pub node_id: i64,
    pub user_id: i64,
    pub name: String,
    pub protocol: String,
    pub traffic_limit: i64,
    pub speed_limit: i64,
    pub mode: String,
    pub listen_port: i64,
}

/// 포워딩 대상 DB 모델
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TargetRecord {
    pub id: i64,
    pub rule_id: i64,
    pub host: String,
    pub port: i64,
    pub weight: i64,
    pub enabled: bool,
}

/// gost 전용 설정 DB 모델
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct GostRuleRecord {
    pub rule_id: i64,
    pub transport: String,
    pub tls: bool,
    pub chain: String,
    pub timeout: i64,
}

/// iptables 전용 설정 DB 모델
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct IpTablesRuleRecord {
    pub rule_id: i64,
    pub proto: String,
    pub snat: bool,
    pub iface: String,
}

/// 패키지 DB 모델
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PackageRecord {
    pub id: i64,
    pub name: String,
    /// 바이트
    pub traffic: i64,
    /// 센트
    pub price: i64,
    /// 0 이면 그룹 변경 없음
    pub user_group_id: i64,
}

/// 주문 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Success,
    Failed,
    Refunded,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Success => "success",
            OrderStatus::Failed => "failed",
            OrderStatus::Refunded => "refunded",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(OrderStatus::Pending),
            "success" => Some(OrderStatus::Success),
            "failed" => Some(OrderStatus::Failed),
            "refunded" => Some(OrderStatus::Refunded),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Pending)
    }
}

/// 주문 DB 모델
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct OrderRecord {
    pub id: i64,
    pub trade_no: String,
    pub user_id: i64,
    pub package_id: i64,
    /// 센트
    pub amount: i64,
    pub status: String,
    pub pay_type: String,
}

impl OrderRecord {
    /// 알 수 없는 상태 문자열이면 None
    pub fn order_status(&self) -> Option<OrderStatus> {
        OrderStatus::parse(&self.status)
    }
}

/// 트래픽 로그 DB 모델
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TrafficLogRecord {
    pub id: Option<i64>,
    pub rule_id: i64,
    pub node_id: i64,
    pub bytes_in: i64,
    pub bytes_out: i64,
    /// unix 초
    pub timestamp: i64,
}

/// 사용자별 트래픽 통계
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficStats {
    pub bytes_in: i64,
    pub bytes_out: i64,
}
