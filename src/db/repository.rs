use super::models::{
    GostRuleRecord, IpTablesRuleRecord, NewRule, NodeRecord, OrderRecord, PackageRecord,
    RuleRecord, TargetRecord, TrafficLogRecord, TrafficStats, UserRecord,
};
use sqlx::sqlite::SqlitePool;
use sqlx::Error as SqlxError;

/// 사용자 저장소
pub struct UserRepository {
    pool: SqlitePool,
}

impl UserRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// 사용자 생성 후 ID 반환
    pub async fn create(&self, username: &str, user_group_id: i64) -> Result<i64, SqlxError> {
        let result = sqlx::query("INSERT INTO users (username, user_group_id) VALUES (?, ?)")
            .bind(username)
            .bind(user_group_id)
            .execute(&self.pool)
            .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<UserRecord>, SqlxError> {
        sqlx::query_as::<_, UserRecord>(
            "SELECT id, username, balance, user_group_id FROM users WHERE id = ?"
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }
}

/// 노드 저장소
pub struct NodeRepository {
    pool: SqlitePool,
}

impl NodeRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// 노드 등록 (초기 상태 offline)
    pub async fn create(
        &self,
        name: &str,
        host: &str,
        port: i64,
        secret: &str,
        protocols: &[&str],
    ) -> Result<i64, SqlxError> {
        let protocols_json = serde_json::to_string(protocols).unwrap_or_else(|_| "[]".to_string());

        let result = sqlx::query(
            "INSERT INTO nodes (name, host, port, secret, protocols) VALUES (?, ?, ?, ?, ?)"
        )
        .bind(name)
        .bind(host)
        .bind(port)
        .bind(secret)
        .bind(protocols_json)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<NodeRecord>, SqlxError> {
        sqlx::query_as::<_, NodeRecord>(
            "SELECT id, name, host, port, secret, status, protocols, last_seen
             FROM nodes WHERE id = ?"
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    /// 노드 상태 및 마지막 접속 시각 갱신
    pub async fn update_status(
        &self,
        id: i64,
        status: &str,
        last_seen: i64,
    ) -> Result<(), SqlxError> {
        sqlx::query(
            "UPDATE nodes SET status = ?, last_seen = ?, updated_at = CURRENT_TIMESTAMP
             WHERE id = ?"
        )
        .bind(status)
        .bind(last_seen)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// 포워딩 규칙 저장소
///
/// 사용량 컬럼(traffic_used, enabled)은 여기서 수정하지 않습니다.
/// 해당 컬럼은 `QuotaLedger`만 변경합니다.
pub struct RuleRepository {
    pool: SqlitePool,
}

impl RuleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, rule: &NewRule) -> Result<i64, SqlxError> {
        let result = sqlx::query(
            "INSERT INTO forwarding_rules
             (node_id, user_id, name, protocol, traffic_limit, speed_limit, mode, listen_port)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)"
        )
        .bind(rule.node_id)
        .bind(rule.user_id)
        .bind(&rule.name)
        .bind(&rule.protocol)
        .bind(rule.traffic_limit)
        .bind(rule.speed_limit)
        .bind(&rule.mode)
        .bind(rule.listen_port)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<RuleRecord>, SqlxError> {
        sqlx::query_as::<_, RuleRecord>(
            "SELECT id, node_id, user_id, name, protocol, enabled, traffic_used, traffic_limit,
                    speed_limit, mode, listen_port
             FROM forwarding_rules
             WHERE id = ?"
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    /// 노드별 규칙 조회
    pub async fn list_by_node(
        &self,
        node_id: i64,
        enabled_only: bool,
    ) -> Result<Vec<RuleRecord>, SqlxError> {
        sqlx::query_as::<_, RuleRecord>(
            "SELECT id, node_id, user_id, name, protocol, enabled, traffic_used, traffic_limit,
                    speed_limit, mode, listen_port
             FROM forwarding_rules
             WHERE node_id = ? AND (? = 0 OR enabled = 1)
             ORDER BY id ASC"
        )
        .bind(node_id)
        .bind(enabled_only)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn add_target(
        &self,
        rule_id: i64,
        host: &str,
        port: i64,
        weight: i64,
    ) -> Result<i64, SqlxError> {
        let result = sqlx::query(
            "INSERT INTO targets (rule_id, host, port, weight) VALUES (?, ?, ?, ?)"
        )
        .bind(rule_id)
        .bind(host)
        .bind(port)
        .bind(weight)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn targets(&self, rule_id: i64) -> Result<Vec<TargetRecord>, SqlxError> {
        sqlx::query_as::<_, TargetRecord>(
            "SELECT id, rule_id, host, port, weight, enabled
             FROM targets WHERE rule_id = ? ORDER BY id ASC"
        )
        .bind(rule_id)
        .fetch_all(&self.pool)
        .await
    }

    /// gost 설정 저장 (규칙당 1개)
    pub async fn upsert_gost_config(&self, config: &GostRuleRecord) -> Result<(), SqlxError> {
        sqlx::query(
            "INSERT INTO gost_rules (rule_id, transport, tls, chain, timeout)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(rule_id) DO UPDATE SET
                transport = excluded.transport,
                tls = excluded.tls,
                chain = excluded.chain,
                timeout = excluded.timeout"
        )
        .bind(config.rule_id)
        .bind(&config.transport)
        .bind(config.tls)
        .bind(&config.chain)
        .bind(config.timeout)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn gost_config(&self, rule_id: i64) -> Result<Option<GostRuleRecord>, SqlxError> {
        sqlx::query_as::<_, GostRuleRecord>(
            "SELECT rule_id, transport, tls, chain, timeout FROM gost_rules WHERE rule_id = ?"
        )
        .bind(rule_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// iptables 설정 저장 (규칙당 1개)
    pub async fn upsert_iptables_config(
        &self,
        config: &IpTablesRuleRecord,
    ) -> Result<(), SqlxError> {
        sqlx::query(
            "INSERT INTO iptables_rules (rule_id, proto, snat, iface)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(rule_id) DO UPDATE SET
                proto = excluded.proto,
                snat = excluded.snat,
                iface = excluded.iface"
        )
        .bind(config.rule_id)
        .bind(&config.proto)
        .bind(config.snat)
        .bind(&config.iface)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn iptables_config(
        &self,
        rule_id: i64,
    ) -> Result<Option<IpTablesRuleRecord>, SqlxError> {
        sqlx::query_as::<_, IpTablesRuleRecord>(
            "SELECT rule_id, proto, snat, iface FROM iptables_rules WHERE rule_id = ?"
        )
        .bind(rule_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// 사용자 소유 규칙 전체의 traffic_used 합계
    pub async fn user_traffic_used(&self, user_id: i64) -> Result<i64, SqlxError> {
        let (total,): (i64,) = sqlx::query_as(
            "SELECT COALESCE(SUM(traffic_used), 0) FROM forwarding_rules WHERE user_id = ?"
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(total)
    }
}

/// 패키지 저장소
pub struct PackageRepository {
    pool: SqlitePool,
}

impl PackageRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        name: &str,
        traffic: i64,
        price: i64,
        user_group_id: i64,
    ) -> Result<i64, SqlxError> {
        let result = sqlx::query(
            "INSERT INTO packages (name, traffic, price, user_group_id) VALUES (?, ?, ?, ?)"
        )
        .bind(name)
        .bind(traffic)
        .bind(price)
        .bind(user_group_id)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<PackageRecord>, SqlxError> {
        sqlx::query_as::<_, PackageRecord>(
            "SELECT id, name, traffic, price, user_group_id FROM packages WHERE id = ?"
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }
}

/// 주문 저장소
///
/// pending → success 전이는 `SettlementCoordinator` 전용입니다.
pub struct OrderRepository {
    pool: SqlitePool,
}

impl OrderRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// pending 상태로 주문 생성
    pub async fn create(
        &self,
        trade_no: &str,
        user_id: i64,
        package_id: i64,
        amount: i64,
        pay_type: &str,
    ) -> Result<i64, SqlxError> {
        let result = sqlx::query(
            "INSERT INTO orders (trade_no, user_id, package_id, amount, status, pay_type)
             VALUES (?, ?, ?, ?, 'pending', ?)"
        )
        .bind(trade_no)
        .bind(user_id)
        .bind(package_id)
        .bind(amount)
        .bind(pay_type)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn find_by_trade_no(&self, trade_no: &str) -> Result<Option<OrderRecord>, SqlxError> {
        sqlx::query_as::<_, OrderRecord>(
            "SELECT id, trade_no, user_id, package_id, amount, status, pay_type
             FROM orders
             WHERE trade_no = ?"
        )
        .bind(trade_no)
        .fetch_optional(&self.pool)
        .await
    }

    /// pending 주문만 failed로 변경. 변경되었으면 true
    pub async fn mark_failed(&self, trade_no: &str) -> Result<bool, SqlxError> {
        let result = sqlx::query(
            "UPDATE orders SET status = 'failed', updated_at = CURRENT_TIMESTAMP
             WHERE trade_no = ? AND status = 'pending'"
        )
        .bind(trade_no)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

/// 트래픽 로그 저장소 (추가 전용)
pub struct TrafficLogRepository {
    pool: SqlitePool,
}

impl TrafficLogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// 로그 기록
    pub async fn append(&self, entry: &TrafficLogRecord) -> Result<i64, SqlxError> {
        let result = sqlx::query(
            "INSERT INTO traffic_logs (rule_id, node_id, bytes_in, bytes_out, timestamp)
             VALUES (?, ?, ?, ?, ?)"
        )
        .bind(entry.rule_id)
        .bind(entry.node_id)
        .bind(entry.bytes_in)
        .bind(entry.bytes_out)
        .bind(entry.timestamp)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// 규칙별 로그 조회 (최신순)
    pub async fn find_by_rule(&self, rule_id: i64) -> Result<Vec<TrafficLogRecord>, SqlxError> {
        sqlx::query_as::<_, TrafficLogRecord>(
            "SELECT id, rule_id, node_id, bytes_in, bytes_out, timestamp
             FROM traffic_logs
             WHERE rule_id = ?
             ORDER BY timestamp DESC, id DESC"
        )
        .bind(rule_id)
        .fetch_all(&self.pool)
        .await
    }

    /// 사용자 소유 규칙의 since(unix 초) 이후 입출력 합계
    pub async fn user_traffic_stats(
        &self,
        user_id: i64,
        since: i64,
    ) -> Result<TrafficStats, SqlxError> {
        let (bytes_in, bytes_out): (i64, i64) = sqlx::query_as(
            "SELECT COALESCE(SUM(l.bytes_in), 0), COALESCE(SUM(l.bytes_out), 0)
             FROM traffic_logs l
             JOIN forwarding_rules r ON r.id = l.rule_id
             WHERE r.user_id = ? AND l.timestamp >= ?"
        )
        .bind(user_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(TrafficStats { bytes_in, bytes_out })
    }
}
