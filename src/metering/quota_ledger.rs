//! 규칙별 사용량 장부
//!
//! 사용량 증가와 한도 초과 시 비활성화를 하나의 UPDATE 문으로 처리합니다.
//! 읽고-계산하고-쓰는 단계가 분리되지 않으므로 동시에 들어온 보고가
//! 서로의 증가분을 덮어쓰지 않고, traffic_used가 한도를 넘지도 않습니다.

use log::{debug, warn};
use sqlx::sqlite::SqlitePool;
use thiserror::Error;

use crate::db::{TrafficLogRecord, TrafficLogRepository};
use crate::metering::TrafficDelta;

/// 호출 1회당 반영 가능한 최대 증분 (10 GiB)
pub const MAX_DELTA_PER_CALL: i64 = 10 * 1024 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("규칙을 찾을 수 없음: {0}")]
    RuleNotFound(i64),

    #[error("데이터베이스 에러: {0}")]
    Database(#[from] sqlx::Error),
}

/// 사용량 장부
pub struct QuotaLedger {
    pool: SqlitePool,
    max_delta_per_call: i64,
    logs: TrafficLogRepository,
}

impl QuotaLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self::with_max_delta(pool, MAX_DELTA_PER_CALL)
    }

    pub fn with_max_delta(pool: SqlitePool, max_delta_per_call: i64) -> Self {
        Self {
            logs: TrafficLogRepository::new(pool.clone()),
            pool,
            max_delta_per_call: max_delta_per_call.max(1),
        }
    }

    /// 규칙 사용량에 증분 반영
    ///
    /// 반환값은 반영 후 규칙이 비활성 상태(한도 도달)인지 여부입니다.
    /// 0 이하 증분은 아무것도 바꾸지 않고 `Ok(false)`를 반환합니다.
    pub async fn apply_delta(&self, rule_id: i64, delta: i64) -> Result<bool, LedgerError> {
        if delta <= 0 {
            return Ok(false);
        }

        let applied = if delta > self.max_delta_per_call {
            warn!(
                "비정상적으로 큰 증분 감지, 상한으로 조정: rule={} delta={} max={}",
                rule_id, delta, self.max_delta_per_call
            );
            self.max_delta_per_call
        } else {
            delta
        };

        let row: Option<(i64, i64, bool)> = sqlx::query_as(
            "UPDATE forwarding_rules SET
                enabled = CASE
                    WHEN traffic_limit > 0 AND traffic_used + ? >= traffic_limit THEN 0
                    ELSE enabled
                END,
                traffic_used = CASE
                    WHEN traffic_limit > 0 AND traffic_used + ? >= traffic_limit THEN traffic_limit
                    ELSE traffic_used + ?
                END,
                updated_at = CURRENT_TIMESTAMP
             WHERE id = ?
             RETURNING traffic_used, traffic_limit, enabled"
        )
        .bind(applied)
        .bind(applied)
        .bind(applied)
        .bind(rule_id)
        .fetch_optional(&self.pool)
        .await?;

        let (used, limit, enabled) = row.ok_or(LedgerError::RuleNotFound(rule_id))?;
        let disabled = limit > 0 && used >= limit;

        debug!(
            "사용량 반영: rule={} +{} → {}/{} enabled={}",
            rule_id, applied, used, limit, enabled
        );

        Ok(disabled)
    }

    /// 적용된 증분을 트래픽 로그로 기록
    pub async fn append_traffic_log(
        &self,
        rule_id: i64,
        node_id: i64,
        delta: &TrafficDelta,
        timestamp: i64,
    ) -> Result<i64, LedgerError> {
        let id = self
            .logs
            .append(&TrafficLogRecord {
                id: None,
                rule_id,
                node_id,
                bytes_in: delta.bytes_in,
                bytes_out: delta.bytes_out,
                timestamp,
            })
            .await?;
        Ok(id)
    }
}
