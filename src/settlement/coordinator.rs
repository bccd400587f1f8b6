//! 주문 정산 코디네이터
//!
//! 결제 완료 통지는 중복되거나 동시에 도착할 수 있습니다.
//! `order:lock:{trade_no}` 락으로 동시 처리를 줄이고, 락 안에서 주문 상태를 다시 읽은 뒤
//! `status = 'pending'` 조건부 UPDATE로 최종 판정합니다. 락을 잃거나 저장소가 내려가도
//! 조건부 UPDATE가 두 번째 적립을 막습니다.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use sqlx::sqlite::SqlitePool;
use thiserror::Error;

use crate::cache::EphemeralStore;
use crate::db::{OrderRepository, OrderStatus, PackageRepository};

/// 정산 락 기본 TTL
pub const SETTLEMENT_LOCK_TTL: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum SettlementError {
    #[error("주문을 찾을 수 없음: {0}")]
    OrderNotFound(String),

    #[error("사용자를 찾을 수 없음: {0}")]
    UserNotFound(i64),

    #[error("데이터베이스 에러: {0}")]
    Database(#[from] sqlx::Error),
}

/// 정산 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementOutcome {
    /// 이번 호출에서 적립 완료. `degraded`는 락 없이 처리했는지 여부
    Settled { degraded: bool },
    /// 이미 종결된 주문 (다른 호출이 먼저 처리)
    AlreadyProcessed,
    /// 다른 호출이 락을 보유 중
    InFlightElsewhere,
}

impl SettlementOutcome {
    pub fn is_settled(&self) -> bool {
        matches!(self, SettlementOutcome::Settled { .. })
    }
}

pub struct SettlementCoordinator {
    pool: SqlitePool,
    store: Arc<dyn EphemeralStore>,
    lock_ttl: Duration,
}

fn lock_key(trade_no: &str) -> String {
    format!("order:lock:{}", trade_no)
}

impl SettlementCoordinator {
    pub fn new(pool: SqlitePool, store: Arc<dyn EphemeralStore>, lock_ttl: Duration) -> Self {
        Self { pool, store, lock_ttl }
    }

    /// 주문을 success로 전환하고 `user_id`에게 트래픽 적립 (정확히 한 번)
    pub async fn settle(
        &self,
        trade_no: &str,
        user_id: i64,
        traffic_grant: i64,
    ) -> Result<SettlementOutcome, SettlementError> {
        let key = lock_key(trade_no);

        let locked = match self.store.set_nx(&key, "1", self.lock_ttl).await {
            Ok(true) => true,
            Ok(false) => {
                info!("다른 요청이 정산 중: trade_no={}", trade_no);
                return Ok(SettlementOutcome::InFlightElsewhere);
            }
            Err(e) => {
                warn!("정산 락 획득 실패, 락 없이 진행: trade_no={} error={}", trade_no, e);
                false
            }
        };

        let result = self.settle_pending(trade_no, user_id, traffic_grant, !locked).await;

        if locked {
            if let Err(e) = self.store.delete(&key).await {
                warn!("정산 락 해제 실패 (TTL 만료 대기): trade_no={} error={}", trade_no, e);
            }
        }

        if let Err(e) = &result {
            error!("❌ 정산 실패: trade_no={} error={}", trade_no, e);
        }
        result
    }

    async fn settle_pending(
        &self,
        trade_no: &str,
        user_id: i64,
        traffic_grant: i64,
        degraded: bool,
    ) -> Result<SettlementOutcome, SettlementError> {
        let order = OrderRepository::new(self.pool.clone())
            .find_by_trade_no(trade_no)
            .await?
            .ok_or_else(|| SettlementError::OrderNotFound(trade_no.to_string()))?;

        if order.order_status() != Some(OrderStatus::Pending) {
            debug!("이미 종결된 주문: trade_no={} status={}", trade_no, order.status);
            return Ok(SettlementOutcome::AlreadyProcessed);
        }

        if order.user_id != user_id {
            warn!(
                "주문 소유자와 적립 대상 불일치: trade_no={} order_user={} credited={}",
                trade_no, order.user_id, user_id
            );
        }

        // 트랜잭션이 커넥션을 잡기 전에 조회
        let group_id = PackageRepository::new(self.pool.clone())
            .find_by_id(order.package_id)
            .await?
            .map(|package| package.user_group_id)
            .unwrap_or(0);

        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE orders SET status = 'success', updated_at = CURRENT_TIMESTAMP
             WHERE trade_no = ? AND status = 'pending'"
        )
        .bind(trade_no)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            debug!("조건부 갱신 실패, 다른 요청이 먼저 정산: trade_no={}", trade_no);
            return Ok(SettlementOutcome::AlreadyProcessed);
        }

        let grant = traffic_grant.max(0);
        if grant > 0 || group_id > 0 {
            let credited = sqlx::query(
                "UPDATE users SET
                    balance = balance + ?,
                    user_group_id = CASE WHEN ? > 0 THEN ? ELSE user_group_id END,
                    updated_at = CURRENT_TIMESTAMP
                 WHERE id = ?"
            )
            .bind(grant)
            .bind(group_id)
            .bind(group_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

            if credited.rows_affected() == 0 {
                tx.rollback().await?;
                return Err(SettlementError::UserNotFound(user_id));
            }
        }

        tx.commit().await?;

        info!(
            "✅ 주문 정산 완료: trade_no={} user={} traffic=+{} group={}{}",
            trade_no,
            user_id,
            grant,
            group_id,
            if degraded { " (락 없이 처리)" } else { "" }
        );

        Ok(SettlementOutcome::Settled { degraded })
    }
}
